//! Wire Protocol
//!
//! The gateway speaks the cache-style text protocol on both sides of a command:
//!
//! - `frame`: decodes incoming input into a command name and byte-string arguments
//! - `reply`: the four reply shapes plus errors, and their serialization
//! - `encoding`: converts arguments to stored values and stored values back to
//!   reply bytes, including the legacy `__64__` tunnel
//!
//! ## Example
//!
//! ```
//! use recgate::protocol::{parse_frame, Reply};
//!
//! let (frame, consumed) = parse_frame(b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n")
//!     .unwrap()
//!     .unwrap();
//! assert_eq!(frame.name, "GET");
//! assert_eq!(consumed, 23);
//!
//! assert_eq!(Reply::bulk("Ariz").serialize(), b"$4\r\nAriz\r\n");
//! ```

pub mod encoding;
pub mod frame;
pub mod reply;

pub use encoding::{decode, encode, value_reply, Decoded, EncodingError, LEGACY_MARKER};
pub use frame::{parse_frame, Frame, FrameError};
pub use reply::Reply;
