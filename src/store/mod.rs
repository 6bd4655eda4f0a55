//! Record Store Module
//!
//! The gateway never owns data. Every command is translated into calls against a
//! remote record store reached through the [`RecordStore`] trait: flat records
//! addressed by `(namespace, set, user key)`, holding named bins, with the TTL on
//! the record rather than on individual bins.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐      ┌───────────────────────────────────────────┐
//! │  Command handler │─────>│          dyn RecordStore                  │
//! │  (blocking call) │      │                                           │
//! └──────────────────┘      │  get / get_header / exists / put / delete │
//!                           │  touch / operate / execute (procedures)   │
//!                           │  query_equal / execute_background         │
//!                           └───────────────┬───────────────────────────┘
//!                                           │
//!                           ┌───────────────┴──────────────┐
//!                           │  remote cluster client, or   │
//!                           │  MemoryStore for tests and   │
//!                           │  local development           │
//!                           └──────────────────────────────┘
//! ```
//!
//! ## Semantics every backend must honor
//!
//! - Reads of a missing record return `Ok(None)`, not an error.
//! - `touch` on a missing record fails with [`StoreError::KeyNotFound`].
//! - A `CreateOnly` put on an existing record fails with [`StoreError::KeyExists`].
//! - An `Add` operation against a non-integer bin fails with
//!   [`StoreError::BinType`] and leaves the record untouched.
//! - Every write applies the policy's expiration to the record.

pub mod key;
pub mod memory;
pub mod value;

use std::sync::mpsc;

use thiserror::Error;

pub use key::{Key, KeyError};
pub use memory::MemoryStore;
pub use value::{Bin, Record, RecordHeader, Value};

/// Longest bin name the store accepts.
pub const MAX_BIN_NAME_LEN: usize = 15;

/// Largest record (bin names plus values) the store accepts, in bytes.
pub const MAX_RECORD_SIZE: usize = 1024 * 1024;

/// Errors reported by a record store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A create-only write found an existing record
    #[error("key already exists")]
    KeyExists,

    /// The operation requires an existing record
    #[error("key not found")]
    KeyNotFound,

    /// An arithmetic operation hit a bin that does not hold an integer
    #[error("bin type error")]
    BinType,

    /// Bin names are limited to [`MAX_BIN_NAME_LEN`] bytes
    #[error("bin name too long: '{0}'")]
    BinNameTooLong(String),

    /// The record would exceed [`MAX_RECORD_SIZE`]
    #[error("record too big: {size} bytes (max: {max})")]
    RecordTooBig { size: usize, max: usize },

    /// A server-side procedure rejected its input
    #[error("procedure {name} failed: {reason}")]
    Procedure { name: &'static str, reason: String },

    /// A background job ended without completing
    #[error("background job failed: {0}")]
    Job(String),
}

impl StoreError {
    /// The numeric result code the database protocol uses for this condition.
    pub fn result_code(&self) -> i32 {
        match self {
            StoreError::KeyNotFound => 2,
            StoreError::KeyExists => 5,
            StoreError::BinType => 12,
            StoreError::RecordTooBig { .. } => 13,
            StoreError::BinNameTooLong(_) => 21,
            StoreError::Procedure { .. } => 100,
            StoreError::Job(_) => -1,
        }
    }
}

/// Result type for record store calls.
pub type StoreResult<T> = Result<T, StoreError>;

/// How many replicas must answer a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsistencyLevel {
    #[default]
    One,
    All,
}

/// Which replica a read is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplicaPolicy {
    Master,
    #[default]
    MasterProles,
    Sequence,
}

/// Policy applied to every read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadPolicy {
    pub consistency: ConsistencyLevel,
    pub replica: ReplicaPolicy,
}

/// How many replicas must acknowledge a write before it returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommitLevel {
    All,
    #[default]
    Master,
}

/// What a write does when the record already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordExistsAction {
    /// Merge the written bins into the record, creating it if needed
    #[default]
    Update,
    /// Fail with [`StoreError::KeyExists`] if the record exists
    CreateOnly,
}

/// Expiration a write stamps onto the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Expiration {
    /// Use the namespace's default TTL
    #[default]
    NamespaceDefault,
    /// Expire after this many seconds; zero means the namespace default
    Seconds(u32),
}

impl Expiration {
    /// Maps a client TTL argument onto an expiration.
    ///
    /// `-1` selects the default policy; any other negative value is rejected.
    pub fn from_ttl(ttl: i64) -> Option<Self> {
        match ttl {
            -1 => Some(Expiration::NamespaceDefault),
            0..=0xFFFF_FFFF => Some(Expiration::Seconds(ttl as u32)),
            _ => None,
        }
    }
}

/// Policy applied to every write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WritePolicy {
    pub expiration: Expiration,
    pub record_exists: RecordExistsAction,
    pub commit_level: CommitLevel,
}

impl WritePolicy {
    pub fn new(expiration: Expiration) -> Self {
        Self {
            expiration,
            ..Default::default()
        }
    }

    pub fn create_only(mut self) -> Self {
        self.record_exists = RecordExistsAction::CreateOnly;
        self
    }
}

/// One step of an atomic multi-operation on a single record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Overwrite a bin
    Put(Bin),
    /// Add an integer to a bin, starting from zero if it is absent
    Add(Bin),
    /// Read a bin back after the writes in the same call
    Get(String),
}

impl Operation {
    fn is_write(&self) -> bool {
        !matches!(self, Operation::Get(_))
    }
}

/// Which end of a list a procedure works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListEnd {
    Head,
    Tail,
}

/// Named server-side procedures executed atomically against one record.
///
/// Hash procedures treat every bin of the record as a field. List procedures
/// keep an ordered sequence in `bin` and its length in `<bin>_size`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Procedure {
    HashSet { field: String, value: Value },
    HashDelete { field: String },
    HashSetMany { fields: Vec<(String, Value)> },
    HashGetAll,
    ListPush { end: ListEnd, bin: String, value: Value, ttl: i64 },
    ListPop { end: ListEnd, bin: String, count: usize, ttl: i64 },
    ListRange { bin: String, start: i64, stop: i64 },
    ListTrim { bin: String, start: i64, stop: i64 },
}

impl Procedure {
    /// The procedure's registered name.
    pub fn name(&self) -> &'static str {
        match self {
            Procedure::HashSet { .. } => "HSET",
            Procedure::HashDelete { .. } => "HDEL",
            Procedure::HashSetMany { .. } => "HMSET",
            Procedure::HashGetAll => "HGETALL",
            Procedure::ListPush { end: ListEnd::Head, .. } => "LPUSH",
            Procedure::ListPush { end: ListEnd::Tail, .. } => "RPUSH",
            Procedure::ListPop { end: ListEnd::Head, .. } => "LPOP",
            Procedure::ListPop { end: ListEnd::Tail, .. } => "RPOP",
            Procedure::ListRange { .. } => "LRANGE",
            Procedure::ListTrim { .. } => "LTRIM",
        }
    }
}

/// What a procedure hands back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcedureResult {
    Nil,
    Int(i64),
    Status(String),
    List(Vec<Value>),
}

/// Jobs that run server-side over a whole namespace/set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackgroundJob {
    /// Delete every record in the set
    DeleteAll,
}

/// Rows produced by a secondary-index scan. Each row is read independently.
pub type RecordStream = Box<dyn Iterator<Item = StoreResult<Record>> + Send>;

/// Completion side of a background job.
#[derive(Debug)]
pub struct JobCompletion {
    tx: mpsc::Sender<StoreResult<()>>,
}

impl JobCompletion {
    pub fn complete(self, result: StoreResult<()>) {
        // The waiter may have given up; nothing to report to.
        let _ = self.tx.send(result);
    }
}

/// Handle to a running background job.
#[derive(Debug)]
pub struct JobHandle {
    rx: mpsc::Receiver<StoreResult<()>>,
}

impl JobHandle {
    /// Creates a linked completion/handle pair.
    pub fn pair() -> (JobCompletion, JobHandle) {
        let (tx, rx) = mpsc::channel();
        (JobCompletion { tx }, JobHandle { rx })
    }

    /// Blocks until the job signals completion or failure.
    pub fn wait(self) -> StoreResult<()> {
        self.rx
            .recv()
            .unwrap_or_else(|_| Err(StoreError::Job("job dropped without signalling".into())))
    }
}

/// A client handle to the record store.
///
/// All calls block until the store answers. Timeouts and retries belong to the
/// implementation's policies; callers never loop on errors.
pub trait RecordStore: Send + Sync {
    /// Reads the named bins (all bins when `bins` is empty).
    fn get(&self, policy: &ReadPolicy, key: &Key, bins: &[&str]) -> StoreResult<Option<Record>>;

    /// Reads only the record's metadata.
    fn get_header(&self, policy: &ReadPolicy, key: &Key) -> StoreResult<Option<RecordHeader>>;

    fn exists(&self, policy: &ReadPolicy, key: &Key) -> StoreResult<bool>;

    fn put(&self, policy: &WritePolicy, key: &Key, bins: Vec<Bin>) -> StoreResult<()>;

    /// Deletes the record, returning whether it existed.
    fn delete(&self, policy: &WritePolicy, key: &Key) -> StoreResult<bool>;

    /// Rewrites the record's expiration without changing its bins.
    fn touch(&self, policy: &WritePolicy, key: &Key) -> StoreResult<()>;

    /// Applies `ops` atomically, returning the bins requested by `Get` steps.
    fn operate(
        &self,
        policy: &WritePolicy,
        key: &Key,
        ops: &[Operation],
    ) -> StoreResult<Option<Record>>;

    fn execute(
        &self,
        policy: &WritePolicy,
        key: &Key,
        procedure: Procedure,
    ) -> StoreResult<ProcedureResult>;

    /// Scans every record in `namespace`/`set` whose `bin` equals `value`.
    fn query_equal(
        &self,
        namespace: &str,
        set: &str,
        bin: &str,
        value: &Value,
    ) -> StoreResult<RecordStream>;

    fn execute_background(
        &self,
        namespace: &str,
        set: &str,
        job: BackgroundJob,
    ) -> StoreResult<JobHandle>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiration_from_ttl() {
        assert_eq!(Expiration::from_ttl(-1), Some(Expiration::NamespaceDefault));
        assert_eq!(Expiration::from_ttl(0), Some(Expiration::Seconds(0)));
        assert_eq!(Expiration::from_ttl(60), Some(Expiration::Seconds(60)));
        assert_eq!(Expiration::from_ttl(-2), None);
        assert_eq!(Expiration::from_ttl(1 << 40), None);
    }

    #[test]
    fn test_job_handle_reports_dropped_job() {
        let (completion, handle) = JobHandle::pair();
        drop(completion);
        assert!(matches!(handle.wait(), Err(StoreError::Job(_))));
    }

    #[test]
    fn test_procedure_names() {
        let push = Procedure::ListPush {
            end: ListEnd::Head,
            bin: "r".into(),
            value: Value::Int(1),
            ttl: -1,
        };
        assert_eq!(push.name(), "LPUSH");
        assert_eq!(Procedure::HashGetAll.name(), "HGETALL");
    }
}
