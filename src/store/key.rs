//! Database keys.
//!
//! A key is the triple `(namespace, set, user key)`. Keys are built from raw
//! argument bytes; anything that cannot be represented faithfully is rejected
//! rather than truncated or lossily converted.

use std::fmt;

use thiserror::Error;

/// Longest namespace name, in bytes.
pub const MAX_NAMESPACE_LEN: usize = 31;

/// Longest set name, in bytes.
pub const MAX_SET_LEN: usize = 63;

/// Longest user key, in bytes.
pub const MAX_USER_KEY_LEN: usize = 8 * 1024;

/// Errors building a [`Key`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("namespace must not be empty")]
    EmptyNamespace,

    #[error("namespace too long: {0} bytes (max: {MAX_NAMESPACE_LEN})")]
    NamespaceTooLong(usize),

    #[error("set name too long: {0} bytes (max: {MAX_SET_LEN})")]
    SetTooLong(usize),

    #[error("key too long: {0} bytes (max: {MAX_USER_KEY_LEN})")]
    UserKeyTooLong(usize),

    #[error("key is not valid UTF-8")]
    InvalidUtf8,
}

/// Address of one record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key {
    namespace: String,
    set: String,
    user_key: String,
}

impl Key {
    pub fn new(
        namespace: &str,
        set: &str,
        user_key: impl Into<String>,
    ) -> Result<Self, KeyError> {
        validate_scope(namespace, set)?;
        let user_key = user_key.into();
        if user_key.len() > MAX_USER_KEY_LEN {
            return Err(KeyError::UserKeyTooLong(user_key.len()));
        }
        Ok(Self {
            namespace: namespace.to_string(),
            set: set.to_string(),
            user_key,
        })
    }

    /// Builds a key from a raw client argument.
    pub fn from_bytes(namespace: &str, set: &str, raw: &[u8]) -> Result<Self, KeyError> {
        let user_key = std::str::from_utf8(raw).map_err(|_| KeyError::InvalidUtf8)?;
        Self::new(namespace, set, user_key)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn set(&self) -> &str {
        &self.set
    }

    pub fn user_key(&self) -> &str {
        &self.user_key
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.namespace, self.set, self.user_key)
    }
}

/// Checks a namespace/set pair once, ahead of building keys in it.
pub fn validate_scope(namespace: &str, set: &str) -> Result<(), KeyError> {
    if namespace.is_empty() {
        return Err(KeyError::EmptyNamespace);
    }
    if namespace.len() > MAX_NAMESPACE_LEN {
        return Err(KeyError::NamespaceTooLong(namespace.len()));
    }
    if set.len() > MAX_SET_LEN {
        return Err(KeyError::SetTooLong(set.len()));
    }
    Ok(())
}
