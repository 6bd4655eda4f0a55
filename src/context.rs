//! Shared Context
//!
//! One [`Context`] exists per server process. Everything in it is fixed after
//! construction except the [`Metrics`] counters, which handlers bump atomically.
//! It is passed explicitly to every handler; there is no ambient global state.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::commands::CommandError;
use crate::config::Config;
use crate::expanded::ResolutionCache;
use crate::protocol::encode;
use crate::store::key::validate_scope;
use crate::store::{
    CommitLevel, ConsistencyLevel, Expiration, Key, KeyError, ReadPolicy, RecordStore,
    ReplicaPolicy, Value, WritePolicy,
};

/// Operation counters shared by every connection.
#[derive(Debug, Default)]
pub struct Metrics {
    commands_ok: AtomicU64,
    commands_err: AtomicU64,
    connections: AtomicI64,
}

/// Point-in-time copy of [`Metrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub commands_ok: u64,
    pub commands_err: u64,
    pub connections: i64,
}

impl Metrics {
    pub fn record_ok(&self) {
        self.commands_ok.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_err(&self) {
        self.commands_err.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_opened(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            commands_ok: self.commands_ok.load(Ordering::Relaxed),
            commands_err: self.commands_err.load(Ordering::Relaxed),
            connections: self.connections.load(Ordering::Relaxed),
        }
    }
}

/// Process-wide configuration and counters handed to every command.
pub struct Context {
    pub store: Arc<dyn RecordStore>,
    pub namespace: String,
    pub set: String,
    pub read_policy: ReadPolicy,
    pub write_policy: WritePolicy,
    /// Write values in the legacy string-only shape
    pub backward_write_compat: bool,
    /// TTL for expanded-map field records; `-1` selects the namespace default
    pub expanded_map_default_ttl: i64,
    pub cache: Option<ResolutionCache>,
    pub metrics: Metrics,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("namespace", &self.namespace)
            .field("set", &self.set)
            .field("backward_write_compat", &self.backward_write_compat)
            .field("expanded_map_default_ttl", &self.expanded_map_default_ttl)
            .field("cache", &self.cache.is_some())
            .finish_non_exhaustive()
    }
}

impl Context {
    /// Creates a context with the gateway's default policies: reads from one
    /// replica (master or prole), writes committed on the master.
    pub fn new(
        store: Arc<dyn RecordStore>,
        namespace: impl Into<String>,
        set: impl Into<String>,
    ) -> Result<Self, KeyError> {
        let namespace = namespace.into();
        let set = set.into();
        validate_scope(&namespace, &set)?;

        Ok(Self {
            store,
            namespace,
            set,
            read_policy: ReadPolicy {
                consistency: ConsistencyLevel::One,
                replica: ReplicaPolicy::MasterProles,
            },
            write_policy: WritePolicy {
                commit_level: CommitLevel::Master,
                ..WritePolicy::default()
            },
            backward_write_compat: false,
            expanded_map_default_ttl: -1,
            cache: None,
            metrics: Metrics::default(),
        })
    }

    pub fn from_config(store: Arc<dyn RecordStore>, config: &Config) -> Result<Self, KeyError> {
        let mut ctx = Self::new(store, &config.namespace, &config.set)?
            .with_backward_write_compat(config.backward_write_compat)
            .with_expanded_map_default_ttl(config.expanded_map_default_ttl);

        if config.expanded_map_cache {
            let ttl = (config.expanded_map_cache_ttl > 0)
                .then(|| Duration::from_secs(config.expanded_map_cache_ttl));
            ctx = ctx.with_cache(ResolutionCache::new(
                ttl,
                config.expanded_map_cache_capacity,
            ));
        }
        Ok(ctx)
    }

    pub fn with_backward_write_compat(mut self, enabled: bool) -> Self {
        self.backward_write_compat = enabled;
        self
    }

    pub fn with_expanded_map_default_ttl(mut self, ttl: i64) -> Self {
        self.expanded_map_default_ttl = ttl;
        self
    }

    pub fn with_cache(mut self, cache: ResolutionCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Builds the store key for a raw client key.
    pub fn build_key(&self, raw: &[u8]) -> Result<Key, KeyError> {
        Key::from_bytes(&self.namespace, &self.set, raw)
    }

    pub fn key(&self, user_key: impl Into<String>) -> Result<Key, KeyError> {
        Key::new(&self.namespace, &self.set, user_key)
    }

    /// Write policy for a client TTL: `-1` uses the namespace default, any
    /// other negative value is rejected.
    pub fn write_policy_ex(&self, ttl: i64, create_only: bool) -> Result<WritePolicy, CommandError> {
        let expiration = Expiration::from_ttl(ttl).ok_or(CommandError::InvalidTtl(ttl))?;
        let policy = WritePolicy {
            expiration,
            ..self.write_policy
        };
        Ok(if create_only {
            policy.create_only()
        } else {
            policy
        })
    }

    pub fn encode(&self, raw: &[u8]) -> Value {
        encode(raw, self.backward_write_compat)
    }
}
