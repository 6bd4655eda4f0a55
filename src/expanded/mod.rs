//! Expanded Maps
//!
//! A bounded hash must fit in one record. An expanded map instead stores every
//! field as its own record, so it can grow without limit and each field expires
//! independently.
//!
//! ## Record Layout
//!
//! ```text
//!  root record   composite_<key>_____MAIN____
//!                  z          = <key>_<8 random alphanumerics>   (the token)
//!                  created_at = unix nanos
//!
//!  field record  composite_<token>_<field>
//!                  m          = <token>     (back-reference, indexed for scans)
//!                  s          = <field>
//!                  v          = <value>
//!                  created_at = unix nanos
//! ```
//!
//! ## Resolution
//!
//! A key is Absent until its root record exists, then Resolved. The store's
//! create-only write is the only mutual exclusion: when two clients race to
//! create a root, the loser re-reads once and adopts the winner's token. A
//! second miss is reported as an error rather than retried again.
//!
//! Deleting the root record does not delete field records; they stay until
//! their own TTL reclaims them.

pub mod cache;

use std::time::{SystemTime, UNIX_EPOCH};

use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::debug;

pub use cache::ResolutionCache;

use crate::commands::{CommandError, CommandResult};
use crate::context::Context;
use crate::store::{Bin, Key, KeyError, StoreError, Value};

/// Field-name slot of the root record's key.
pub const MAIN_SUFFIX: &str = "____MAIN____";

/// Root record bin holding the token.
pub const ROOT_BIN: &str = "z";

/// Field record bin holding the value.
pub const VALUE_BIN: &str = "v";

/// Field record bin holding the owning token.
pub const MAIN_KEY_BIN: &str = "m";

/// Field record bin holding the field name.
pub const SECOND_KEY_BIN: &str = "s";

pub const CREATED_AT_BIN: &str = "created_at";

const TOKEN_SUFFIX_LEN: usize = 8;

/// Key of the record for `field` under `owner` (an external key or a token).
pub fn composite_key(ctx: &Context, owner: &str, field: &str) -> Result<Key, KeyError> {
    ctx.key(format!("composite_{}_{}", owner, field))
}

pub fn root_key(ctx: &Context, external: &str) -> Result<Key, KeyError> {
    composite_key(ctx, external, MAIN_SUFFIX)
}

/// A fresh token for `external`.
pub fn generate_token(external: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_SUFFIX_LEN)
        .map(char::from)
        .collect();
    format!("{}_{}", external, suffix)
}

/// Creation timestamp in nanoseconds since the epoch.
pub fn created_at() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// Bins written to a field record alongside its value.
pub fn field_bins(token: &str, field: &str, value: Value) -> Vec<Bin> {
    vec![
        Bin::new(MAIN_KEY_BIN, token),
        Bin::new(SECOND_KEY_BIN, field),
        Bin::new(VALUE_BIN, value),
        Bin::new(CREATED_AT_BIN, created_at()),
    ]
}

/// Finds the token for `external`, trusting a live cache entry first.
pub fn resolve(ctx: &Context, external: &str) -> CommandResult<Option<String>> {
    if let Some(token) = ctx.cache.as_ref().and_then(|c| c.get(external)) {
        return Ok(Some(token));
    }

    let key = root_key(ctx, external)?;
    let record = ctx.store.get(&ctx.read_policy, &key, &[ROOT_BIN])?;
    let token = record
        .as_ref()
        .and_then(|r| r.bin(ROOT_BIN))
        .and_then(Value::as_str)
        .map(str::to_string);

    if let (Some(cache), Some(token)) = (&ctx.cache, &token) {
        cache.set(external, token);
    }
    Ok(token)
}

/// Finds or creates the token for `external`.
///
/// With `ttl != -1` an existing root record's expiration is refreshed; a new
/// root record is created with that TTL.
pub fn resolve_or_create(ctx: &Context, external: &str, ttl: i64) -> CommandResult<String> {
    if let Some(token) = resolve(ctx, external)? {
        refresh_root(ctx, external, ttl)?;
        return Ok(token);
    }

    let token = generate_token(external);
    let key = root_key(ctx, external)?;
    let bins = vec![
        Bin::new(ROOT_BIN, token.as_str()),
        Bin::new(CREATED_AT_BIN, created_at()),
    ];

    match ctx.store.put(&ctx.write_policy_ex(ttl, true)?, &key, bins) {
        Ok(()) => {
            debug!(key = %external, token = %token, "Created composite key");
            if let Some(cache) = &ctx.cache {
                cache.set(external, &token);
            }
            Ok(token)
        }
        Err(StoreError::KeyExists) => {
            debug!(key = %external, "Composite key created concurrently, adopting winner");
            let winner = resolve(ctx, external)?
                .ok_or_else(|| CommandError::CompositeRaceLost(external.to_string()))?;
            refresh_root(ctx, external, ttl)?;
            Ok(winner)
        }
        Err(e) => Err(e.into()),
    }
}

fn refresh_root(ctx: &Context, external: &str, ttl: i64) -> CommandResult<()> {
    if ttl == -1 {
        return Ok(());
    }
    let key = root_key(ctx, external)?;
    ctx.store.touch(&ctx.write_policy_ex(ttl, false)?, &key)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::{cached_context, test_context};
    use crate::store::{
        BackgroundJob, JobHandle, MemoryStore, Operation, Procedure, ProcedureResult,
        ReadPolicy, Record, RecordHeader, RecordStore, RecordStream, StoreResult, WritePolicy,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};

    #[test]
    fn test_key_layout() {
        let ctx = test_context(false);
        assert_eq!(
            root_key(&ctx, "user").unwrap().user_key(),
            "composite_user_____MAIN____"
        );
        assert_eq!(
            composite_key(&ctx, "user_AbCd1234", "name").unwrap().user_key(),
            "composite_user_AbCd1234_name"
        );
    }

    #[test]
    fn test_generate_token() {
        let token = generate_token("user");
        let suffix = token.strip_prefix("user_").unwrap();
        assert_eq!(suffix.len(), TOKEN_SUFFIX_LEN);
        assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(generate_token("user"), generate_token("user"));
    }

    #[test]
    fn test_resolve_absent() {
        let ctx = test_context(false);
        assert_eq!(resolve(&ctx, "nobody").unwrap(), None);
    }

    #[test]
    fn test_resolve_or_create_is_stable() {
        for ctx in [test_context(false), cached_context()] {
            let first = resolve_or_create(&ctx, "user", -1).unwrap();
            let second = resolve_or_create(&ctx, "user", -1).unwrap();
            assert_eq!(first, second);
            assert_eq!(resolve(&ctx, "user").unwrap(), Some(first));
        }
    }

    #[test]
    fn test_resolve_fills_cache() {
        let ctx = cached_context();
        let token = resolve_or_create(&ctx, "user", -1).unwrap();

        let cache = ctx.cache.as_ref().unwrap();
        cache.invalidate("user");
        assert_eq!(resolve(&ctx, "user").unwrap().as_ref(), Some(&token));
        assert_eq!(cache.get("user"), Some(token));
    }

    #[test]
    fn test_cache_is_trusted_over_store() {
        let ctx = cached_context();
        ctx.cache.as_ref().unwrap().set("ghost", "ghost_cached00");
        assert_eq!(
            resolve(&ctx, "ghost").unwrap().as_deref(),
            Some("ghost_cached00")
        );
    }

    #[test]
    fn test_ttl_is_applied_to_root() {
        let ctx = test_context(false);
        resolve_or_create(&ctx, "user", 100).unwrap();
        let key = root_key(&ctx, "user").unwrap();
        let ttl = ctx.store.get_header(&ctx.read_policy, &key).unwrap().unwrap().ttl;
        assert!(ttl.is_some_and(|t| t > 0 && t <= 100));

        resolve_or_create(&ctx, "user", 500).unwrap();
        let ttl = ctx.store.get_header(&ctx.read_policy, &key).unwrap().unwrap().ttl;
        assert!(ttl.is_some_and(|t| t > 100 && t <= 500));
    }

    #[test]
    fn test_concurrent_creation_converges() {
        let store = Arc::new(MemoryStore::new());
        let threads = 16;
        let barrier = Arc::new(Barrier::new(threads));
        let mut handles = vec![];

        for _ in 0..threads {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            handles.push(std::thread::spawn(move || {
                let ctx = Context::new(store, "test", "cache")
                    .unwrap()
                    .with_cache(ResolutionCache::new(None, 16));
                barrier.wait();
                resolve_or_create(&ctx, "hot", -1).unwrap()
            }));
        }

        let tokens: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(tokens.iter().all(|t| t == &tokens[0]));
        assert_eq!(store.len(), 1);
    }

    /// Store whose root record is created by someone else and then vanishes.
    struct VanishingRoot {
        inner: MemoryStore,
        puts: AtomicUsize,
    }

    impl RecordStore for VanishingRoot {
        fn get(&self, p: &ReadPolicy, k: &Key, b: &[&str]) -> StoreResult<Option<Record>> {
            self.inner.get(p, k, b)
        }
        fn get_header(&self, p: &ReadPolicy, k: &Key) -> StoreResult<Option<RecordHeader>> {
            self.inner.get_header(p, k)
        }
        fn exists(&self, p: &ReadPolicy, k: &Key) -> StoreResult<bool> {
            self.inner.exists(p, k)
        }
        fn put(&self, _: &WritePolicy, _: &Key, _: Vec<Bin>) -> StoreResult<()> {
            self.puts.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::KeyExists)
        }
        fn delete(&self, p: &WritePolicy, k: &Key) -> StoreResult<bool> {
            self.inner.delete(p, k)
        }
        fn touch(&self, p: &WritePolicy, k: &Key) -> StoreResult<()> {
            self.inner.touch(p, k)
        }
        fn operate(&self, p: &WritePolicy, k: &Key, o: &[Operation]) -> StoreResult<Option<Record>> {
            self.inner.operate(p, k, o)
        }
        fn execute(&self, p: &WritePolicy, k: &Key, f: Procedure) -> StoreResult<ProcedureResult> {
            self.inner.execute(p, k, f)
        }
        fn query_equal(&self, n: &str, s: &str, b: &str, v: &Value) -> StoreResult<RecordStream> {
            self.inner.query_equal(n, s, b, v)
        }
        fn execute_background(&self, n: &str, s: &str, j: BackgroundJob) -> StoreResult<JobHandle> {
            self.inner.execute_background(n, s, j)
        }
    }

    #[test]
    fn test_double_miss_fails_without_recreating() {
        let store = Arc::new(VanishingRoot {
            inner: MemoryStore::new(),
            puts: AtomicUsize::new(0),
        });
        let ctx = Context::new(store.clone(), "test", "cache").unwrap();

        let result = resolve_or_create(&ctx, "user", -1);
        assert!(matches!(result, Err(CommandError::CompositeRaceLost(k)) if k == "user"));
        assert_eq!(store.puts.load(Ordering::SeqCst), 1);
    }
}
