//! `EXPANDED_*` commands: unbounded hashes with one record per field.
//!
//! Field commands resolve the key's token first and address field records by
//! `(token, field)`. `EXPIRE`, `TTL` and `DEL` work on the root record and fall
//! back to the scalar command on the raw key when no root record exists.

use bytes::Bytes;

use super::scalar::{self, int_bin_reply, ttl_reply};
use super::{
    field_name, parse_int, utf8_key, Arity, CommandError, CommandResult, CommandTable,
};
use crate::context::Context;
use crate::expanded::{
    composite_key, field_bins, resolve, resolve_or_create, root_key, MAIN_KEY_BIN,
    SECOND_KEY_BIN, VALUE_BIN,
};
use crate::protocol::{value_reply, Reply};
use crate::store::{Bin, Operation, StoreError, Value};

pub(super) fn register(table: &mut CommandTable) {
    table.register("EXPANDED_HGET", Arity::Exact(2), hget);
    table.register("EXPANDED_HSET", Arity::Exact(3), hset);
    table.register("EXPANDED_HDEL", Arity::Exact(2), hdel);
    table.register("EXPANDED_HMGET", Arity::AtLeast(2), hmget);
    table.register(
        "EXPANDED_HMSET",
        Arity::Pairs {
            leading: 1,
            min_pairs: 1,
        },
        hmset,
    );
    table.register("EXPANDED_HGETALL", Arity::Exact(1), hgetall);
    table.register("EXPANDED_HINCRBY", Arity::Exact(3), hincrby);
    table.register("EXPANDED_HINCRBYEX", Arity::Exact(4), hincrbyex);
    table.register(
        "EXPANDED_HMINCRBYEX",
        Arity::Pairs {
            leading: 2,
            min_pairs: 0,
        },
        hmincrbyex,
    );
    table.register("EXPANDED_EXPIRE", Arity::Exact(2), expire);
    table.register("EXPANDED_TTL", Arity::Exact(1), ttl);
    table.register("EXPANDED_DEL", Arity::Exact(1), del);
}

fn read_field(ctx: &Context, token: &str, field: &str) -> CommandResult<Reply> {
    let key = composite_key(ctx, token, field)?;
    let record = ctx.store.get(&ctx.read_policy, &key, &[VALUE_BIN])?;
    Ok(value_reply(record.as_ref().and_then(|r| r.bin(VALUE_BIN)))?)
}

fn hget(ctx: &Context, args: &[Bytes]) -> CommandResult<Reply> {
    let external = utf8_key(&args[0])?;
    match resolve(ctx, external)? {
        Some(token) => read_field(ctx, &token, &field_name(&args[1])?),
        None => Ok(Reply::nil()),
    }
}

/// `:1` for a new field, `:0` when an existing one was overwritten.
fn hset(ctx: &Context, args: &[Bytes]) -> CommandResult<Reply> {
    let external = utf8_key(&args[0])?;
    let field = field_name(&args[1])?;
    let token = resolve_or_create(ctx, external, -1)?;

    let key = composite_key(ctx, &token, &field)?;
    let existed = ctx.store.exists(&ctx.read_policy, &key)?;
    let policy = ctx.write_policy_ex(ctx.expanded_map_default_ttl, false)?;
    ctx.store
        .put(&policy, &key, field_bins(&token, &field, ctx.encode(&args[2])))?;

    Ok(Reply::integer(if existed { 0 } else { 1 }))
}

fn hdel(ctx: &Context, args: &[Bytes]) -> CommandResult<Reply> {
    let external = utf8_key(&args[0])?;
    let Some(token) = resolve(ctx, external)? else {
        return Ok(Reply::integer(0));
    };
    let key = composite_key(ctx, &token, &field_name(&args[1])?)?;
    let existed = ctx.store.delete(&ctx.write_policy, &key)?;
    Ok(Reply::integer(existed as i64))
}

fn hmget(ctx: &Context, args: &[Bytes]) -> CommandResult<Reply> {
    let external = utf8_key(&args[0])?;
    let fields = args[1..]
        .iter()
        .map(|f| field_name(f))
        .collect::<CommandResult<Vec<_>>>()?;

    let Some(token) = resolve(ctx, external)? else {
        return Ok(Reply::array(vec![Reply::nil(); fields.len()]));
    };
    let replies = fields
        .iter()
        .map(|field| read_field(ctx, &token, field))
        .collect::<CommandResult<Vec<_>>>()?;
    Ok(Reply::array(replies))
}

fn hmset(ctx: &Context, args: &[Bytes]) -> CommandResult<Reply> {
    let external = utf8_key(&args[0])?;
    let fields = args[1..]
        .chunks_exact(2)
        .map(|pair| Ok((field_name(&pair[0])?, ctx.encode(&pair[1]))))
        .collect::<CommandResult<Vec<_>>>()?;

    let token = resolve_or_create(ctx, external, -1)?;
    let policy = ctx.write_policy_ex(ctx.expanded_map_default_ttl, false)?;
    for (field, value) in fields {
        let key = composite_key(ctx, &token, &field)?;
        ctx.store.put(&policy, &key, field_bins(&token, &field, value))?;
    }
    Ok(Reply::ok())
}

/// Scans field records by their back-reference. Any failing row fails the
/// whole reply; fields come back sorted by name.
fn hgetall(ctx: &Context, args: &[Bytes]) -> CommandResult<Reply> {
    let external = utf8_key(&args[0])?;
    let Some(token) = resolve(ctx, external)? else {
        return Ok(Reply::array(vec![]));
    };

    let rows = ctx.store.query_equal(
        &ctx.namespace,
        &ctx.set,
        MAIN_KEY_BIN,
        &Value::Str(token),
    )?;

    let mut fields = Vec::new();
    for row in rows {
        let record = row?;
        let name = record
            .bin(SECOND_KEY_BIN)
            .and_then(Value::as_str)
            .ok_or(CommandError::UnexpectedResult("EXPANDED_HGETALL"))?;
        let value = value_reply(record.bin(VALUE_BIN))?;
        fields.push((name.to_string(), value));
    }
    fields.sort_by(|a, b| a.0.cmp(&b.0));

    let mut replies = Vec::with_capacity(fields.len() * 2);
    for (name, value) in fields {
        replies.push(Reply::bulk(Bytes::from(name)));
        replies.push(value);
    }
    Ok(Reply::array(replies))
}

/// Adds `incr` to the field's value, writing the back-reference bins alongside.
fn field_incr_ops(token: &str, field: &str, incr: i64) -> Vec<Operation> {
    vec![
        Operation::Put(Bin::new(MAIN_KEY_BIN, token)),
        Operation::Put(Bin::new(SECOND_KEY_BIN, field)),
        Operation::Add(Bin::new(VALUE_BIN, incr)),
    ]
}

fn incr_field(ctx: &Context, token: &str, field: &str, incr: i64) -> CommandResult<Reply> {
    let key = composite_key(ctx, token, field)?;
    let policy = ctx.write_policy_ex(ctx.expanded_map_default_ttl, false)?;
    let mut ops = field_incr_ops(token, field, incr);
    ops.push(Operation::Get(VALUE_BIN.to_string()));

    match ctx.store.operate(&policy, &key, &ops) {
        Ok(record) => Ok(int_bin_reply(record.as_ref().and_then(|r| r.bin(VALUE_BIN)))),
        Err(StoreError::BinType) => Ok(Reply::nil()),
        Err(e) => Err(e.into()),
    }
}

fn hincrby(ctx: &Context, args: &[Bytes]) -> CommandResult<Reply> {
    let external = utf8_key(&args[0])?;
    let field = field_name(&args[1])?;
    let incr = parse_int(&args[2])?;
    let token = resolve_or_create(ctx, external, -1)?;
    incr_field(ctx, &token, &field, incr)
}

/// `EXPANDED_HINCRBYEX key field incr ttl`; the TTL applies to the root record.
fn hincrbyex(ctx: &Context, args: &[Bytes]) -> CommandResult<Reply> {
    let external = utf8_key(&args[0])?;
    let field = field_name(&args[1])?;
    let incr = parse_int(&args[2])?;
    let ttl = parse_int(&args[3])?;
    let token = resolve_or_create(ctx, external, ttl)?;
    incr_field(ctx, &token, &field, incr)
}

/// `EXPANDED_HMINCRBYEX key ttl (field incr)...`
fn hmincrbyex(ctx: &Context, args: &[Bytes]) -> CommandResult<Reply> {
    let external = utf8_key(&args[0])?;
    let ttl = parse_int(&args[1])?;
    let increments = args[2..]
        .chunks_exact(2)
        .map(|pair| Ok((field_name(&pair[0])?, parse_int(&pair[1])?)))
        .collect::<CommandResult<Vec<_>>>()?;

    let token = resolve_or_create(ctx, external, ttl)?;
    let policy = ctx.write_policy_ex(ctx.expanded_map_default_ttl, false)?;
    for (field, incr) in increments {
        let key = composite_key(ctx, &token, &field)?;
        ctx.store
            .operate(&policy, &key, &field_incr_ops(&token, &field, incr))?;
    }
    Ok(Reply::ok())
}

fn expire(ctx: &Context, args: &[Bytes]) -> CommandResult<Reply> {
    let key = root_key(ctx, utf8_key(&args[0])?)?;
    let policy = ctx.write_policy_ex(parse_int(&args[1])?, false)?;

    match ctx.store.touch(&policy, &key) {
        Ok(()) => Ok(Reply::integer(1)),
        Err(StoreError::KeyNotFound) => scalar::expire(ctx, args),
        Err(e) => Err(e.into()),
    }
}

fn ttl(ctx: &Context, args: &[Bytes]) -> CommandResult<Reply> {
    let key = root_key(ctx, utf8_key(&args[0])?)?;
    match ctx.store.get_header(&ctx.read_policy, &key)? {
        Some(header) => Ok(ttl_reply(Some(header.ttl))),
        None => scalar::ttl(ctx, args),
    }
}

/// Deletes the root record only; field records stay until they expire.
fn del(ctx: &Context, args: &[Bytes]) -> CommandResult<Reply> {
    let external = utf8_key(&args[0])?;
    let key = root_key(ctx, external)?;
    let existed = ctx.store.delete(&ctx.write_policy, &key)?;

    if let Some(cache) = &ctx.cache {
        cache.invalidate(external);
    }
    if existed {
        Ok(Reply::integer(1))
    } else {
        scalar::del(ctx, args)
    }
}

#[cfg(test)]
mod tests {
    use crate::commands::test_support::{
        cached_context, create_handler, handler_with, run, run_bytes, test_context,
    };
    use crate::context::Context;
    use crate::expanded::{composite_key, resolve, root_key, MAIN_KEY_BIN};
    use crate::protocol::Reply;
    use crate::store::{
        BackgroundJob, Bin, JobHandle, Key, MemoryStore, Operation, Procedure, ProcedureResult,
        ReadPolicy, Record, RecordHeader, RecordStore, RecordStream, StoreError, StoreResult,
        Value, WritePolicy,
    };
    use bytes::Bytes;
    use std::sync::Arc;

    fn pairs(items: &[(&'static str, &'static str)]) -> Reply {
        Reply::array(
            items
                .iter()
                .flat_map(|(f, v)| [Reply::bulk(*f), Reply::bulk(*v)])
                .collect(),
        )
    }

    #[test]
    fn test_hset_hget() {
        let handler = create_handler();

        assert_eq!(run(&handler, &["EXPANDED_HGET", "u", "name"]), Reply::nil());
        assert_eq!(
            run(&handler, &["EXPANDED_HSET", "u", "name", "Ari"]),
            Reply::integer(1)
        );
        assert_eq!(
            run(&handler, &["EXPANDED_HSET", "u", "name", "Ariz"]),
            Reply::integer(0)
        );
        assert_eq!(
            run(&handler, &["EXPANDED_HGET", "u", "name"]),
            Reply::bulk("Ariz")
        );
        assert_eq!(run(&handler, &["EXPANDED_HGET", "u", "age"]), Reply::nil());
    }

    #[test]
    fn test_field_names_are_not_bin_limited() {
        let handler = create_handler();
        let field = "a_field_name_far_longer_than_any_bin_name";
        assert_eq!(
            run(&handler, &["EXPANDED_HSET", "u", field, "v"]),
            Reply::integer(1)
        );
        assert_eq!(run(&handler, &["EXPANDED_HGET", "u", field]), Reply::bulk("v"));
    }

    #[test]
    fn test_hgetall_with_and_without_cache() {
        for ctx in [test_context(false), cached_context()] {
            let handler = handler_with(ctx);
            run(&handler, &["EXPANDED_HSET", "u", "b", "2"]);
            run(&handler, &["EXPANDED_HSET", "u", "a", "one"]);
            run(&handler, &["EXPANDED_HSET", "u", "c", "3"]);
            run(&handler, &["EXPANDED_HSET", "other", "a", "x"]);

            assert_eq!(
                run(&handler, &["EXPANDED_HGETALL", "u"]),
                pairs(&[("a", "one"), ("b", "2"), ("c", "3")])
            );
            assert_eq!(
                run(&handler, &["EXPANDED_HGETALL", "nobody"]),
                Reply::array(vec![])
            );
        }
    }

    #[test]
    fn test_hgetall_decodes_legacy_values() {
        let handler = handler_with(test_context(true));
        run_bytes(&handler, "EXPANDED_HSET", &[b"u", b"bin", b"a\0b"]);

        assert_eq!(
            run(&handler, &["EXPANDED_HGETALL", "u"]),
            Reply::array(vec![
                Reply::bulk("bin"),
                Reply::bulk(Bytes::from_static(b"a\0b")),
            ])
        );
    }

    #[test]
    fn test_hdel() {
        let handler = create_handler();
        assert_eq!(run(&handler, &["EXPANDED_HDEL", "u", "a"]), Reply::integer(0));

        run(&handler, &["EXPANDED_HSET", "u", "a", "1"]);
        assert_eq!(run(&handler, &["EXPANDED_HDEL", "u", "a"]), Reply::integer(1));
        assert_eq!(run(&handler, &["EXPANDED_HDEL", "u", "a"]), Reply::integer(0));
        assert_eq!(run(&handler, &["EXPANDED_HGET", "u", "a"]), Reply::nil());
    }

    #[test]
    fn test_hmset_hmget() {
        let handler = create_handler();

        assert_eq!(
            run(&handler, &["EXPANDED_HMGET", "u", "a", "b"]),
            Reply::array(vec![Reply::nil(), Reply::nil()])
        );
        assert_eq!(
            run(&handler, &["EXPANDED_HMSET", "u", "a", "1", "b", "two"]),
            Reply::ok()
        );
        assert_eq!(
            run(&handler, &["EXPANDED_HMGET", "u", "b", "zz", "a"]),
            Reply::array(vec![Reply::bulk("two"), Reply::nil(), Reply::bulk("1")])
        );
    }

    #[test]
    fn test_hincrby() {
        let handler = create_handler();

        assert_eq!(
            run(&handler, &["EXPANDED_HINCRBY", "u", "n", "5"]),
            Reply::integer(5)
        );
        assert_eq!(
            run(&handler, &["EXPANDED_HINCRBY", "u", "n", "-2"]),
            Reply::integer(3)
        );
        assert_eq!(run(&handler, &["EXPANDED_HGET", "u", "n"]), Reply::bulk("3"));

        run(&handler, &["EXPANDED_HSET", "u", "s", "text"]);
        assert_eq!(
            run(&handler, &["EXPANDED_HINCRBY", "u", "s", "1"]),
            Reply::nil()
        );
        assert!(run(&handler, &["EXPANDED_HINCRBY", "u", "n", "x"]).is_error());
    }

    #[test]
    fn test_hincrbyex_sets_root_ttl() {
        let handler = create_handler();

        assert_eq!(
            run(&handler, &["EXPANDED_HINCRBYEX", "u", "n", "2", "100"]),
            Reply::integer(2)
        );
        let Reply::Integer(ttl) = run(&handler, &["EXPANDED_TTL", "u"]) else {
            panic!("expected integer");
        };
        assert!(ttl > 0 && ttl <= 100);
    }

    #[test]
    fn test_hmincrbyex() {
        let handler = create_handler();

        assert_eq!(
            run(&handler, &["EXPANDED_HMINCRBYEX", "u", "100", "a", "1", "b", "2"]),
            Reply::ok()
        );
        assert_eq!(
            run(&handler, &["EXPANDED_HMINCRBYEX", "u", "100", "a", "10"]),
            Reply::ok()
        );
        assert_eq!(
            run(&handler, &["EXPANDED_HGETALL", "u"]),
            pairs(&[("a", "11"), ("b", "2")])
        );

        // Without pairs only the root is created or refreshed
        assert_eq!(
            run(&handler, &["EXPANDED_HMINCRBYEX", "fresh", "50"]),
            Reply::ok()
        );
        let Reply::Integer(ttl) = run(&handler, &["EXPANDED_TTL", "fresh"]) else {
            panic!("expected integer");
        };
        assert!(ttl > 0 && ttl <= 50);
    }

    #[test]
    fn test_hmincrbyex_bad_increment_writes_nothing() {
        let handler = create_handler();
        assert!(
            run(&handler, &["EXPANDED_HMINCRBYEX", "u", "100", "a", "1", "b", "x"]).is_error()
        );
        let ctx = handler.context();
        assert_eq!(resolve(ctx, "u").unwrap(), None);
    }

    #[test]
    fn test_default_ttl_applies_to_fields() {
        let handler = handler_with(test_context(false).with_expanded_map_default_ttl(300));
        run(&handler, &["EXPANDED_HSET", "u", "a", "1"]);

        let ctx = handler.context();
        let token = resolve(ctx, "u").unwrap().unwrap();
        let key = composite_key(ctx, &token, "a").unwrap();
        let ttl = ctx.store.get_header(&ctx.read_policy, &key).unwrap().unwrap().ttl;
        assert!(ttl.is_some_and(|t| t > 0 && t <= 300));

        // The root itself keeps the namespace default
        let root = root_key(ctx, "u").unwrap();
        let header = ctx.store.get_header(&ctx.read_policy, &root).unwrap().unwrap();
        assert_eq!(header.ttl, None);
    }

    #[test]
    fn test_expire_ttl_on_root() {
        let handler = create_handler();
        run(&handler, &["EXPANDED_HSET", "u", "a", "1"]);

        assert_eq!(run(&handler, &["EXPANDED_TTL", "u"]), Reply::integer(-1));
        assert_eq!(
            run(&handler, &["EXPANDED_EXPIRE", "u", "100"]),
            Reply::integer(1)
        );
        let Reply::Integer(ttl) = run(&handler, &["EXPANDED_TTL", "u"]) else {
            panic!("expected integer");
        };
        assert!(ttl > 0 && ttl <= 100);

        // The plain key of the same name is untouched
        assert_eq!(run(&handler, &["TTL", "u"]), Reply::integer(-2));
    }

    #[test]
    fn test_expire_ttl_fall_back_to_plain_keys() {
        let handler = create_handler();
        run(&handler, &["SET", "plain", "v"]);

        assert_eq!(
            run(&handler, &["EXPANDED_EXPIRE", "plain", "100"]),
            Reply::integer(1)
        );
        let Reply::Integer(ttl) = run(&handler, &["EXPANDED_TTL", "plain"]) else {
            panic!("expected integer");
        };
        assert!(ttl > 0 && ttl <= 100);

        assert_eq!(
            run(&handler, &["EXPANDED_EXPIRE", "missing", "100"]),
            Reply::integer(0)
        );
        assert_eq!(run(&handler, &["EXPANDED_TTL", "missing"]), Reply::integer(-2));
        assert!(run(&handler, &["EXPANDED_EXPIRE", "plain", "-5"]).is_error());
    }

    #[test]
    fn test_del_root_orphans_fields() {
        let handler = handler_with(cached_context());
        run(&handler, &["EXPANDED_HSET", "u", "a", "1"]);
        let ctx = handler.context();
        let old = resolve(ctx, "u").unwrap().unwrap();

        assert_eq!(run(&handler, &["EXPANDED_DEL", "u"]), Reply::integer(1));
        assert!(ctx.cache.as_ref().unwrap().get("u").is_none());
        assert_eq!(run(&handler, &["EXPANDED_HGET", "u", "a"]), Reply::nil());

        // The old field record is still stored under the old token
        let orphan = composite_key(ctx, &old, "a").unwrap();
        assert!(ctx.store.exists(&ctx.read_policy, &orphan).unwrap());

        // A new write starts a fresh token
        run(&handler, &["EXPANDED_HSET", "u", "a", "2"]);
        assert_ne!(resolve(ctx, "u").unwrap().unwrap(), old);
        assert_eq!(
            run(&handler, &["EXPANDED_HGETALL", "u"]),
            pairs(&[("a", "2")])
        );
    }

    #[test]
    fn test_del_falls_back_to_plain_key() {
        let handler = create_handler();
        run(&handler, &["SET", "plain", "v"]);

        assert_eq!(run(&handler, &["EXPANDED_DEL", "plain"]), Reply::integer(1));
        assert_eq!(run(&handler, &["GET", "plain"]), Reply::nil());
        assert_eq!(run(&handler, &["EXPANDED_DEL", "plain"]), Reply::integer(0));
    }

    /// Store whose equality scans fail after the first row.
    struct BrokenScan {
        inner: MemoryStore,
    }

    impl RecordStore for BrokenScan {
        fn get(&self, p: &ReadPolicy, k: &Key, b: &[&str]) -> StoreResult<Option<Record>> {
            self.inner.get(p, k, b)
        }
        fn get_header(&self, p: &ReadPolicy, k: &Key) -> StoreResult<Option<RecordHeader>> {
            self.inner.get_header(p, k)
        }
        fn exists(&self, p: &ReadPolicy, k: &Key) -> StoreResult<bool> {
            self.inner.exists(p, k)
        }
        fn put(&self, p: &WritePolicy, k: &Key, b: Vec<Bin>) -> StoreResult<()> {
            self.inner.put(p, k, b)
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
            let rows: Vec<StoreResult<Record>> = self.inner.query_equal(n, s, b, v)?.collect();
            let mut rows = rows.into_iter();
            let first = rows.next();
            let broken = std::iter::once(Err(StoreError::Job("scan aborted".to_string())));
            Ok(Box::new(first.into_iter().chain(broken).chain(rows)))
        }
        fn execute_background(&self, n: &str, s: &str, j: BackgroundJob) -> StoreResult<JobHandle> {
            self.inner.execute_background(n, s, j)
        }
    }

    #[test]
    fn test_hgetall_row_error_fails_whole_reply() {
        let store = Arc::new(BrokenScan {
            inner: MemoryStore::new(),
        });
        let handler = handler_with(Context::new(store, "test", "cache").unwrap());
        run(&handler, &["EXPANDED_HMSET", "u", "a", "1", "b", "2", "c", "3"]);

        assert_eq!(
            run(&handler, &["EXPANDED_HGETALL", "u"]),
            Reply::error("ERR background job failed: scan aborted")
        );
        assert_eq!(run(&handler, &["EXPANDED_HGET", "u", "b"]), Reply::bulk("2"));
    }

    #[test]
    fn test_hgetall_row_without_field_name_fails() {
        let handler = create_handler();
        run(&handler, &["EXPANDED_HSET", "u", "a", "1"]);
        let ctx = handler.context();
        let token = resolve(ctx, "u").unwrap().unwrap();

        // A record pointing at the token but missing its field name
        let stray = composite_key(ctx, &token, "stray").unwrap();
        ctx.store
            .put(
                &WritePolicy::default(),
                &stray,
                vec![Bin::new(MAIN_KEY_BIN, Value::Str(token.clone()))],
            )
            .unwrap();

        let reply = run(&handler, &["EXPANDED_HGETALL", "u"]);
        assert_eq!(
            reply,
            Reply::error("ERR unexpected result from procedure EXPANDED_HGETALL")
        );
    }
}
