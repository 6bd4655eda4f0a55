//! Scalar and counter commands.
//!
//! Each logical key is one record; the value lives in [`BIN_NAME`], hash-style
//! counters (`HINCRBY`, `HMINCRBYEX`) use the field name as the bin.

use bytes::Bytes;
use tracing::error;

use super::{
    field_name, parse_int, Arity, CommandError, CommandResult, CommandTable, BIN_NAME,
};
use crate::context::Context;
use crate::protocol::{value_reply, Reply};
use crate::store::{BackgroundJob, Bin, Operation, StoreError, Value};

pub(super) fn register(table: &mut CommandTable) {
    table.register("GET", Arity::Exact(1), get);
    table.register("MGET", Arity::AtLeast(1), mget);
    table.register("HGET", Arity::Exact(2), hget);
    table.register("SET", Arity::Exact(2), set);
    table.register("SETEX", Arity::Exact(3), setex);
    table.register(
        "MSET",
        Arity::Pairs {
            leading: 0,
            min_pairs: 1,
        },
        mset,
    );
    table.register("SETNX", Arity::Exact(2), setnx);
    table.register("SETNXEX", Arity::Exact(3), setnxex);
    table.register("DEL", Arity::Exact(1), del);
    table.register("EXPIRE", Arity::Exact(2), expire);
    table.register("TTL", Arity::Exact(1), ttl);
    table.register("INCR", Arity::Exact(1), |ctx, args| {
        incr_by(ctx, &args[0], BIN_NAME, 1, -1)
    });
    table.register("DECR", Arity::Exact(1), |ctx, args| {
        incr_by(ctx, &args[0], BIN_NAME, -1, -1)
    });
    table.register("INCRBY", Arity::Exact(2), |ctx, args| {
        incr_by(ctx, &args[0], BIN_NAME, parse_int(&args[1])?, -1)
    });
    table.register("DECRBY", Arity::Exact(2), decrby);
    table.register("HINCRBY", Arity::Exact(3), |ctx, args| {
        let field = field_name(&args[1])?;
        incr_by(ctx, &args[0], &field, parse_int(&args[2])?, -1)
    });
    table.register("HINCRBYEX", Arity::Exact(4), |ctx, args| {
        let field = field_name(&args[1])?;
        let incr = parse_int(&args[2])?;
        incr_by(ctx, &args[0], &field, incr, parse_int(&args[3])?)
    });
    table.register("HMGET", Arity::AtLeast(2), hmget);
    table.register(
        "HMINCRBYEX",
        Arity::Pairs {
            leading: 2,
            min_pairs: 0,
        },
        hmincrbyex,
    );
    table.register("FLUSHDB", Arity::Exact(0), flushdb);
}

fn read_bin(ctx: &Context, raw_key: &[u8], bin: &str) -> CommandResult<Reply> {
    let key = ctx.build_key(raw_key)?;
    let record = ctx.store.get(&ctx.read_policy, &key, &[bin])?;
    Ok(value_reply(record.as_ref().and_then(|r| r.bin(bin)))?)
}

fn get(ctx: &Context, args: &[Bytes]) -> CommandResult<Reply> {
    read_bin(ctx, &args[0], BIN_NAME)
}

fn hget(ctx: &Context, args: &[Bytes]) -> CommandResult<Reply> {
    read_bin(ctx, &args[0], &field_name(&args[1])?)
}

fn mget(ctx: &Context, args: &[Bytes]) -> CommandResult<Reply> {
    let replies = args
        .iter()
        .map(|raw| read_bin(ctx, raw, BIN_NAME))
        .collect::<CommandResult<Vec<_>>>()?;
    Ok(Reply::array(replies))
}

/// Writes one value. Create-only writes report `:1`/`:0`, plain writes `+OK`.
fn write_value(
    ctx: &Context,
    raw_key: &[u8],
    content: &[u8],
    ttl: i64,
    create_only: bool,
) -> CommandResult<Reply> {
    let key = ctx.build_key(raw_key)?;
    let policy = ctx.write_policy_ex(ttl, create_only)?;
    let bins = vec![Bin::new(BIN_NAME, ctx.encode(content))];

    match ctx.store.put(&policy, &key, bins) {
        Ok(()) if create_only => Ok(Reply::integer(1)),
        Ok(()) => Ok(Reply::ok()),
        Err(StoreError::KeyExists) if create_only => Ok(Reply::integer(0)),
        Err(e) => Err(e.into()),
    }
}

fn set(ctx: &Context, args: &[Bytes]) -> CommandResult<Reply> {
    write_value(ctx, &args[0], &args[1], -1, false)
}

fn setex(ctx: &Context, args: &[Bytes]) -> CommandResult<Reply> {
    let ttl = parse_int(&args[1])?;
    write_value(ctx, &args[0], &args[2], ttl, false)
}

fn setnx(ctx: &Context, args: &[Bytes]) -> CommandResult<Reply> {
    write_value(ctx, &args[0], &args[1], -1, true)
}

fn setnxex(ctx: &Context, args: &[Bytes]) -> CommandResult<Reply> {
    let ttl = parse_int(&args[1])?;
    write_value(ctx, &args[0], &args[2], ttl, true)
}

fn mset(ctx: &Context, args: &[Bytes]) -> CommandResult<Reply> {
    for pair in args.chunks_exact(2) {
        let key = ctx.build_key(&pair[0])?;
        let bins = vec![Bin::new(BIN_NAME, ctx.encode(&pair[1]))];
        ctx.store.put(&ctx.write_policy, &key, bins)?;
    }
    Ok(Reply::ok())
}

pub(super) fn del(ctx: &Context, args: &[Bytes]) -> CommandResult<Reply> {
    let key = ctx.build_key(&args[0])?;
    let existed = ctx.store.delete(&ctx.write_policy, &key)?;
    Ok(Reply::integer(existed as i64))
}

pub(super) fn expire(ctx: &Context, args: &[Bytes]) -> CommandResult<Reply> {
    let key = ctx.build_key(&args[0])?;
    let policy = ctx.write_policy_ex(parse_int(&args[1])?, false)?;

    match ctx.store.touch(&policy, &key) {
        Ok(()) => Ok(Reply::integer(1)),
        Err(StoreError::KeyNotFound) => Ok(Reply::integer(0)),
        Err(e) => Err(e.into()),
    }
}

pub(super) fn ttl(ctx: &Context, args: &[Bytes]) -> CommandResult<Reply> {
    let key = ctx.build_key(&args[0])?;
    let header = ctx.store.get_header(&ctx.read_policy, &key)?;
    Ok(ttl_reply(header.map(|h| h.ttl)))
}

/// `-2` for a missing record, `-1` for one that never expires.
pub(super) fn ttl_reply(ttl: Option<Option<u32>>) -> Reply {
    match ttl {
        None => Reply::integer(-2),
        Some(None) => Reply::integer(-1),
        Some(Some(secs)) => Reply::integer(secs as i64),
    }
}

/// Atomically adds `incr` to `bin` and returns the new value.
///
/// A bin that holds something other than an integer yields nil and is left as is.
fn incr_by(ctx: &Context, raw_key: &[u8], bin: &str, incr: i64, ttl: i64) -> CommandResult<Reply> {
    let key = ctx.build_key(raw_key)?;
    let policy = ctx.write_policy_ex(ttl, false)?;
    let ops = [
        Operation::Add(Bin::new(bin, incr)),
        Operation::Get(bin.to_string()),
    ];

    match ctx.store.operate(&policy, &key, &ops) {
        Ok(record) => Ok(int_bin_reply(record.as_ref().and_then(|r| r.bin(bin)))),
        Err(StoreError::BinType) => Ok(Reply::nil()),
        Err(e) => Err(e.into()),
    }
}

/// Integer reply for a counter bin; a missing bin counts as zero.
pub(super) fn int_bin_reply(value: Option<&Value>) -> Reply {
    Reply::integer(value.and_then(|v| v.as_int()).unwrap_or(0))
}

fn decrby(ctx: &Context, args: &[Bytes]) -> CommandResult<Reply> {
    let decr = parse_int(&args[1])?;
    let incr = decr
        .checked_neg()
        .ok_or_else(|| CommandError::NotAnInteger(decr.to_string()))?;
    incr_by(ctx, &args[0], BIN_NAME, incr, -1)
}

fn hmget(ctx: &Context, args: &[Bytes]) -> CommandResult<Reply> {
    let key = ctx.build_key(&args[0])?;
    let fields = args[1..]
        .iter()
        .map(|f| field_name(f))
        .collect::<CommandResult<Vec<_>>>()?;
    let names: Vec<&str> = fields.iter().map(String::as_str).collect();

    let record = ctx.store.get(&ctx.read_policy, &key, &names)?;
    let replies = names
        .iter()
        .map(|name| value_reply(record.as_ref().and_then(|r| r.bin(name))))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Reply::array(replies))
}

/// `HMINCRBYEX key ttl (field incr)...`
///
/// Without pairs this only refreshes the TTL, and a missing key is not an error.
fn hmincrbyex(ctx: &Context, args: &[Bytes]) -> CommandResult<Reply> {
    let key = ctx.build_key(&args[0])?;
    let policy = ctx.write_policy_ex(parse_int(&args[1])?, false)?;

    if args.len() == 2 {
        return match ctx.store.touch(&policy, &key) {
            Ok(()) | Err(StoreError::KeyNotFound) => Ok(Reply::ok()),
            Err(e) => Err(e.into()),
        };
    }

    let ops = args[2..]
        .chunks_exact(2)
        .map(|pair| {
            Ok(Operation::Add(Bin::new(
                field_name(&pair[0])?,
                parse_int(&pair[1])?,
            )))
        })
        .collect::<CommandResult<Vec<_>>>()?;
    ctx.store.operate(&policy, &key, &ops)?;
    Ok(Reply::ok())
}

/// Deletes every record in the configured set and waits for the job to finish.
fn flushdb(ctx: &Context, _args: &[Bytes]) -> CommandResult<Reply> {
    let job = ctx
        .store
        .execute_background(&ctx.namespace, &ctx.set, BackgroundJob::DeleteAll)?;

    if let Err(e) = job.wait() {
        error!(namespace = %ctx.namespace, set = %ctx.set, error = %e, "FLUSHDB job failed");
        return Err(e.into());
    }
    Ok(Reply::ok())
}
