//! List commands, kept in [`BIN_NAME`] with its length in `r_size`.

use bytes::Bytes;

use super::scalar::int_bin_reply;
use super::{parse_int, Arity, CommandError, CommandResult, CommandTable, BIN_NAME};
use crate::context::Context;
use crate::protocol::{decode, Reply};
use crate::store::{ListEnd, Procedure, ProcedureResult};

pub(super) fn register(table: &mut CommandTable) {
    table.register("RPUSH", Arity::Range(2, 3), |ctx, args| {
        push(ctx, args, ListEnd::Tail, optional_ttl(args)?)
    });
    table.register("LPUSH", Arity::Range(2, 3), |ctx, args| {
        push(ctx, args, ListEnd::Head, optional_ttl(args)?)
    });
    table.register("RPUSHEX", Arity::Exact(3), |ctx, args| {
        push(ctx, args, ListEnd::Tail, parse_int(&args[2])?)
    });
    table.register("LPUSHEX", Arity::Exact(3), |ctx, args| {
        push(ctx, args, ListEnd::Head, parse_int(&args[2])?)
    });
    table.register("RPOP", Arity::Exact(1), |ctx, args| pop(ctx, args, ListEnd::Tail));
    table.register("LPOP", Arity::Exact(1), |ctx, args| pop(ctx, args, ListEnd::Head));
    table.register("LLEN", Arity::Exact(1), llen);
    table.register("LRANGE", Arity::Exact(3), lrange);
    table.register("LTRIM", Arity::Exact(3), ltrim);
}

/// `-1` keeps the list's current expiration.
fn optional_ttl(args: &[Bytes]) -> CommandResult<i64> {
    match args.get(2) {
        Some(ttl) => parse_int(ttl),
        None => Ok(-1),
    }
}

fn execute(ctx: &Context, raw_key: &[u8], procedure: Procedure) -> CommandResult<ProcedureResult> {
    let key = ctx.build_key(raw_key)?;
    Ok(ctx.store.execute(&ctx.write_policy, &key, procedure)?)
}

fn push(ctx: &Context, args: &[Bytes], end: ListEnd, ttl: i64) -> CommandResult<Reply> {
    if ttl < -1 {
        return Err(CommandError::InvalidTtl(ttl));
    }
    let procedure = Procedure::ListPush {
        end,
        bin: BIN_NAME.to_string(),
        value: ctx.encode(&args[1]),
        ttl,
    };
    let name = procedure.name();
    match execute(ctx, &args[0], procedure)? {
        ProcedureResult::Int(len) => Ok(Reply::integer(len)),
        _ => Err(CommandError::UnexpectedResult(name)),
    }
}

/// Pops one element; an empty or missing list is nil.
fn pop(ctx: &Context, args: &[Bytes], end: ListEnd) -> CommandResult<Reply> {
    let procedure = Procedure::ListPop {
        end,
        bin: BIN_NAME.to_string(),
        count: 1,
        ttl: -1,
    };
    let name = procedure.name();
    match execute(ctx, &args[0], procedure)? {
        ProcedureResult::Nil => Ok(Reply::nil()),
        ProcedureResult::List(items) => match items.first() {
            Some(item) => Ok(decode(item)?.into_reply()),
            None => Ok(Reply::nil()),
        },
        _ => Err(CommandError::UnexpectedResult(name)),
    }
}

fn llen(ctx: &Context, args: &[Bytes]) -> CommandResult<Reply> {
    let key = ctx.build_key(&args[0])?;
    let size_bin = format!("{}_size", BIN_NAME);
    let record = ctx.store.get(&ctx.read_policy, &key, &[size_bin.as_str()])?;
    Ok(int_bin_reply(record.as_ref().and_then(|r| r.bin(&size_bin))))
}

fn lrange(ctx: &Context, args: &[Bytes]) -> CommandResult<Reply> {
    let procedure = Procedure::ListRange {
        bin: BIN_NAME.to_string(),
        start: parse_int(&args[1])?,
        stop: parse_int(&args[2])?,
    };
    match execute(ctx, &args[0], procedure)? {
        ProcedureResult::Nil => Ok(Reply::nil()),
        ProcedureResult::List(items) => {
            let replies = items
                .iter()
                .map(|item| Ok(decode(item)?.into_reply()))
                .collect::<CommandResult<Vec<_>>>()?;
            Ok(Reply::array(replies))
        }
        _ => Err(CommandError::UnexpectedResult("LRANGE")),
    }
}

fn ltrim(ctx: &Context, args: &[Bytes]) -> CommandResult<Reply> {
    let procedure = Procedure::ListTrim {
        bin: BIN_NAME.to_string(),
        start: parse_int(&args[1])?,
        stop: parse_int(&args[2])?,
    };
    match execute(ctx, &args[0], procedure)? {
        ProcedureResult::Nil => Ok(Reply::nil()),
        ProcedureResult::Status(_) => Ok(Reply::ok()),
        _ => Err(CommandError::UnexpectedResult("LTRIM")),
    }
}
