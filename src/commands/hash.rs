//! Bounded hashes: every field is a bin of a single record, changed through
//! server-side procedures so each command is atomic. Field names share the bin
//! name limit and the whole hash must fit in one record.

use bytes::Bytes;

use super::{field_name, Arity, CommandError, CommandResult, CommandTable};
use crate::context::Context;
use crate::protocol::{decode, Reply};
use crate::store::{Procedure, ProcedureResult, Value};

pub(super) fn register(table: &mut CommandTable) {
    table.register("HSET", Arity::Exact(3), hset);
    table.register("HDEL", Arity::Exact(2), hdel);
    table.register(
        "HMSET",
        Arity::Pairs {
            leading: 1,
            min_pairs: 1,
        },
        hmset,
    );
    table.register("HGETALL", Arity::Exact(1), hgetall);
}

fn run(ctx: &Context, raw_key: &[u8], procedure: Procedure) -> CommandResult<ProcedureResult> {
    let key = ctx.build_key(raw_key)?;
    Ok(ctx.store.execute(&ctx.write_policy, &key, procedure)?)
}

fn hset(ctx: &Context, args: &[Bytes]) -> CommandResult<Reply> {
    let procedure = Procedure::HashSet {
        field: field_name(&args[1])?,
        value: ctx.encode(&args[2]),
    };
    match run(ctx, &args[0], procedure)? {
        ProcedureResult::Int(n) => Ok(Reply::integer(n)),
        _ => Err(CommandError::UnexpectedResult("HSET")),
    }
}

fn hdel(ctx: &Context, args: &[Bytes]) -> CommandResult<Reply> {
    let procedure = Procedure::HashDelete {
        field: field_name(&args[1])?,
    };
    match run(ctx, &args[0], procedure)? {
        ProcedureResult::Int(n) => Ok(Reply::integer(n)),
        _ => Err(CommandError::UnexpectedResult("HDEL")),
    }
}

fn hmset(ctx: &Context, args: &[Bytes]) -> CommandResult<Reply> {
    let fields = args[1..]
        .chunks_exact(2)
        .map(|pair| Ok((field_name(&pair[0])?, ctx.encode(&pair[1]))))
        .collect::<CommandResult<Vec<_>>>()?;

    match run(ctx, &args[0], Procedure::HashSetMany { fields })? {
        ProcedureResult::Status(s) => Ok(Reply::status(s)),
        _ => Err(CommandError::UnexpectedResult("HMSET")),
    }
}

/// Alternating field/value array; a missing key is an empty array.
fn hgetall(ctx: &Context, args: &[Bytes]) -> CommandResult<Reply> {
    let items = match run(ctx, &args[0], Procedure::HashGetAll)? {
        ProcedureResult::List(items) => items,
        ProcedureResult::Nil => Vec::new(),
        _ => return Err(CommandError::UnexpectedResult("HGETALL")),
    };

    let mut replies = Vec::with_capacity(items.len());
    for pair in items.chunks_exact(2) {
        let name = match &pair[0] {
            Value::Str(name) => Reply::bulk(Bytes::copy_from_slice(name.as_bytes())),
            _ => return Err(CommandError::UnexpectedResult("HGETALL")),
        };
        replies.push(name);
        replies.push(decode(&pair[1])?.into_reply());
    }
    Ok(Reply::array(replies))
}
