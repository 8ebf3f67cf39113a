//! Command dispatch: maps each decoded command onto the session's store.
//!
//! | Command                          | Arity | Reply                        |
//! |----------------------------------|-------|------------------------------|
//! | `PING`                           | any   | `+PONG`                      |
//! | `ECHO message`                   | 2     | bulk `message`               |
//! | `GET key`                        | 2     | bulk value, or null          |
//! | `SET key value`                  | 3     | `+OK`                        |
//! | `DEL key [key ...]`              | >= 2  | integer, keys that existed   |
//! | `FLUSHDB`, `FLUSHALL`            | any   | `+OK`                        |
//! | `BEGIN`                          | any   | status, the command tag      |
//! | `COMMIT`, `ROLLBACK`, `END`, `ABORT` | any | status, the command tag    |
//!
//! Names match case-insensitively. Validation failures never reach the
//! store, and store failures are relayed as error replies without ending
//! the session.

use super::types::{Command, Reply};
use crate::{
    session::Session,
    storage::{types::TxControl, Store},
};
use anyhow::{anyhow, bail, Result};
use bytes::Bytes;
use tracing::debug;

pub const WRONG_ARITY: &str = "Wrong number of arguments";
pub const UNKNOWN_COMMAND: &str = "Unknown command";

pub async fn dispatch<S>(session: &mut Session<S>, command: &Command) -> Reply
where
    S: Store<Err = anyhow::Error>,
{
    match execute(session, command).await {
        Ok(reply) => reply,
        Err(e) => {
            debug!(reason = %e, "command failed");
            Reply::error(e)
        }
    }
}

async fn execute<S>(session: &mut Session<S>, command: &Command) -> Result<Reply>
where
    S: Store<Err = anyhow::Error>,
{
    let verb = command.verb();
    let args = command.args();
    let store = session.store();

    match verb.as_str() {
        "ping" => Ok(Reply::Status("PONG".into())),
        "echo" => {
            check_arity(command, 2)?;
            Ok(Reply::Bulk(args[0].clone()))
        }
        "get" => {
            check_arity(command, 2)?;
            let key = text(&args[0])?;
            debug!("get: key: {}", key);
            let reply = store
                .get(key)
                .await?
                .map(|value| Reply::Bulk(Bytes::from(value)))
                .unwrap_or(Reply::Null);
            Ok(reply)
        }
        "set" => {
            check_arity(command, 3)?;
            let key = text(&args[0])?;
            let value = text(&args[1])?;
            debug!("set: key: {}", key);
            store.set(key, value.to_owned()).await?;
            Ok(Reply::ok())
        }
        "del" => {
            if command.arity() < 2 {
                bail!(WRONG_ARITY);
            }
            let keys = args.iter().map(text).collect::<Result<Vec<_>>>()?;
            debug!("del: keys: {:?}", keys);
            let mut deleted = 0;
            for key in keys {
                if store.delete(key).await? {
                    deleted += 1;
                }
            }
            Ok(Reply::Integer(deleted))
        }
        "flushdb" | "flushall" => {
            store.flush().await?;
            Ok(Reply::ok())
        }
        other => match TxControl::from_name(other) {
            Some(tx) => {
                debug!("transaction: {}", tx.statement());
                let tag = store.transaction(tx).await?;
                Ok(Reply::Status(tag))
            }
            None => bail!(UNKNOWN_COMMAND),
        },
    }
}

fn check_arity(command: &Command, expected: usize) -> Result<()> {
    if command.arity() != expected {
        bail!(WRONG_ARITY);
    }
    Ok(())
}

/// Keys and values live in a text column.
fn text(arg: &Bytes) -> Result<&str> {
    std::str::from_utf8(arg).map_err(|_| anyhow!("Invalid UTF-8 in argument"))
}
