//! Command Handler
//!
//! Receives tokenized requests, checks them against the command table,
//! runs them on the storage engine and turns the outcome into a [`Reply`].
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CommandHandler                          │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │  lookup()   │───>│ arity check │───>│  cmd_xxx()  │     │
//! │  └─────────────┘    └─────────────┘    └─────────────┘     │
//! │                                               │             │
//! │                                               ▼             │
//! │                                      StorageEngine          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every failure, including a panic inside a command, comes back as an
//! error reply. Nothing here can take down the session that called it.

use crate::commands::table::{lookup, CommandFn};
use crate::protocol::{Reply, Request};
use crate::stats::ServerStats;
use crate::storage::expiry::panic_message;
use crate::storage::StorageEngine;
use bytes::Bytes;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;

/// Errors a command can produce. Each one becomes an `-ERR` reply.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    /// Carries the lower-cased command name
    #[error("wrong number of arguments for '{0}' command")]
    WrongArity(String),

    #[error("value is not an integer or out of range")]
    NotAnInteger,

    /// A command failed in a way it did not anticipate
    #[error("{0}")]
    Internal(String),
}

impl From<CommandError> for Reply {
    fn from(err: CommandError) -> Self {
        Reply::error(err.to_string())
    }
}

pub type CommandResult = Result<Reply, CommandError>;

/// Executes commands against a shared storage engine.
///
/// Cheap to clone; every session gets its own copy.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    storage: Arc<StorageEngine>,
    stats: Arc<ServerStats>,
}

impl CommandHandler {
    pub fn new(storage: Arc<StorageEngine>, stats: Arc<ServerStats>) -> Self {
        Self { storage, stats }
    }

    pub fn storage(&self) -> &Arc<StorageEngine> {
        &self.storage
    }

    pub fn stats(&self) -> &Arc<ServerStats> {
        &self.stats
    }

    /// Executes one request and returns the reply to send.
    ///
    /// Counts the request as processed whether or not it succeeds.
    pub fn execute(&self, request: &Request) -> Reply {
        self.stats.command_processed();

        self.dispatch(request).unwrap_or_else(Reply::from)
    }

    fn dispatch(&self, request: &Request) -> CommandResult {
        let spec = lookup(&request.name)
            .ok_or_else(|| CommandError::UnknownCommand(request.name.clone()))?;

        if !spec.arity.accepts(request.args.len()) {
            return Err(CommandError::WrongArity(spec.name.to_lowercase()));
        }

        self.run_guarded(spec.run, &request.args)
    }

    fn run_guarded(&self, run: CommandFn, args: &[String]) -> CommandResult {
        panic::catch_unwind(AssertUnwindSafe(|| run(self, args)))
            .map_err(|payload| CommandError::Internal(panic_message(&*payload)))?
    }
}

fn to_bytes(s: &str) -> Bytes {
    Bytes::copy_from_slice(s.as_bytes())
}

fn parse_integer(s: &str) -> Result<i64, CommandError> {
    s.parse().map_err(|_| CommandError::NotAnInteger)
}

// ============================================================================
// Key/value commands
// ============================================================================

/// SET key value [value ...]
///
/// Extra tokens are joined with single spaces into one value.
pub(crate) fn cmd_set(h: &CommandHandler, args: &[String]) -> CommandResult {
    let value = args[1..].join(" ");
    h.storage.set(to_bytes(&args[0]), Bytes::from(value));
    Ok(Reply::ok())
}

/// GET key
pub(crate) fn cmd_get(h: &CommandHandler, args: &[String]) -> CommandResult {
    Ok(Reply::bulk_or_null(h.storage.get(&to_bytes(&args[0]))))
}

/// DEL key [key ...]
pub(crate) fn cmd_del(h: &CommandHandler, args: &[String]) -> CommandResult {
    let keys: Vec<Bytes> = args.iter().map(|k| to_bytes(k)).collect();
    Ok(Reply::integer(h.storage.delete_many(&keys) as i64))
}

/// EXISTS key [key ...]
pub(crate) fn cmd_exists(h: &CommandHandler, args: &[String]) -> CommandResult {
    let keys: Vec<Bytes> = args.iter().map(|k| to_bytes(k)).collect();
    Ok(Reply::integer(h.storage.exists_many(&keys) as i64))
}

/// TYPE key
pub(crate) fn cmd_type(h: &CommandHandler, args: &[String]) -> CommandResult {
    Ok(Reply::simple(h.storage.key_type(&to_bytes(&args[0]))))
}

/// KEYS pattern
pub(crate) fn cmd_keys(h: &CommandHandler, _args: &[String]) -> CommandResult {
    Ok(Reply::array(h.storage.keys()))
}

// ============================================================================
// Expiry commands
// ============================================================================

/// EXPIRE key seconds
pub(crate) fn cmd_expire(h: &CommandHandler, args: &[String]) -> CommandResult {
    let seconds = parse_integer(&args[1])?;
    let applied = h.storage.expire(&to_bytes(&args[0]), seconds);
    Ok(Reply::integer(i64::from(applied)))
}

/// TTL key
pub(crate) fn cmd_ttl(h: &CommandHandler, args: &[String]) -> CommandResult {
    Ok(Reply::integer(h.storage.ttl(&to_bytes(&args[0]))))
}

/// PTTL key
pub(crate) fn cmd_pttl(h: &CommandHandler, args: &[String]) -> CommandResult {
    Ok(Reply::integer(h.storage.pttl(&to_bytes(&args[0]))))
}

// ============================================================================
// Server commands
// ============================================================================

/// PING
pub(crate) fn cmd_ping(_h: &CommandHandler, _args: &[String]) -> CommandResult {
    Ok(Reply::simple("PONG"))
}

/// ECHO [message ...]
pub(crate) fn cmd_echo(_h: &CommandHandler, args: &[String]) -> CommandResult {
    Ok(Reply::simple(args.join(" ")))
}

/// FLUSHALL
pub(crate) fn cmd_flushall(h: &CommandHandler, _args: &[String]) -> CommandResult {
    h.storage.flush();
    Ok(Reply::ok())
}

/// INFO
pub(crate) fn cmd_info(h: &CommandHandler, _args: &[String]) -> CommandResult {
    let keyspace = h.storage.stats();

    let info = format!(
        "# Server\r\n\
         driftkv_version:{}\r\n\
         os:{}\r\n\
         uptime_in_seconds:{}\r\n\
         \r\n\
         # Clients\r\n\
         connected_clients:{}\r\n\
         \r\n\
         # Memory\r\n\
         used_memory:{}\r\n\
         \r\n\
         # Stats\r\n\
         total_connections_received:{}\r\n\
         total_commands_processed:{}\r\n\
         keyspace_hits:{}\r\n\
         keyspace_misses:{}\r\n\
         expired_keys:{}\r\n",
        crate::VERSION,
        std::env::consts::OS,
        h.stats.uptime_secs(),
        h.stats.connected_clients(),
        keyspace.keys,
        h.stats.connections_received(),
        h.stats.commands_processed(),
        keyspace.keyspace_hits,
        keyspace.keyspace_misses,
        keyspace.expired,
    );

    Ok(Reply::bulk(info))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn create_handler() -> CommandHandler {
        CommandHandler::new(Arc::new(StorageEngine::new()), Arc::new(ServerStats::new()))
    }

    /// Runs one command line and returns the encoded reply as text.
    fn run(handler: &CommandHandler, line: &str) -> String {
        let request = Request::parse(line).expect("non-empty command line");
        String::from_utf8(handler.execute(&request).encode()).unwrap()
    }

    #[test]
    fn test_set_get_del_scenario() {
        let handler = create_handler();

        assert_eq!(run(&handler, "SET foo bar"), "+OK\r\n");
        assert_eq!(run(&handler, "GET foo"), "$3\r\nbar\r\n");
        assert_eq!(run(&handler, "DEL foo"), ":1\r\n");
        assert_eq!(run(&handler, "GET foo"), "$-1\r\n");
        assert_eq!(run(&handler, "EXISTS foo"), ":0\r\n");
        assert_eq!(run(&handler, "TYPE foo"), "+none\r\n");
    }

    #[test]
    fn test_set_joins_value_tokens() {
        let handler = create_handler();

        assert_eq!(run(&handler, "SET greeting hello   big world"), "+OK\r\n");
        assert_eq!(run(&handler, "GET greeting"), "$15\r\nhello big world\r\n");
        assert_eq!(run(&handler, "TYPE greeting"), "+string\r\n");
    }

    #[test]
    fn test_commands_are_case_insensitive() {
        let handler = create_handler();

        assert_eq!(run(&handler, "set k v"), "+OK\r\n");
        assert_eq!(run(&handler, "Get k"), "$1\r\nv\r\n");
        assert_eq!(run(&handler, "ping"), "+PONG\r\n");
    }

    #[test]
    fn test_unknown_command_still_counted() {
        let handler = create_handler();

        assert_eq!(run(&handler, "FOO"), "-ERR unknown command 'FOO'\r\n");
        assert_eq!(run(&handler, "foo bar"), "-ERR unknown command 'FOO'\r\n");
        assert_eq!(handler.stats().commands_processed(), 2);
    }

    #[test]
    fn test_wrong_arity() {
        let handler = create_handler();

        let cases = [
            ("SET onlykey", "set"),
            ("GET", "get"),
            ("GET a b", "get"),
            ("DEL", "del"),
            ("EXPIRE k", "expire"),
            ("TTL", "ttl"),
            ("PTTL a b", "pttl"),
            ("PING hello", "ping"),
            ("EXISTS", "exists"),
            ("TYPE", "type"),
            ("FLUSHALL now", "flushall"),
            ("INFO all", "info"),
        ];

        for (line, name) in cases {
            assert_eq!(
                run(&handler, line),
                format!("-ERR wrong number of arguments for '{}' command\r\n", name),
                "line: {}",
                line
            );
        }

        // Arity errors never touch the store
        assert!(handler.storage().is_empty());
        assert_eq!(handler.stats().commands_processed(), cases.len() as u64);
    }

    #[test]
    fn test_expire_and_ttl() {
        let handler = create_handler();

        assert_eq!(run(&handler, "EXPIRE missingkey 10"), ":0\r\n");
        assert_eq!(run(&handler, "TTL missingkey"), ":-2\r\n");
        assert_eq!(run(&handler, "PTTL missingkey"), ":-2\r\n");

        run(&handler, "SET k v");
        assert_eq!(run(&handler, "TTL k"), ":-1\r\n");
        assert_eq!(run(&handler, "PTTL k"), ":-1\r\n");

        assert_eq!(run(&handler, "EXPIRE k 100"), ":1\r\n");
        let ttl = handler.storage().ttl(&Bytes::from("k"));
        assert!((99..=100).contains(&ttl));

        // A fresh SET makes the key permanent again
        run(&handler, "SET k v2");
        assert_eq!(run(&handler, "TTL k"), ":-1\r\n");
    }

    #[test]
    fn test_expire_rejects_non_integer() {
        let handler = create_handler();
        run(&handler, "SET k v");

        for line in ["EXPIRE k ten", "EXPIRE k 1.5", "EXPIRE k 99999999999999999999"] {
            assert_eq!(
                run(&handler, line),
                "-ERR value is not an integer or out of range\r\n"
            );
        }
        assert_eq!(run(&handler, "TTL k"), ":-1\r\n");
    }

    #[test]
    fn test_expire_non_positive_removes_key() {
        let handler = create_handler();

        run(&handler, "SET k v");
        assert_eq!(run(&handler, "EXPIRE k -5"), ":1\r\n");
        assert_eq!(run(&handler, "GET k"), "$-1\r\n");
        assert_eq!(run(&handler, "EXISTS k"), ":0\r\n");
        assert_eq!(run(&handler, "EXPIRE k 10"), ":0\r\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_after_simulated_time() {
        let handler = create_handler();

        run(&handler, "SET session abc");
        run(&handler, "EXPIRE session 5");
        assert_eq!(run(&handler, "TTL session"), ":5\r\n");

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(run(&handler, "TTL session"), ":3\r\n");
        assert_eq!(run(&handler, "PTTL session"), ":3000\r\n");

        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(run(&handler, "TTL session"), ":-2\r\n");
        assert_eq!(run(&handler, "PTTL session"), ":-2\r\n");
        assert_eq!(run(&handler, "GET session"), "$-1\r\n");
    }

    #[test]
    fn test_del_and_exists_multiple() {
        let handler = create_handler();

        run(&handler, "SET a 1");
        run(&handler, "SET b 2");

        assert_eq!(run(&handler, "EXISTS a b c a"), ":3\r\n");
        assert_eq!(run(&handler, "DEL a c"), ":1\r\n");
        assert_eq!(run(&handler, "DEL a"), ":0\r\n");
        assert_eq!(run(&handler, "EXISTS a b"), ":1\r\n");
    }

    #[test]
    fn test_ping_and_echo() {
        let handler = create_handler();

        assert_eq!(run(&handler, "PING"), "+PONG\r\n");
        assert_eq!(run(&handler, "ECHO"), "+\r\n");
        assert_eq!(run(&handler, "ECHO hello"), "+hello\r\n");
        assert_eq!(run(&handler, "ECHO hello   world"), "+hello world\r\n");
    }

    #[test]
    fn test_keys_ignores_pattern() {
        let handler = create_handler();

        assert_eq!(run(&handler, "KEYS *"), "*0\r\n");

        run(&handler, "SET alpha 1");
        run(&handler, "SET beta 2");

        let reply = handler.execute(&Request::parse("KEYS nomatch*").unwrap());
        let Reply::Array(mut keys) = reply else {
            panic!("expected array reply, got {:?}", reply);
        };
        keys.sort();
        assert_eq!(keys, vec![Bytes::from("alpha"), Bytes::from("beta")]);

        // No pattern at all is fine too
        assert!(matches!(
            handler.execute(&Request::parse("KEYS").unwrap()),
            Reply::Array(ref k) if k.len() == 2
        ));
    }

    #[test]
    fn test_flushall() {
        let handler = create_handler();

        run(&handler, "SET a 1");
        run(&handler, "SET b 2");
        run(&handler, "EXPIRE b 100");

        assert_eq!(run(&handler, "FLUSHALL"), "+OK\r\n");
        assert_eq!(run(&handler, "KEYS *"), "*0\r\n");
        assert_eq!(handler.storage().len(), 0);
    }

    #[test]
    fn test_info_report() {
        let handler = create_handler();
        let _client = handler.stats().client_connected();

        run(&handler, "SET a 1");
        run(&handler, "GET a");
        run(&handler, "GET missing");

        let reply = handler.execute(&Request::parse("INFO").unwrap());
        let Reply::Bulk(body) = reply else {
            panic!("expected bulk reply, got {:?}", reply);
        };
        let text = String::from_utf8(body.to_vec()).unwrap();

        assert!(text.starts_with("# Server\r\n"));
        assert!(text.contains("connected_clients:1\r\n"));
        assert!(text.contains("used_memory:1\r\n"));
        assert!(text.contains("total_connections_received:1\r\n"));
        // SET, GET, GET and the INFO itself
        assert!(text.contains("total_commands_processed:4\r\n"));
        assert!(text.contains("keyspace_hits:1\r\n"));
        assert!(text.contains("keyspace_misses:1\r\n"));
    }

    #[test]
    fn test_panicking_command_becomes_error() {
        fn exploding(_h: &CommandHandler, _args: &[String]) -> CommandResult {
            panic!("handler bug")
        }

        let handler = create_handler();
        let err = handler.run_guarded(exploding, &[]).unwrap_err();

        assert_eq!(err, CommandError::Internal("handler bug".to_string()));
        assert_eq!(Reply::from(err).encode(), b"-ERR handler bug\r\n");

        // The handler is still usable afterwards
        assert_eq!(run(&handler, "PING"), "+PONG\r\n");
    }
}
