//! Command Table
//!
//! The closed set of supported commands. Each entry ties a name to its
//! variant, its argument-count rule and the function that executes it, so
//! adding or removing a command means editing [`COMMANDS`] and nothing else
//! in the dispatch path.

use crate::commands::handler::{self, CommandHandler, CommandResult};

/// Every command the server understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Set,
    Get,
    Del,
    Expire,
    Ttl,
    Pttl,
    Ping,
    Echo,
    Keys,
    Exists,
    Type,
    FlushAll,
    Info,
}

/// How many arguments (excluding the command name) a command accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Exactly this many arguments
    Exact(usize),
    /// This many arguments or more
    AtLeast(usize),
    /// Any number, including none
    Any,
}

impl Arity {
    pub fn accepts(self, count: usize) -> bool {
        match self {
            Arity::Exact(n) => count == n,
            Arity::AtLeast(n) => count >= n,
            Arity::Any => true,
        }
    }
}

/// Executes a command whose arity has already been checked.
pub type CommandFn = fn(&CommandHandler, &[String]) -> CommandResult;

/// One row of the command table.
#[derive(Clone, Copy)]
pub struct CommandSpec {
    /// Canonical upper-case name
    pub name: &'static str,
    pub kind: CommandKind,
    pub arity: Arity,
    pub run: CommandFn,
}

/// The command table.
#[rustfmt::skip]
pub const COMMANDS: &[CommandSpec] = &[
    CommandSpec { name: "SET", kind: CommandKind::Set, arity: Arity::AtLeast(2), run: handler::cmd_set },
    CommandSpec { name: "GET", kind: CommandKind::Get, arity: Arity::Exact(1), run: handler::cmd_get },
    CommandSpec { name: "DEL", kind: CommandKind::Del, arity: Arity::AtLeast(1), run: handler::cmd_del },
    CommandSpec { name: "EXPIRE", kind: CommandKind::Expire, arity: Arity::Exact(2), run: handler::cmd_expire },
    CommandSpec { name: "TTL", kind: CommandKind::Ttl, arity: Arity::Exact(1), run: handler::cmd_ttl },
    CommandSpec { name: "PTTL", kind: CommandKind::Pttl, arity: Arity::Exact(1), run: handler::cmd_pttl },
    CommandSpec { name: "PING", kind: CommandKind::Ping, arity: Arity::Exact(0), run: handler::cmd_ping },
    CommandSpec { name: "ECHO", kind: CommandKind::Echo, arity: Arity::Any, run: handler::cmd_echo },
    // The pattern is accepted but not matched; every live key is returned
    CommandSpec { name: "KEYS", kind: CommandKind::Keys, arity: Arity::Any, run: handler::cmd_keys },
    CommandSpec { name: "EXISTS", kind: CommandKind::Exists, arity: Arity::AtLeast(1), run: handler::cmd_exists },
    CommandSpec { name: "TYPE", kind: CommandKind::Type, arity: Arity::Exact(1), run: handler::cmd_type },
    CommandSpec { name: "FLUSHALL", kind: CommandKind::FlushAll, arity: Arity::Exact(0), run: handler::cmd_flushall },
    CommandSpec { name: "INFO", kind: CommandKind::Info, arity: Arity::Exact(0), run: handler::cmd_info },
];

/// Finds the table entry for an upper-cased command name.
pub fn lookup(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS.iter().find(|spec| spec.name == name)
}

impl CommandKind {
    /// Resolves a command name, ignoring case.
    pub fn from_name(name: &str) -> Option<Self> {
        lookup(&name.to_uppercase()).map(|spec| spec.kind)
    }
}
