//! Command/Reply for API interaction.

use bytes::Bytes;
use std::fmt;

/// One decoded request: a command name and its arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Command {
    name: Bytes,
    args: Vec<Bytes>,
}

impl Command {
    pub fn new(name: impl Into<Bytes>, args: Vec<Bytes>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// Splits a request into name and arguments, `None` for an empty request.
    pub fn from_parts(parts: Vec<Bytes>) -> Option<Self> {
        let mut parts = parts.into_iter();
        let name = parts.next()?;
        Some(Self::new(name, parts.collect()))
    }

    /// The command name folded to lowercase, for case-insensitive dispatch.
    pub fn verb(&self) -> String {
        String::from_utf8_lossy(&self.name).to_ascii_lowercase()
    }

    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    /// Number of parts, the name included.
    pub fn arity(&self) -> usize {
        self.args.len() + 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reply {
    Status(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    Null,
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Status("OK".into())
    }

    pub fn error(reason: impl fmt::Display) -> Self {
        Reply::Error(reason.to_string())
    }
}
