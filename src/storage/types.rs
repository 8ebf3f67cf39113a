use tokio::sync::oneshot;

pub type Key = String;
pub type KeyRef<'a> = &'a str;
pub type Value = String;

/// Transaction-control verbs relayed to the backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxControl {
    Begin,
    Commit,
    Rollback,
    End,
    Abort,
}

impl TxControl {
    /// Matches a lowercased command name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "begin" => Some(TxControl::Begin),
            "commit" => Some(TxControl::Commit),
            "rollback" => Some(TxControl::Rollback),
            "end" => Some(TxControl::End),
            "abort" => Some(TxControl::Abort),
            _ => None,
        }
    }

    pub fn statement(self) -> &'static str {
        match self {
            TxControl::Begin => "BEGIN ISOLATION LEVEL SERIALIZABLE",
            TxControl::Commit => "COMMIT",
            TxControl::Rollback => "ROLLBACK",
            TxControl::End => "END",
            TxControl::Abort => "ABORT",
        }
    }

    /// Command tag PostgreSQL reports for the statement.
    pub fn tag(self) -> &'static str {
        match self {
            TxControl::Begin => "BEGIN",
            TxControl::Commit | TxControl::End => "COMMIT",
            TxControl::Rollback | TxControl::Abort => "ROLLBACK",
        }
    }

    /// Tag PostgreSQL reports when the statement runs inside a transaction
    /// that an earlier error already aborted: committing it rolls back.
    pub fn tag_when_aborted(self) -> &'static str {
        if self.is_commit() {
            TxControl::Rollback.tag()
        } else {
            self.tag()
        }
    }

    pub fn is_begin(self) -> bool {
        self == TxControl::Begin
    }

    pub fn is_commit(self) -> bool {
        matches!(self, TxControl::Commit | TxControl::End)
    }
}

/// Messages understood by the in-memory backend task.
#[derive(Debug)]
pub enum Query {
    Get {
        key: Key,
        cb: oneshot::Sender<Option<Value>>,
    },
    Set {
        key: Key,
        value: Value,
    },
    Remove {
        key: Key,
    },
    Flush,
    Apply {
        cleared: bool,
        writes: Vec<(Key, Option<Value>)>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_verbs_to_statements_and_tags() {
        let cases = vec![
            ("begin", "BEGIN ISOLATION LEVEL SERIALIZABLE", "BEGIN"),
            ("commit", "COMMIT", "COMMIT"),
            ("end", "END", "COMMIT"),
            ("rollback", "ROLLBACK", "ROLLBACK"),
            ("abort", "ABORT", "ROLLBACK"),
        ];

        cases.into_iter().for_each(|(name, statement, tag)| {
            // Action.
            let verb = TxControl::from_name(name).unwrap();

            // Post-condition.
            assert_eq!(verb.statement(), statement, "{}", name);
            assert_eq!(verb.tag(), tag, "{}", name);
        });
    }

    #[test]
    fn reports_rollback_for_commit_of_aborted_transaction() {
        let cases = vec![
            (TxControl::Commit, "ROLLBACK"),
            (TxControl::End, "ROLLBACK"),
            (TxControl::Rollback, "ROLLBACK"),
            (TxControl::Abort, "ROLLBACK"),
            (TxControl::Begin, "BEGIN"),
        ];

        cases.into_iter().for_each(|(verb, tag)| {
            assert_eq!(verb.tag_when_aborted(), tag, "{:?}", verb);
        });
    }

    #[test]
    fn rejects_non_transaction_names() {
        assert_eq!(TxControl::from_name("get"), None);
        assert_eq!(TxControl::from_name("BEGIN"), None);
    }
}
