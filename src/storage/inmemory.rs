//! In-memory key-value storage.
//!
//! A single backend task owns the data and serves every session over a
//! channel. Each session handle buffers its own writes while a transaction
//! is open and ships them to the backend as one message on commit.

use super::types::{Key, KeyRef, Query, TxControl, Value};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug)]
pub struct Backend {
    data: HashMap<Key, Value>,
    queries: mpsc::Receiver<Query>,
}

#[derive(Debug, Clone)]
pub struct Connector {
    queries: mpsc::Sender<Query>,
}

#[derive(Debug)]
pub struct Store {
    queries: mpsc::Sender<Query>,
    pending: Option<WriteSet>,
}

#[derive(Debug, Default)]
struct WriteSet {
    cleared: bool,
    writes: HashMap<Key, Option<Value>>,
}

pub fn start() -> Connector {
    let (tx, rx) = mpsc::channel(32);

    let backend = Backend {
        data: HashMap::new(),
        queries: rx,
    };

    tokio::spawn(backend.start());

    Connector { queries: tx }
}

#[async_trait]
impl super::Connector for Connector {
    type Store = Store;

    async fn connect(&self) -> Result<Store> {
        Ok(Store {
            queries: self.queries.clone(),
            pending: None,
        })
    }
}

impl Store {
    async fn send(&self, query: Query) -> Result<()> {
        self.queries
            .send(query)
            .await
            .context("in-memory backend is gone")
    }

    fn buffer(&mut self, key: KeyRef<'_>, value: Option<Value>) -> bool {
        match self.pending.as_mut() {
            Some(pending) => {
                pending.writes.insert(key.to_owned(), value);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl super::Store for Store {
    type Err = anyhow::Error;

    async fn get<'k>(&self, key: KeyRef<'k>) -> Result<Option<Value>> {
        if let Some(pending) = &self.pending {
            if let Some(value) = pending.writes.get(key) {
                return Ok(value.clone());
            }
            if pending.cleared {
                return Ok(None);
            }
        }

        let (tx, rx) = oneshot::channel();
        self.send(Query::Get {
            key: key.to_owned(),
            cb: tx,
        })
        .await?;
        rx.await.context("unable to access result of get query")
    }

    async fn set<'k>(&mut self, key: KeyRef<'k>, value: Value) -> Result<()> {
        if self.pending.is_some() {
            self.buffer(key, Some(value));
            return Ok(());
        }
        self.send(Query::Set {
            key: key.to_owned(),
            value,
        })
        .await
    }

    async fn remove<'k>(&mut self, key: KeyRef<'k>) -> Result<()> {
        if self.buffer(key, None) {
            return Ok(());
        }
        self.send(Query::Remove {
            key: key.to_owned(),
        })
        .await
    }

    async fn flush(&mut self) -> Result<()> {
        if let Some(pending) = self.pending.as_mut() {
            pending.cleared = true;
            pending.writes.clear();
            return Ok(());
        }
        self.send(Query::Flush).await
    }

    async fn transaction(&mut self, verb: TxControl) -> Result<String> {
        if verb.is_begin() {
            if self.pending.is_none() {
                self.pending = Some(WriteSet::default());
            }
        } else if verb.is_commit() {
            if let Some(pending) = self.pending.take() {
                self.send(Query::Apply {
                    cleared: pending.cleared,
                    writes: pending.writes.into_iter().collect(),
                })
                .await?;
            }
        } else {
            self.pending = None;
        }
        Ok(verb.tag().to_owned())
    }

    async fn close(self) -> Result<()> {
        // An open transaction dies with the handle.
        Ok(())
    }
}

impl Backend {
    pub async fn start(mut self) {
        while let Some(query) = self.queries.recv().await {
            match query {
                Query::Get { key, cb } => {
                    let value = self.data.get(&key).map(Value::clone);
                    let _ = cb.send(value);
                }
                Query::Set { key, value } => {
                    self.data.insert(key, value);
                }
                Query::Remove { key } => {
                    self.data.remove(&key);
                }
                Query::Flush => self.data.clear(),
                Query::Apply { cleared, writes } => {
                    if cleared {
                        self.data.clear();
                    }
                    for (key, value) in writes {
                        match value {
                            Some(value) => self.data.insert(key, value),
                            None => self.data.remove(&key),
                        };
                    }
                }
            }
        }
    }
}
