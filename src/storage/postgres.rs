//! PostgreSQL-backed storage over the `fields` table.
//!
//! Every session owns its own [`Store`], i.e. one `tokio_postgres` client
//! plus the task driving its connection, so transaction state opened by a
//! session stays on that session's connection.

use super::types::{KeyRef, TxControl, Value};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_postgres::{error::SqlState, Client, NoTls};
use tracing::{debug, warn};

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS fields (key text PRIMARY KEY, value text)";
const SELECT_VALUE: &str = "SELECT value FROM fields WHERE key = $1";
const UPSERT_VALUE: &str =
    "INSERT INTO fields (key, value) VALUES ($1, $2) ON CONFLICT (key) DO UPDATE SET value = $2";
const DELETE_KEY: &str = "DELETE FROM fields WHERE key = $1";
const DELETE_ALL: &str = "DELETE FROM fields";
const NOOP_QUERY: &str = "SELECT 1";

#[derive(Debug, Clone)]
pub struct Connector {
    url: String,
}

pub struct Store {
    client: Client,
    driver: JoinHandle<()>,
}

impl Connector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl super::Connector for Connector {
    type Store = Store;

    async fn connect(&self) -> Result<Store> {
        let (client, connection) = tokio_postgres::connect(&self.url, NoTls)
            .await
            .map_err(backend_error)?;

        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(reason = %e, "backing connection failed");
            }
        });

        debug!("backing connection established");

        Ok(Store { client, driver })
    }

    async fn init_schema(&self) -> Result<()> {
        let store = self.connect().await?;
        let created = store
            .client
            .batch_execute(CREATE_TABLE)
            .await
            .map_err(backend_error);
        super::Store::close(store).await?;
        created
    }
}

#[async_trait]
impl super::Store for Store {
    type Err = anyhow::Error;

    async fn get<'k>(&self, key: KeyRef<'k>) -> Result<Option<Value>> {
        let row = self
            .client
            .query_opt(SELECT_VALUE, &[&key])
            .await
            .map_err(backend_error)?;

        row.map(|row| row.try_get::<_, Option<Value>>(0))
            .transpose()
            .map_err(backend_error)
            .map(Option::flatten)
    }

    async fn set<'k>(&mut self, key: KeyRef<'k>, value: Value) -> Result<()> {
        self.client
            .execute(UPSERT_VALUE, &[&key, &value])
            .await
            .map(drop)
            .map_err(backend_error)
    }

    async fn remove<'k>(&mut self, key: KeyRef<'k>) -> Result<()> {
        self.client
            .execute(DELETE_KEY, &[&key])
            .await
            .map(drop)
            .map_err(backend_error)
    }

    async fn flush(&mut self) -> Result<()> {
        self.client
            .batch_execute(DELETE_ALL)
            .await
            .map_err(backend_error)
    }

    async fn transaction(&mut self, verb: TxControl) -> Result<String> {
        let aborted = verb.is_commit() && self.is_aborted().await?;
        self.client
            .batch_execute(verb.statement())
            .await
            .map_err(backend_error)?;
        let tag = if aborted {
            verb.tag_when_aborted()
        } else {
            verb.tag()
        };
        Ok(tag.to_owned())
    }

    async fn close(self) -> Result<()> {
        let Store { client, driver } = self;
        // The driver finishes once its last client is gone.
        drop(client);
        driver.await.context("backing connection task panicked")
    }
}

impl Store {
    /// Whether an earlier error left the open transaction aborted.
    async fn is_aborted(&self) -> Result<bool> {
        match self.client.batch_execute(NOOP_QUERY).await {
            Ok(()) => Ok(false),
            Err(e) if e.code() == Some(&SqlState::IN_FAILED_SQL_TRANSACTION) => Ok(true),
            Err(e) => Err(backend_error(e)),
        }
    }
}

/// Keeps the server's own wording so it can be relayed to clients as is.
fn backend_error(err: tokio_postgres::Error) -> anyhow::Error {
    match err.as_db_error() {
        Some(db) => anyhow!(
            "{}: {} (SQLSTATE {})",
            db.severity(),
            db.message(),
            db.code().code()
        ),
        None => anyhow!("{}", err),
    }
}
