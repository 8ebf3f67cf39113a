//! Backing stores holding the `fields` table.

use self::types::{KeyRef, TxControl, Value};
use async_trait::async_trait;

pub mod inmemory;
pub mod postgres;
pub mod types;

/// One backing-store connection, owned by exactly one session.
#[async_trait]
pub trait Store: Send + Sync {
    type Err: Send;

    async fn get<'k>(&self, key: KeyRef<'k>) -> Result<Option<Value>, Self::Err>;

    async fn set<'k>(&mut self, key: KeyRef<'k>, value: Value) -> Result<(), Self::Err>;

    /// Unconditionally removes `key`.
    async fn remove<'k>(&mut self, key: KeyRef<'k>) -> Result<(), Self::Err>;

    async fn flush(&mut self) -> Result<(), Self::Err>;

    /// Runs a transaction-control statement, returning its command tag.
    async fn transaction(&mut self, verb: TxControl) -> Result<String, Self::Err>;

    /// Releases the connection.
    async fn close(self) -> Result<(), Self::Err>
    where
        Self: Sized;

    /// Reports whether `key` was present when looked up, then removes it.
    ///
    /// The lookup and the removal are two statements, so a concurrent
    /// session deleting the same key in between is still counted here.
    async fn delete<'k>(&mut self, key: KeyRef<'k>) -> Result<bool, Self::Err> {
        let existed = self.get(key).await?.is_some();
        self.remove(key).await?;
        Ok(existed)
    }
}

/// Hands out a fresh [`Store`] connection per session.
#[async_trait]
pub trait Connector: Send + Sync {
    type Store: Store<Err = anyhow::Error> + Send + 'static;

    async fn connect(&self) -> anyhow::Result<Self::Store>;

    /// Creates the `fields` table. Called once, before serving.
    async fn init_schema(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
