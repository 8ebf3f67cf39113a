//! Pairing of one client connection with one backing-store connection.

use crate::storage::{Connector, Store};
use anyhow::Result;
use tracing::debug;

/// Owns the backing connection of a single client.
///
/// Created strictly after the client is accepted and closed when the client
/// goes away. Dropping a session without [`Session::close`] still releases
/// the connection, just without waiting for it.
#[derive(Debug)]
pub struct Session<S> {
    store: S,
}

impl<S> Session<S>
where
    S: Store<Err = anyhow::Error>,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Acquires a fresh backing connection for a new client.
    pub async fn open<C>(connector: &C) -> Result<Self>
    where
        C: Connector<Store = S>,
    {
        let store = connector.connect().await?;
        debug!("session opened");
        Ok(Self::new(store))
    }

    pub fn store(&mut self) -> &mut S {
        &mut self.store
    }

    pub async fn close(self) -> Result<()> {
        self.store.close().await?;
        debug!("session closed");
        Ok(())
    }
}
