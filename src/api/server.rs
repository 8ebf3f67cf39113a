//! Network server meant to serve requests from clients.
//!
//! Every accepted client gets a session of its own, i.e. a dedicated
//! backing-store connection, for as long as it stays connected.

use crate::{
    api::{framed, SessionService},
    session::Session,
    storage::Connector,
};
use anyhow::{Context, Result};
use std::{net::SocketAddr, sync::Arc};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
};
use tracing::{error, info, span, warn, Level};
use tracing_futures::Instrument;

pub struct Server<C> {
    listener: TcpListener,
    connector: Arc<C>,
}

impl<C> Server<C>
where
    C: Connector + 'static,
{
    pub fn new(listener: TcpListener, connector: C) -> Self {
        Self {
            listener,
            connector: Arc::new(connector),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("unable to read listener address")
    }

    /// Accepts clients until the listener fails.
    pub async fn start(self) -> Result<()> {
        loop {
            let (conn, peer_addr) = self
                .listener
                .accept()
                .await
                .context("unable to accept connection")?;
            self.handle(conn, peer_addr)
        }
    }

    fn handle<T>(&self, conn: T, peer_addr: SocketAddr)
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let connector = self.connector.clone();
        let span = span!(Level::INFO, "connection", peer_addr = %peer_addr);

        tokio::spawn(
            async move {
                let session = match Session::open(&*connector).await {
                    Ok(session) => session,
                    Err(e) => {
                        warn!(reason = %e, "unable to open backing connection, dropping client");
                        return;
                    }
                };

                info!("serving new connection");

                match SessionService::new(framed(conn), session).start().await {
                    Ok(_) => info!("bye"),
                    Err(e) => error!(reason = %e, "oops"),
                }
            }
            .instrument(span),
        );
    }
}
