//! Per-connection loop: reads commands, dispatches them, writes replies.

use super::{
    dispatch::dispatch,
    types::{Command, Reply},
};
use crate::{session::Session, storage::Store};
use anyhow::Result;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tracing::debug;

#[derive(Debug)]
pub struct SessionService<F, S> {
    frames: F,
    session: Session<S>,
}

impl<F, S> SessionService<F, S>
where
    F: Stream<Item = anyhow::Result<Command>> + Sink<Reply, Error = anyhow::Error> + Unpin,
    S: Store<Err = anyhow::Error>,
{
    pub fn new(frames: F, session: Session<S>) -> Self {
        Self { frames, session }
    }

    /// Serves the client until it goes away, then releases its session.
    pub async fn start(mut self) -> Result<()> {
        let served = self.handle().await;
        let closed = self.session.close().await;
        served.and(closed)
    }

    async fn handle(&mut self) -> Result<()> {
        while let Some(req) = self.frames.next().await {
            let command = match req {
                Ok(command) => command,
                Err(e) => {
                    self.reject(&e).await;
                    return Err(e);
                }
            };

            // One command at a time: the backing connection is not shared.
            let reply = dispatch(&mut self.session, &command).await;
            self.frames.send(reply).await?;
        }
        debug!("client closed the connection");
        Ok(())
    }

    /// Tells the client why its request could not be framed.
    async fn reject(&mut self, e: &anyhow::Error) {
        if e.downcast_ref::<std::io::Error>().is_some() {
            return;
        }
        let reply = Reply::error(format!("Protocol error: {}", e));
        if let Err(e) = self.frames.send(reply).await {
            debug!(reason = %e, "unable to report protocol error");
        }
    }
}
