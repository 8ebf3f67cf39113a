//! Startup sequence: bring the database up, create the schema, then serve.
//!
//! In managed mode a PostgreSQL container is launched with `docker run`, its
//! log is relayed and watched until the server accepts TCP connections, and
//! the container is stopped and removed again on the way out.

use crate::{
    api::Server,
    config::{Config, Database, ManagedDatabase},
    storage::{inmemory, postgres, Connector},
};
use anyhow::{anyhow, Context, Result};
use std::process::{ExitStatus, Stdio};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    net::TcpListener,
    process::{Child, ChildStderr, Command},
    signal,
    sync::oneshot,
};
use tracing::{debug, info};

const LISTENING: &str = "listening";
const SERVER_PORT: &str = "port 5432";
const READY: &str = "database system is ready to accept connections";

/// Runs until the listener or the database fails, or until interrupted.
pub async fn run(config: &Config) -> Result<()> {
    match &config.database {
        Database::InMemory => serve(config, inmemory::start()).await,
        Database::External { url } => serve(config, postgres::Connector::new(url.as_str())).await,
        Database::Managed(database) => {
            let mut container = Container::launch(database).await?;
            let served = serve_with(config, database, &mut container).await;
            container.shutdown().await;
            served
        }
    }
}

async fn serve_with(
    config: &Config,
    database: &ManagedDatabase,
    container: &mut Container,
) -> Result<()> {
    container.ready().await?;
    info!("database is ready");

    let connector = postgres::Connector::new(database.url());

    tokio::select! {
        served = serve(config, connector) => served,
        status = container.wait() => match status {
            Ok(status) => Err(anyhow!("database process exited: {}", status)),
            Err(e) => Err(e),
        },
        _ = signal::ctrl_c() => {
            info!("interrupted, shutting down");
            Ok(())
        }
    }
}

/// Creates the schema, then accepts clients.
pub async fn serve<C>(config: &Config, connector: C) -> Result<()>
where
    C: Connector + 'static,
{
    connector
        .init_schema()
        .await
        .context("unable to create schema")?;

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("unable to listen at {}", addr))?;

    info!("listening at {}", addr);

    Server::new(listener, connector).start().await
}

/// Watches the database log for the moment it accepts TCP connections.
///
/// The image's init phase runs a temporary server that reports being ready
/// too, but it only listens on a Unix socket.
#[derive(Debug, Default)]
pub struct Readiness {
    listening: bool,
    signalled: bool,
}

impl Readiness {
    /// True exactly once, on the line completing readiness.
    pub fn observe(&mut self, line: &str) -> bool {
        if self.signalled {
            return false;
        }
        if line.contains(LISTENING) && line.contains(SERVER_PORT) {
            self.listening = true;
        }
        self.signalled = self.listening && line.contains(READY);
        self.signalled
    }
}

pub struct Container {
    name: String,
    child: Child,
    ready: oneshot::Receiver<()>,
}

impl Container {
    pub async fn launch(database: &ManagedDatabase) -> Result<Self> {
        remove(&database.container_name).await;

        info!("starting up {} (port {})", database.image, database.port);

        let mut child = Command::new("docker")
            .args(&["run", "--name", database.container_name.as_str(), "--rm", "-e"])
            .arg(format!("POSTGRES_PASSWORD={}", database.password()))
            .arg("-p")
            .arg(format!("{}:5432", database.port))
            .arg(&database.image)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context("unable to launch docker")?;

        let stderr = child
            .stderr
            .take()
            .context("database log is not captured")?;
        let (tx, ready) = oneshot::channel();
        tokio::spawn(relay(stderr, tx));

        Ok(Self {
            name: database.container_name.clone(),
            child,
            ready,
        })
    }

    /// Resolves once the database accepts connections, fails if it exits first.
    pub async fn ready(&mut self) -> Result<()> {
        tokio::select! {
            signal = &mut self.ready => signal.context("database log ended before it became ready"),
            status = self.child.wait() => match status {
                Ok(status) => Err(anyhow!("database process exited before it became ready: {}", status)),
                Err(e) => Err(e).context("unable to wait for database process"),
            },
        }
    }

    pub async fn wait(&mut self) -> Result<ExitStatus> {
        self.child
            .wait()
            .await
            .context("unable to wait for database process")
    }

    pub async fn shutdown(mut self) {
        remove(&self.name).await;
        if let Err(e) = self.child.wait().await {
            debug!(reason = %e, "database process already gone");
        }
    }
}

async fn relay(stderr: ChildStderr, ready: oneshot::Sender<()>) {
    let mut readiness = Readiness::default();
    let mut ready = Some(ready);
    let mut lines = BufReader::new(stderr).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        info!(target: "postgres", "{}", line);
        if readiness.observe(&line) {
            if let Some(tx) = ready.take() {
                let _ = tx.send(());
            }
        }
    }
}

/// Stops and removes a container, ignoring failures such as it not existing.
async fn remove(name: &str) {
    for action in &["stop", "rm"] {
        let status = Command::new("docker")
            .args(&[*action, name])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        debug!(?status, "docker {} {}", action, name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNIX_SOCKET: &str =
        "LOG:  listening on Unix socket \"/var/run/postgresql/.s.PGSQL.5432\"";
    const IPV4: &str = "LOG:  listening on IPv4 address \"0.0.0.0\", port 5432";
    const READY_LINE: &str = "LOG:  database system is ready to accept connections";

    #[test]
    fn signals_readiness_once_tcp_listener_is_up() {
        let cases = vec![
            (vec![READY_LINE], vec![false], "ready without listener"),
            (
                vec![UNIX_SOCKET, READY_LINE],
                vec![false, false],
                "init server on unix socket",
            ),
            (
                vec![UNIX_SOCKET, READY_LINE, IPV4, READY_LINE],
                vec![false, false, false, true],
                "final server on tcp",
            ),
            (
                vec![IPV4, READY_LINE, READY_LINE],
                vec![false, true, false],
                "signalled only once",
            ),
        ];

        cases.into_iter().for_each(|(lines, expected, reason)| {
            // Pre-condition.
            let mut readiness = Readiness::default();

            // Action.
            let observed: Vec<_> = lines.iter().map(|l| readiness.observe(l)).collect();

            // Post-condition.
            assert_eq!(observed, expected, "{}", reason);
        });
    }

    #[tokio::test]
    async fn fails_to_serve_on_unusable_address() {
        // Pre-condition.
        let config = Config {
            host: "256.0.0.1".into(),
            port: 6380,
            database: Database::InMemory,
        };

        // Action.
        let served = serve(&config, inmemory::start()).await;

        // Post-condition.
        assert!(served.is_err());
    }
}
