//! Process-wide configuration, built once at startup and never mutated.

use std::fmt;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database: Database,
}

/// Where the `fields` table lives.
#[derive(Debug, Clone)]
pub enum Database {
    /// A PostgreSQL container launched and torn down by this process.
    Managed(ManagedDatabase),
    /// An already running PostgreSQL.
    External { url: String },
    /// No PostgreSQL at all, the data lives in this process.
    InMemory,
}

#[derive(Clone)]
pub struct ManagedDatabase {
    pub image: String,
    pub container_name: String,
    pub port: u16,
    password: String,
}

impl Config {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl ManagedDatabase {
    /// Derives the database port from the listening port and generates a
    /// fresh password.
    pub fn new(image: impl Into<String>, container_name: impl Into<String>, port: u16) -> Self {
        Self {
            image: image.into(),
            container_name: container_name.into(),
            port: backing_port(port),
            password: generate_password(),
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn url(&self) -> String {
        format!(
            "postgres://postgres:{}@127.0.0.1:{}",
            self.password, self.port
        )
    }
}

impl fmt::Debug for ManagedDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedDatabase")
            .field("image", &self.image)
            .field("container_name", &self.container_name)
            .field("port", &self.port)
            .finish()
    }
}

/// Maps a listening port onto `30000..60000`.
pub fn backing_port(port: u16) -> u16 {
    30000 + (port % 30000)
}

fn generate_password() -> String {
    hex::encode(rand::random::<[u8; 32]>())
}

#[cfg(test)]
mod tests {
    use super::*;

    const IMAGE: &str = "postgres:17-alpine";
    const CONTAINER: &str = "pgkv";

    #[test]
    fn derives_backing_port_from_listening_port() {
        let cases = vec![(6380, 36380), (0, 30000), (30000, 30000), (65535, 35535)];

        cases.into_iter().for_each(|(port, expected)| {
            assert_eq!(backing_port(port), expected, "{}", port);
        });
    }

    #[test]
    fn generates_a_distinct_hex_password_per_database() {
        // Action.
        let first = ManagedDatabase::new(IMAGE, CONTAINER, 6380);
        let second = ManagedDatabase::new(IMAGE, CONTAINER, 6380);

        // Post-condition.
        assert_eq!(first.password().len(), 64);
        assert!(first.password().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(first.password(), second.password());
    }

    #[test]
    fn builds_connection_url_without_leaking_password_in_debug() {
        // Pre-condition.
        let database = ManagedDatabase::new(IMAGE, CONTAINER, 6380);

        // Action.
        let url = database.url();
        let debug = format!("{:?}", database);

        // Post-condition.
        assert_eq!(
            url,
            format!("postgres://postgres:{}@127.0.0.1:36380", database.password())
        );
        assert!(!debug.contains(database.password()));
    }
}
