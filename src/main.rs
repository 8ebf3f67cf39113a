use anyhow::Result;
use pgkv::{
    bootstrap,
    config::{Config, Database, ManagedDatabase},
};
use structopt::StructOpt;
use tracing_subscriber::EnvFilter;

#[derive(StructOpt)]
struct Opts {
    /// Interface to listen on.
    #[structopt(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on; the managed database port is derived from it.
    #[structopt(short, long, default_value = "6380")]
    port: u16,

    /// Use an already running PostgreSQL instead of launching one.
    #[structopt(long, env = "PGKV_DATABASE_URL", conflicts_with = "in-memory")]
    database_url: Option<String>,

    /// Keep the data in this process instead of PostgreSQL.
    #[structopt(long)]
    in_memory: bool,

    /// Image of the managed PostgreSQL container.
    #[structopt(long, default_value = "postgres:17-alpine")]
    image: String,

    /// Name of the managed PostgreSQL container.
    #[structopt(long, default_value = "pgkv")]
    container_name: String,
}

impl Opts {
    fn into_config(self) -> Config {
        let database = match (self.in_memory, self.database_url) {
            (true, _) => Database::InMemory,
            (false, Some(url)) => Database::External { url },
            (false, None) => Database::Managed(ManagedDatabase::new(
                self.image,
                self.container_name,
                self.port,
            )),
        };

        Config {
            host: self.host,
            port: self.port,
            database,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logger();

    let config = Opts::from_args().into_config();

    bootstrap::run(&config).await
}

fn init_logger() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(filter).init()
}
