pub mod api;
pub mod bootstrap;
pub mod config;
pub mod session;
pub mod storage;

pub use api::Server;
pub use config::Config;
pub use session::Session;
