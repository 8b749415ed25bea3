pub mod backend;
pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use backend::{
    create_backend, Backend, BroadcastFeed, BroadcastMessage, ChangeEvent, ChangeFeed,
    ChangeFilter, ChangeKind, Filter, MemoryBackend, PgBackend, Query,
};
pub use config::TiendaConfig;
pub use error::TiendaError;
