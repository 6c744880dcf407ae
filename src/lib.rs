pub mod config;
pub mod error;
pub mod db;
pub mod index;
pub mod ingest;
pub mod rag;

pub use config::Config;
pub use error::{PkbError, Result};
