pub mod adapters;
pub mod config;
pub mod error;

pub use adapters::{DbIdentity, DbStore, FilePrefs};
pub use config::Config;
pub use error::AppError;
