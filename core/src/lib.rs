pub mod config;
pub mod db;
pub mod error;
pub mod migrations;
pub mod models;
pub mod phone;
pub mod query;
pub mod store;
pub mod upsert;
mod legacy;
mod worker;

pub use config::HistoryConfig;
pub use error::HistoryError;
pub use phone::{DialingCodeNormalizer, PhoneNormalizer};
pub use store::HistoryStore;
pub use upsert::IdentityResolver;
