pub mod auth;
pub mod config;
pub mod error;
pub mod gate; // role-restriction middleware
pub mod mail;
pub mod models;
pub mod openapi;
pub mod rate_limit;
pub mod repo;
pub mod routes;
pub mod thread;
pub mod validation;

// Re-export commonly used items for tests / external users
pub use crate::config::AppConfig;
pub use gate::restrict_to;
pub use routes::{config, AppState};
