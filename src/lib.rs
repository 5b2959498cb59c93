#[cfg(not(any(feature = "inmem-store", feature = "postgres-store")))]
compile_error!("enable at least one of the `inmem-store` or `postgres-store` features");

pub mod auth;
pub mod credentials;
pub mod db;
pub mod error;
pub mod gate;
pub mod models;
pub mod rate_limit; // in-memory rate limiting
pub mod repo;
pub mod resource;
pub mod routes;
pub mod validation;

// Re-export commonly used items for tests / external users
pub use gate::AdminGate;
pub use routes::{config, AppState};
