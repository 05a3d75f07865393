pub mod account;
pub mod auth;
pub mod comments;
pub mod config;
pub mod error;
pub mod format;
pub mod gateway;
pub mod models;
pub mod notify;
pub mod openapi;
pub mod pages;
pub mod pagination;
pub mod relations;
pub mod repo;
pub mod routes;
pub mod security;
pub mod session;
pub mod storage; // object storage for videos, thumbnails and avatars
pub mod toggle;
pub mod upload;

// Re-export commonly used items for tests / external users
pub use routes::{config, AppState};
pub use security::SecurityHeaders;
