pub mod auth;
pub mod cleanup;
pub mod config;
pub mod log_sink;
pub mod models;
pub mod providers;
pub mod token_store;
