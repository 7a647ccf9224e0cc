// Library exports for Kyozo
// This allows integration tests and the binary to share one router

pub mod access;
pub mod auth;
pub mod broadcast;
pub mod community;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod live;
pub mod providers;
pub mod routes;
pub mod state;
pub mod storage;
pub mod users;
pub mod webhooks;

pub use routes::app;
