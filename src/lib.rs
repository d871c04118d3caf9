pub mod api;
pub mod chain;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod indexer;
pub mod resolver;
pub mod types;
