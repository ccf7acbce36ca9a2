pub mod config;
pub mod db;
pub mod models;
pub mod protocol;
pub mod server;
pub mod sync;
