pub mod api;
pub mod auth;
pub mod config;
pub mod csv_import;
pub mod db;
pub mod error;
pub mod market;
pub mod metrics;
pub mod models;
