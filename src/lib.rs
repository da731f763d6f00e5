pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod logical;
pub mod models;
pub mod templates;
pub mod terminology;
pub mod transform;
