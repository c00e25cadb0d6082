pub mod api;
pub mod audit;
pub mod auth;
pub mod config;
pub mod db;
pub mod engine;
pub mod entities;
pub mod error;
pub mod external;
