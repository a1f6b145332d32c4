pub mod audit;
pub mod client_state;
pub mod config;
pub mod db;
pub mod dto;
pub mod entity;
pub mod error;
pub mod llm;
pub mod middleware;
pub mod models;
pub mod paypal;
pub mod rate_limit;
pub mod response;
pub mod routes;
pub mod services;
pub mod state;
