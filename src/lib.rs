pub mod commands;
pub mod config;
pub mod error;
pub mod llm;
pub mod models;
pub mod orchestration;
pub mod server;
pub mod session;
pub mod state;
pub mod tools;
