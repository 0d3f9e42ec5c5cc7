pub mod conversation;
pub mod engine;
pub mod prompt;
pub mod trace;
