pub mod catalog;
pub mod definition;
pub mod executor;
pub mod registry;
pub mod remote;
pub mod schema;
