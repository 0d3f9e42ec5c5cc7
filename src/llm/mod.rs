pub mod anthropic;
pub mod factory;
pub mod invoker;
pub mod openai_compatible;
pub mod provider;
