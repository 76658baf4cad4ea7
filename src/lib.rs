pub mod classifier;
pub mod config;
pub mod llm;
pub mod output;
pub mod spotify;
