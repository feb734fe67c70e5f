pub mod analyzers;
pub mod catalog;
pub mod config;
pub mod error;
pub mod fetch;
pub mod gate;
pub mod infra;
pub mod output;
pub mod pipeline;
pub mod services;
