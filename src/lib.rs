pub mod bridge;
pub mod cli;
pub mod commands;
pub mod env_loader;
pub mod error;
pub mod import;
pub mod logging;
