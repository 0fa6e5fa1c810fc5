//! Rota CLI library.
//!
//! This crate provides the command-line front end for the slot pool.

mod cli;
pub mod commands;
mod config;
mod pool;

pub use cli::{Cli, Commands};
pub use config::Config;
pub use pool::Pool;
