pub mod browser;
pub mod build;
pub mod config;
pub mod console;
pub mod discover;
pub mod error;
pub mod run;
pub mod server;

pub use error::{Error, Result};
