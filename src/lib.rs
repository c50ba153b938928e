#[macro_use]
extern crate tracing;

pub mod config;
pub mod discovery;

pub use framework::{Error, Result};
