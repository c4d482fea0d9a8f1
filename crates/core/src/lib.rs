//! Shardlink Core - Fundamental types and utilities

mod error;
mod types;
mod seed;

pub use error::*;
pub use types::*;
pub use seed::*;
