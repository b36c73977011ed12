#[macro_use]
pub mod macros;

pub mod ast;
pub mod collections;
pub mod config;
pub mod constant;
pub mod error;
pub mod info;
pub mod ir;
pub mod pretty;
pub mod span;
pub mod token;
pub mod types;

// Re-export commonly used items for convenience
pub use eyre;
pub use tracing;

pub use config::BuilderMode;
pub type Error = crate::error::Error;
pub type Result<T> = crate::error::Result<T>;
