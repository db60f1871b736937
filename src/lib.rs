pub mod campaign;
pub mod config;
pub mod container;
pub mod error;
pub mod iteration;
pub mod logs;
pub mod probe;

pub use error::{Error, Result};
