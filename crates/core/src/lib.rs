//! Core types for the stage pipeline: job records, window clock, and errors.

pub mod error;
pub mod job;
pub mod window;

pub use error::{Error, Result};
pub use job::*;
pub use window::*;
