//! Utility functions shared across the application
//!
//! Byte formatting, directory lookup and progress tracking.

mod format;
mod path;
mod progress;

pub use format::*;
pub use path::*;
pub use progress::*;
