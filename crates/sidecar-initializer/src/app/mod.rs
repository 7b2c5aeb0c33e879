//! Application module
//!
//! This module contains the main application structure and lifecycle management,
//! organized into logical sub-modules.

pub mod builder;
pub mod core;
pub mod tasks;

// Re-export main types
pub use builder::ApplicationBuilder;
pub use self::core::Application;
