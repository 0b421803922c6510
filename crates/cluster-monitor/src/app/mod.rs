//! Application module
//!
//! Wiring of the engine to its cluster and backend adapters, and the
//! lifecycle of the background tasks that drive it.

pub mod builder;
pub mod core;
pub mod services;
pub mod tasks;

// Re-export main types
pub use builder::ApplicationBuilder;
pub use core::Application;
pub use services::ApplicationServices;
