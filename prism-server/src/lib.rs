// Library entry point for prism-server
// Exposes core modules for testing and external use

pub mod config;
pub mod error;
pub mod routes;
pub mod services;
pub mod state;
pub mod types;

// Re-export commonly used items
pub use error::{PrismError, PrismResult};
pub use services::identity;
pub use services::prover;
