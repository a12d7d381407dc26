//! HTTP API Handlers - Modular organization of the REST API
//!
//! Each submodule handles a specific domain of functionality.

// Core modules
pub mod router;
pub mod state;
pub mod types;

// Health and utilities
pub mod health;
pub mod utils;

// Memory operations
pub mod memory;
pub mod search;

// Accounts and credentials
pub mod keys;

// Test utilities (compiled only in test builds)
#[cfg(test)]
pub mod test_helpers;

// Re-export commonly used items
pub use router::{build_protected_routes, build_public_routes, build_router, AppState};
pub use state::MemoryHub;
pub use types::*;
