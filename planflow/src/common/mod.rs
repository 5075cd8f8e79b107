//! Common utilities module

/// Environment variable loading utilities
pub mod env_loader;

/// Monotonic identifier generation
pub mod ulid_generator;

pub use env_loader::EnvLoader;
pub use ulid_generator::generate_monotonic_ulid;
