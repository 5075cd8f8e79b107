//! Monotonic ULID generation
//!
//! Run and plan identifiers are ULIDs drawn from one process-wide generator so
//! that identifiers created in sequence sort in creation order, even within the
//! same millisecond.

use std::sync::{Mutex, OnceLock};
use ulid::{Generator, Ulid};

static ULID_GENERATOR: OnceLock<Mutex<Generator>> = OnceLock::new();

/// Generate a ULID strictly greater than every ULID previously generated here
pub fn generate_monotonic_ulid() -> Ulid {
    let generator = ULID_GENERATOR.get_or_init(|| Mutex::new(Generator::new()));
    let mut generator = generator
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    // Overflow only happens after 2^80 ids in one millisecond
    generator.generate().unwrap_or_else(|_| Ulid::new())
}
