//! Testing utilities and mock implementations
//!
//! Fakes for the broker connection, process probe and tick handler, used by the unit
//! tests and by the integration tests under `tests/`.

pub mod mocks;

pub use mocks::*;
