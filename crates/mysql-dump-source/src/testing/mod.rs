//! Test doubles for the dump pipeline.
//!
//! `memory` replaces the server with an in-process store; `container`
//! starts a real MySQL server in Docker for end-to-end tests.

pub mod container;
pub mod memory;

pub use container::MySQLContainer;
pub use memory::{numbered_rows, Event, Failure, MemoryServer};
