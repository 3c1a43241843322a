//! Integration testing module
//!
//! End-to-end tests for the relay:
//! - Cached resolution through the HTTP surface
//! - Delivery of combined, ranged and synthesized formats
//! - Thumbnail and subtitle proxying
//! - Admission rejection and client disconnect handling

pub mod e2e;
pub mod fixtures;
pub mod upstream;
