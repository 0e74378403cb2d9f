//! Shared helpers

pub mod checksum;
pub mod datetime;
