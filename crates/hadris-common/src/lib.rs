//! Hadris Common
//!
//! Shared endian-aware primitive types and checksum algorithms used across
//! the Hadris filesystem crates.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "alloc")]
extern crate alloc;

/// Algorithms
pub mod alg;
/// Types
pub mod types;
