//! Keystone Types - Identifiers shared by the governance crates.
//!
//! This crate provides:
//! - Addresses (20-byte, Bech32m encoded)
//! - Hashes (32-byte, blake3 digests)
//! - Serde helpers for token amounts

pub mod address;
pub mod hash;
pub mod error;

#[cfg(feature = "serde")]
pub mod serialization;

pub use address::Address;
pub use hash::Hash;
pub use error::TypesError;

/// Logical time unit. Supplied by the caller, never advanced internally.
pub type Tick = u64;
