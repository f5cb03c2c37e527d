// crates/conveyor-core/src/core/hashing.rs
// ============================================================================
// Module: Conveyor Content Hashing
// Description: SHA-256 content hashing for evidence artifacts.
// Purpose: Provide deterministic digests for manifests and on-disk bytes.
// Dependencies: sha2
// ============================================================================

//! ## Overview
//! Evidence manifests record a SHA-256 digest per artifact and a self-hash
//! over the manifest bytes. Digests are computed over raw bytes exactly as
//! written to disk, so verification never depends on re-serialization.

// ============================================================================
// SECTION: Imports
// ============================================================================

use sha2::Digest;
use sha2::Sha256;

// ============================================================================
// SECTION: Hashing Helpers
// ============================================================================

/// Hashes raw bytes with SHA-256 and returns the lowercase hex digest.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_encode(&hasher.finalize())
}

/// Encodes bytes as a lowercase hex string.
fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}
