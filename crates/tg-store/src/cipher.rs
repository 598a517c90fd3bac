// SPDX-License-Identifier: MIT OR Apache-2.0
//! Credential sealing seam.
//!
//! The encryption gateway itself is an external collaborator; the store
//! only guarantees that credential blobs pass through this trait on the
//! way in and out, and that plaintext never crosses any other boundary.

/// Seals and opens credential blobs at rest.
pub trait CredentialCipher: Send + Sync {
    /// Seal plaintext credential material for storage.
    ///
    /// # Errors
    ///
    /// Implementation-specific failure, surfaced as a store error.
    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, String>;

    /// Open a sealed blob back into plaintext.
    ///
    /// # Errors
    ///
    /// Implementation-specific failure, surfaced as a store error.
    fn open(&self, blob: &[u8]) -> Result<Vec<u8>, String>;
}

/// Identity cipher for development and tests.
///
/// Production deployments inject the real encryption gateway here; the
/// store API is identical either way.
pub struct PassthroughCipher;

impl CredentialCipher for PassthroughCipher {
    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, String> {
        Ok(plaintext.to_vec())
    }

    fn open(&self, blob: &[u8]) -> Result<Vec<u8>, String> {
        Ok(blob.to_vec())
    }
}
