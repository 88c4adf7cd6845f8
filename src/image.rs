//! Digest-pinned image reference parsing.

use crate::error::ProvisionError;

/// Separator between an image name and its content digest.
const DIGEST_SEPARATOR: &str = "@sha256:";

/// Number of digest characters used as the content id.
pub const CONTENT_ID_LEN: usize = 16;

/// A container image reference pinned by content digest.
///
/// The content id is a truncated digest prefix used purely as a cache
/// key. It is NOT a cryptographic integrity check — the fetched binary
/// is never verified against the full digest (a deliberate, documented
/// gap in this layer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    reference: String,
    content_id: String,
}

impl ImageRef {
    /// Parse a digest-pinned reference such as
    /// `registry.dagger.io/engine@sha256:6b9d7c…`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::InvalidReference`] if the reference has
    /// no `@sha256:` digest, or if the first [`CONTENT_ID_LEN`] digest
    /// characters are not lowercase hex — the id becomes part of a cache
    /// filename, so anything that could smuggle path separators is
    /// rejected outright.
    pub fn parse(reference: &str) -> Result<Self, ProvisionError> {
        let Some((_, digest)) = reference.split_once(DIGEST_SEPARATOR) else {
            return Err(ProvisionError::InvalidReference(reference.to_owned()));
        };
        // Validate bytes before slicing: the id must be lowercase hex,
        // which also guarantees the slice below lands on a char boundary.
        let head = digest.as_bytes().get(..CONTENT_ID_LEN);
        if !head.is_some_and(|head| head.iter().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))) {
            return Err(ProvisionError::InvalidReference(reference.to_owned()));
        }
        let content_id = &digest[..CONTENT_ID_LEN];
        Ok(Self {
            reference: reference.to_owned(),
            content_id: content_id.to_owned(),
        })
    }

    /// The full reference as given, digest included.
    #[must_use]
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Truncated digest prefix used as the cache key.
    #[must_use]
    pub fn content_id(&self) -> &str {
        &self.content_id
    }
}
