//! Part and whole-object fingerprints
//!
//! A part's fingerprint is the BLAKE3 digest of its bytes. The object
//! fingerprint is the BLAKE3 digest of the concatenated raw part digests,
//! suffixed with `-<part count>`, the same shape S3 uses for multipart
//! ETags. Anything that follows these rules can be checked against a
//! local recomputation after the upload.

use crate::types::hex;
use crate::{ContentDigest, ETag};

/// Fingerprint of one part
pub fn part_etag(data: &[u8]) -> ETag {
    ETag::new(ContentDigest::new(data).to_hex())
}

/// Fingerprint of a multipart object, from its part digests in part order
pub fn composite_etag<'a, I>(part_digests: I) -> ETag
where
    I: IntoIterator<Item = &'a ContentDigest>,
{
    let mut hasher = blake3::Hasher::new();
    let mut count = 0usize;
    for digest in part_digests {
        hasher.update(digest.as_bytes());
        count += 1;
    }
    ETag::new(format!("{}-{}", hasher.finalize().to_hex(), count))
}

/// Parse a part ETag produced by [`part_etag`] back into its digest
pub fn digest_from_etag(etag: &ETag) -> Option<ContentDigest> {
    let bytes: [u8; 32] = hex::decode(etag.as_str())?.try_into().ok()?;
    Some(ContentDigest::from_bytes(bytes))
}
