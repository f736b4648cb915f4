//! Content identity: deterministic hashes and the cache key for an upload.
//!
//! `cache_key = sha256(json({textHash, metadataHash}))`. Every function here is
//! pure: the same content and metadata always produce the same identity.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::analysis::extractor::ExtractedContent;
use crate::models::cache::FileMetadata;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentIdentity {
    pub text_hash: String,
    pub metadata_hash: String,
    pub cache_key: String,
}

/// The serialized form hashed into the cache key. Field order is fixed.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct KeyMaterial<'a> {
    text_hash: &'a str,
    metadata_hash: &'a str,
}

/// Lowercase hex SHA-256.
pub fn digest(bytes: impl AsRef<[u8]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes.as_ref());
    hex::encode(hasher.finalize())
}

/// Collapses every run of whitespace to a single space and trims the ends.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Canonical string form of extracted content. Page images are represented by
/// the ordered digests of their bytes, so two renders of the same document
/// normalize identically.
pub fn normalize_content(content: &ExtractedContent) -> String {
    match content {
        ExtractedContent::Text(text) => normalize_text(text),
        ExtractedContent::Pages(pages) => {
            let digests: Vec<String> = pages.iter().map(|p| digest(&p.data)).collect();
            format!("pages:{}", digests.join(","))
        }
    }
}

pub fn compute_identity(
    content: &ExtractedContent,
    metadata: &FileMetadata,
) -> serde_json::Result<ContentIdentity> {
    let text_hash = digest(normalize_content(content));
    let metadata_hash = digest(serde_json::to_vec(metadata)?);
    let cache_key = digest(serde_json::to_vec(&KeyMaterial {
        text_hash: &text_hash,
        metadata_hash: &metadata_hash,
    })?);

    Ok(ContentIdentity {
        text_hash,
        metadata_hash,
        cache_key,
    })
}
