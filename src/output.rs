//! Output types returned by the conversion entry points.

use crate::error::ImageEmbedError;
use serde::{Deserialize, Serialize};

/// Page metadata. Every field is best-effort and may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub source_url: Option<String>,
    pub space: Option<String>,
    pub author: Option<String>,
    pub last_modified: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
}

/// What the resolver and embedder learned about one `<img>`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDescriptor {
    /// `src` as it appeared in the page (may be empty).
    pub original_src: String,
    /// Candidate URLs in priority order, as found on the element.
    pub candidate_urls: Vec<String>,
    /// URL written back to `src` after resolution.
    pub resolved_url: Option<String>,
    /// True when `src` now holds (or already held) a data URI.
    pub embedded: bool,
    /// The data URI produced by the embedder.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_uri: Option<String>,
    /// Why embedding failed, if it was attempted and failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ImageEmbedError>,
}

/// Counters for one conversion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionStats {
    /// Tables normalised into pipe tables.
    pub tables: usize,
    /// Images found in the content root.
    pub images_total: usize,
    /// Images inlined as data URIs (including ones that already were).
    pub images_embedded: usize,
    /// Images whose embedding was attempted and failed.
    pub images_failed: usize,
    /// Wall-clock duration of the whole conversion.
    pub duration_ms: u64,
}

/// Result of a successful conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionOutput {
    /// The final Markdown document, front matter included when requested.
    pub markdown: String,
    pub title: String,
    pub metadata: Metadata,
    /// One descriptor per image, in document order.
    pub images: Vec<ImageDescriptor>,
    pub stats: ConversionStats,
}

/// Result of extraction alone: what a Content Provider hands back to a host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedPage {
    pub title: String,
    /// Serialised inner HTML of the content root.
    pub html: String,
    pub metadata: Metadata,
}
