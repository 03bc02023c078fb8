//! Error types for the edgequake-wiki2md library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`Wiki2MdError`] — **Fatal**: the conversion cannot proceed at all
//!   (no content root in the page, unreadable input file, bad configuration).
//!   Returned as `Err(Wiki2MdError)` from the top-level `convert*` functions.
//!
//! * [`ImageEmbedError`] — **Non-fatal**: a single image could not be inlined
//!   as a data URI. The image keeps its resolved URL and the failure is
//!   recorded in [`crate::output::ImageDescriptor`]; the rest of the document
//!   is unaffected.
//!
//! Nothing else in the pipeline is allowed to fail: every normalisation pass
//! and the renderer produce output for any tree, however malformed.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-wiki2md library.
#[derive(Debug, Error)]
pub enum Wiki2MdError {
    // ── Extraction errors ─────────────────────────────────────────────────
    /// No content root could be located in the page.
    ///
    /// The message is surfaced verbatim to the caller.
    #[error("{message}")]
    Extraction { message: String },

    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("HTML file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection and credentials.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output Markdown file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Wiki2MdError {
    pub(crate) fn extraction(message: impl Into<String>) -> Self {
        Self::Extraction {
            message: message.into(),
        }
    }
}

/// A non-fatal error for a single image.
///
/// Stored in [`crate::output::ImageDescriptor::error`] when embedding fails.
/// The image stays linked by URL.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum ImageEmbedError {
    /// A fetch strategy did not finish within the per-image timeout.
    #[error("'{url}': timed out after {secs}s")]
    Timeout { url: String, secs: u64 },

    /// Transport-level failure (DNS, connection refused, TLS, …).
    #[error("'{url}': network error: {detail}")]
    Network { url: String, detail: String },

    /// Server answered with a non-success status.
    #[error("'{url}': HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    /// Response content type is not `image/*`.
    #[error("'{url}': not an image (content-type '{content_type}')")]
    NotAnImage { url: String, content_type: String },

    /// Payload exceeds the embedding size limit; kept as a linked URL.
    #[error("'{url}': {bytes} bytes exceeds the {limit}-byte embedding limit")]
    TooLarge { url: String, bytes: u64, limit: u64 },

    /// Bytes could not be decoded as a raster image.
    #[error("'{url}': decode failed: {detail}")]
    Decode { url: String, detail: String },

    /// Re-encoding the decoded raster failed.
    #[error("'{url}': encode failed: {detail}")]
    Encode { url: String, detail: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_message_is_verbatim() {
        let e = Wiki2MdError::extraction("Could not find page content");
        assert_eq!(e.to_string(), "Could not find page content");
    }

    #[test]
    fn too_large_display() {
        let e = ImageEmbedError::TooLarge {
            url: "https://wiki.example.org/a.png".into(),
            bytes: 6_000_000,
            limit: 5_242_880,
        };
        let msg = e.to_string();
        assert!(msg.contains("6000000"), "got: {msg}");
        assert!(msg.contains("a.png"));
    }

    #[test]
    fn timeout_display() {
        let e = ImageEmbedError::Timeout {
            url: "https://wiki.example.org/b.png".into(),
            secs: 8,
        };
        assert!(e.to_string().contains("8s"));
    }

    #[test]
    fn download_timeout_display() {
        let e = Wiki2MdError::DownloadTimeout {
            url: "https://wiki.example.org/page".into(),
            secs: 120,
        };
        assert!(e.to_string().contains("120s"));
    }
}
