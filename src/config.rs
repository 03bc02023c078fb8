//! Configuration types for wiki-to-Markdown conversion.
//!
//! Two layers:
//!
//! * [`ConversionOptions`] — the three user-facing switches a host sends with
//!   each request. Nothing else is accepted on the wire.
//! * [`ConversionConfig`] — everything the library needs to run: the options
//!   above plus transport settings (origin override, credentials, timeouts)
//!   and an optional progress callback. Built via [`ConversionConfigBuilder`].
//!
//! The heuristic thresholds used by the pipeline are empirically tuned and
//! kept as named constants here rather than configuration knobs.

use crate::error::Wiki2MdError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;

// ── Tuned constants ──────────────────────────────────────────────────────

/// A content-root candidate must serialise to more than this many characters
/// to win outright.
pub const MIN_CONTENT_ROOT_CHARS: usize = 100;

/// First-row cell text at or above this length is not used as a synthetic
/// header label.
pub const MAX_HEADER_LABEL_CHARS: usize = 50;

/// Cell background colours that mark a cell as a header.
pub const HEADER_BACKGROUND_COLORS: &[&str] = &[
    "#f4f5f7",
    "#f0f0f0",
    "#deebff",
    "#e3fcef",
    "#eae6ff",
    "#fffae6",
    "#ffebe6",
    "rgb(244, 245, 247)",
    "rgb(240, 240, 240)",
];

/// Number of images fetched concurrently during embedding.
pub const EMBED_BATCH_SIZE: usize = 4;

/// Per-strategy timeout for one image fetch.
pub const EMBED_TIMEOUT_SECS: u64 = 8;

/// Images larger than this stay linked instead of embedded.
pub const MAX_EMBED_BYTES: u64 = 5 * 1024 * 1024;

/// Quality used when the raster fallback re-encodes an opaque image as JPEG.
pub const JPEG_QUALITY: u8 = 85;

/// Upper bound for a single `colspan` / `rowspan` value.
pub const MAX_SPAN: usize = 100;

/// Upper bound for the expanded grid of one table.
pub const MAX_GRID_CELLS: usize = 100_000;

// ── Options ──────────────────────────────────────────────────────────────

/// Per-request conversion switches.
///
/// Serialised with the camelCase names hosts use (`includeFrontMatter`,
/// `includeTitle`, `embedImages`). Unknown keys are rejected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct ConversionOptions {
    /// Prefix the document with a YAML front-matter block.
    pub include_front_matter: bool,
    /// Prefix the body with a `# Title` heading.
    pub include_title: bool,
    /// Inline images as base64 data URIs.
    pub embed_images: bool,
}

// ── Config ───────────────────────────────────────────────────────────────

/// Configuration for a wiki-to-Markdown conversion.
///
/// # Example
/// ```rust
/// use edgequake_wiki2md::ConversionConfig;
///
/// let config = ConversionConfig::builder()
///     .include_front_matter(true)
///     .embed_images(true)
///     .base_url("https://wiki.example.org")
///     .build()
///     .unwrap();
/// assert!(config.options.embed_images);
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// User-facing switches.
    pub options: ConversionOptions,

    /// Origin used to absolutise relative links and images and to build
    /// attachment download URLs. Defaults to the page URL's origin.
    pub base_url: Option<String>,

    /// `Cookie` header sent with the page download and the primary image fetch.
    pub cookie: Option<String>,

    /// `Authorization` header sent with the page download and the primary
    /// image fetch.
    pub authorization: Option<String>,

    /// `User-Agent` header for every request.
    pub user_agent: String,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Receives image-embedding progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            options: ConversionOptions::default(),
            base_url: None,
            cookie: None,
            authorization: None,
            user_agent: format!("edgequake-wiki2md/{}", env!("CARGO_PKG_VERSION")),
            download_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("options", &self.options)
            .field("base_url", &self.base_url)
            .field("cookie", &self.cookie.as_ref().map(|_| "<redacted>"))
            .field(
                "authorization",
                &self.authorization.as_ref().map(|_| "<redacted>"),
            )
            .field("user_agent", &self.user_agent)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field(
                "progress_callback",
                &self
                    .progress_callback
                    .as_ref()
                    .map(|_| "<dyn ConversionProgressCallback>"),
            )
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Same configuration with different per-request options.
    pub fn with_options(&self, options: ConversionOptions) -> Self {
        Self {
            options,
            ..self.clone()
        }
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn options(mut self, options: ConversionOptions) -> Self {
        self.config.options = options;
        self
    }

    pub fn include_front_matter(mut self, v: bool) -> Self {
        self.config.options.include_front_matter = v;
        self
    }

    pub fn include_title(mut self, v: bool) -> Self {
        self.config.options.include_title = v;
        self
    }

    pub fn embed_images(mut self, v: bool) -> Self {
        self.config.options.embed_images = v;
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = Some(url.into());
        self
    }

    pub fn cookie(mut self, cookie: impl Into<String>) -> Self {
        self.config.cookie = Some(cookie.into());
        self
    }

    pub fn authorization(mut self, value: impl Into<String>) -> Self {
        self.config.authorization = Some(value.into());
        self
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.config.user_agent = ua.into();
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs.max(1);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, Wiki2MdError> {
        if let Some(ref base) = self.config.base_url {
            let parsed = reqwest::Url::parse(base).map_err(|e| {
                Wiki2MdError::InvalidConfig(format!("base URL '{base}' is not a valid URL: {e}"))
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(Wiki2MdError::InvalidConfig(format!(
                    "base URL '{base}' must use http or https"
                )));
            }
        }
        Ok(self.config)
    }
}
