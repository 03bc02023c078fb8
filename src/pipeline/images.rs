//! Image resolution and embedding.
//!
//! Resolution always runs and is synchronous: every `<img>` gets the best
//! absolute URL we can find written to `src`, and a matching
//! [`ImageDescriptor`] is recorded.
//!
//! Embedding only runs when requested. Images are fetched in batches of
//! [`EMBED_BATCH_SIZE`]; within a batch all fetches run concurrently and are
//! joined with every outcome kept, so one slow or broken image never holds up
//! or fails the others. Each image gets one attempt per strategy:
//!
//! 1. **Primary** — credentialed GET; the response must be `image/*` and at
//!    most [`MAX_EMBED_BYTES`]. Base64-wrapped as is.
//! 2. **Fallback** — decode whatever bytes are available (the primary's, or
//!    an anonymous GET) and re-encode them via [`super::encode`].
//!
//! When both fail the `src` is left alone and the error recorded.

use crate::config::{ConversionConfig, EMBED_BATCH_SIZE, EMBED_TIMEOUT_SECS, MAX_EMBED_BYTES};
use crate::dom::{self, Element, Node, Visit};
use crate::error::ImageEmbedError;
use crate::output::ImageDescriptor;
use crate::pipeline::encode;
use crate::pipeline::input::request_headers;
use crate::progress::{NoopProgressCallback, ProgressCallback};
use futures::future::join_all;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::CONTENT_TYPE;
use reqwest::Url;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where an image's real source may hide, best first. `src` comes last
/// because lazy-loading pages park a placeholder there.
const CANDIDATE_ATTRS: &[&str] = &[
    "data-image-src",
    "data-original-src",
    "data-src",
    "data-original",
    "src",
];

static RE_PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:^about:blank$|placeholder|spacer\.gif|blank\.gif|transparent\.(?:gif|png))")
        .unwrap()
});

fn is_data_uri(url: &str) -> bool {
    url.get(..5).is_some_and(|p| p.eq_ignore_ascii_case("data:"))
}

fn is_unusable(url: &str) -> bool {
    url.get(..5).is_some_and(|p| p.eq_ignore_ascii_case("blob:")) || RE_PLACEHOLDER.is_match(url)
}

/// Resolve every `<img>` under `root`, in document order.
pub fn resolve_images(root: &mut Element, origin: Option<&Url>) -> Vec<ImageDescriptor> {
    let mut descriptors = Vec::new();
    dom::rewrite_children(root, &mut |node: &mut Node| {
        if let Node::Element(img) = node {
            if img.is("img") {
                descriptors.push(resolve_image(img, origin));
            }
        }
        Visit::Descend
    });
    debug!("Resolved {} images", descriptors.len());
    descriptors
}

/// Pick a source for one `<img>` and write it back to `src`.
///
/// The alternate-source attributes are dropped afterwards, so resolving the
/// same element twice gives the same answer.
pub fn resolve_image(img: &mut Element, origin: Option<&Url>) -> ImageDescriptor {
    let original_src = img.attr("src").unwrap_or_default().to_string();
    let candidate_urls: Vec<String> = CANDIDATE_ATTRS
        .iter()
        .filter_map(|a| img.attr_nonempty(a))
        .map(str::to_string)
        .collect();

    let mut descriptor = ImageDescriptor {
        original_src,
        candidate_urls,
        ..Default::default()
    };

    let resolved = match descriptor.candidate_urls.first() {
        Some(first) if is_data_uri(first) => Some(first.clone()),
        _ => descriptor
            .candidate_urls
            .iter()
            .filter(|u| !is_unusable(u))
            .find_map(|u| absolutize(u, origin))
            .or_else(|| attachment_url(img, origin)),
    };

    if let Some(url) = &resolved {
        if img.attr("src") != Some(url.as_str()) {
            img.set_attr("src", url.clone());
        }
        if is_data_uri(url) {
            descriptor.embedded = true;
            descriptor.data_uri = Some(url.clone());
        }
    }
    for attr in &CANDIDATE_ATTRS[..CANDIDATE_ATTRS.len() - 1] {
        img.remove_attr(attr);
    }
    descriptor.resolved_url = resolved;
    descriptor
}

/// Absolute form of `url`; relative URLs stay relative without an origin.
fn absolutize(url: &str, origin: Option<&Url>) -> Option<String> {
    if is_data_uri(url) {
        return Some(url.to_string());
    }
    if let Ok(abs) = Url::parse(url) {
        return Some(abs.to_string());
    }
    match origin {
        Some(o) => o.join(url).ok().map(|u| u.to_string()),
        None => Some(url.to_string()),
    }
}

/// `{base}/download/attachments/{container}/{alias}` from the linked-resource
/// attributes, or `{base}/download/attachments/{id}` when the container or
/// file name is missing.
fn attachment_url(img: &Element, origin: Option<&Url>) -> Option<String> {
    let id = img.attr_nonempty("data-linked-resource-id")?;
    let mut base = match img.attr_nonempty("data-base-url") {
        Some(b) => Url::parse(b).ok()?,
        None => origin?.join("/").ok()?,
    };
    let container = img.attr_nonempty("data-linked-resource-container-id");
    let alias = img.attr_nonempty("data-linked-resource-default-alias");
    {
        let mut segments = base.path_segments_mut().ok()?;
        segments.pop_if_empty().extend(["download", "attachments"]);
        match (container, alias) {
            (Some(container), Some(alias)) => {
                segments.extend([container, alias]);
            }
            _ => {
                segments.push(id);
            }
        }
    }
    Some(base.to_string())
}

// ── embedding ────────────────────────────────────────────────────────────

/// Inline every resolved, not-yet-embedded image as a data URI.
///
/// Never fails: per-image errors land in [`ImageDescriptor::error`]. On
/// return, `src` of each embedded image in `root` holds its data URI.
pub async fn embed_images(
    root: &mut Element,
    images: &mut [ImageDescriptor],
    config: &ConversionConfig,
) {
    let pending: Vec<usize> = images
        .iter()
        .enumerate()
        .filter(|(_, d)| !d.embedded && d.resolved_url.as_deref().is_some_and(is_fetchable))
        .map(|(i, _)| i)
        .collect();
    if pending.is_empty() {
        return;
    }

    let progress: ProgressCallback = config
        .progress_callback
        .clone()
        .unwrap_or_else(|| Arc::new(NoopProgressCallback));
    let total = pending.len();
    progress.on_embed_start(total);
    info!("Embedding {} images in batches of {}", total, EMBED_BATCH_SIZE);

    let fetcher = match Fetcher::new(config) {
        Ok(f) => f,
        Err(detail) => {
            warn!("Image embedding disabled: {}", detail);
            for &i in &pending {
                let url = images[i].resolved_url.clone().unwrap_or_default();
                let err = ImageEmbedError::Network {
                    url,
                    detail: detail.clone(),
                };
                progress.on_image_error(i, total, &err.to_string());
                images[i].error = Some(err);
            }
            progress.on_embed_complete(total, 0);
            return;
        }
    };

    let mut embedded = 0usize;
    for batch in pending.chunks(EMBED_BATCH_SIZE) {
        let outcomes = join_all(batch.iter().map(|&i| {
            let url = images[i].resolved_url.clone().unwrap_or_default();
            let fetcher = &fetcher;
            async move { (i, fetcher.embed(&url).await) }
        }))
        .await;

        for (i, outcome) in outcomes {
            match outcome {
                Ok(data_uri) => {
                    progress.on_image_complete(i, total, data_uri.len());
                    images[i].embedded = true;
                    images[i].data_uri = Some(data_uri);
                    images[i].error = None;
                    embedded += 1;
                }
                Err(e) => {
                    warn!("Image {} not embedded: {}", i, e);
                    progress.on_image_error(i, total, &e.to_string());
                    images[i].error = Some(e);
                }
            }
        }
    }

    write_back(root, images);
    progress.on_embed_complete(total, embedded);
    info!("Embedded {}/{} images", embedded, total);
}

fn is_fetchable(url: &str) -> bool {
    Url::parse(url).is_ok_and(|u| matches!(u.scheme(), "http" | "https"))
}

/// Copy data URIs into `src`, pairing descriptors with `<img>`s by position.
fn write_back(root: &mut Element, images: &[ImageDescriptor]) {
    let mut index = 0usize;
    dom::rewrite_children(root, &mut |node: &mut Node| {
        if let Node::Element(img) = node {
            if img.is("img") {
                if let Some(uri) = images.get(index).and_then(|d| d.data_uri.as_ref()) {
                    img.set_attr("src", uri.clone());
                }
                index += 1;
            }
        }
        Visit::Descend
    });
}

/// A fetched body and its declared content type.
struct Fetched {
    content_type: Option<String>,
    bytes: Vec<u8>,
}

/// The two HTTP clients used for embedding.
struct Fetcher {
    credentialed: reqwest::Client,
    anonymous: reqwest::Client,
    timeout: Duration,
}

impl Fetcher {
    fn new(config: &ConversionConfig) -> Result<Self, String> {
        let build = |with_credentials: bool| {
            reqwest::Client::builder()
                .default_headers(request_headers(config, with_credentials))
                .build()
                .map_err(|e| e.to_string())
        };
        Ok(Self {
            credentialed: build(true)?,
            anonymous: build(false)?,
            timeout: Duration::from_secs(EMBED_TIMEOUT_SECS),
        })
    }

    /// Primary strategy, then fallback. `TooLarge` skips the fallback.
    async fn embed(&self, url: &str) -> Result<String, ImageEmbedError> {
        let primary = self.bounded(url, self.fetch(&self.credentialed, url)).await;
        let salvage = match primary {
            Ok(fetched) => match image_mime(&fetched) {
                Some(mime) => return Ok(encode::to_data_uri(&mime, &fetched.bytes)),
                None => {
                    let content_type = fetched.content_type.clone().unwrap_or_default();
                    (
                        ImageEmbedError::NotAnImage {
                            url: url.to_string(),
                            content_type,
                        },
                        Some(fetched.bytes),
                    )
                }
            },
            Err(e @ ImageEmbedError::TooLarge { .. }) => return Err(e),
            Err(e) => (e, None),
        };

        let (primary_err, bytes) = salvage;
        debug!("Primary fetch failed for {}: {}; trying fallback", url, primary_err);
        match self.fallback(url, bytes).await {
            Ok(uri) => Ok(uri),
            Err(fallback_err) => {
                debug!("Fallback failed for {}: {}", url, fallback_err);
                Err(primary_err)
            }
        }
    }

    /// Decode and re-encode. Uses `bytes` when the primary got some,
    /// otherwise fetches anonymously.
    async fn fallback(&self, url: &str, bytes: Option<Vec<u8>>) -> Result<String, ImageEmbedError> {
        let bytes = match bytes {
            Some(b) => b,
            None => self.bounded(url, self.fetch(&self.anonymous, url)).await?.bytes,
        };
        let url_owned = url.to_string();
        let work = tokio::task::spawn_blocking(move || -> Result<String, ImageEmbedError> {
            let img = image::load_from_memory(&bytes).map_err(|e| ImageEmbedError::Decode {
                url: url_owned.clone(),
                detail: e.to_string(),
            })?;
            let (mime, encoded) = encode::reencode(&img).map_err(|e| ImageEmbedError::Encode {
                url: url_owned.clone(),
                detail: e.to_string(),
            })?;
            Ok(encode::to_data_uri(mime, &encoded))
        });
        match self.bounded(url, async { Ok(work.await) }).await? {
            Ok(result) => result,
            Err(join) => Err(ImageEmbedError::Encode {
                url: url.to_string(),
                detail: join.to_string(),
            }),
        }
    }

    /// Run one strategy step under the per-image timeout.
    async fn bounded<T>(
        &self,
        url: &str,
        fut: impl std::future::Future<Output = Result<T, ImageEmbedError>>,
    ) -> Result<T, ImageEmbedError> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .unwrap_or_else(|_| {
                Err(ImageEmbedError::Timeout {
                    url: url.to_string(),
                    secs: self.timeout.as_secs(),
                })
            })
    }

    /// One GET with the size cap enforced while reading.
    async fn fetch(&self, client: &reqwest::Client, url: &str) -> Result<Fetched, ImageEmbedError> {
        let network = |e: reqwest::Error| ImageEmbedError::Network {
            url: url.to_string(),
            detail: e.to_string(),
        };
        let too_large = |bytes: u64| ImageEmbedError::TooLarge {
            url: url.to_string(),
            bytes,
            limit: MAX_EMBED_BYTES,
        };

        let mut response = client.get(url).send().await.map_err(network)?;
        if !response.status().is_success() {
            return Err(ImageEmbedError::HttpStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        if let Some(len) = response.content_length().filter(|&l| l > MAX_EMBED_BYTES) {
            return Err(too_large(len));
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(network)? {
            bytes.extend_from_slice(&chunk);
            if bytes.len() as u64 > MAX_EMBED_BYTES {
                return Err(too_large(bytes.len() as u64));
            }
        }
        Ok(Fetched {
            content_type,
            bytes,
        })
    }
}

/// `image/*` MIME type of a response, parameters dropped.
fn image_mime(fetched: &Fetched) -> Option<String> {
    let mime = fetched
        .content_type
        .as_deref()?
        .split(';')
        .next()?
        .trim()
        .to_ascii_lowercase();
    (mime.starts_with("image/") && !fetched.bytes.is_empty()).then_some(mime)
}
