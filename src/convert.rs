//! Conversion entry points.
//!
//! [`convert`] takes a page that is already in memory (what a browser host
//! hands over). [`convert_input`] first resolves a path or URL through
//! [`crate::pipeline::input`]. Everything else here wraps one of those two.

use crate::config::{ConversionConfig, ConversionOptions};
use crate::error::Wiki2MdError;
use crate::output::{ConversionOutput, ConversionStats, ExtractedPage, Metadata};
use crate::pipeline::extract::{self, ExtractedDocument};
use crate::pipeline::input::{self, RawPage};
use crate::pipeline::{images, macros, postprocess, render};
use chrono::{SecondsFormat, Utc};
use reqwest::Url;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

/// Convert a wiki page to Markdown.
///
/// This is the primary entry point for the library.
///
/// # Returns
/// `Ok(ConversionOutput)` on success, even if some images could not be
/// embedded (check `output.stats.images_failed`).
///
/// # Errors
/// Only [`Wiki2MdError::Extraction`]: the page has no recognisable content.
pub async fn convert(
    page: &RawPage,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Wiki2MdError> {
    let total_start = Instant::now();
    info!("Starting conversion: {}", page.url);

    // ── Step 1: Extract ──────────────────────────────────────────────────
    let ExtractedDocument {
        title,
        mut root,
        metadata,
        ..
    } = extract::extract(page)?;

    // ── Step 2: Normalise macros, tables, image URLs ─────────────────────
    let origin = document_origin(page, config);
    let report = macros::normalize(&mut root, origin.as_ref());
    let mut images = report.images;
    debug!(
        "Normalised: {} tables, {} images",
        report.tables,
        images.len()
    );

    // ── Step 3: Embed images (optional) ──────────────────────────────────
    if config.options.embed_images {
        images::embed_images(&mut root, &mut images, config).await;
    }

    // ── Step 4: Render and clean ─────────────────────────────────────────
    let body = render::render(&root);
    let markdown = assemble_document(&title, &body, &metadata, config.options);

    let stats = ConversionStats {
        tables: report.tables,
        images_total: images.len(),
        images_embedded: images.iter().filter(|d| d.embedded).count(),
        images_failed: images.iter().filter(|d| d.error.is_some()).count(),
        duration_ms: total_start.elapsed().as_millis() as u64,
    };

    info!(
        "Conversion complete: '{}' ({} bytes, {} tables, {}/{} images embedded, {}ms)",
        title,
        markdown.len(),
        stats.tables,
        stats.images_embedded,
        stats.images_total,
        stats.duration_ms
    );

    Ok(ConversionOutput {
        markdown,
        title,
        metadata,
        images,
        stats,
    })
}

/// Resolve a local file path or HTTP/HTTPS URL, then [`convert`] it.
pub async fn convert_input(
    input_str: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Wiki2MdError> {
    let page = input::resolve_input(input_str.as_ref(), config).await?;
    convert(&page, config).await
}

/// Convert a page and write the Markdown directly to a file.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn convert_to_file(
    input_str: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionStats, Wiki2MdError> {
    let output = convert_input(input_str, config).await?;
    let path = output_path.as_ref();
    let write_err = |e: std::io::Error| Wiki2MdError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let tmp_path = path.with_extension("md.tmp");
    tokio::fs::write(&tmp_path, &output.markdown)
        .await
        .map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;

    Ok(output.stats)
}

/// Synchronous wrapper around [`convert_input`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    input_str: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Wiki2MdError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Wiki2MdError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert_input(input_str, config))
}

/// Extraction only: title, content-root HTML and metadata.
pub fn extract_page(page: &RawPage) -> Result<ExtractedPage, Wiki2MdError> {
    extract::extract(page).map(ExtractedDocument::into_page)
}

/// Extraction as a host asks for it: with `embed_images` set, image sources
/// in the returned HTML are resolved and inlined as data URIs.
pub async fn extract_content(
    page: &RawPage,
    config: &ConversionConfig,
) -> Result<ExtractedPage, Wiki2MdError> {
    let mut doc = extract::extract(page)?;
    if config.options.embed_images {
        let origin = document_origin(page, config);
        let mut descriptors = images::resolve_images(&mut doc.root, origin.as_ref());
        images::embed_images(&mut doc.root, &mut descriptors, config).await;
        doc.html = doc.root.inner_html();
    }
    Ok(doc.into_page())
}

/// Resolve the input and extract it without rendering.
pub async fn inspect(
    input_str: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<ExtractedPage, Wiki2MdError> {
    let page = input::resolve_input(input_str.as_ref(), config).await?;
    extract_page(&page)
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// Absolute base for relative URLs: the configured base, else the page URL
/// when it is http(s). Saved pages (`file://`) keep relative links relative.
fn document_origin(page: &RawPage, config: &ConversionConfig) -> Option<Url> {
    config
        .base_url
        .as_deref()
        .and_then(|b| Url::parse(b).ok())
        .or_else(|| Url::parse(&page.url).ok())
        .filter(|u| matches!(u.scheme(), "http" | "https"))
}

/// Front matter, optional title heading, cleaned body.
fn assemble_document(
    title: &str,
    body: &str,
    metadata: &Metadata,
    options: ConversionOptions,
) -> String {
    let mut document = String::new();
    if options.include_title {
        document.push_str(&format!("# {}\n\n", title));
    }
    document.push_str(body.trim_start_matches('\n'));
    let cleaned = postprocess::clean_markdown(&document);

    if options.include_front_matter {
        format!("{}{}", format_yaml_front_matter(title, metadata), cleaned)
    } else {
        cleaned
    }
}

/// Double-quoted YAML scalar: backslashes and quotes escaped, newlines folded.
fn yaml_quote(value: &str) -> String {
    let folded = value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace("\r\n", " ")
        .replace(['\n', '\r'], " ");
    format!("\"{}\"", folded)
}

/// Format page metadata as YAML front matter.
fn format_yaml_front_matter(title: &str, meta: &Metadata) -> String {
    let mut yaml = String::from("---\n");
    yaml.push_str(&format!("title: {}\n", yaml_quote(title)));

    if let Some(ref s) = meta.space {
        yaml.push_str(&format!("space: {}\n", yaml_quote(s)));
    }
    if let Some(ref a) = meta.author {
        yaml.push_str(&format!("author: {}\n", yaml_quote(a)));
    }
    if let Some(ref m) = meta.last_modified {
        yaml.push_str(&format!("last_modified: {}\n", yaml_quote(m)));
    }
    if let Some(ref u) = meta.source_url {
        yaml.push_str(&format!("source_url: {}\n", yaml_quote(u)));
    }
    if !meta.labels.is_empty() {
        yaml.push_str("labels:\n");
        for label in &meta.labels {
            yaml.push_str(&format!("  - {}\n", yaml_quote(label)));
        }
    }
    yaml.push_str(&format!(
        "converted_at: {}\n",
        yaml_quote(&Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true))
    ));

    yaml.push_str("---\n\n");
    yaml
}
