//! # edgequake-wiki2md
//!
//! Convert rendered wiki pages (Confluence new and legacy editors) to clean
//! GitHub-flavoured Markdown.
//!
//! ## Why this crate?
//!
//! Generic HTML-to-Markdown converters stumble on wiki pages: macros come out
//! as nested `div` soup, merged table cells produce ragged rows that no
//! Markdown renderer accepts, and images point at attachment URLs that need a
//! session to load. This crate rewrites the wiki's widgets into plain HTML
//! first, rebuilds every table as a rectangular grid with a header row, and
//! only then renders Markdown, so the output is always valid GFM.
//!
//! ## Pipeline Overview
//!
//! ```text
//! page HTML
//!  │
//!  ├─ 1. Extract    content root, title and metadata (owned copy of the tree)
//!  ├─ 2. Macros     panels, expands, code blocks, status badges, task lists…
//!  ├─ 3. Tables     span expansion, header detection, cell linearisation
//!  ├─ 4. Images     URL resolution, optional data-URI embedding (batches of 4)
//!  ├─ 5. Render     ordered rule dispatch to Markdown
//!  └─ 6. Polish     whitespace and leftover-markup cleanup, front matter
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_wiki2md::{convert, ConversionConfig, RawPage};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let html = std::fs::read_to_string("page.html")?;
//!     let page = RawPage::new("https://wiki.example.org/display/OPS/Runbook", html);
//!     let config = ConversionConfig::builder().include_title(true).build()?;
//!     let output = convert(&page, &config).await?;
//!     println!("{}", output.markdown);
//!     eprintln!("{} tables", output.stats.tables);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `wiki2md` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-wiki2md = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod dom;
pub mod error;
pub mod messaging;
pub mod output;
pub mod pipeline;
pub mod progress;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ConversionConfig, ConversionConfigBuilder, ConversionOptions};
pub use convert::{
    convert, convert_input, convert_sync, convert_to_file, extract_content, extract_page, inspect,
};
pub use error::{ImageEmbedError, Wiki2MdError};
pub use messaging::{handle_message, handle_request, Action, Request, Response};
pub use output::{ConversionOutput, ConversionStats, ExtractedPage, ImageDescriptor, Metadata};
pub use pipeline::input::RawPage;
pub use pipeline::render::{Renderer, Rule};
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback};
