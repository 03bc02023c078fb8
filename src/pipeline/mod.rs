//! Pipeline stages for wiki-page-to-Markdown conversion.
//!
//! Each submodule implements exactly one transformation step, so every
//! stage can be tested on its own.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ extract ──▶ macros ──▶ images (embed) ──▶ render ──▶ postprocess
//! (path/URL) (scraper)  (+tables,   (reqwest,          (rules)    (cleanup)
//!                        +images)    optional)
//! ```
//!
//! 1. [`input`]   — read a saved page or download it, yielding `(url, html)`
//! 2. [`extract`] — find the content root, title and metadata; deep-copy the
//!    root into an owned tree
//! 3. [`macros`]  — rewrite wiki widgets into plain HTML, then run
//!    [`tables`] and the resolution half of [`images`]
//! 4. [`images`]  — optionally inline images as data URIs; the only stage
//!    with network I/O besides `input`. [`encode`] handles re-encoding
//! 5. [`render`]  — ordered rule dispatch from tree to Markdown
//! 6. [`postprocess`] — deterministic text cleanup

pub mod encode;
pub mod extract;
pub mod images;
pub mod input;
pub mod macros;
pub mod postprocess;
pub mod render;
pub mod tables;
