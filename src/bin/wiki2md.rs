//! CLI binary for edgequake-wiki2md.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ConversionConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_wiki2md::{
    convert_input, convert_to_file, inspect, ConversionConfig, ConversionProgressCallback,
    ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Progress bar over image embedding. Images in a batch finish out of order,
/// so lines are printed as they settle rather than by index.
struct CliProgressCallback {
    bar: ProgressBar,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner until `on_embed_start` reports how many images there are.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Reading page…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} images  \
             ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Embedding");
    }

    /// Clear the spinner when the run had nothing to embed.
    fn finish(&self) {
        if !self.bar.is_finished() {
            self.bar.finish_and_clear();
        }
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_embed_start(&self, total_images: usize) {
        self.activate_bar(total_images);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Embedding {total_images} images…"))
        ));
    }

    fn on_image_complete(&self, index: usize, total: usize, bytes: usize) {
        self.bar.println(format!(
            "  {} Image {:>3}/{:<3}  {}",
            green("✓"),
            index + 1,
            total,
            dim(&format!("{:>8} bytes", bytes)),
        ));
        self.bar.inc(1);
    }

    fn on_image_error(&self, index: usize, total: usize, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} Image {:>3}/{:<3}  {}",
            red("✗"),
            index + 1,
            total,
            red(&msg),
        ));
        self.bar.inc(1);
    }

    fn on_embed_complete(&self, total_images: usize, embedded: usize) {
        self.bar.finish_and_clear();
        let failed = self.errors.load(Ordering::SeqCst);

        if failed == 0 {
            eprintln!(
                "{} {} images embedded",
                green("✔"),
                bold(&embedded.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} images embedded  ({} kept as links)",
                cyan("⚠"),
                bold(&embedded.to_string()),
                total_images,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r##"EXAMPLES:
  # Convert a saved page (stdout)
  wiki2md page.html

  # Convert to file with front matter and a title heading
  wiki2md page.html --front-matter --title -o page.md

  # Saved page whose relative links belong to a live wiki
  wiki2md page.html --base-url https://wiki.example.org

  # Download a page with a session cookie and inline its images
  wiki2md https://wiki.example.org/display/OPS/Runbook \
      --cookie "JSESSIONID=..." --embed-images -o runbook.md

  # Title and metadata only
  wiki2md --inspect-only page.html

  # JSON output (markdown, metadata, images, stats)
  wiki2md --json page.html > page.json

ENVIRONMENT VARIABLES:
  WIKI2MD_OUTPUT            Output file
  WIKI2MD_FRONT_MATTER      Prepend YAML front matter
  WIKI2MD_TITLE             Prepend a "# Title" heading
  WIKI2MD_EMBED_IMAGES      Inline images as data URIs
  WIKI2MD_BASE_URL          Origin for relative links and attachments
  WIKI2MD_COOKIE            Cookie header for page and image requests
  WIKI2MD_AUTHORIZATION     Authorization header for page and image requests
  RUST_LOG                  Overrides the log filter (e.g. edgequake_wiki2md=debug)
"##;

/// Convert wiki pages to GitHub-flavoured Markdown.
#[derive(Parser, Debug)]
#[command(
    name = "wiki2md",
    version,
    about = "Convert wiki pages (saved HTML or URLs) to GitHub-flavoured Markdown",
    long_about = "Convert rendered wiki pages (Confluence new and legacy editors) to clean \
GitHub-flavoured Markdown. Macros become blockquotes, details blocks and code fences; every \
table becomes a valid pipe table; images can be inlined as data URIs.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local HTML file path or HTTP/HTTPS URL.
    input: String,

    /// Write Markdown to this file instead of stdout.
    #[arg(short, long, env = "WIKI2MD_OUTPUT")]
    output: Option<PathBuf>,

    /// Prepend YAML front matter with page metadata.
    #[arg(long, env = "WIKI2MD_FRONT_MATTER")]
    front_matter: bool,

    /// Prepend a level-1 heading with the page title.
    #[arg(long, env = "WIKI2MD_TITLE")]
    title: bool,

    /// Inline images as base64 data URIs.
    #[arg(long, env = "WIKI2MD_EMBED_IMAGES")]
    embed_images: bool,

    /// Absolute origin used for relative links, images and attachments.
    #[arg(long, env = "WIKI2MD_BASE_URL")]
    base_url: Option<String>,

    /// Cookie header sent with the page download and image fetches.
    #[arg(long, env = "WIKI2MD_COOKIE", hide_env_values = true)]
    cookie: Option<String>,

    /// Authorization header sent with the page download and image fetches.
    #[arg(long, env = "WIKI2MD_AUTHORIZATION", hide_env_values = true)]
    authorization: Option<String>,

    /// Output structured JSON (ConversionOutput) instead of Markdown.
    #[arg(long, env = "WIKI2MD_JSON")]
    json: bool,

    /// Print title and metadata only, no conversion.
    #[arg(long, env = "WIKI2MD_INSPECT_ONLY")]
    inspect_only: bool,

    /// Disable progress bar.
    #[arg(long, env = "WIKI2MD_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "WIKI2MD_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "WIKI2MD_QUIET")]
    quiet: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "WIKI2MD_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The bar only has something to show while images are embedded.
    let show_progress = cli.embed_images && !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let config = build_config(&cli, None)?;
        let page = inspect(&cli.input, &config)
            .await
            .context("Failed to inspect page")?;

        if cli.json {
            let value = serde_json::json!({
                "title": page.title,
                "metadata": page.metadata,
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&value).context("Failed to serialize metadata")?
            );
        } else {
            let meta = &page.metadata;
            println!("Input:          {}", cli.input);
            println!("Title:          {}", page.title);
            if let Some(ref s) = meta.space {
                println!("Space:          {}", s);
            }
            if let Some(ref a) = meta.author {
                println!("Author:         {}", a);
            }
            if let Some(ref m) = meta.last_modified {
                println!("Last modified:  {}", m);
            }
            if let Some(ref u) = meta.source_url {
                println!("Source URL:     {}", u);
            }
            if !meta.labels.is_empty() {
                println!("Labels:         {}", meta.labels.join(", "));
            }
            println!("Content:        {} bytes of HTML", page.html.len());
        }
        return Ok(());
    }

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb = show_progress.then(CliProgressCallback::new_dynamic);
    let config = build_config(
        &cli,
        progress_cb
            .clone()
            .map(|cb| cb as Arc<dyn ConversionProgressCallback>),
    )?;

    // ── Run conversion ───────────────────────────────────────────────────
    if let Some(ref output_path) = cli.output {
        let result = convert_to_file(&cli.input, output_path, &config).await;
        if let Some(ref cb) = progress_cb {
            cb.finish();
        }
        let stats = result.context("Conversion failed")?;

        if !cli.quiet {
            eprintln!(
                "{}  {} tables  {}/{} images embedded  {}ms  →  {}",
                if stats.images_failed == 0 {
                    green("✔")
                } else {
                    cyan("⚠")
                },
                stats.tables,
                stats.images_embedded,
                stats.images_total,
                stats.duration_ms,
                bold(&output_path.display().to_string()),
            );
        }
    } else {
        let result = convert_input(&cli.input, &config).await;
        if let Some(ref cb) = progress_cb {
            cb.finish();
        }
        let output = result.context("Conversion failed")?;

        if cli.json {
            let json =
                serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
            println!("{json}");
        } else {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(output.markdown.as_bytes())
                .context("Failed to write to stdout")?;
        }

        if !cli.quiet && !cli.json {
            eprintln!(
                "Converted '{}': {} tables, {}/{} images embedded in {}ms",
                output.title,
                output.stats.tables,
                output.stats.images_embedded,
                output.stats.images_total,
                output.stats.duration_ms
            );
            if output.stats.images_failed > 0 {
                eprintln!(
                    "  {}",
                    dim(&format!("{} images kept as links", output.stats.images_failed))
                );
            }
        }
    }

    Ok(())
}

/// Map CLI args to `ConversionConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ConversionConfig> {
    let mut builder = ConversionConfig::builder()
        .include_front_matter(cli.front_matter)
        .include_title(cli.title)
        .embed_images(cli.embed_images)
        .download_timeout_secs(cli.download_timeout);

    if let Some(ref url) = cli.base_url {
        builder = builder.base_url(url.clone());
    }
    if let Some(ref cookie) = cli.cookie {
        builder = builder.cookie(cookie.clone());
    }
    if let Some(ref auth) = cli.authorization {
        builder = builder.authorization(auth.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
