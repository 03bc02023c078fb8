//! End-to-end tests for edgequake-wiki2md.
//!
//! Every test drives the public API with an in-memory page. The embedding
//! tests talk to a throwaway HTTP responder on `127.0.0.1`, so nothing here
//! needs network access.
//!
//! Run with:
//!   cargo test --test e2e -- --nocapture

use edgequake_wiki2md::config::{EMBED_BATCH_SIZE, EMBED_TIMEOUT_SECS, MAX_EMBED_BYTES};
use edgequake_wiki2md::dom::Element;
use edgequake_wiki2md::pipeline::{extract, tables};
use edgequake_wiki2md::{
    convert, ConversionConfig, ConversionOutput, ConversionProgressCallback, ImageEmbedError,
    RawPage, Wiki2MdError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

// ── Test helpers ─────────────────────────────────────────────────────────────

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn wiki_page(url: &str, body: &str) -> RawPage {
    RawPage::new(
        url,
        format!(
            "<html><head><title>Page - Confluence</title></head><body>\
             <div id=\"main-content\" class=\"wiki-content\">{body}</div></body></html>"
        ),
    )
}

async fn convert_body(body: &str) -> ConversionOutput {
    init_tracing();
    let page = wiki_page("https://wiki.example.org/display/DOC/Page", body);
    convert(&page, &ConversionConfig::default())
        .await
        .expect("conversion should succeed")
}

/// Assert the markdown passes basic quality checks.
fn assert_markdown_quality(md: &str, context: &str) {
    assert!(!md.trim().is_empty(), "[{context}] Markdown is empty");
    assert!(
        md.ends_with('\n') && !md.ends_with("\n\n"),
        "[{context}] Markdown must end with exactly one newline"
    );
    assert!(
        !md.contains("\n\n\n\n"),
        "[{context}] Output has more than 2 consecutive blank lines"
    );
    for line in md.lines() {
        assert_eq!(line, line.trim_end(), "[{context}] trailing whitespace: {line:?}");
    }
    for tag in ["<table", "<tr", "<td", "<th"] {
        assert!(!md.contains(tag), "[{context}] raw table markup survived: {tag}");
    }
}

/// Lines of the first pipe table in `md`.
fn table_lines(md: &str) -> Vec<&str> {
    md.lines()
        .skip_while(|l| !l.starts_with('|'))
        .take_while(|l| l.starts_with('|'))
        .collect()
}

fn unescaped_pipes(line: &str) -> usize {
    line.matches('|').count() - line.matches("\\|").count()
}

fn is_separator(line: &str) -> bool {
    line.contains('-') && line.chars().all(|c| matches!(c, '|' | '-' | ':' | ' '))
}

fn png(rgba: [u8; 4]) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(4, 4, image::Rgba(rgba));
    let mut buf = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut buf, image::ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

#[derive(Default)]
struct Route {
    path: &'static str,
    status: u16,
    content_type: &'static str,
    body: Vec<u8>,
    /// Wait this long before answering.
    delay: Option<Duration>,
    /// Read the request, then never answer.
    stall: bool,
    /// Send the body without a `Content-Length`, delimited by close.
    unsized_body: bool,
}

struct Server {
    base: String,
    /// Request heads, in arrival order.
    seen: Arc<Mutex<Vec<String>>>,
    /// Most requests ever waiting on their answer at once.
    peak: Arc<AtomicUsize>,
}

/// Minimal HTTP/1.1 responder on an ephemeral port.
async fn serve(routes: Vec<Route>) -> Server {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let routes = Arc::new(routes);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let peak = Arc::new(AtomicUsize::new(0));
    let in_flight = Arc::new(AtomicUsize::new(0));
    let (log, high) = (seen.clone(), peak.clone());

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let routes = routes.clone();
            let log = log.clone();
            let (high, in_flight) = (high.clone(), in_flight.clone());
            tokio::spawn(async move {
                let mut buf = vec![0u8; 16 * 1024];
                let mut read = 0;
                while read < buf.len() {
                    let n = socket.read(&mut buf[read..]).await.unwrap_or(0);
                    if n == 0 {
                        break;
                    }
                    read += n;
                    if buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
                let head = String::from_utf8_lossy(&buf[..read]).to_string();
                let target = head.split_whitespace().nth(1).unwrap_or("/").to_string();
                let path = target.split('?').next().unwrap_or("/").to_string();
                log.lock().unwrap().push(head);

                let Some(route) = routes.iter().find(|r| r.path == path) else {
                    let _ = socket
                        .write_all(
                            b"HTTP/1.1 404 Not Found\r\nContent-Type: text/plain\r\n\
                              Content-Length: 9\r\nConnection: close\r\n\r\nnot found",
                        )
                        .await;
                    let _ = socket.shutdown().await;
                    return;
                };
                if route.stall {
                    let _hold = socket;
                    std::future::pending::<()>().await;
                    return;
                }

                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                high.fetch_max(now, Ordering::SeqCst);
                if let Some(delay) = route.delay {
                    tokio::time::sleep(delay).await;
                }
                in_flight.fetch_sub(1, Ordering::SeqCst);
                let reason = match route.status {
                    200 => "OK",
                    401 => "Unauthorized",
                    _ => "Not Found",
                };
                let length = if route.unsized_body {
                    String::new()
                } else {
                    format!("Content-Length: {}\r\n", route.body.len())
                };
                let header = format!(
                    "HTTP/1.1 {} {reason}\r\nContent-Type: {}\r\n{length}Connection: close\r\n\r\n",
                    route.status, route.content_type
                );
                let _ = socket.write_all(header.as_bytes()).await;
                let _ = socket.write_all(&route.body).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    Server {
        base: format!("http://{addr}"),
        seen,
        peak,
    }
}

async fn convert_with_embedding(base: &str, body: &str) -> ConversionOutput {
    init_tracing();
    let page = wiki_page(&format!("{base}/display/DOC/Page"), body);
    let config = ConversionConfig::builder()
        .embed_images(true)
        .base_url(base)
        .build()
        .unwrap();
    convert(&page, &config).await.expect("conversion should succeed")
}

// ── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn warning_panel_becomes_labelled_blockquote() {
    let out = convert_body(r#"<div class="confluence-information-macro-warning"><p>Be careful</p></div>"#).await;
    assert!(
        out.markdown.contains("> **⚠️ Warning:**\n>\n> Be careful"),
        "got:\n{}",
        out.markdown
    );
    assert_markdown_quality(&out.markdown, "panel");
}

#[tokio::test]
async fn headerless_table_gets_first_row_as_header() {
    let out = convert_body(
        "<table><tr><td>Name</td><td>Age</td></tr><tr><td>Ada</td><td>36</td></tr></table>",
    )
    .await;
    assert!(
        out.markdown.contains("| Name | Age |\n| --- | --- |\n| Ada | 36 |"),
        "got:\n{}",
        out.markdown
    );
    assert_eq!(out.markdown.matches("| Name | Age |").count(), 1);
    assert_eq!(out.stats.tables, 1);
    assert_markdown_quality(&out.markdown, "table");
}

#[tokio::test]
async fn checked_task_renders_as_checkbox() {
    let out = convert_body(
        r#"<ul class="inline-task-list"><li class="checked">Ship it</li><li>Write notes</li></ul>"#,
    )
    .await;
    assert!(
        out.markdown.contains("- [x] Ship it\n- [ ] Write notes"),
        "got:\n{}",
        out.markdown
    );
}

#[tokio::test]
async fn unknown_element_falls_back_to_its_text() {
    let out = convert_body(
        r#"<p>Before <x-widget data-foo="1">custom <b>text</b></x-widget> after</p>"#,
    )
    .await;
    assert!(
        out.markdown.contains("Before custom **text** after"),
        "got:\n{}",
        out.markdown
    );
    assert!(!out.markdown.contains("x-widget"));
}

#[tokio::test]
async fn missing_content_root_is_an_extraction_error() {
    let page = RawPage::new("https://wiki.example.org/", "<html><body>  </body></html>");
    let err = convert(&page, &ConversionConfig::default()).await.unwrap_err();
    assert!(matches!(err, Wiki2MdError::Extraction { .. }));
    assert!(err.to_string().starts_with("Could not find the page content"));
}

// ── Table invariants ─────────────────────────────────────────────────────────

#[tokio::test]
async fn merged_cells_render_as_rectangular_table() {
    let out = convert_body(
        r#"<table>
             <tr><th>Region</th><th>Q1</th><th>Q2</th></tr>
             <tr><td rowspan="2">EMEA</td><td colspan="2">flat</td></tr>
             <tr><td>10</td><td>12</td></tr>
             <tr><td>APAC</td><td>7</td></tr>
           </table>"#,
    )
    .await;
    let lines = table_lines(&out.markdown);
    assert_eq!(lines.len(), 5, "got:\n{}", out.markdown);

    let width = unescaped_pipes(lines[0]);
    assert_eq!(width, 4);
    for line in &lines {
        assert_eq!(unescaped_pipes(line), width, "ragged row: {line:?}");
    }
    assert!(is_separator(lines[1]));
    assert_eq!(lines.iter().filter(|l| is_separator(l)).count(), 1);
    assert_eq!(lines[2], "| EMEA | flat |  |");
    assert_eq!(lines[3], "|  | 10 | 12 |");
    assert_eq!(lines[4], "| APAC | 7 |  |");
}

#[tokio::test]
async fn cell_content_is_single_line() {
    let out = convert_body(
        r#"<table><tr><th>Step</th><th>Notes</th></tr>
           <tr><td>1</td><td><p>first</p><p>second | third</p><ul><li>a</li><li>b</li></ul></td></tr></table>"#,
    )
    .await;
    let lines = table_lines(&out.markdown);
    assert_eq!(lines.len(), 3, "got:\n{}", out.markdown);
    assert!(lines[2].contains("first<br>second \\| third"));
    assert!(lines[2].contains("• a<br>• b"));
}

#[test]
fn colspan_expands_into_empty_duplicate() {
    let cell = |tag: &str, text: &str| Element::new(tag).with_text(text);
    let rows = vec![
        Element::new("tr")
            .with_child(cell("td", "a"))
            .with_child(cell("td", "b"))
            .with_child(cell("td", "c")),
        Element::new("tr")
            .with_child(cell("th", "wide").with_attr("colspan", "2"))
            .with_child(cell("td", "z")),
    ];
    let (rows, max_columns) = tables::expand_spans(rows);
    assert_eq!(max_columns, 3);
    let second: Vec<&Element> = rows[1].element_children().collect();
    assert_eq!(second.len(), 3);
    assert_eq!(second[0].text_content(), "wide");
    assert!(!second[0].has_attr("colspan"));
    assert!(second[1].is("th"));
    assert!(second[1].children.is_empty());
    assert_eq!(second[2].text_content(), "z");
}

#[test]
fn table_normalisation_is_idempotent() {
    let page = wiki_page(
        "https://wiki.example.org/display/DOC/Page",
        r#"<table><tr><td class="highlight-grey">Key</td><td class="highlight-grey">Value</td></tr>
           <tr><td rowspan="3">k</td><td><p>v1</p><p>v2</p></td></tr></table>"#,
    );
    let mut root = extract::extract(&page).unwrap().root;
    let count = tables::normalize_tables(&mut root);
    assert_eq!(count, 1);
    let once = root.clone();
    tables::normalize_tables(&mut root);
    assert_eq!(root, once);
}

// ── Images ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn data_uri_images_pass_through() {
    init_tracing();
    let page = wiki_page(
        "https://wiki.example.org/display/DOC/Page",
        r#"<p><img src="data:image/png;base64,iVBORw0KGgo=" alt="dot"></p>"#,
    );
    let config = ConversionConfig::builder().embed_images(true).build().unwrap();
    let out = convert(&page, &config).await.unwrap();
    assert!(out.markdown.contains("![dot](data:image/png;base64,iVBORw0KGgo=)"));
    assert!(out.images[0].embedded);
    assert_eq!(out.stats.images_failed, 0);
}

#[derive(Default)]
struct Counting {
    started: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
}

impl ConversionProgressCallback for Counting {
    fn on_embed_start(&self, total: usize) {
        self.started.store(total, Ordering::SeqCst);
    }
    fn on_image_complete(&self, _index: usize, _total: usize, _bytes: usize) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
    fn on_image_error(&self, _index: usize, _total: usize, _error: &str) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn embeds_images_with_credentials_in_document_order() {
    let Server { base, seen, .. } = serve(vec![Route {
        path: "/img/ok.png",
        status: 200,
        content_type: "image/png",
        body: png([10, 20, 30, 255]),
        ..Default::default()
    }])
    .await;

    let body: String = (0..6)
        .map(|i| format!(r#"<p><img src="/img/ok.png?n={i}" alt="img{i}"></p>"#))
        .collect();
    let counting = Arc::new(Counting::default());
    let page = wiki_page(&format!("{base}/display/DOC/Page"), &body);
    let config = ConversionConfig::builder()
        .embed_images(true)
        .base_url(base.clone())
        .cookie("session=abc")
        .progress_callback(counting.clone())
        .build()
        .unwrap();
    let out = convert(&page, &config).await.unwrap();

    assert_eq!(out.stats.images_total, 6);
    assert_eq!(out.stats.images_embedded, 6);
    assert_eq!(counting.started.load(Ordering::SeqCst), 6);
    assert_eq!(counting.completed.load(Ordering::SeqCst), 6);
    for (i, image) in out.images.iter().enumerate() {
        assert!(image.embedded);
        assert!(image
            .resolved_url
            .as_deref()
            .unwrap()
            .ends_with(&format!("?n={i}")));
    }
    let positions: Vec<usize> = (0..6)
        .map(|i| out.markdown.find(&format!("![img{i}](data:image/png;base64,")).unwrap())
        .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]));

    let heads = seen.lock().unwrap();
    assert!(heads
        .iter()
        .all(|h| h.to_ascii_lowercase().contains("cookie: session=abc")));
}

#[tokio::test]
async fn falls_back_to_reencoding_when_type_is_not_an_image() {
    let Server { base, .. } = serve(vec![
        Route {
            path: "/download/opaque",
            status: 200,
            content_type: "application/octet-stream",
            body: png([200, 10, 10, 255]),
            ..Default::default()
        },
        Route {
            path: "/download/clear",
            status: 200,
            content_type: "application/octet-stream",
            body: png([0, 0, 0, 0]),
            ..Default::default()
        },
    ])
    .await;

    let out = convert_with_embedding(
        &base,
        r#"<p><img src="/download/opaque" alt="photo"> <img src="/download/clear" alt="logo"></p>"#,
    )
    .await;

    assert_eq!(out.stats.images_embedded, 2, "images: {:?}", out.images);
    assert!(out.markdown.contains("![photo](data:image/jpeg;base64,"));
    assert!(out.markdown.contains("![logo](data:image/png;base64,"));
}

#[tokio::test]
async fn failed_embedding_keeps_the_link() {
    let Server { base, .. } = serve(vec![Route {
        path: "/denied.png",
        status: 401,
        content_type: "text/html",
        body: b"<html>login</html>".to_vec(),
        ..Default::default()
    }])
    .await;

    let out = convert_with_embedding(
        &base,
        r#"<p><img src="/img/missing.png" alt="gone"><img src="/denied.png" alt="private"></p>"#,
    )
    .await;

    assert_eq!(out.stats.images_embedded, 0);
    assert_eq!(out.stats.images_failed, 2);
    assert!(out
        .markdown
        .contains(&format!("![gone]({base}/img/missing.png)")));
    assert!(out.markdown.contains(&format!("![private]({base}/denied.png)")));
    assert!(matches!(
        out.images[0].error,
        Some(ImageEmbedError::HttpStatus { status: 404, .. })
    ));
    assert!(matches!(
        out.images[1].error,
        Some(ImageEmbedError::HttpStatus { status: 401, .. })
    ));
    assert!(out.images.iter().all(|d| !d.embedded && d.data_uri.is_none()));
}

#[tokio::test]
async fn oversized_image_stays_linked_without_retry() {
    let huge = vec![0u8; MAX_EMBED_BYTES as usize + 1];
    let Server { base, seen, .. } = serve(vec![
        Route {
            path: "/big/declared.png",
            status: 200,
            content_type: "image/png",
            body: huge.clone(),
            ..Default::default()
        },
        Route {
            path: "/big/streamed.png",
            status: 200,
            content_type: "image/png",
            body: huge,
            unsized_body: true,
            ..Default::default()
        },
    ])
    .await;

    let out = convert_with_embedding(
        &base,
        r#"<p><img src="/big/declared.png" alt="poster"><img src="/big/streamed.png" alt="scan"></p>"#,
    )
    .await;

    assert_eq!(out.stats.images_embedded, 0);
    assert_eq!(out.stats.images_failed, 2);
    for descriptor in &out.images {
        assert!(!descriptor.embedded && descriptor.data_uri.is_none());
        assert!(
            matches!(
                descriptor.error,
                Some(ImageEmbedError::TooLarge { bytes, limit, .. })
                    if limit == MAX_EMBED_BYTES && bytes > MAX_EMBED_BYTES
            ),
            "unexpected error: {:?}",
            descriptor.error
        );
    }
    assert!(out.markdown.contains(&format!("![poster]({base}/big/declared.png)")));
    assert!(out.markdown.contains(&format!("![scan]({base}/big/streamed.png)")));

    // One request per image: no anonymous second attempt.
    let heads = seen.lock().unwrap();
    for path in ["/big/declared.png", "/big/streamed.png"] {
        let hits = heads.iter().filter(|h| h.contains(&format!("GET {path} "))).count();
        assert_eq!(hits, 1, "{path} requested {hits} times");
    }
}

#[tokio::test(start_paused = true)]
async fn unanswered_image_times_out() {
    let Server { base, .. } = serve(vec![Route {
        path: "/slow.png",
        stall: true,
        ..Default::default()
    }])
    .await;

    let started = tokio::time::Instant::now();
    let out = convert_with_embedding(&base, r#"<p><img src="/slow.png" alt="slow"></p>"#).await;

    assert!(started.elapsed() >= Duration::from_secs(EMBED_TIMEOUT_SECS));
    assert_eq!(out.stats.images_failed, 1);
    assert!(matches!(
        out.images[0].error,
        Some(ImageEmbedError::Timeout { secs, .. }) if secs == EMBED_TIMEOUT_SECS
    ));
    assert!(out.markdown.contains(&format!("![slow]({base}/slow.png)")));
}

#[tokio::test]
async fn embedding_runs_at_most_one_batch_at_a_time() {
    let server = serve(vec![Route {
        path: "/img/dot.png",
        status: 200,
        content_type: "image/png",
        body: png([0, 128, 0, 255]),
        delay: Some(Duration::from_millis(150)),
        ..Default::default()
    }])
    .await;

    let body: String = (0..9)
        .map(|i| format!(r#"<p><img src="/img/dot.png?n={i}" alt="dot{i}"></p>"#))
        .collect();
    let out = convert_with_embedding(&server.base, &body).await;

    assert_eq!(out.stats.images_embedded, 9);
    assert_eq!(server.seen.lock().unwrap().len(), 9);
    let peak = server.peak.load(Ordering::SeqCst);
    assert!(
        (2..=EMBED_BATCH_SIZE).contains(&peak),
        "{peak} requests were in flight at once"
    );
}

#[tokio::test]
async fn output_is_json_serialisable() {
    let out = convert_body("<h2>Intro</h2><p>Hello <em>world</em>.</p>").await;
    let json = serde_json::to_string(&out).expect("ConversionOutput must serialise");
    assert!(json.contains("\"markdown\""));
    assert!(json.contains("\"stats\""));
    assert!(out.markdown.starts_with("## Intro\n\nHello _world_."));
}

#[test]
fn callback_is_send_sync() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Counting>();
    assert_send_sync::<edgequake_wiki2md::NoopProgressCallback>();
}
