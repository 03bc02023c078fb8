//! Host messaging: the JSON envelope a browser host exchanges with the
//! converter.
//!
//! ```text
//! { "action": "convert", "options": { "includeTitle": true } }
//!   → { "success": true, "data": { "markdown": "…", … } }
//!   → { "success": false, "error": "Could not find the page content. …" }
//! ```
//!
//! Option keys outside [`ConversionOptions`] are rejected at parse time, so a
//! host typo surfaces as an error instead of being silently ignored.

use crate::config::{ConversionConfig, ConversionOptions};
use crate::convert::{convert, extract_content};
use crate::pipeline::input::RawPage;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// What the host wants done with the current page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Full pipeline; `data` is a [`crate::ConversionOutput`].
    Convert,
    /// Extraction only; `data` is a [`crate::ExtractedPage`].
    Extract,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub action: Action,
    #[serde(default)]
    pub options: ConversionOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }

    fn from_result<T: Serialize, E: std::fmt::Display>(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => match serde_json::to_value(value) {
                Ok(data) => Self::ok(data),
                Err(e) => Self::failure(format!("Failed to serialise result: {}", e)),
            },
            Err(e) => Self::failure(e.to_string()),
        }
    }
}

/// Run `request` against `page`.
///
/// The request's options replace those in `config`; credentials, base URL
/// and the progress callback are kept. Never fails outward: every error is
/// reported in the response.
pub async fn handle_request(page: &RawPage, request: &Request, config: &ConversionConfig) -> Response {
    debug!("Host request: {:?} for {}", request.action, page.url);
    let config = config.with_options(request.options);
    let response = match request.action {
        Action::Convert => Response::from_result(convert(page, &config).await),
        Action::Extract => Response::from_result(extract_content(page, &config).await),
    };
    if let Some(ref e) = response.error {
        warn!("Host request failed: {}", e);
    }
    response
}

/// Parse a raw JSON message and dispatch it.
pub async fn handle_message(page: &RawPage, message: &str, config: &ConversionConfig) -> Response {
    match serde_json::from_str::<Request>(message) {
        Ok(request) => handle_request(page, &request, config).await,
        Err(e) => Response::failure(format!("Invalid request: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page() -> RawPage {
        RawPage::new(
            "https://wiki.example.org/display/DOC/Intro",
            r#"<html><head><title>Intro - Confluence</title></head><body>
               <div class="wiki-content"><h2>Welcome</h2>
               <p>This page introduces the documentation space and its layout.</p>
               <p>Second paragraph with enough text to clear the root threshold.</p></div>
               </body></html>"#,
        )
    }

    #[test]
    fn parses_request_with_default_options() {
        let req: Request = serde_json::from_str(r#"{"action":"extract"}"#).unwrap();
        assert_eq!(req.action, Action::Extract);
        assert_eq!(req.options, ConversionOptions::default());
    }

    #[test]
    fn rejects_unknown_option_keys() {
        let res: Result<Request, _> =
            serde_json::from_str(r#"{"action":"convert","options":{"embedImage":true}}"#);
        assert!(res.is_err());
    }

    #[test]
    fn rejects_unknown_actions() {
        let res: Result<Request, _> = serde_json::from_str(r#"{"action":"download"}"#);
        assert!(res.is_err());
    }

    #[test]
    fn failure_omits_data() {
        let json = serde_json::to_string(&Response::failure("nope")).unwrap();
        assert_eq!(json, r#"{"success":false,"error":"nope"}"#);
    }

    #[test]
    fn convert_action_returns_markdown() {
        let req = Request {
            action: Action::Convert,
            options: ConversionOptions {
                include_title: true,
                ..Default::default()
            },
        };
        let resp = tokio_test::block_on(handle_request(&page(), &req, &ConversionConfig::default()));
        assert!(resp.success);
        let data = resp.data.unwrap();
        assert_eq!(data["title"], "Intro");
        let md = data["markdown"].as_str().unwrap();
        assert!(md.starts_with("# Intro\n\n## Welcome\n"));
    }

    #[test]
    fn extract_action_returns_html_and_metadata() {
        let resp = tokio_test::block_on(handle_message(
            &page(),
            r#"{"action":"extract","options":{"embedImages":false}}"#,
            &ConversionConfig::default(),
        ));
        assert!(resp.success);
        let data = resp.data.unwrap();
        assert!(data["html"].as_str().unwrap().contains("<h2>Welcome</h2>"));
        assert_eq!(
            data["metadata"]["source_url"],
            "https://wiki.example.org/display/DOC/Intro"
        );
    }

    #[test]
    fn extraction_error_is_reported_verbatim() {
        let empty = RawPage::new("https://wiki.example.org/", "<html><body> </body></html>");
        let resp = tokio_test::block_on(handle_message(
            &empty,
            r#"{"action":"convert"}"#,
            &ConversionConfig::default(),
        ));
        assert!(!resp.success);
        assert!(resp.error.unwrap().starts_with("Could not find the page content"));
    }

    #[test]
    fn malformed_message_is_a_failure_response() {
        let resp = tokio_test::block_on(handle_message(
            &page(),
            "not json",
            &ConversionConfig::default(),
        ));
        assert!(!resp.success);
        assert!(resp.error.unwrap().starts_with("Invalid request"));
    }
}
