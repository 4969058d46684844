//! HTML rendering of callback outcomes.

use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use handlebars::Handlebars;
use serde::Serialize;

use crate::engine::callback::{OutcomeDocument, OutcomeKind};

const OUTCOME_PAGE: &str = "outcome";

pub struct OutcomePages {
    templates: Handlebars<'static>,
}

#[derive(Serialize)]
struct PageContext<'a> {
    kind: &'static str,
    icon: &'static str,
    title: &'a str,
    message: &'a str,
    detail: Option<&'a str>,
}

fn icon(kind: OutcomeKind) -> &'static str {
    match kind {
        OutcomeKind::Success => "✓",
        OutcomeKind::AlreadyProcessed => "i",
        OutcomeKind::Expired => "!",
        OutcomeKind::Rejected => "✕",
        OutcomeKind::NotFound | OutcomeKind::Error => "?",
    }
}

impl OutcomePages {
    pub fn new() -> anyhow::Result<Self> {
        let mut templates = Handlebars::new();
        templates.register_template_string(OUTCOME_PAGE, include_str!("./templates/outcome.html"))?;
        Ok(Self { templates })
    }

    pub fn render(&self, doc: &OutcomeDocument) -> String {
        let ctx = PageContext {
            kind: doc.kind.as_str(),
            icon: icon(doc.kind),
            title: &doc.title,
            message: &doc.message,
            detail: doc.detail.as_deref(),
        };
        match self.templates.render(OUTCOME_PAGE, &ctx) {
            Ok(html) => html,
            Err(e) => {
                tracing::error!("failed to render outcome page: {}", e);
                format!(
                    "<!DOCTYPE html><html><body><h1>{}</h1></body></html>",
                    handlebars::html_escape(&doc.title)
                )
            }
        }
    }

    pub fn respond(&self, doc: &OutcomeDocument) -> Response {
        let status =
            StatusCode::from_u16(doc.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Html(self.render(doc))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(kind: OutcomeKind, title: &str, detail: Option<&str>) -> OutcomeDocument {
        OutcomeDocument {
            kind,
            title: title.to_string(),
            message: "message".to_string(),
            detail: detail.map(String::from),
            status_code: 200,
        }
    }

    #[test]
    fn test_escapes_user_supplied_text() {
        let pages = OutcomePages::new().unwrap();
        let html = pages.render(&doc(
            OutcomeKind::Rejected,
            "Request rejected",
            Some("<script>alert(1)</script>"),
        ));
        assert!(!html.contains("<script>alert(1)</script>"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(html.contains("class=\"card rejected\""));
    }

    #[test]
    fn test_detail_block_only_when_present() {
        let pages = OutcomePages::new().unwrap();
        let html = pages.render(&doc(OutcomeKind::Success, "Request approved", None));
        assert!(!html.contains("Reason:"));
        assert!(html.contains("Request approved"));
    }

    #[test]
    fn test_response_carries_document_status() {
        let pages = OutcomePages::new().unwrap();
        let mut d = doc(OutcomeKind::Expired, "Link expired", None);
        d.status_code = 410;
        assert_eq!(pages.respond(&d).status(), StatusCode::GONE);
    }
}
