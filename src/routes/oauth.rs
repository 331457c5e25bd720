//! Landing page for the Google consent redirect.
//!
//! Nothing is exchanged here: the page shows the one-time code so the user
//! can paste it into the chat, where the handshake completes.

use axum::{
    extract::Query,
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse},
    routing::get,
    Router,
};
use serde::Deserialize;

use crate::i18n;

pub fn router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route("/callback", get(callback))
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    code: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

async fn callback(headers: HeaderMap, Query(query): Query<CallbackQuery>) -> impl IntoResponse {
    let lang = page_language(&headers);
    let lang_opt = Some(lang.as_str());
    let title = i18n::tr(lang_opt, "oauth.page_title", None);

    if let Some(error) = query.error {
        let reason = query.error_description.unwrap_or(error);
        tracing::warn!("Authorization redirect carried an error: {}", reason);
        let message = i18n::tr(lang_opt, "oauth.denied", Some(&[("err", reason.as_str())]));
        return (
            StatusCode::BAD_REQUEST,
            Html(render_page(&lang, &title, &message, None)),
        );
    }

    match query.code.filter(|c| !c.trim().is_empty()) {
        Some(code) => {
            tracing::info!("Authorization redirect received, showing code");
            let intro = i18n::tr(lang_opt, "oauth.code_intro", None);
            (
                StatusCode::OK,
                Html(render_page(&lang, &title, &intro, Some(&code))),
            )
        }
        None => {
            let message = i18n::tr(lang_opt, "oauth.missing_code", None);
            (
                StatusCode::BAD_REQUEST,
                Html(render_page(&lang, &title, &message, None)),
            )
        }
    }
}

/// First language tag of `Accept-Language`, resolved to a supported one.
fn page_language(headers: &HeaderMap) -> String {
    let tag = headers
        .get(header::ACCEPT_LANGUAGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split([',', ';']).next())
        .map(|t| t.trim().to_string());
    i18n::resolve_language(tag.as_deref())
}

fn render_page(lang: &str, title: &str, message: &str, code: Option<&str>) -> String {
    let code_block = code
        .map(|c| format!("<pre id=\"code\">{}</pre>", escape_html(c)))
        .unwrap_or_default();
    format!(
        "<!DOCTYPE html>\n<html lang=\"{}\">\n<head><meta charset=\"utf-8\"><title>{}</title></head>\n\
         <body>\n<h1>{}</h1>\n<p>{}</p>\n{}\n</body>\n</html>\n",
        escape_html(lang),
        escape_html(title),
        escape_html(title),
        escape_html(message),
        code_block
    )
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(ch),
        }
    }
    out
}
