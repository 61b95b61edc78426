use actix_web::{
    HttpResponse,
    error::InternalError,
    http::{StatusCode, header::ContentType},
    web,
};
use indoc::formatdoc;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::{
    highlight::escape_html,
    error::ProxyError,
    presentation::{DirectSource, UiState},
    proxy::ProxySettings,
};

/// Form fields posted by the page, named like the JSON endpoint's fields
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FormInput {
    pub url: String,
    pub referer: String,
    pub user_agent: String,
}

/// `GET /`
pub async fn index() -> HttpResponse {
    html(render(&UiState::default()))
}

/// `POST /`, one fetch cycle rendered server-side
pub async fn submit(
    client: web::Data<Client>,
    settings: web::Data<ProxySettings>,
    form: web::Form<FormInput>,
) -> HttpResponse {
    let FormInput {
        url,
        referer,
        user_agent,
    } = form.into_inner();

    let mut state = UiState::new(url, referer, user_agent);
    state.submit(&DirectSource::new(&client, &settings)).await;

    html(render(&state))
}

fn html(body: String) -> HttpResponse {
    html_with_status(StatusCode::OK, body)
}

fn html_with_status(status: StatusCode, body: String) -> HttpResponse {
    HttpResponse::build(status)
        .content_type(ContentType::html())
        .body(body)
}

/// Answers unreadable form posts with the page and an error message instead of actix' plain text
pub fn form_config() -> web::FormConfig {
    web::FormConfig::default().error_handler(|err, _req| {
        debug!("Rejecting form body: {err}");
        let mut state = UiState::default();
        state.reject(ProxyError::InvalidBody.to_string());
        let page = html_with_status(StatusCode::BAD_REQUEST, render(&state));
        InternalError::from_response(err, page).into()
    })
}

/// Renders the whole page for `state`
#[must_use]
pub fn render(state: &UiState) -> String {
    let button = if state.is_loading() {
        r#"<button type="submit" disabled>Fetching...</button>"#
    } else {
        r#"<button type="submit">Fetch Playlist</button>"#
    };

    let error = if state.error().is_empty() {
        String::new()
    } else {
        format!(r#"<p class="error">{}</p>"#, escape_html(state.error()))
    };

    let content = match (state.highlighted_html(), state.export()) {
        (Some(highlighted), Some(export)) => formatdoc! {r#"
            <section class="content">
              <h2>Playlist Content</h2>
              <a class="export" download="{file_name}" href="{href}">Download raw playlist</a>
              <pre><code class="hljs language-m3u8">{highlighted}</code></pre>
            </section>"#,
            file_name = export.file_name(),
            href = export.data_uri(),
            highlighted = highlighted,
        },
        _ => String::new(),
    };

    formatdoc! {r#"
        <!DOCTYPE html>
        <html lang="en">
        <head>
          <meta charset="utf-8">
          <title>M3U8 Playlist Fetcher</title>
          <style>
            body {{ font-family: sans-serif; background: #f3f4f6; display: flex; flex-direction: column; align-items: center; padding: 1rem; }}
            form, .content {{ width: 100%; max-width: 42rem; background: #fff; padding: 1.5rem; border-radius: .5rem; box-shadow: 0 1px 3px #0002; }}
            label {{ display: block; margin-top: 1rem; font-size: .875rem; color: #374151; }}
            input {{ width: 100%; box-sizing: border-box; padding: .5rem; border: 1px solid #d1d5db; border-radius: .375rem; }}
            button {{ width: 100%; margin-top: 1rem; padding: .5rem 1rem; color: #fff; background: #3b82f6; border: 0; border-radius: .375rem; }}
            button:disabled {{ opacity: .5; }}
            .error {{ color: #ef4444; }}
            .content {{ margin-top: 1.5rem; }}
            pre {{ overflow: auto; max-height: 24rem; }}
            .hljs-keyword {{ color: #d73a49; font-weight: bold; }}
            .hljs-string {{ color: #032f62; }}
            .hljs-comment {{ color: #6a737d; font-style: italic; }}
            .hljs-url {{ color: #005cc5; text-decoration: underline; }}
            .hljs-segment {{ color: #22863a; }}
          </style>
        </head>
        <body>
          <h1>M3U8 Playlist Fetcher</h1>
          <form method="post" action="/" onsubmit="this.querySelector('button').disabled = true; this.querySelector('button').textContent = 'Fetching...';">
            <label for="url">M3U8 URL</label>
            <input id="url" name="url" type="url" required value="{url}" placeholder="https://example.com/playlist.m3u8">
            <label for="referer">Referer (optional)</label>
            <input id="referer" name="referer" type="url" value="{referer}" placeholder="https://example.com">
            <label for="userAgent">User-Agent (optional)</label>
            <input id="userAgent" name="userAgent" type="text" value="{user_agent}" placeholder="Mozilla/5.0 (Windows NT 10.0; Win64; x64)">
            {button}
          </form>
          {error}
          {content}
        </body>
        </html>
        "#,
        url = escape_html(&state.url),
        referer = escape_html(&state.referer),
        user_agent = escape_html(&state.user_agent),
        button = button,
        error = error,
        content = content,
    }
}
