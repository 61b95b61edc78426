use std::error::Error as _;

use actix_web::{HttpResponse, error::InternalError, web};
use reqwest::{
    Client, Url,
    header::{REFERER, USER_AGENT},
    redirect::Policy,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument, warn};

use crate::error::{ProxyError, RedirectRefused};

pub const FETCH_ENDPOINT: &str = "/api/fetch-m3u8";

const MAX_REDIRECTS: usize = 10;

/// Body of a fetch request: `{ url, referer?, userAgent? }`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }

    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    fn target(&self) -> Option<&str> {
        non_empty(self.url.as_ref())
    }
}

/// Treats blank form fields the same as missing ones
fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|v| !v.is_empty())
}

/// Response envelope. Exactly one of `content` / `error` is ever sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FetchResult {
    Content { content: String },
    Error { error: String },
}

impl From<Result<String, ProxyError>> for FetchResult {
    fn from(result: Result<String, ProxyError>) -> Self {
        match result {
            Ok(content) => Self::Content { content },
            Err(e) => Self::Error {
                error: e.to_string(),
            },
        }
    }
}

/// Which destinations the proxy agrees to forward to.
///
/// An empty allow-list means every destination is forwarded.
#[derive(Debug, Clone, Default)]
pub struct ProxySettings {
    allowed_hosts: Vec<String>,
}

impl ProxySettings {
    pub fn new(allowed_hosts: impl IntoIterator<Item = String>) -> Self {
        Self {
            allowed_hosts: allowed_hosts
                .into_iter()
                .map(|host| host.trim().trim_end_matches('.').to_ascii_lowercase())
                .filter(|host| !host.is_empty())
                .collect(),
        }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.allowed_hosts.is_empty()
    }

    /// Whether `url` may be fetched. Subdomains of an allowed host are allowed too.
    #[must_use]
    pub fn permits(&self, url: &str) -> bool {
        if self.is_open() {
            return true;
        }

        let Some(host) = Url::parse(url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_ascii_lowercase))
        else {
            return false;
        };

        self.allowed_hosts.iter().any(|allowed| {
            host == *allowed
                || host
                    .strip_suffix(allowed.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }
}

/// Builds the outbound client.
///
/// Carries no default `User-Agent`; the header is only sent when a caller supplies one.
/// Every redirect hop is checked against `settings` the same way the requested URL is.
///
/// # Errors
/// Errors when the TLS backend cannot be initialized
pub fn init_http_client(settings: &ProxySettings) -> reqwest::Result<Client> {
    let settings = settings.clone();
    Client::builder()
        .redirect(Policy::custom(move |attempt| {
            if attempt.previous().len() >= MAX_REDIRECTS {
                attempt.error("too many redirects")
            } else if settings.permits(attempt.url().as_str()) {
                attempt.follow()
            } else {
                attempt.error(RedirectRefused)
            }
        }))
        .build()
}

/// Fetches the playlist body on behalf of a client, spoofing `Referer` / `User-Agent` when given
///
/// # Errors
/// * [`ProxyError::MissingUrl`] when no URL was given, before any network activity
/// * [`ProxyError::HostNotAllowed`] when the destination, or any redirect on the way, is outside the allow-list
/// * [`ProxyError::Upstream`] on an invalid URL, network error or non-2xx response
#[instrument(skip_all, fields(url = request.url.as_deref().unwrap_or_default()))]
pub async fn fetch_playlist(
    client: &Client,
    settings: &ProxySettings,
    request: &FetchRequest,
) -> Result<String, ProxyError> {
    let url = request.target().ok_or(ProxyError::MissingUrl)?;

    if !settings.permits(url) {
        warn!("Refusing to fetch from a host outside the allow-list");
        return Err(ProxyError::HostNotAllowed);
    }

    let mut req = client.get(url);
    if let Some(referer) = non_empty(request.referer.as_ref()) {
        req = req.header(REFERER, referer);
    }
    if let Some(user_agent) = non_empty(request.user_agent.as_ref()) {
        req = req.header(USER_AGENT, user_agent);
    }

    let body = async {
        req.send()
            .await?
            .error_for_status()?
            .text()
            .await
    }
    .await
    .map_err(|e| {
        if e.source().is_some_and(|source| source.is::<RedirectRefused>()) {
            warn!("Upstream redirected outside the allow-list: {e:?}");
            return ProxyError::HostNotAllowed;
        }
        error!("Fetch error: {e:?}");
        ProxyError::Upstream(e)
    })?;

    debug!("Fetched {} bytes of playlist", body.len());
    Ok(body)
}

pub fn error_response(e: &ProxyError) -> HttpResponse {
    HttpResponse::build(e.status_code()).json(FetchResult::Error {
        error: e.to_string(),
    })
}

/// `POST /api/fetch-m3u8`
pub async fn fetch_m3u8(
    client: web::Data<Client>,
    settings: web::Data<ProxySettings>,
    request: web::Json<FetchRequest>,
) -> HttpResponse {
    match fetch_playlist(&client, &settings, &request).await {
        Ok(content) => HttpResponse::Ok().json(FetchResult::Content { content }),
        Err(e) => error_response(&e),
    }
}

/// Answers unreadable JSON bodies with the usual error envelope instead of actix' plain text
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| {
        debug!("Rejecting request body: {err}");
        InternalError::from_response(err, error_response(&ProxyError::InvalidBody)).into()
    })
}
