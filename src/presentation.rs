use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use reqwest::{Client, Url};
use tracing::{debug, instrument, warn};

use crate::{
    error::TransportError,
    highlight::{highlight, to_html},
    proxy::{FETCH_ENDPOINT, FetchRequest, FetchResult, ProxySettings, fetch_playlist},
};

/// Shown when the proxy itself could not be reached
pub const GENERIC_ERROR: &str = "An error occurred";

pub const EXPORT_FILE_NAME: &str = "playlist.m3u8.txt";

/// Anything able to answer a [`FetchRequest`] with a [`FetchResult`]
#[async_trait]
pub trait PlaylistSource: Send + Sync {
    /// # Errors
    /// Errors when no envelope could be obtained at all
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResult, TransportError>;
}

/// Talks to a running proxy over HTTP
#[derive(Debug, Clone)]
pub struct ProxyClient {
    client: Client,
    base: Url,
}

impl ProxyClient {
    #[must_use]
    pub const fn new(client: Client, base: Url) -> Self {
        Self { client, base }
    }

    fn endpoint(&self) -> Url {
        let mut endpoint = self.base.clone();
        endpoint.set_path(FETCH_ENDPOINT);
        endpoint.set_query(None);
        endpoint
    }
}

#[async_trait]
impl PlaylistSource for ProxyClient {
    #[instrument(skip_all, fields(proxy = %self.base))]
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResult, TransportError> {
        let res = self
            .client
            .post(self.endpoint())
            .json(request)
            .send()
            .await
            .map_err(TransportError::Unreachable)?;
        debug!("Proxy answered with status {}", res.status());

        res.json::<FetchResult>()
            .await
            .map_err(TransportError::MalformedEnvelope)
    }
}

/// Calls the proxy's fetch routine in-process, used by the server-rendered page
#[derive(Debug, Clone, Copy)]
pub struct DirectSource<'a> {
    client: &'a Client,
    settings: &'a ProxySettings,
}

impl<'a> DirectSource<'a> {
    #[must_use]
    pub const fn new(client: &'a Client, settings: &'a ProxySettings) -> Self {
        Self { client, settings }
    }
}

#[async_trait]
impl PlaylistSource for DirectSource<'_> {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResult, TransportError> {
        Ok(fetch_playlist(self.client, self.settings, request).await.into())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
enum Outcome {
    #[default]
    None,
    Content(String),
    Error(String),
}

/// Where a [`UiState`] currently is in its fetch cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase<'a> {
    Idle,
    Loading,
    Success(&'a str),
    Failure(&'a str),
}

/// Transient state of one viewer session.
///
/// Inputs survive every submission; the fetched content and the error message
/// are mutually exclusive and both get cleared when a new submission starts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UiState {
    pub url: String,
    pub referer: String,
    pub user_agent: String,
    outcome: Outcome,
    loading: bool,
}

impl UiState {
    pub fn new(
        url: impl Into<String>,
        referer: impl Into<String>,
        user_agent: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            referer: referer.into(),
            user_agent: user_agent.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn is_loading(&self) -> bool {
        self.loading
    }

    #[must_use]
    pub fn content(&self) -> &str {
        match &self.outcome {
            Outcome::Content(content) => content,
            _ => "",
        }
    }

    #[must_use]
    pub fn error(&self) -> &str {
        match &self.outcome {
            Outcome::Error(error) => error,
            _ => "",
        }
    }

    #[must_use]
    pub fn phase(&self) -> Phase<'_> {
        if self.loading {
            return Phase::Loading;
        }
        match &self.outcome {
            Outcome::None => Phase::Idle,
            Outcome::Content(content) => Phase::Success(content),
            Outcome::Error(error) => Phase::Failure(error),
        }
    }

    /// Starts a submission, returning the request to send.
    ///
    /// Returns `None` while another submission is still in flight.
    pub fn begin(&mut self) -> Option<FetchRequest> {
        if self.loading {
            warn!("Ignoring submission while a fetch is in flight");
            return None;
        }

        self.outcome = Outcome::None;
        self.loading = true;

        Some(FetchRequest {
            url: Some(self.url.clone()),
            referer: Some(self.referer.clone()),
            user_agent: Some(self.user_agent.clone()),
        })
    }

    /// Applies the answer of the submission started by [`Self::begin`]
    pub fn finish(&mut self, answer: Result<FetchResult, TransportError>) {
        self.outcome = match answer {
            Ok(FetchResult::Content { content }) => Outcome::Content(content),
            Ok(FetchResult::Error { error }) => Outcome::Error(error),
            Err(e) => {
                warn!("Unable to reach proxy: {e:?}");
                Outcome::Error(GENERIC_ERROR.to_string())
            }
        };
        self.loading = false;
    }

    /// Ends the cycle with `error` without anything having been sent
    pub fn reject(&mut self, error: impl Into<String>) {
        self.outcome = Outcome::Error(error.into());
        self.loading = false;
    }

    /// Runs one whole fetch cycle against `source`
    pub async fn submit<S: PlaylistSource + ?Sized>(&mut self, source: &S) {
        let Some(request) = self.begin() else {
            return;
        };
        let answer = source.fetch(&request).await;
        self.finish(answer);
    }

    /// Highlighted markup of the content, if there is anything to show
    #[must_use]
    pub fn highlighted_html(&self) -> Option<String> {
        let content = self.content();
        (!content.is_empty()).then(|| to_html(&highlight(content)))
    }

    #[must_use]
    pub fn export(&self) -> Option<Export<'_>> {
        let content = self.content();
        (!content.is_empty()).then_some(Export { contents: content })
    }
}

/// Raw, unhighlighted copy of the fetched playlist, built without touching the network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Export<'a> {
    pub contents: &'a str,
}

impl Export<'_> {
    #[must_use]
    pub const fn file_name(&self) -> &'static str {
        EXPORT_FILE_NAME
    }

    /// `data:` URI usable as the `href` of a download link
    #[must_use]
    pub fn data_uri(&self) -> String {
        format!(
            "data:text/plain;charset=utf-8;base64,{}",
            STANDARD.encode(self.contents)
        )
    }

    /// Writes the export into `directory`, returning the written file's path
    ///
    /// # Errors
    /// Errors when the file cannot be written
    pub async fn write_to(&self, directory: &Path) -> std::io::Result<PathBuf> {
        let path = directory.join(self.file_name());
        tokio::fs::write(&path, self.contents).await?;
        Ok(path)
    }
}
