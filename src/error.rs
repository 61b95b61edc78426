use actix_web::http::StatusCode;
use thiserror::Error;

/// Errors produced while serving a playlist fetch
///
/// The [`Display`](std::fmt::Display) output of each variant is what the browser gets to see.
/// Upstream details stay in [`ProxyError::Upstream`]'s source and only ever reach the server log.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("URL is required")]
    MissingUrl,

    #[error("Invalid request body")]
    InvalidBody,

    #[error("Destination host is not allowed")]
    HostNotAllowed,

    #[error("Failed to fetch playlist")]
    Upstream(#[source] reqwest::Error),
}

impl ProxyError {
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingUrl | Self::InvalidBody => StatusCode::BAD_REQUEST,
            Self::HostNotAllowed => StatusCode::FORBIDDEN,
            Self::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Raised by the outbound redirect policy when a hop leaves the allow-list
#[derive(Debug, Error)]
#[error("Redirect to a host outside the allow-list")]
pub struct RedirectRefused;

/// Failure to get any answer out of the proxy itself
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Unable to reach proxy")]
    Unreachable(#[source] reqwest::Error),

    #[error("Proxy answered with an unreadable body")]
    MalformedEnvelope(#[source] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_facing_messages_are_generic() {
        assert_eq!(ProxyError::MissingUrl.to_string(), "URL is required");
        assert_eq!(ProxyError::InvalidBody.to_string(), "Invalid request body");
        assert_eq!(
            ProxyError::HostNotAllowed.to_string(),
            "Destination host is not allowed"
        );
    }

    #[test]
    fn status_codes_follow_error_kind() {
        assert_eq!(ProxyError::MissingUrl.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ProxyError::InvalidBody.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ProxyError::HostNotAllowed.status_code(), StatusCode::FORBIDDEN);
    }
}
