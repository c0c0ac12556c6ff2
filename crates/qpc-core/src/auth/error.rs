use reqwest::StatusCode;
use thiserror::Error;

/// Errors surfaced by the device-authorization login flow.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("unable to reach the SSO host while trying to {context}: {source}")]
    SsoConnection {
        context: &'static str,
        source: reqwest::Error,
    },
    #[error("SSO discovery request failed with status {status}")]
    Discovery { status: StatusCode },
    #[error("SSO discovery document is missing '{0}'")]
    DiscoveryKeyMissing(&'static str),
    #[error("device authorization request failed with status {status}: {body}")]
    AuthorizationRequest { status: StatusCode, body: String },
    #[error("no device authorization in progress; request one first")]
    NotRequested,
    #[error("authorization timed out before it was granted; try logging in again")]
    TimedOut,
    #[error("authorization was rejected by the identity provider: {reason}")]
    Denied { reason: String },
    #[error("malformed response from the identity provider")]
    MalformedResponse,
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
}
