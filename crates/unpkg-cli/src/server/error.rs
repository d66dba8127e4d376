//! Mapping of resolution failures onto HTTP responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{error, warn};
use unpkg_core::{Error, ErrorKind};

/// A failed request, rendered as a plain-text body.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0.kind() {
            ErrorKind::InvalidIdentifier => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Resolution | ErrorKind::Transport | ErrorKind::Integrity => {
                StatusCode::BAD_GATEWAY
            }
            ErrorKind::Extraction => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl<E: Into<Error>> From<E> for ApiError {
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self.0.kind() {
            ErrorKind::Integrity => format!("Integrity check failed: {}\n", self.0),
            _ => format!("{}\n", self.0),
        };

        if status.is_server_error() {
            error!(%status, error = %self.0, "Request failed");
        } else {
            warn!(%status, error = %self.0, "Request rejected");
        }

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unpkg_core::{DownloadError, RegistryError};
    use unpkg_schema::ParseError;

    #[test]
    fn statuses() {
        let cases: Vec<(ApiError, StatusCode)> = vec![
            (
                ParseError::EmptyName(String::new()).into(),
                StatusCode::BAD_REQUEST,
            ),
            (
                RegistryError::NotFound {
                    name: "nope".into(),
                    spec: "latest".into(),
                }
                .into(),
                StatusCode::NOT_FOUND,
            ),
            (
                RegistryError::BadStatus {
                    url: "http://registry".into(),
                    status: 500,
                }
                .into(),
                StatusCode::BAD_GATEWAY,
            ),
            (
                RegistryError::Timeout {
                    url: "http://registry".into(),
                }
                .into(),
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                DownloadError::HashMismatch {
                    expected: "aa".into(),
                    actual: "bb".into(),
                }
                .into(),
                StatusCode::BAD_GATEWAY,
            ),
            (
                DownloadError::Extraction("disk full".into()).into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                Error::NoEntryPoint {
                    name: "types-only".into(),
                    version: "1.0.0".into(),
                }
                .into(),
                StatusCode::NOT_FOUND,
            ),
        ];

        for (err, want) in cases {
            assert_eq!(err.status(), want, "{}", err.0);
        }
    }
}
