use thiserror::Error;

/// Type alias for Result with TriageError
pub type Result<T> = std::result::Result<T, TriageError>;

/// Error types for the triage system
#[derive(Error, Debug)]
pub enum TriageError {
    /// Gmail API returned an error
    #[error("Gmail API error: {0}")]
    ApiError(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthError(String),

    /// Neither a credentials file nor the credential env vars are available
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    /// Rate limit exceeded - should retry after specified seconds
    #[error("Rate limit exceeded, retry after {retry_after} seconds")]
    RateLimitExceeded { retry_after: u64 },

    /// Network-related error (connection issues, timeouts, etc.)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Server returned 5xx error
    #[error("Server error (HTTP {status}): {message}")]
    ServerError { status: u16, message: String },

    /// Resource not found (404)
    #[error("Message not found: {0}")]
    MessageNotFound(String),

    /// Bad request (400), usually a query the service cannot parse
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Forbidden (403)
    #[error("Access forbidden: {0}")]
    Forbidden(String),

    /// Message came back without the expected payload
    #[error("Invalid message format: {0}")]
    InvalidMessageFormat(String),

    /// Label-related errors
    #[error("Label error: {0}")]
    LabelError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Extractor was given a selector that is not in the selector table
    #[error("Unknown selector '{selector}'. Known selectors: {}", known.join(", "))]
    UnknownSelector { selector: String, known: Vec<String> },

    /// The completion label has to be provisioned by hand before extracting
    #[error("Label '{0}' not found. Please create it in Gmail.")]
    MissingCompletionLabel(String),

    /// Requested extraction count is not a positive integer
    #[error("Invalid count: {0}")]
    InvalidCount(String),

    /// IO error (file operations, etc.)
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

}

impl TriageError {
    /// Check if the error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TriageError::RateLimitExceeded { .. }
                | TriageError::ServerError { .. }
                | TriageError::NetworkError(_)
        )
    }

    /// Errors caused by how the command was invoked rather than by the mailbox
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            TriageError::UnknownSelector { .. } | TriageError::InvalidCount(_)
        )
    }
}

/// Parse the Retry-After header from an HTTP response
///
/// Only the delay-seconds form is honoured. A missing or non-numeric header
/// falls back to 5 seconds.
fn parse_retry_after_header<B>(response: &hyper::Response<B>) -> u64 {
    const DEFAULT_RETRY_AFTER: u64 = 5;

    response
        .headers()
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER)
}

impl From<google_gmail1::Error> for TriageError {
    fn from(error: google_gmail1::Error) -> Self {
        match error {
            google_gmail1::Error::Failure(ref response) => {
                let status = response.status();
                let status_code = status.as_u16();
                let message = format!(
                    "HTTP {}: {}",
                    status_code,
                    status.canonical_reason().unwrap_or("Unknown")
                );

                match status_code {
                    429 => TriageError::RateLimitExceeded {
                        retry_after: parse_retry_after_header(response),
                    },
                    404 => TriageError::MessageNotFound("Resource not found".to_string()),
                    400 => TriageError::BadRequest(message),
                    403 => TriageError::Forbidden(message),
                    500..=599 => TriageError::ServerError {
                        status: status_code,
                        message,
                    },
                    _ => TriageError::ApiError(message),
                }
            }
            google_gmail1::Error::BadRequest(ref err) => TriageError::BadRequest(format!("{}", err)),
            google_gmail1::Error::HttpError(ref err) => {
                TriageError::NetworkError(format!("Connection error: {}", err))
            }
            google_gmail1::Error::Io(err) => TriageError::NetworkError(err.to_string()),
            google_gmail1::Error::MissingToken(err) => {
                TriageError::AuthError(format!("No usable token: {}", err))
            }
            _ => TriageError::ApiError(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        let rate_limit = TriageError::RateLimitExceeded { retry_after: 5 };
        assert!(rate_limit.is_transient());

        let server_error = TriageError::ServerError {
            status: 503,
            message: "Service unavailable".to_string(),
        };
        assert!(server_error.is_transient());

        let network_error = TriageError::NetworkError("Connection timeout".to_string());
        assert!(network_error.is_transient());
    }

    #[test]
    fn test_permanent_errors() {
        assert!(!TriageError::BadRequest("Invalid query".to_string()).is_transient());
        assert!(!TriageError::MessageNotFound("msg123".to_string()).is_transient());
        assert!(!TriageError::AuthError("expired".to_string()).is_transient());
        assert!(!TriageError::MissingCredentials("none".to_string()).is_transient());
        assert!(!TriageError::MissingCompletionLabel("done".to_string()).is_transient());
    }

    #[test]
    fn test_usage_errors() {
        let unknown = TriageError::UnknownSelector {
            selector: "zzz".to_string(),
            known: vec!["airalo".to_string(), "nomad".to_string()],
        };
        assert!(unknown.is_usage_error());
        assert!(TriageError::InvalidCount("0".to_string()).is_usage_error());
        assert!(!TriageError::MissingCompletionLabel("x".to_string()).is_usage_error());
    }

    #[test]
    fn test_error_display() {
        let error = TriageError::RateLimitExceeded { retry_after: 10 };
        let display = format!("{}", error);
        assert!(display.contains("Rate limit exceeded"));
        assert!(display.contains("10 seconds"));

        let unknown = TriageError::UnknownSelector {
            selector: "zzz".to_string(),
            known: vec!["airalo".to_string(), "nomad".to_string()],
        };
        assert_eq!(
            unknown.to_string(),
            "Unknown selector 'zzz'. Known selectors: airalo, nomad"
        );

        let missing = TriageError::MissingCompletionLabel("emails-extracted-by-bot".to_string());
        assert!(missing.to_string().contains("Please create it in Gmail"));
    }

    #[test]
    fn test_parse_retry_after_header_integer() {
        let mut response = hyper::Response::builder().status(429).body(()).unwrap();
        response.headers_mut().insert(
            "retry-after",
            hyper::header::HeaderValue::from_static("120"),
        );

        assert_eq!(parse_retry_after_header(&response), 120);
    }

    #[test]
    fn test_parse_retry_after_header_missing() {
        let response = hyper::Response::builder().status(429).body(()).unwrap();
        assert_eq!(parse_retry_after_header(&response), 5);
    }

    #[test]
    fn test_parse_retry_after_header_invalid() {
        let mut response = hyper::Response::builder().status(429).body(()).unwrap();
        response.headers_mut().insert(
            "retry-after",
            hyper::header::HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );

        assert_eq!(parse_retry_after_header(&response), 5);
    }
}
