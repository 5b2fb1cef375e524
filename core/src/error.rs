use thiserror::Error;

pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Failures surfaced by [`crate::DeliveryClient`] operations.
///
/// Component-level helpers never return these; they fall back to `None` or
/// empty values instead. Every variant maps to "serve default content".
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DeliveryError {
    #[error("response body is empty or is not a JSON object")]
    MalformedResponse,
    #[error("delivery is not configured: {reason}")]
    MissingConfig { reason: String },
    #[error("privacy status is opted out")]
    OptedOut,
    #[error("request list is empty")]
    EmptyRequest,
    #[error("delivery server responded with status {status}: {message}")]
    Http { status: u16, message: String },
    #[error("unable to open a connection to the delivery server")]
    NoConnection,
    #[error("preview deep link is invalid or lacks a preview token")]
    PreviewLinkInvalid,
    #[error("prefetch is not available while preview mode is active")]
    PreviewActive,
    #[error("response did not contain any prefetched mboxes")]
    NoPrefetchedMboxes,
    #[error("failed to generate the delivery request payload")]
    RequestGeneration,
}

impl DeliveryError {
    pub(crate) fn missing_client_code() -> Self {
        Self::MissingConfig {
            reason: "client code is blank".to_string(),
        }
    }

    pub(crate) fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }
}
