use http::{Method, StatusCode};
use thiserror::Error;

/// The single error vocabulary of body negotiation and materialization.
///
/// Pre-stream variants are raised by negotiation before any byte is read,
/// in-stream variants are delivered through the shared read outcome and to
/// every attached [`BodyPipe`](crate::BodyPipe). The `Display` output is the
/// canonical message sent back to the peer, [`ContentError::status`] the
/// matching status code.
///
/// The type is `Clone` because one failure is shared by the memoized outcome
/// and by every consumer of the same body.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContentError {
    #[error("{method}")]
    MethodNotAllowed { method: Method },

    #[error("Length Required")]
    LengthRequired,

    #[error("Payload Too Large")]
    PayloadTooLarge { limit: u64, received: u64 },

    #[error("Length mismatch")]
    LengthMismatch { expected: u64, received: u64 },

    #[error("Charset not supported")]
    UnsupportedCharset { charset: String },

    #[error("Compression not supported")]
    UnsupportedCompression { encoding: String },

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("invalid content-type header: {reason}")]
    InvalidContentType { reason: String },

    #[error("invalid content-length header: {reason}")]
    InvalidContentLength { reason: String },

    #[error("multipart boundary missing")]
    MissingBoundary,

    #[error("request body is not valid text: {reason}")]
    InvalidText { reason: String },

    #[error("invalid json body: {reason}")]
    InvalidJson { reason: String },

    #[error("invalid compressed body: {reason}")]
    Decompress { reason: String },

    #[error("decode error: {reason}")]
    Decode { reason: String },

    #[error("{reason}")]
    Transport { reason: String },
}

impl ContentError {
    pub fn method_not_allowed(method: Method) -> Self {
        Self::MethodNotAllowed { method }
    }

    pub fn payload_too_large(limit: u64, received: u64) -> Self {
        Self::PayloadTooLarge { limit, received }
    }

    pub fn length_mismatch(expected: u64, received: u64) -> Self {
        Self::LengthMismatch { expected, received }
    }

    pub fn unsupported_charset<S: ToString>(charset: S) -> Self {
        Self::UnsupportedCharset { charset: charset.to_string() }
    }

    pub fn unsupported_compression<S: ToString>(encoding: S) -> Self {
        Self::UnsupportedCompression { encoding: encoding.to_string() }
    }

    pub fn invalid_header<S: ToString>(str: S) -> Self {
        Self::InvalidHeader { reason: str.to_string() }
    }

    pub fn invalid_content_type<S: ToString>(str: S) -> Self {
        Self::InvalidContentType { reason: str.to_string() }
    }

    pub fn invalid_content_length<S: ToString>(str: S) -> Self {
        Self::InvalidContentLength { reason: str.to_string() }
    }

    pub fn invalid_text<S: ToString>(str: S) -> Self {
        Self::InvalidText { reason: str.to_string() }
    }

    pub fn invalid_json<S: ToString>(str: S) -> Self {
        Self::InvalidJson { reason: str.to_string() }
    }

    pub fn decompress<S: ToString>(str: S) -> Self {
        Self::Decompress { reason: str.to_string() }
    }

    pub fn decode<S: ToString>(str: S) -> Self {
        Self::Decode { reason: str.to_string() }
    }

    pub fn transport<S: ToString>(str: S) -> Self {
        Self::Transport { reason: str.to_string() }
    }

    /// The response status matching this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Self::LengthRequired => StatusCode::LENGTH_REQUIRED,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::UnsupportedCharset { .. } | Self::UnsupportedCompression { .. } => {
                StatusCode::UNSUPPORTED_MEDIA_TYPE
            }
            Self::LengthMismatch { .. }
            | Self::InvalidHeader { .. }
            | Self::InvalidContentType { .. }
            | Self::InvalidContentLength { .. }
            | Self::MissingBoundary
            | Self::InvalidText { .. }
            | Self::InvalidJson { .. }
            | Self::Decompress { .. }
            | Self::Decode { .. } => StatusCode::BAD_REQUEST,
            Self::Transport { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether this error is raised before any body byte is consumed.
    pub fn is_pre_stream(&self) -> bool {
        matches!(
            self,
            Self::MethodNotAllowed { .. }
                | Self::LengthRequired
                | Self::UnsupportedCharset { .. }
                | Self::UnsupportedCompression { .. }
                | Self::InvalidHeader { .. }
                | Self::InvalidContentType { .. }
                | Self::InvalidContentLength { .. }
        )
    }
}
