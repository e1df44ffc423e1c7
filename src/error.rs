//! src/error.rs
//!
//! Defines the library's custom, comprehensive `Error` enum using `thiserror`.
//! Variants are grouped to match the three error bands in the design:
//! transient/local (recovered without tearing anything down), semantic
//! (surfaced to the client as a single `ERROR` envelope), and fatal
//! (abort startup with a non-zero exit).

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize or deserialize: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Failed to serialize or deserialize JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Cryptography error: {0}")]
    Crypto(#[from] ed25519_dalek::SignatureError),

    #[error("Invalid identity key file")]
    InvalidKeyFile,

    #[error("Tokio task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    #[error("API server error: {0}")]
    ApiServer(#[from] axum::Error),

    #[error("Malformed gossip datagram: {0}")]
    MalformedDatagram(String),

    /// Semantic error surfaced to a client as a single `ERROR` envelope.
    /// `code` matches one of the envelope error codes in the external
    /// interface (e.g. `AUTHENTICATION_FAILED`, `RATE_LIMIT_EXCEEDED`).
    #[error("{code}: {message}")]
    Semantic {
        code: &'static str,
        message: String,
        retryable: bool,
    },

    #[error("no suitable provider for requested capabilities")]
    NoSuitableProvider,

    #[error("provider '{0}' returned an error: {1}")]
    ProviderError(String, String),

    #[error("memory store error: {0}")]
    Store(String),

    /// Startup could not proceed; the process must exit non-zero.
    #[error("fatal startup error: {0}")]
    Fatal(String),
}

impl Error {
    pub fn semantic(code: &'static str, message: impl Into<String>, retryable: bool) -> Self {
        Error::Semantic {
            code,
            message: message.into(),
            retryable,
        }
    }

    /// The envelope `errorCode` this error maps to, for errors that reach the client.
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Semantic { code, .. } => code,
            Error::NoSuitableProvider => "PROVIDER_ERROR",
            Error::ProviderError(..) => "PROVIDER_ERROR",
            Error::MalformedDatagram(_) => "INVALID_MESSAGE",
            _ => "INTERNAL_ERROR",
        }
    }

    pub fn retryable(&self) -> bool {
        match self {
            Error::Semantic { retryable, .. } => *retryable,
            Error::ProviderError(..) => true,
            _ => false,
        }
    }
}
