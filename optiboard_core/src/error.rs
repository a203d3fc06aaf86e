use std::error::Error as StdError;

/// Common error type for `optiboard_core`.
///
/// Backend implementations (SQLite, the remote optimizer client, etc.) should
/// preserve the underlying error chain where possible via `Error::backend`.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Startup-time misconfiguration (e.g. missing master secret). Fatal;
    /// surfaced to callers as service-unavailable.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The account has no active, decryptable API key. Batch sync paths
    /// recover from this by serving cached data; single-item paths surface it.
    #[error("no usable api key for this account")]
    CredentialUnavailable,

    /// Unexpected non-2xx from the remote optimization service. A remote 404
    /// is not an error; it maps to `Ok(None)` at the client.
    #[error("remote service returned {status}: {body}")]
    Remote { status: u16, body: String },

    /// Authenticated decryption failed (tampered nonce/tag/ciphertext).
    /// Never carries partial plaintext.
    #[error("credential integrity check failed")]
    Integrity,

    #[error("backend error: {context}")]
    Backend {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync + 'static>,
    },

    #[error("backend error: {0}")]
    BackendMessage(String),
}

impl Error {
    pub fn backend(
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Backend {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
