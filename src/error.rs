use thiserror::Error;

/// Errors a provisioning run can end with.
///
/// Every variant is terminal for the current invocation: nothing here is
/// retried automatically.  The recovery path is always "fix the underlying
/// condition and re-run".
#[derive(Debug, Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("required credential '{path}' is missing or empty in the password store")]
    MissingCredential { path: String },

    #[error("username or password is empty, refusing to submit the login form")]
    InvalidCredentials,

    #[error("unable to load {url}: HTTP status {status}")]
    PageLoad { url: String, status: u16 },

    #[error("expected UI state never appeared: {what} (waited {waited_ms} ms)")]
    UnexpectedUiState { what: String, waited_ms: u64 },

    #[error("extracted secret for '{item}' is empty (selector mismatch?)")]
    EmptySecret { item: String },

    #[error("password store invocation failed: {0}")]
    SecretStore(String),

    #[error("browser error: {0}")]
    Browser(String),

    #[error("{0} is not supported on this site")]
    Unsupported(String),

    #[error("SSH key error: {0}")]
    Key(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Shorthand for the common "element never showed up" case.
    pub fn ui_state(what: impl Into<String>, waited: std::time::Duration) -> Self {
        Self::UnexpectedUiState {
            what: what.into(),
            waited_ms: waited.as_millis() as u64,
        }
    }
}
