use reqwest::StatusCode;

/// Errors that can happen within the mefs-client
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Any error emitted from the underlying [`reqwest`] client.
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    /// IO errors related to payload streaming.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Error when URL manipulation fails.
    #[error("{message}")]
    InvalidUrl {
        /// The URL error message.
        message: String,
    },
    /// The daemon answered a command with an error body.
    #[error("{command} failed with {status}: {message}")]
    Api {
        /// The command that was sent, for example `lfs/show_storage`.
        command: String,
        /// The HTTP status of the response.
        status: StatusCode,
        /// The `Message` field of the daemon's error body, or the raw body if it was not JSON.
        message: String,
    },
}

/// A convenience alias that defaults our [`Error`] type.
pub type Result<T, E = Error> = std::result::Result<T, E>;
