//! Feed daemon error types

use thiserror::Error;

/// Errors raised by feed connections, backends and configuration loading
#[derive(Error, Debug)]
pub enum FeedError {
    /// IO error during network or storage operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Read or dial timeout
    #[error("Connection timeout")]
    Timeout,

    /// Invalid response or command line from the peer
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// NNTP protocol error with response code
    #[error("NNTP error {code}: {message}")]
    Protocol {
        /// NNTP response code (e.g., 400, 501, 502)
        code: u16,
        /// Message sent along with the code
        message: String,
    },

    /// Peer does not advertise the STREAMING capability
    #[error("Peer does not support streaming")]
    StreamingUnsupported,

    /// Peer greeted us without allowing posting
    #[error("Posting not permitted")]
    PostingNotPermitted,

    /// Message-ID does not match `<local@domain>`
    #[error("Invalid message-id: {0}")]
    InvalidMessageId(String),

    /// Newsgroup name is malformed
    #[error("Invalid newsgroup: {0}")]
    InvalidNewsgroup(String),

    /// Article could not be parsed or is missing required headers
    #[error("Invalid article: {0}")]
    InvalidArticle(String),

    /// SOCKS4a proxy handshake failed
    #[error("SOCKS error: {0}")]
    Socks(String),

    /// Configuration is malformed; fatal at startup
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database or article store failure
    #[error("Backend error: {0}")]
    Backend(String),

    /// Connection closed unexpectedly
    #[error("Connection closed")]
    ConnectionClosed,

    /// UTF-8 decoding error
    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl FeedError {
    /// Whether this error means the underlying transport is gone
    ///
    /// Connection tasks stop on these; everything else is answered with an
    /// NNTP response code and the session continues.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            FeedError::Io(_) | FeedError::Timeout | FeedError::ConnectionClosed
        )
    }
}

/// Result type alias using FeedError
pub type Result<T> = std::result::Result<T, FeedError>;
