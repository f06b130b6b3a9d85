//! Parsed replies and the reply codes the feed uses

/// One reply from a peer
#[derive(Debug, Clone)]
pub struct NntpResponse {
    /// Three-digit reply code
    pub code: u16,
    /// Text after the code
    pub message: String,
    /// Dot-terminated body lines, unstuffed; empty for single-line replies
    pub lines: Vec<String>,
}

impl NntpResponse {
    /// 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// 4xx or 5xx
    pub fn is_error(&self) -> bool {
        self.code >= 400
    }

    /// First whitespace-separated token of the message
    ///
    /// Streaming replies (`238`, `239`, `435`, ...) carry the message-id here.
    pub fn message_id(&self) -> Option<&str> {
        self.message.split_whitespace().next()
    }
}

/// Reply codes spoken by the feed (RFC 3977, RFC 4644)
pub mod codes {
    /// `CAPABILITIES` list follows
    pub const CAPABILITY_LIST: u16 = 101;

    /// Greeting / reader mode: peer may push articles
    pub const READY_POSTING_ALLOWED: u16 = 200;
    /// Greeting / reader mode: peer may not push articles
    pub const READY_NO_POSTING: u16 = 201;
    /// `MODE STREAM` accepted
    pub const STREAMING_OK: u16 = 203;
    /// `QUIT` acknowledged
    pub const CLOSING_CONNECTION: u16 = 205;
    /// `ARTICLE` reply, article block follows
    pub const ARTICLE_FOLLOWS: u16 = 220;
    /// `CHECK`: send it with `TAKETHIS`
    pub const CHECK_SEND: u16 = 238;
    /// `TAKETHIS`: stored
    pub const TAKETHIS_RECEIVED: u16 = 239;

    /// Temporary failure; the connection closes
    pub const SERVICE_UNAVAILABLE: u16 = 400;
    /// `ARTICLE`: unknown message-id
    pub const NO_SUCH_ARTICLE_ID: u16 = 430;
    /// `CHECK`: offer again later
    pub const CHECK_LATER: u16 = 431;
    /// `CHECK`: already have it
    pub const ARTICLE_NOT_WANTED: u16 = 435;
    /// `CHECK`: refused, do not offer again
    pub const TRANSFER_REJECTED: u16 = 437;
    /// `CHECK`: not wanted
    pub const CHECK_NOT_WANTED: u16 = 438;
    /// `TAKETHIS`: refused
    pub const TAKETHIS_REJECTED: u16 = 439;

    /// Unknown command
    pub const COMMAND_NOT_RECOGNIZED: u16 = 500;
    /// Bad arguments
    pub const COMMAND_SYNTAX_ERROR: u16 = 501;
    /// Command not allowed in the current mode
    pub const ACCESS_DENIED: u16 = 502;
}
