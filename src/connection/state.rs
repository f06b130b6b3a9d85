//! Per-connection session state

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::policy::FeedPolicy;

/// Negotiated session mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Just connected, nothing negotiated yet
    #[default]
    Unset,
    /// Pipelined CHECK/TAKETHIS
    Stream,
    /// Single command/response, used for ARTICLE pulls
    Reader,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Unset => f.write_str("unset"),
            Mode::Stream => f.write_str("stream"),
            Mode::Reader => f.write_str("reader"),
        }
    }
}

/// Which side opened the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// A peer connected to our listener and pushes to us
    Inbound,
    /// We dialed a configured feed and push to it
    Outbound,
}

/// Mutable record kept for the lifetime of one TCP connection
#[derive(Debug, Clone)]
pub struct ConnectionState {
    /// Current mode
    pub mode: Mode,
    /// Newsgroup policy; `None` places no restriction
    pub policy: Option<Arc<FeedPolicy>>,
    /// Inbound or outbound
    pub direction: Direction,
    /// Feed name, or the remote address for inbound peers
    pub name: String,
    /// Remote address when known
    pub remote: Option<SocketAddr>,
}

impl ConnectionState {
    pub fn inbound(remote: Option<SocketAddr>, policy: Option<Arc<FeedPolicy>>) -> Self {
        Self {
            mode: Mode::Unset,
            policy,
            direction: Direction::Inbound,
            name: remote.map_or_else(|| "inbound".to_string(), |addr| addr.to_string()),
            remote,
        }
    }

    pub fn outbound(name: impl Into<String>, policy: Arc<FeedPolicy>) -> Self {
        Self {
            mode: Mode::Unset,
            policy: Some(policy),
            direction: Direction::Outbound,
            name: name.into(),
            remote: None,
        }
    }

    pub fn is_inbound(&self) -> bool {
        self.direction == Direction::Inbound
    }

    /// Whether this connection's policy accepts articles in `newsgroup`
    pub fn allows(&self, newsgroup: &str) -> bool {
        self.policy
            .as_ref()
            .is_none_or(|policy| policy.allows(newsgroup))
    }
}
