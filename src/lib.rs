#![doc = include_str!("../README.md")]

/// Article model, parsing, signatures and the local post builder
pub mod article;
mod capabilities;
/// NNTP command builders, request parsing and response parsers
pub mod commands;
/// TOML daemon configuration
pub mod config;
/// Per-connection protocol engine
pub mod connection;
mod daemon;
/// Article index backends
pub mod database;
mod error;
/// Outbound feed supervision and dialing
pub mod feed;
/// Local post submission
pub mod frontend;
/// Newsgroup allow/deny rules per peer
pub mod policy;
mod response;
/// Central registry and fan-out task
pub mod router;
/// SOCKS4a client handshake
pub mod socks;
/// Article byte storage backends
pub mod store;
/// Message-id, newsgroup and date validation
pub mod validation;

pub use article::{Article, ArticleBuilder, Headers, parse_article};
pub use capabilities::Capabilities;
pub use config::{DaemonConfig, FeedConfig, ProxyConfig, RuleConfig};
pub use daemon::{Daemon, ShutdownHandle};
pub use database::{Database, MemoryDatabase};
pub use error::{FeedError, Result};
pub use feed::{Dial, FeedSupervisor, ReconnectPolicy, TcpDialer};
pub use frontend::{ChannelFrontend, Frontend, NullFrontend, PostSubmitter};
pub use policy::{FeedPolicy, Rule};
pub use response::{NntpResponse, codes};
pub use router::{FeedCommand, Role, Router, RouterHandle};
pub use store::{ArticleStore, FsArticleStore};
pub use validation::{is_valid_message_id, validate_message_id, validate_newsgroup_name};
