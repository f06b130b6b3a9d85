//! Daemon configuration
//!
//! Loaded once at startup from a TOML file. Everything that can be checked
//! without touching the network is checked in [`DaemonConfig::validate`], so an
//! invalid file never produces a half-started daemon.
//!
//! # Example
//!
//! ```
//! use nntp_feed::DaemonConfig;
//!
//! let config = DaemonConfig::from_toml_str(r#"
//!     instance_name = "node-a.example"
//!     allow_anon = true
//!
//!     [[feeds]]
//!     name = "node-b.example"
//!     host = "127.0.0.1"
//!     port = 1119
//!     rules = [
//!         { pattern = "!ctl", allow = true },
//!         { pattern = "overchan\\..*", allow = true },
//!     ]
//! "#).unwrap();
//!
//! assert_eq!(config.feeds.len(), 1);
//! let policy = config.feeds[0].policy().unwrap();
//! assert!(policy.allows("overchan.test"));
//! ```

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::policy::{FeedPolicy, Rule};
use crate::{FeedError, Result};

mod defaults {
    use std::net::{Ipv4Addr, SocketAddr};
    use std::path::PathBuf;

    pub fn listen() -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, 1119))
    }

    pub fn store_dir() -> PathBuf {
        PathBuf::from("articles")
    }

    pub fn inbound_posting() -> bool {
        true
    }

    pub fn reconnect_secs() -> u64 {
        10
    }

    pub fn defer_secs() -> u64 {
        90
    }

    pub fn queue_depth() -> usize {
        512
    }

    pub fn max_in_flight() -> usize {
        64
    }

    pub fn max_article_bytes() -> usize {
        10 * 1024 * 1024
    }

    pub fn socks_ident() -> String {
        String::new()
    }
}

/// One newsgroup rule as written in the config file
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    /// Newsgroup regex, `!`-prefixed for an inverse rule
    pub pattern: String,
    /// Decision when the pattern matches
    pub allow: bool,
}

impl From<&RuleConfig> for Rule {
    fn from(rule: &RuleConfig) -> Self {
        Rule::new(rule.pattern.clone(), rule.allow)
    }
}

/// SOCKS4a proxy used to reach a feed
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyConfig {
    /// Proxy hostname
    pub host: String,
    /// Proxy port
    pub port: u16,
    /// SOCKS user id sent in the request
    #[serde(default = "defaults::socks_ident")]
    pub ident: String,
}

/// One configured outbound peer
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeedConfig {
    /// Peer instance name; also matched against article Path headers
    pub name: String,
    /// Peer hostname (resolved by the proxy when one is configured)
    pub host: String,
    /// Peer port
    pub port: u16,
    /// Optional SOCKS4a proxy
    #[serde(default)]
    pub proxy: Option<ProxyConfig>,
    /// Offer our stored articles to this peer after every handshake
    #[serde(default)]
    pub sync: bool,
    /// Ordered newsgroup rules for this peer
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

impl FeedConfig {
    /// Direct feed with the given rules
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        rules: Vec<RuleConfig>,
    ) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            proxy: None,
            sync: false,
            rules,
        }
    }

    /// Compile this feed's rules
    pub fn policy(&self) -> Result<FeedPolicy> {
        FeedPolicy::new(self.rules.iter().map(Rule::from).collect())
    }

    /// `host:port` of the peer
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Top-level daemon configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DaemonConfig {
    /// Our name in Path headers and message-ids
    pub instance_name: String,

    /// Address the inbound listener binds
    #[serde(default = "defaults::listen")]
    pub listen: SocketAddr,

    /// Article store root directory
    #[serde(default = "defaults::store_dir")]
    pub store_dir: PathBuf,

    /// Accept posts that carry no encrypted poster address
    #[serde(default)]
    pub allow_anon: bool,

    /// Accept anonymous posts that carry attachments or signatures
    #[serde(default)]
    pub allow_anon_attachments: bool,

    /// Greet inbound peers with 200 (true) or 201 (false)
    #[serde(default = "defaults::inbound_posting")]
    pub inbound_posting: bool,

    /// Newsgroup rules applied to every inbound connection
    ///
    /// `None` accepts every group.
    #[serde(default)]
    pub inbound_rules: Option<Vec<RuleConfig>>,

    /// Fixed delay between outbound reconnect attempts
    #[serde(default = "defaults::reconnect_secs")]
    pub reconnect_secs: u64,

    /// Add up to 50% random jitter to the reconnect delay
    #[serde(default)]
    pub reconnect_jitter: bool,

    /// Delay before re-offering an article the peer deferred with 431
    #[serde(default = "defaults::defer_secs")]
    pub defer_secs: u64,

    /// Bound of each outbound feed's send queue
    #[serde(default = "defaults::queue_depth")]
    pub queue_depth: usize,

    /// Maximum unanswered CHECK/TAKETHIS commands per connection
    #[serde(default = "defaults::max_in_flight")]
    pub max_in_flight: usize,

    /// Largest inbound article accepted, in bytes
    #[serde(default = "defaults::max_article_bytes")]
    pub max_article_bytes: usize,

    /// Outbound peers
    #[serde(default)]
    pub feeds: Vec<FeedConfig>,
}

impl DaemonConfig {
    /// Minimal configuration with defaults for everything but the name
    pub fn new(instance_name: impl Into<String>) -> Self {
        Self {
            instance_name: instance_name.into(),
            listen: defaults::listen(),
            store_dir: defaults::store_dir(),
            allow_anon: false,
            allow_anon_attachments: false,
            inbound_posting: defaults::inbound_posting(),
            inbound_rules: None,
            reconnect_secs: defaults::reconnect_secs(),
            reconnect_jitter: false,
            defer_secs: defaults::defer_secs(),
            queue_depth: defaults::queue_depth(),
            max_in_flight: defaults::max_in_flight(),
            max_article_bytes: defaults::max_article_bytes(),
            feeds: Vec::new(),
        }
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| FeedError::Config(format!("parse error: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            FeedError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    /// Check every field that can be checked offline
    ///
    /// Compiles every rule set, so regex errors surface here.
    pub fn validate(&self) -> Result<()> {
        let name = self.instance_name.trim();
        if name.is_empty() {
            return Err(FeedError::Config("instance_name must not be empty".to_string()));
        }
        if self
            .instance_name
            .chars()
            .any(|c| c == '!' || c.is_whitespace())
        {
            return Err(FeedError::Config(format!(
                "instance_name '{}' must not contain '!' or whitespace",
                self.instance_name
            )));
        }
        if self.queue_depth == 0 {
            return Err(FeedError::Config("queue_depth must be at least 1".to_string()));
        }
        if self.max_in_flight == 0 {
            return Err(FeedError::Config(
                "max_in_flight must be at least 1".to_string(),
            ));
        }
        if self.max_article_bytes == 0 {
            return Err(FeedError::Config(
                "max_article_bytes must be at least 1".to_string(),
            ));
        }

        self.inbound_policy()?;

        let mut names = HashSet::new();
        for feed in &self.feeds {
            if feed.name.trim().is_empty() {
                return Err(FeedError::Config("feed name must not be empty".to_string()));
            }
            if !names.insert(feed.name.as_str()) {
                return Err(FeedError::Config(format!(
                    "duplicate feed name '{}'",
                    feed.name
                )));
            }
            if feed.host.trim().is_empty() {
                return Err(FeedError::Config(format!(
                    "feed '{}' has an empty host",
                    feed.name
                )));
            }
            if feed.proxy.as_ref().is_some_and(|p| p.host.trim().is_empty()) {
                return Err(FeedError::Config(format!(
                    "feed '{}' has a proxy with an empty host",
                    feed.name
                )));
            }
            feed.policy().map_err(|e| match e {
                FeedError::Config(msg) => FeedError::Config(format!("feed '{}': {msg}", feed.name)),
                other => other,
            })?;
        }

        Ok(())
    }

    /// Compile the policy applied to inbound connections
    pub fn inbound_policy(&self) -> Result<FeedPolicy> {
        match &self.inbound_rules {
            Some(rules) => FeedPolicy::new(rules.iter().map(Rule::from).collect()),
            None => Ok(FeedPolicy::allow_all()),
        }
    }

    /// Reconnect delay as a duration
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_secs)
    }

    /// 431 retry delay as a duration
    pub fn defer_interval(&self) -> Duration {
        Duration::from_secs(self.defer_secs)
    }
}
