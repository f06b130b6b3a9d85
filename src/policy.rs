//! Per-peer newsgroup policy
//!
//! A [`FeedPolicy`] is an ordered list of newsgroup patterns, each mapped to an
//! allow flag. Rules are compiled once when configuration is loaded, so a bad
//! pattern stops the daemon at startup instead of surfacing mid-session.
//!
//! Two questions are answered independently:
//!
//! - [`FeedPolicy::allows`]: accept an inbound article in this group through
//!   this peer. A rule written `!pattern` denies every group it matches.
//! - [`FeedPolicy::federates`]: push an outbound article in this group to this
//!   peer. `!pattern` rules are ignored here.
//!
//! In both cases the first applicable rule wins and no match means deny.
//!
//! # Example
//!
//! ```
//! use nntp_feed::policy::{FeedPolicy, Rule};
//!
//! let policy = FeedPolicy::new(vec![
//!     Rule::new("!ctl", true),
//!     Rule::new("overchan\\..*", true),
//!     Rule::new("overchan\\.spam", false),
//! ]).unwrap();
//!
//! assert!(policy.allows("overchan.test"));
//! assert!(policy.allows("overchan.spam"));
//! assert!(!policy.allows("ctl"));
//! assert!(!policy.federates("ctl"));
//! assert!(!policy.allows("alt.test"));
//! ```

use regex::Regex;

use crate::{FeedError, Result};

/// An uncompiled rule as written in configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    /// Newsgroup pattern, optionally prefixed with `!`
    pub pattern: String,
    /// Decision when a plain pattern matches
    pub allow: bool,
}

impl Rule {
    /// Create a rule
    pub fn new(pattern: impl Into<String>, allow: bool) -> Self {
        Self {
            pattern: pattern.into(),
            allow,
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    source: String,
    regex: Regex,
    inverse: bool,
    allow: bool,
}

/// Compiled, read-only newsgroup policy
///
/// Safe to share between connection tasks behind an `Arc`; evaluation never
/// mutates.
#[derive(Debug, Clone, Default)]
pub struct FeedPolicy {
    rules: Vec<CompiledRule>,
}

impl FeedPolicy {
    /// Compile rules in declaration order
    ///
    /// Patterns must match the whole newsgroup name.
    ///
    /// # Errors
    ///
    /// [`FeedError::Config`] if any pattern fails to compile.
    pub fn new(rules: Vec<Rule>) -> Result<Self> {
        let rules = rules
            .into_iter()
            .map(|rule| {
                let (inverse, body) = match rule.pattern.strip_prefix('!') {
                    Some(body) => (true, body),
                    None => (false, rule.pattern.as_str()),
                };
                let regex = Regex::new(&format!("^(?:{body})$")).map_err(|e| {
                    FeedError::Config(format!("invalid newsgroup pattern '{}': {e}", rule.pattern))
                })?;
                Ok(CompiledRule {
                    source: rule.pattern.clone(),
                    regex,
                    inverse,
                    allow: rule.allow,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { rules })
    }

    /// Policy that accepts and federates every group
    pub fn allow_all() -> Self {
        // ".*" always compiles
        Self {
            rules: vec![CompiledRule {
                source: ".*".to_string(),
                regex: Regex::new("^(?:.*)$").unwrap_or_else(|_| unreachable!()),
                inverse: false,
                allow: true,
            }],
        }
    }

    /// Accept an inbound article in `newsgroup`
    pub fn allows(&self, newsgroup: &str) -> bool {
        for rule in &self.rules {
            if !rule.regex.is_match(newsgroup) {
                continue;
            }
            return !rule.inverse && rule.allow;
        }
        false
    }

    /// Push an outbound article in `newsgroup`
    pub fn federates(&self, newsgroup: &str) -> bool {
        self.rules
            .iter()
            .filter(|rule| !rule.inverse)
            .find(|rule| rule.regex.is_match(newsgroup))
            .is_some_and(|rule| rule.allow)
    }

    /// Rule patterns as written, in evaluation order
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|rule| rule.source.as_str())
    }

    /// Whether the policy has no rules (and so denies everything)
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
