//! Content acceptance for pushed and pulled articles
//!
//! Rules are applied in a fixed order and the first one that decides wins:
//!
//! 1. newsgroup must be well formed (and allowed by the connection policy)
//! 2. message-id and reference must be well formed
//! 3. duplicates are refused
//! 4. replies to expired threads are refused
//! 5. signed control messages are always accepted
//! 6. anonymous posts are gated by the anonymous-posting switches
//! 7. everything else is checked against the ban list
//!
//! Backend failures are returned as errors, never as a verdict.

use std::fmt;

use tracing::debug;

use super::state::ConnectionState;
use crate::article::{Article, CONTROL_GROUP};
use crate::database::Database;
use crate::store::ArticleStore;
use crate::validation::{is_valid_message_id, validate_newsgroup_name};
use crate::{FeedError, Result};

/// Global switches for anonymous content
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcceptanceRules {
    /// Accept posts without an encrypted poster address
    pub allow_anon: bool,
    /// Also accept such posts when they carry attachments or signatures
    pub allow_anon_attachments: bool,
}

/// Why an article was refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// This node does not take pushed articles
    PostingDisabled,
    /// Article bytes could not be parsed
    Malformed(String),
    /// Larger than the configured limit
    TooLarge,
    /// Message-ID header does not match the id on the command line
    IdMismatch,
    /// Missing or malformed newsgroup
    InvalidNewsgroup,
    /// Connection policy refuses the newsgroup
    NewsgroupNotAllowed(String),
    /// Malformed message-id
    InvalidMessageId,
    /// Malformed reference
    InvalidReference,
    /// Already stored or seen
    Duplicate,
    /// Reply to a thread that has been deleted
    ExpiredThread,
    /// Anonymous posting is off
    Anonymous,
    /// Anonymous attachments or signatures are off
    AnonymousAttachment,
    /// Poster address is banned
    Banned,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::PostingDisabled => f.write_str("posting not allowed"),
            Rejection::Malformed(reason) => write!(f, "malformed article: {reason}"),
            Rejection::TooLarge => f.write_str("article too large"),
            Rejection::IdMismatch => f.write_str("message-id mismatch"),
            Rejection::InvalidNewsgroup => f.write_str("invalid newsgroup"),
            Rejection::NewsgroupNotAllowed(group) => write!(f, "newsgroup {group} not allowed"),
            Rejection::InvalidMessageId => f.write_str("invalid message-id"),
            Rejection::InvalidReference => f.write_str("invalid reference"),
            Rejection::Duplicate => f.write_str("duplicate"),
            Rejection::ExpiredThread => f.write_str("thread expired"),
            Rejection::Anonymous => f.write_str("anonymous posting not allowed"),
            Rejection::AnonymousAttachment => {
                f.write_str("anonymous attachments and signatures not allowed")
            }
            Rejection::Banned => f.write_str("poster is banned"),
        }
    }
}

/// Outcome of the acceptance rules
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject(Rejection),
}

impl Verdict {
    pub fn is_accept(&self) -> bool {
        matches!(self, Verdict::Accept)
    }
}

fn backend(err: FeedError) -> FeedError {
    match err {
        FeedError::Backend(_) => err,
        other => FeedError::Backend(other.to_string()),
    }
}

/// Decide whether `article`, announced as `claimed_id`, may be stored
pub async fn decide(
    article: &Article,
    claimed_id: &str,
    state: &ConnectionState,
    rules: AcceptanceRules,
    store: &dyn ArticleStore,
    database: &dyn Database,
) -> Result<Verdict> {
    let verdict = evaluate(article, claimed_id, state, rules, store, database).await?;
    if let Verdict::Reject(reason) = &verdict {
        debug!(peer = %state.name, message_id = claimed_id, %reason, "Rejected article");
    }
    Ok(verdict)
}

async fn evaluate(
    article: &Article,
    claimed_id: &str,
    state: &ConnectionState,
    rules: AcceptanceRules,
    store: &dyn ArticleStore,
    database: &dyn Database,
) -> Result<Verdict> {
    let reject = |reason| Ok(Verdict::Reject(reason));

    let Some(newsgroup) = article.newsgroup() else {
        return reject(Rejection::InvalidNewsgroup);
    };
    if validate_newsgroup_name(newsgroup).is_err() {
        return reject(Rejection::InvalidNewsgroup);
    }
    if !state.allows(newsgroup) {
        return reject(Rejection::NewsgroupNotAllowed(newsgroup.to_string()));
    }

    let Some(message_id) = article.message_id() else {
        return reject(Rejection::InvalidMessageId);
    };
    if !is_valid_message_id(message_id) {
        return reject(Rejection::InvalidMessageId);
    }
    if message_id != claimed_id {
        return reject(Rejection::IdMismatch);
    }
    if let Some(reference) = article.reference() {
        if !is_valid_message_id(reference) {
            return reject(Rejection::InvalidReference);
        }
    }

    if store.has_article(message_id).await
        || database.has_article(message_id).await.map_err(backend)?
    {
        return reject(Rejection::Duplicate);
    }

    if let Some(reference) = article.reference() {
        if database.is_expired(reference).await.map_err(backend)? {
            return reject(Rejection::ExpiredThread);
        }
    }

    if newsgroup == CONTROL_GROUP && article.is_signed() {
        return Ok(Verdict::Accept);
    }

    if article.is_anonymous() {
        if !rules.allow_anon {
            return reject(Rejection::Anonymous);
        }
        if (article.has_attachments() || article.claims_signature())
            && !rules.allow_anon_attachments
        {
            return reject(Rejection::AnonymousAttachment);
        }
        return Ok(Verdict::Accept);
    }

    // non-anonymous implies an encrypted address is present
    let encrypted_ip = article.encrypted_ip().unwrap_or_default();
    if database
        .check_enc_ip_banned(encrypted_ip)
        .await
        .map_err(backend)?
    {
        return reject(Rejection::Banned);
    }

    Ok(Verdict::Accept)
}
