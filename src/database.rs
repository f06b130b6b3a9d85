//! Article index boundary
//!
//! The database remembers every message-id this node has seen, which groups
//! they belong to, which threads have expired, and which encrypted poster
//! addresses are banned. Persistent backends live outside this crate;
//! [`MemoryDatabase`] is the in-process implementation.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use crate::article::Article;
use crate::{FeedError, Result};

/// Article index shared by every connection task
#[async_trait]
pub trait Database: Send + Sync + 'static {
    /// Record a newly stored article
    async fn register_article(&self, article: &Article) -> Result<()>;

    /// Whether the article has ever been registered (including expired ones)
    async fn has_article(&self, message_id: &str) -> Result<bool>;

    /// Whether the encrypted poster address is banned
    async fn check_enc_ip_banned(&self, encrypted_ip: &str) -> Result<bool>;

    /// Whether a thread root was seen but has since been deleted
    async fn is_expired(&self, root_message_id: &str) -> Result<bool>;

    /// Every newsgroup with at least one registered article
    async fn get_all_newsgroups(&self) -> Result<Vec<String>>;

    /// Registered, unexpired message-ids in a newsgroup, oldest first
    async fn articles_in_group(&self, newsgroup: &str) -> Result<Vec<String>>;
}

#[derive(Debug, Default)]
struct Inner {
    seen: HashSet<String>,
    groups: BTreeMap<String, Vec<String>>,
    expired: HashSet<String>,
    banned: HashSet<String>,
    group_of: HashMap<String, String>,
}

/// Thread-safe in-memory index
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    inner: Mutex<Inner>,
}

impl MemoryDatabase {
    /// Empty index
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| FeedError::Backend("memory database lock poisoned".to_string()))
    }

    /// Ban an encrypted poster address
    pub fn ban_enc_ip(&self, encrypted_ip: impl Into<String>) -> Result<()> {
        self.lock()?.banned.insert(encrypted_ip.into());
        Ok(())
    }

    /// Lift a ban
    pub fn unban_enc_ip(&self, encrypted_ip: &str) -> Result<()> {
        self.lock()?.banned.remove(encrypted_ip);
        Ok(())
    }

    /// Mark a thread root as deleted
    ///
    /// The id stays in the seen-set so the article is never re-accepted, and
    /// replies referencing it are refused.
    pub fn expire(&self, message_id: &str) -> Result<()> {
        let mut inner = self.lock()?;
        inner.seen.insert(message_id.to_string());
        inner.expired.insert(message_id.to_string());
        if let Some(group) = inner.group_of.remove(message_id) {
            if let Some(ids) = inner.groups.get_mut(&group) {
                ids.retain(|id| id != message_id);
            }
        }
        Ok(())
    }

    /// Number of registered, unexpired articles
    pub fn article_count(&self) -> usize {
        self.lock()
            .map(|inner| inner.groups.values().map(Vec::len).sum())
            .unwrap_or(0)
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn register_article(&self, article: &Article) -> Result<()> {
        let message_id = article
            .message_id()
            .ok_or_else(|| FeedError::InvalidArticle("article has no Message-ID".to_string()))?
            .to_string();
        let newsgroup = article
            .newsgroup()
            .ok_or_else(|| FeedError::InvalidArticle("article has no Newsgroups".to_string()))?
            .to_string();

        let mut inner = self.lock()?;
        if !inner.seen.insert(message_id.clone()) {
            return Ok(());
        }
        inner
            .groups
            .entry(newsgroup.clone())
            .or_default()
            .push(message_id.clone());
        inner.group_of.insert(message_id.clone(), newsgroup.clone());
        debug!(%message_id, %newsgroup, "Registered article");
        Ok(())
    }

    async fn has_article(&self, message_id: &str) -> Result<bool> {
        Ok(self.lock()?.seen.contains(message_id))
    }

    async fn check_enc_ip_banned(&self, encrypted_ip: &str) -> Result<bool> {
        Ok(self.lock()?.banned.contains(encrypted_ip))
    }

    async fn is_expired(&self, root_message_id: &str) -> Result<bool> {
        Ok(self.lock()?.expired.contains(root_message_id))
    }

    async fn get_all_newsgroups(&self) -> Result<Vec<String>> {
        Ok(self.lock()?.groups.keys().cloned().collect())
    }

    async fn articles_in_group(&self, newsgroup: &str) -> Result<Vec<String>> {
        Ok(self
            .lock()?
            .groups
            .get(newsgroup)
            .cloned()
            .unwrap_or_default())
    }
}
