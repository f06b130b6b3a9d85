//! Article storage boundary
//!
//! Raw article bytes are kept per message-id. Inbound articles are written
//! to a staging file first and only become visible once the router stores
//! them, so a half-received article is never reported by
//! [`ArticleStore::has_article`].

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWrite;
use tracing::{debug, trace};

use crate::article::{Article, parse_article};
use crate::validation::validate_message_id;
use crate::{FeedError, Result};

/// Writer for a staged article
pub type TempWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Persistence for raw article bytes, shared by every connection task
#[async_trait]
pub trait ArticleStore: Send + Sync + 'static {
    /// Whether a fully stored article exists
    async fn has_article(&self, message_id: &str) -> bool;

    /// Open a staging file for `message_id`
    ///
    /// Creation is atomic: if a staging file already exists the call fails
    /// with an `AlreadyExists` IO error and the first writer keeps it.
    async fn create_temp_file(&self, message_id: &str) -> Result<TempWriter>;

    /// Location of the stored article
    fn get_filename(&self, message_id: &str) -> PathBuf;

    /// Raw bytes of a stored article
    async fn read_article(&self, message_id: &str) -> Result<Vec<u8>>;

    /// Parse the staged article for `message_id`
    async fn read_temp_message(&self, message_id: &str) -> Result<Article>;

    /// Make `article` visible, consuming its staging file if there is one
    async fn store_post(&self, article: &Article) -> Result<()>;

    /// Drop the staging file, if any
    async fn discard_temp(&self, message_id: &str) -> Result<()>;

    /// Remove a stored article, if any
    async fn delete_article(&self, message_id: &str) -> Result<()>;
}

/// Whether a store error is the create-new collision of a concurrent writer
pub fn is_temp_collision(err: &FeedError) -> bool {
    matches!(err, FeedError::Io(e) if e.kind() == ErrorKind::AlreadyExists)
}

/// Directory-backed store
///
/// Layout: `<root>/articles/<message-id>` for stored articles and
/// `<root>/tmp/<message-id>` for staging files. Storing renames the staging
/// file into place.
#[derive(Debug, Clone)]
pub struct FsArticleStore {
    articles: PathBuf,
    temp: PathBuf,
}

impl FsArticleStore {
    /// Open (creating if needed) a store rooted at `root`
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let articles = root.join("articles");
        let temp = root.join("tmp");
        fs::create_dir_all(&articles).await?;
        fs::create_dir_all(&temp).await?;
        debug!(root = %root.display(), "Opened article store");
        Ok(Self { articles, temp })
    }

    fn temp_path(&self, message_id: &str) -> PathBuf {
        self.temp.join(message_id)
    }
}

#[async_trait]
impl ArticleStore for FsArticleStore {
    async fn has_article(&self, message_id: &str) -> bool {
        if validate_message_id(message_id).is_err() {
            return false;
        }
        fs::try_exists(self.get_filename(message_id))
            .await
            .unwrap_or(false)
    }

    async fn create_temp_file(&self, message_id: &str) -> Result<TempWriter> {
        validate_message_id(message_id)?;
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.temp_path(message_id))
            .await?;
        trace!(message_id, "Created staging file");
        Ok(Box::new(file))
    }

    fn get_filename(&self, message_id: &str) -> PathBuf {
        self.articles.join(message_id)
    }

    async fn read_article(&self, message_id: &str) -> Result<Vec<u8>> {
        validate_message_id(message_id)?;
        Ok(fs::read(self.get_filename(message_id)).await?)
    }

    async fn read_temp_message(&self, message_id: &str) -> Result<Article> {
        validate_message_id(message_id)?;
        let raw = fs::read(self.temp_path(message_id)).await?;
        parse_article(&raw)
    }

    async fn store_post(&self, article: &Article) -> Result<()> {
        let message_id = article
            .message_id()
            .ok_or_else(|| FeedError::InvalidArticle("article has no Message-ID".to_string()))?;
        validate_message_id(message_id)?;

        let temp = self.temp_path(message_id);
        if !fs::try_exists(&temp).await.unwrap_or(false) {
            fs::write(&temp, article.to_bytes()).await?;
        }
        fs::rename(&temp, self.get_filename(message_id)).await?;
        debug!(message_id, "Stored article");
        Ok(())
    }

    async fn discard_temp(&self, message_id: &str) -> Result<()> {
        validate_message_id(message_id)?;
        remove_if_present(&self.temp_path(message_id)).await
    }

    async fn delete_article(&self, message_id: &str) -> Result<()> {
        validate_message_id(message_id)?;
        remove_if_present(&self.get_filename(message_id)).await?;
        debug!(message_id, "Deleted article");
        Ok(())
    }
}

async fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
