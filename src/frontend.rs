//! Local post submission
//!
//! The router drains a [`Frontend`] alongside inbound peer articles. A post
//! passes the same identity checks, is registered, written to the store and
//! fanned out.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::article::Article;
use crate::{FeedError, Result};

/// Source of locally submitted articles
#[async_trait]
pub trait Frontend: Send + Sync + 'static {
    /// Wait for the next post; `None` once the source is closed for good
    async fn next_post(&mut self) -> Option<Article>;
}

/// Frontend fed through an mpsc channel
#[derive(Debug)]
pub struct ChannelFrontend {
    posts: mpsc::Receiver<Article>,
}

/// Cloneable handle used to submit posts to a [`ChannelFrontend`]
#[derive(Debug, Clone)]
pub struct PostSubmitter {
    posts: mpsc::Sender<Article>,
}

impl ChannelFrontend {
    /// Frontend plus its submit handle, buffering up to `capacity` posts
    pub fn new(capacity: usize) -> (Self, PostSubmitter) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { posts: rx }, PostSubmitter { posts: tx })
    }
}

#[async_trait]
impl Frontend for ChannelFrontend {
    async fn next_post(&mut self) -> Option<Article> {
        self.posts.recv().await
    }
}

impl PostSubmitter {
    /// Queue a post; waits while the frontend buffer is full
    pub async fn submit(&self, article: Article) -> Result<()> {
        self.posts
            .send(article)
            .await
            .map_err(|_| FeedError::Other("daemon is not accepting posts".to_string()))
    }
}

/// Frontend that never produces a post
#[derive(Debug, Default, Clone, Copy)]
pub struct NullFrontend;

#[async_trait]
impl Frontend for NullFrontend {
    async fn next_post(&mut self) -> Option<Article> {
        std::future::pending().await
    }
}
