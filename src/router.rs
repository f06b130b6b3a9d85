//! Central event loop
//!
//! The [`Router`] task is the only owner of the live-connection registry.
//! Connections talk to it exclusively through a [`RouterHandle`]: they
//! register when they start, deregister when they end, and hand over
//! message-ids of articles they have staged. The router persists each
//! article, records it in the database, and offers it to every outbound feed
//! whose policy federates the newsgroup.
//!
//! Offers go onto each feed's bounded queue with `try_send`. A full queue
//! drops the offer with a warning, so one slow peer never stalls the router
//! or any other feed.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, watch};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};

use crate::article::Article;
use crate::database::Database;
use crate::frontend::Frontend;
use crate::policy::FeedPolicy;
use crate::store::ArticleStore;
use crate::validation::{is_valid_message_id, validate_newsgroup_name};
use crate::{FeedError, Result};

/// Router event channel bound
const EVENT_QUEUE: usize = 1024;

/// Identifies one live connection in the registry
pub type ConnectionId = u64;

/// Work item for an outbound feed connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedCommand {
    /// Push this article with CHECK/TAKETHIS
    Offer(String),
    /// Pull this article with a transient READER-mode ARTICLE
    Fetch(String),
}

/// What a registered connection is for
#[derive(Debug, Clone)]
pub enum Role {
    /// Peer pushes to us; never a fan-out target
    Inbound,
    /// Configured feed we push to
    Outbound {
        /// Feed policy deciding which groups are federated
        policy: Arc<FeedPolicy>,
        /// The connection's bounded work queue
        commands: mpsc::Sender<FeedCommand>,
    },
}

#[derive(Debug)]
enum Event {
    Register {
        id: ConnectionId,
        name: String,
        role: Role,
    },
    Deregister {
        id: ConnectionId,
    },
    Ingest {
        message_id: String,
    },
    Fetch {
        message_id: String,
    },
}

/// Cloneable sender side of the router
#[derive(Debug, Clone)]
pub struct RouterHandle {
    events: mpsc::Sender<Event>,
    next_id: Arc<AtomicU64>,
}

impl RouterHandle {
    async fn send(&self, event: Event) -> Result<()> {
        self.events
            .send(event)
            .await
            .map_err(|_| FeedError::Other("router has stopped".to_string()))
    }

    /// Add a connection to the registry, returning its id
    pub async fn register(&self, name: impl Into<String>, role: Role) -> Result<ConnectionId> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.send(Event::Register {
            id,
            name: name.into(),
            role,
        })
        .await?;
        Ok(id)
    }

    /// Remove a connection from the registry
    pub async fn deregister(&self, id: ConnectionId) -> Result<()> {
        self.send(Event::Deregister { id }).await
    }

    /// Persist and fan out an article already staged under `message_id`
    pub async fn ingest(&self, message_id: impl Into<String>) -> Result<()> {
        self.send(Event::Ingest {
            message_id: message_id.into(),
        })
        .await
    }

    /// Ask every live outbound feed to pull `message_id`
    pub async fn fetch(&self, message_id: impl Into<String>) -> Result<()> {
        let message_id = message_id.into();
        if !is_valid_message_id(&message_id) {
            return Err(FeedError::InvalidMessageId(message_id));
        }
        self.send(Event::Fetch { message_id }).await
    }
}

#[derive(Debug)]
struct Entry {
    name: String,
    role: Role,
}

/// The daemon's coordination task
pub struct Router {
    events: mpsc::Receiver<Event>,
    store: Arc<dyn ArticleStore>,
    database: Arc<dyn Database>,
    frontend: Box<dyn Frontend>,
    instance: String,
    registry: HashMap<ConnectionId, Entry>,
}

impl Router {
    /// Create the router and the handle connections use to reach it
    pub fn new(
        instance: impl Into<String>,
        store: Arc<dyn ArticleStore>,
        database: Arc<dyn Database>,
        frontend: Box<dyn Frontend>,
    ) -> (Self, RouterHandle) {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE);
        let router = Self {
            events: rx,
            store,
            database,
            frontend,
            instance: instance.into(),
            registry: HashMap::new(),
        };
        let handle = RouterHandle {
            events: tx,
            next_id: Arc::new(AtomicU64::new(1)),
        };
        (router, handle)
    }

    /// Run until shutdown is signalled
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut frontend_open = true;
        info!("Router started");

        loop {
            // registry changes before local posts
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                event = self.events.recv() => match event {
                    Some(event) => self.handle(event).await,
                    None => break,
                },
                post = self.frontend.next_post(), if frontend_open => match post {
                    Some(article) => self.submit_local(article).await,
                    None => {
                        debug!("Frontend closed");
                        frontend_open = false;
                    }
                },
            }
        }

        info!(connections = self.registry.len(), "Router stopped");
    }

    async fn handle(&mut self, event: Event) {
        match event {
            Event::Register { id, name, role } => {
                info!(id, %name, outbound = matches!(role, Role::Outbound { .. }), "Connection registered");
                self.registry.insert(id, Entry { name, role });
            }
            Event::Deregister { id } => {
                if let Some(entry) = self.registry.remove(&id) {
                    info!(id, name = %entry.name, "Connection deregistered");
                }
            }
            Event::Ingest { message_id } => self.ingest_staged(&message_id).await,
            Event::Fetch { message_id } => {
                let command = FeedCommand::Fetch(message_id);
                self.send_to_feeds(|_| true, &command);
            }
        }
    }

    async fn ingest_staged(&mut self, message_id: &str) {
        let article = match self.store.read_temp_message(message_id).await {
            Ok(article) => article,
            Err(e) => {
                error!(message_id, error = %e, "Cannot read staged article");
                self.discard(message_id).await;
                return;
            }
        };
        if let Err(e) = self.persist(&article, message_id).await {
            error!(message_id, error = %e, "Failed to persist article");
            self.discard(message_id).await;
            return;
        }
        self.broadcast(&article);
    }

    async fn submit_local(&mut self, mut article: Article) {
        let Some(message_id) = article.message_id().map(str::to_string) else {
            warn!("Local post without Message-ID dropped");
            return;
        };
        if !is_valid_message_id(&message_id) {
            warn!(%message_id, "Local post with invalid Message-ID dropped");
            return;
        }
        match article.newsgroup() {
            Some(newsgroup) if validate_newsgroup_name(newsgroup).is_ok() => {}
            newsgroup => {
                warn!(%message_id, newsgroup = newsgroup.unwrap_or(""), "Local post with invalid newsgroup dropped");
                return;
            }
        }
        if article.reference().is_some_and(|r| !is_valid_message_id(r)) {
            warn!(%message_id, "Local post with invalid reference dropped");
            return;
        }
        if self.store.has_article(&message_id).await {
            warn!(%message_id, "Local post already stored");
            return;
        }
        match self.database.has_article(&message_id).await {
            Ok(false) => {}
            Ok(true) => {
                warn!(%message_id, "Local post already seen");
                return;
            }
            Err(e) => {
                error!(%message_id, error = %e, "Cannot check local post against the seen-set");
                return;
            }
        }

        if !article.path_contains(&self.instance) {
            article.prepend_path(&self.instance);
        }
        if let Err(e) = self.persist(&article, &message_id).await {
            error!(%message_id, error = %e, "Failed to persist local post");
            return;
        }
        info!(%message_id, newsgroup = article.newsgroup().unwrap_or(""), "Local post stored");
        self.broadcast(&article);
    }

    /// Store then register
    ///
    /// An article the database refuses is taken back out of the store.
    async fn persist(&self, article: &Article, message_id: &str) -> Result<()> {
        self.store.store_post(article).await?;
        if let Err(e) = self.database.register_article(article).await {
            if let Err(removed) = self.store.delete_article(message_id).await {
                warn!(message_id, error = %removed, "Failed to remove unregistered article");
            }
            return Err(e);
        }
        Ok(())
    }

    async fn discard(&self, message_id: &str) {
        if let Err(e) = self.store.discard_temp(message_id).await {
            warn!(message_id, error = %e, "Failed to discard staging file");
        }
    }

    /// Offer a stored article to every feed that federates its group
    fn broadcast(&mut self, article: &Article) {
        let (Some(message_id), Some(newsgroup)) = (article.message_id(), article.newsgroup())
        else {
            return;
        };
        let command = FeedCommand::Offer(message_id.to_string());
        let offered = self.send_to_feeds(
            |entry| {
                if article.path_contains(&entry.name) {
                    debug!(message_id, feed = %entry.name, "Feed already in Path");
                    return false;
                }
                match &entry.role {
                    Role::Outbound { policy, .. } => policy.federates(newsgroup),
                    Role::Inbound => false,
                }
            },
            &command,
        );
        debug!(message_id, newsgroup, feeds = offered, "Article fanned out");
    }

    /// Queue `command` on every outbound entry accepted by `filter`
    ///
    /// Entries whose connection has gone away are pruned.
    fn send_to_feeds(&mut self, filter: impl Fn(&Entry) -> bool, command: &FeedCommand) -> usize {
        let mut sent = 0;
        let mut stale = Vec::new();

        for (id, entry) in &self.registry {
            let Role::Outbound { commands, .. } = &entry.role else {
                continue;
            };
            if !filter(entry) {
                continue;
            }
            match commands.try_send(command.clone()) {
                Ok(()) => sent += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(feed = %entry.name, ?command, "Feed queue full, dropping");
                }
                Err(TrySendError::Closed(_)) => stale.push(*id),
            }
        }

        for id in stale {
            if let Some(entry) = self.registry.remove(&id) {
                debug!(id, name = %entry.name, "Pruned closed connection");
            }
        }
        sent
    }
}
