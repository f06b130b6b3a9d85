//! Per-connection protocol engine
//!
//! Each TCP connection runs in its own task. Inbound connections are served
//! by [`InboundSession`]; outbound feeds are driven by [`OutboundSession`].
//! Both split the stream into a buffered reader and a writer owned by the
//! session task, so command bytes from different sources can never interleave
//! on the wire.
//!
//! This module is organized into:
//! - `io`: line/block reading with limits and timeouts, the single writer
//! - `state`: [`Mode`] and [`ConnectionState`]
//! - `accept`: the acceptance decision for received articles
//! - `inbound`: server side of the streaming exchange
//! - `outbound`: client side, including transient ARTICLE pulls

pub mod accept;
mod inbound;
mod io;
mod outbound;
mod state;

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tracing::warn;

pub use self::accept::{AcceptanceRules, Rejection, Verdict};
pub use self::inbound::InboundSession;
pub use self::io::{BLOCK_TIMEOUT, MAX_LINE, RESPONSE_TIMEOUT};
pub use self::outbound::OutboundSession;
pub use self::state::{ConnectionState, Direction, Mode};

use crate::article::Article;
use crate::config::DaemonConfig;
use crate::database::Database;
use crate::policy::FeedPolicy;
use crate::router::RouterHandle;
use crate::store::{ArticleStore, is_temp_collision};
use crate::Result;

/// Everything a session needs besides its socket
pub struct SessionContext {
    /// Our instance name, prepended to Path
    pub instance: String,
    /// Article bytes
    pub store: Arc<dyn ArticleStore>,
    /// Seen-set, expiry and bans
    pub database: Arc<dyn Database>,
    /// Where staged articles are handed off
    pub router: RouterHandle,
    /// Anonymous content switches
    pub rules: AcceptanceRules,
    /// Greet inbound peers with 200 rather than 201
    pub inbound_posting: bool,
    /// Policy applied to inbound peers
    pub inbound_policy: Option<Arc<FeedPolicy>>,
    /// Inbound article size cap
    pub max_article_bytes: usize,
    /// Unanswered commands allowed on an outbound connection
    pub max_in_flight: usize,
    /// Delay before re-offering a 431-deferred article
    pub defer: Duration,
}

impl SessionContext {
    /// Build from validated configuration
    pub fn from_config(
        config: &DaemonConfig,
        store: Arc<dyn ArticleStore>,
        database: Arc<dyn Database>,
        router: RouterHandle,
    ) -> Result<Self> {
        Ok(Self {
            instance: config.instance_name.clone(),
            store,
            database,
            router,
            rules: AcceptanceRules {
                allow_anon: config.allow_anon,
                allow_anon_attachments: config.allow_anon_attachments,
            },
            inbound_posting: config.inbound_posting,
            inbound_policy: Some(Arc::new(config.inbound_policy()?)),
            max_article_bytes: config.max_article_bytes,
            max_in_flight: config.max_in_flight,
            defer: config.defer_interval(),
        })
    }

    /// Stamp an accepted article with our Path entry and stage it
    ///
    /// Returns `false` when another connection is already staging the same
    /// message-id.
    pub(crate) async fn stage(&self, article: &mut Article, message_id: &str) -> Result<bool> {
        article.prepend_path(&self.instance);

        let mut file = match self.store.create_temp_file(message_id).await {
            Ok(file) => file,
            Err(e) if is_temp_collision(&e) => return Ok(false),
            Err(e) => return Err(e),
        };

        let written = async {
            file.write_all(&article.to_bytes()).await?;
            file.shutdown().await
        }
        .await;

        if let Err(e) = written {
            if let Err(discard) = self.store.discard_temp(message_id).await {
                warn!(message_id, error = %discard, "Failed to discard staging file");
            }
            return Err(e.into());
        }
        Ok(true)
    }
}
