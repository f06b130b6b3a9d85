//! Outbound feed supervision
//!
//! A [`FeedSupervisor`] keeps one connection to one configured peer alive
//! for the whole life of the daemon. Dial failures, handshake failures and
//! dropped connections are all retried after the reconnect delay; the loop
//! only ends on shutdown.
//!
//! Dialing goes through the [`Dial`] trait so tests can substitute in-memory
//! streams or always-failing dialers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::{DaemonConfig, FeedConfig};
use crate::connection::{OutboundSession, SessionContext};
use crate::policy::FeedPolicy;
use crate::router::{FeedCommand, Role};
use crate::{FeedError, Result, socks};

/// TCP connect timeout in seconds
const TCP_CONNECT_TIMEOUT_SECS: u64 = 60;

/// Idle time before TCP keepalive probes start
const KEEPALIVE_SECS: u64 = 60;

/// Opens the byte stream to a feed
#[async_trait]
pub trait Dial: Send + Sync + 'static {
    /// Connected stream type
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Connect to `feed`, through its proxy if one is configured
    async fn dial(&self, feed: &FeedConfig) -> Result<Self::Stream>;
}

/// Plain TCP dialer with optional SOCKS4a
#[derive(Debug, Clone)]
pub struct TcpDialer {
    connect_timeout: Duration,
}

impl Default for TcpDialer {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(TCP_CONNECT_TIMEOUT_SECS),
        }
    }
}

impl TcpDialer {
    /// Dialer with a custom connect timeout
    pub fn with_timeout(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl Dial for TcpDialer {
    type Stream = TcpStream;

    async fn dial(&self, feed: &FeedConfig) -> Result<TcpStream> {
        let target = match &feed.proxy {
            Some(proxy) => format!("{}:{}", proxy.host, proxy.port),
            None => feed.address(),
        };

        let mut stream = timeout(self.connect_timeout, TcpStream::connect(&target))
            .await
            .map_err(|_| FeedError::Timeout)??;
        tune_socket(&stream)?;

        if let Some(proxy) = &feed.proxy {
            debug!(feed = %feed.name, proxy = %target, "Connecting through SOCKS4a");
            timeout(
                self.connect_timeout,
                socks::connect(&mut stream, &feed.host, feed.port, &proxy.ident),
            )
            .await
            .map_err(|_| FeedError::Timeout)??;
        }
        Ok(stream)
    }
}

/// Disable Nagle and enable keepalive on a dialed socket
fn tune_socket(stream: &TcpStream) -> Result<()> {
    stream.set_nodelay(true)?;
    let keepalive = TcpKeepalive::new().with_time(Duration::from_secs(KEEPALIVE_SECS));
    SockRef::from(stream).set_tcp_keepalive(&keepalive)?;
    Ok(())
}

/// Fixed reconnect delay with optional jitter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Base delay between attempts
    pub interval: Duration,
    /// Add 0-50% random jitter
    pub jitter: bool,
}

impl ReconnectPolicy {
    /// Fixed delay without jitter
    pub fn fixed(interval: Duration) -> Self {
        Self {
            interval,
            jitter: false,
        }
    }

    /// Delay before the next attempt
    pub fn delay(&self) -> Duration {
        if !self.jitter {
            return self.interval;
        }
        let base = self.interval.as_millis() as u64;
        let jitter = rand::thread_rng().gen_range(0..=(base / 2));
        Duration::from_millis(base + jitter)
    }
}

/// Keeps one outbound feed connected
pub struct FeedSupervisor<D: Dial> {
    feed: FeedConfig,
    policy: Arc<FeedPolicy>,
    dialer: Arc<D>,
    ctx: Arc<SessionContext>,
    reconnect: ReconnectPolicy,
    queue_depth: usize,
}

impl<D: Dial> FeedSupervisor<D> {
    pub fn new(
        feed: FeedConfig,
        policy: Arc<FeedPolicy>,
        dialer: Arc<D>,
        ctx: Arc<SessionContext>,
        reconnect: ReconnectPolicy,
        queue_depth: usize,
    ) -> Self {
        Self {
            feed,
            policy,
            dialer,
            ctx,
            reconnect,
            queue_depth: queue_depth.max(1),
        }
    }

    /// Supervisor for `feed` using daemon-wide settings
    pub fn from_config(
        feed: FeedConfig,
        config: &DaemonConfig,
        dialer: Arc<D>,
        ctx: Arc<SessionContext>,
    ) -> Result<Self> {
        let policy = Arc::new(feed.policy()?);
        let reconnect = ReconnectPolicy {
            interval: config.reconnect_interval(),
            jitter: config.reconnect_jitter,
        };
        Ok(Self::new(feed, policy, dialer, ctx, reconnect, config.queue_depth))
    }

    /// Run until shutdown
    ///
    /// Never returns on connection failure; every failure is logged and
    /// retried after the reconnect delay.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut attempt: u64 = 0;
        info!(feed = %self.feed.name, address = %self.feed.address(), "Feed supervisor started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            attempt += 1;

            match self.connect_once(&shutdown).await {
                Ok(()) => info!(feed = %self.feed.name, "Feed connection closed"),
                Err(e) => warn!(feed = %self.feed.name, attempt, error = %e, "Feed connection failed"),
            }

            if *shutdown.borrow() {
                break;
            }
            let delay = self.reconnect.delay();
            debug!(feed = %self.feed.name, ?delay, "Reconnecting after delay");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        info!(feed = %self.feed.name, "Feed supervisor stopped");
    }

    async fn connect_once(&self, shutdown: &watch::Receiver<bool>) -> Result<()> {
        let stream = self.dialer.dial(&self.feed).await?;
        let mut session = OutboundSession::new(
            stream,
            self.feed.name.clone(),
            self.policy.clone(),
            self.ctx.clone(),
        );
        session.handshake().await?;

        let (tx, rx) = mpsc::channel(self.queue_depth);
        let id = self
            .ctx
            .router
            .register(
                self.feed.name.clone(),
                Role::Outbound {
                    policy: self.policy.clone(),
                    commands: tx.clone(),
                },
            )
            .await?;

        if self.feed.sync {
            tokio::spawn(sync_feed(
                self.feed.name.clone(),
                self.policy.clone(),
                self.ctx.clone(),
                tx.clone(),
            ));
        }

        let result = session.stream(rx, tx, shutdown.clone()).await;
        if let Err(e) = self.ctx.router.deregister(id).await {
            debug!(error = %e, "Router gone before deregistration");
        }
        result
    }
}

/// Offer every stored article in every federated group to a new connection
///
/// Uses the connection's own queue, so it waits whenever the queue is full
/// and stops once the connection goes away.
async fn sync_feed(
    name: String,
    policy: Arc<FeedPolicy>,
    ctx: Arc<SessionContext>,
    queue: mpsc::Sender<FeedCommand>,
) {
    let groups = match ctx.database.get_all_newsgroups().await {
        Ok(groups) => groups,
        Err(e) => {
            warn!(feed = %name, error = %e, "Sync aborted, cannot list newsgroups");
            return;
        }
    };

    let mut offered = 0usize;
    for group in groups.iter().filter(|g| policy.federates(g)) {
        let ids = match ctx.database.articles_in_group(group).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(feed = %name, %group, error = %e, "Sync skipped newsgroup");
                continue;
            }
        };
        for id in ids {
            if !ctx.store.has_article(&id).await {
                continue;
            }
            if queue.send(FeedCommand::Offer(id)).await.is_err() {
                debug!(feed = %name, offered, "Sync stopped, connection closed");
                return;
            }
            offered += 1;
        }
    }
    info!(feed = %name, offered, "Sync complete");
}
