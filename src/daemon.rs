//! Daemon wiring
//!
//! [`Daemon`] binds the listener, builds the backends and the router, and
//! then runs three kinds of tasks until shutdown: the router, one
//! [`FeedSupervisor`] per configured feed, and one [`InboundSession`] per
//! accepted client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::DaemonConfig;
use crate::connection::{InboundSession, SessionContext};
use crate::database::{Database, MemoryDatabase};
use crate::feed::{Dial, FeedSupervisor, TcpDialer};
use crate::frontend::{Frontend, NullFrontend};
use crate::router::{Router, RouterHandle};
use crate::store::{ArticleStore, FsArticleStore};
use crate::Result;

/// How long running tasks get to wind down after shutdown is signalled
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Pause after a failed accept before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Signals a running [`Daemon`] to stop
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Ask every task to stop
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }

    /// Whether shutdown has been requested
    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }
}

/// A bound, not yet running daemon
pub struct Daemon {
    config: DaemonConfig,
    listener: TcpListener,
    router: Router,
    handle: RouterHandle,
    ctx: Arc<SessionContext>,
    shutdown: ShutdownHandle,
}

impl Daemon {
    /// Validate `config`, open the store under `store_dir` and bind the listener
    ///
    /// Uses [`MemoryDatabase`] and no local frontend.
    pub async fn bind(config: DaemonConfig) -> Result<Self> {
        config.validate()?;
        let store = FsArticleStore::open(&config.store_dir).await?;
        Self::with_backends(
            config,
            Arc::new(store),
            Arc::new(MemoryDatabase::new()),
            Box::new(NullFrontend),
        )
        .await
    }

    /// Like [`Daemon::bind`] with caller-supplied backends
    pub async fn with_backends(
        config: DaemonConfig,
        store: Arc<dyn ArticleStore>,
        database: Arc<dyn Database>,
        frontend: Box<dyn Frontend>,
    ) -> Result<Self> {
        config.validate()?;

        let listener = TcpListener::bind(config.listen).await?;
        let (router, handle) = Router::new(
            config.instance_name.clone(),
            store.clone(),
            database.clone(),
            frontend,
        );
        let ctx = Arc::new(SessionContext::from_config(
            &config,
            store,
            database,
            handle.clone(),
        )?);
        let (tx, _) = watch::channel(false);

        info!(
            instance = %config.instance_name,
            listen = %listener.local_addr()?,
            feeds = config.feeds.len(),
            "Daemon bound"
        );

        Ok(Self {
            config,
            listener,
            router,
            handle,
            ctx,
            shutdown: ShutdownHandle { tx: Arc::new(tx) },
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle for registering, ingesting and fetching through the router
    pub fn router(&self) -> RouterHandle {
        self.handle.clone()
    }

    /// Handle that stops [`Daemon::run`]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Run with plain TCP (and SOCKS4a) dialing until shutdown
    pub async fn run(self) -> Result<()> {
        self.run_with_dialer(Arc::new(TcpDialer::default())).await
    }

    /// Run with a custom feed dialer until shutdown
    pub async fn run_with_dialer<D: Dial>(self, dialer: Arc<D>) -> Result<()> {
        let Self {
            config,
            listener,
            router,
            handle: _,
            ctx,
            shutdown,
        } = self;

        // Build every supervisor before spawning anything so a bad feed
        // aborts startup cleanly.
        let supervisors = config
            .feeds
            .iter()
            .cloned()
            .map(|feed| FeedSupervisor::from_config(feed, &config, dialer.clone(), ctx.clone()))
            .collect::<Result<Vec<_>>>()?;

        let receiver = shutdown.tx.subscribe();
        let mut tasks = JoinSet::new();
        tasks.spawn(router.run(receiver.clone()));
        for supervisor in supervisors {
            tasks.spawn(supervisor.run(receiver.clone()));
        }

        let mut stop = receiver.clone();
        while !*stop.borrow() {
            tokio::select! {
                _ = stop.changed() => {}
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!(%remote, error = %e, "Failed to set TCP_NODELAY");
                        }
                        let session = InboundSession::new(stream, Some(remote), ctx.clone());
                        let receiver = receiver.clone();
                        tasks.spawn(async move {
                            // outcome is logged by the session
                            let _ = session.run(receiver).await;
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                Some(joined) = tasks.join_next() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Task panicked");
                    }
                }
            }
        }

        info!("Shutting down");
        drop(listener);
        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(remaining = tasks.len(), "Tasks still running after grace period, aborting");
            tasks.shutdown().await;
        }
        info!("Daemon stopped");
        Ok(())
    }
}
