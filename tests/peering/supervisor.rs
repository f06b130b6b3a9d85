//! Feed supervision: retry forever, reconnect after loss, sync on connect

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use nntp_feed::{
    ArticleStore, Database, DaemonConfig, Dial, FeedConfig, FeedError, FeedPolicy,
    FeedSupervisor, ReconnectPolicy, RuleConfig,
};
use tokio::io::DuplexStream;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

use super::support::{Node, Peer, WAIT, post};

/// Dialer whose every attempt fails
#[derive(Default)]
struct Unreachable {
    attempts: AtomicUsize,
}

#[async_trait]
impl Dial for Unreachable {
    type Stream = DuplexStream;

    async fn dial(&self, _feed: &FeedConfig) -> nntp_feed::Result<DuplexStream> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(FeedError::ConnectionClosed)
    }
}

/// Dialer handing the far end of each connection to the test
struct Scripted {
    accepted: mpsc::Sender<DuplexStream>,
}

#[async_trait]
impl Dial for Scripted {
    type Stream = DuplexStream;

    async fn dial(&self, _feed: &FeedConfig) -> nntp_feed::Result<DuplexStream> {
        let (client, server) = tokio::io::duplex(1 << 20);
        self.accepted
            .send(server)
            .await
            .map_err(|_| FeedError::ConnectionClosed)?;
        Ok(client)
    }
}

fn feed(sync: bool) -> FeedConfig {
    let mut feed = FeedConfig::new(
        "b.example",
        "b.example",
        1119,
        vec![RuleConfig {
            pattern: "overchan\\..*".to_string(),
            allow: true,
        }],
    );
    feed.sync = sync;
    feed
}

fn supervisor<D: Dial>(node: &Node, feed: FeedConfig, dialer: Arc<D>) -> FeedSupervisor<D> {
    let policy = Arc::new(feed.policy().unwrap());
    FeedSupervisor::new(
        feed,
        policy,
        dialer,
        node.ctx.clone(),
        ReconnectPolicy::fixed(Duration::from_millis(10)),
        16,
    )
}

async fn handshake(peer: &mut Peer) {
    peer.send_line("200 ready").await;
    assert_eq!(peer.line().await, "CAPABILITIES");
    peer.send_line("101 capabilities").await;
    peer.send_line("VERSION 2").await;
    peer.send_line("STREAMING").await;
    peer.send_line(".").await;
    assert_eq!(peer.line().await, "MODE STREAM");
    peer.send_line("203 streaming").await;
}

#[tokio::test]
async fn test_dial_failures_are_retried_until_shutdown() {
    let node = Node::start(DaemonConfig::new("a.example")).await;
    let dialer = Arc::new(Unreachable::default());
    let (shutdown, receiver) = watch::channel(false);
    let task = tokio::spawn(supervisor(&node, feed(false), dialer.clone()).run(receiver));

    timeout(WAIT, async {
        while dialer.attempts.load(Ordering::SeqCst) < 5 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert!(!task.is_finished());

    shutdown.send_replace(true);
    timeout(WAIT, task).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_reconnects_after_peer_disconnects() {
    let node = Node::start(DaemonConfig::new("a.example")).await;
    let (tx, mut accepted) = mpsc::channel(4);
    let dialer = Arc::new(Scripted { accepted: tx });
    let (shutdown, receiver) = watch::channel(false);
    let task = tokio::spawn(supervisor(&node, feed(false), dialer).run(receiver));

    let first = timeout(WAIT, accepted.recv()).await.unwrap().unwrap();
    let mut peer = Peer::new(first);
    handshake(&mut peer).await;
    drop(peer);

    let second = timeout(WAIT, accepted.recv()).await.unwrap().unwrap();
    let mut peer = Peer::new(second);
    handshake(&mut peer).await;

    shutdown.send_replace(true);
    assert_eq!(peer.line().await, "QUIT");
    timeout(WAIT, task).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_handshake_failure_is_retried() {
    let node = Node::start(DaemonConfig::new("a.example")).await;
    let (tx, mut accepted) = mpsc::channel(4);
    let dialer = Arc::new(Scripted { accepted: tx });
    let (shutdown, receiver) = watch::channel(false);
    let task = tokio::spawn(supervisor(&node, feed(false), dialer).run(receiver));

    let first = timeout(WAIT, accepted.recv()).await.unwrap().unwrap();
    let mut peer = Peer::new(first);
    peer.send_line("502 go away").await;

    let second = timeout(WAIT, accepted.recv()).await.unwrap().unwrap();
    let mut peer = Peer::new(second);
    handshake(&mut peer).await;

    shutdown.send_replace(true);
    timeout(WAIT, task).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_sync_offers_federated_articles() {
    let node = Node::start(DaemonConfig::new("a.example")).await;
    let federated = post("a.example", "<old@a.example>");
    node.store.store_post(&federated).await.unwrap();
    node.database.register_article(&federated).await.unwrap();

    let control = nntp_feed::ArticleBuilder::new("a.example")
        .newsgroup("ctl")
        .message_id("<ctl@a.example>")
        .encrypted_ip("c2VjcmV0")
        .build()
        .unwrap();
    node.store.store_post(&control).await.unwrap();
    node.database.register_article(&control).await.unwrap();

    let (tx, mut accepted) = mpsc::channel(4);
    let dialer = Arc::new(Scripted { accepted: tx });
    let (shutdown, receiver) = watch::channel(false);
    let task = tokio::spawn(supervisor(&node, feed(true), dialer).run(receiver));

    let stream = timeout(WAIT, accepted.recv()).await.unwrap().unwrap();
    let mut peer = Peer::new(stream);
    handshake(&mut peer).await;

    // ctl is not federated to this feed
    assert_eq!(peer.line().await, "CHECK <old@a.example>");
    peer.send_line("435 <old@a.example>").await;

    shutdown.send_replace(true);
    assert_eq!(peer.line().await, "QUIT");
    timeout(WAIT, task).await.unwrap().unwrap();
}

#[test]
fn test_policy_of_feed_config() {
    let policy: FeedPolicy = feed(false).policy().unwrap();
    assert!(policy.federates("overchan.test"));
    assert!(!policy.federates("ctl"));
}
