//! Outbound streaming sessions against a scripted peer

use std::sync::Arc;

use nntp_feed::connection::OutboundSession;
use nntp_feed::{ArticleStore, DaemonConfig, FeedCommand, FeedError, FeedPolicy, Rule};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::support::{Node, Peer, WAIT, post};

fn policy() -> Arc<FeedPolicy> {
    Arc::new(FeedPolicy::new(vec![Rule::new("overchan\\..*", true)]).unwrap())
}

/// Play the server side of a successful handshake
async fn accept_handshake(peer: &mut Peer, capabilities: &[&str]) {
    peer.send_line("200 b.example ready").await;
    assert_eq!(peer.line().await, "CAPABILITIES");
    peer.send_line("101 capabilities").await;
    for capability in capabilities {
        peer.send_line(capability).await;
    }
    peer.send_line(".").await;
    assert_eq!(peer.line().await, "MODE STREAM");
    peer.send_line("203 streaming").await;
}

struct Running {
    peer: Peer,
    queue: mpsc::Sender<FeedCommand>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<nntp_feed::Result<()>>,
}

impl Running {
    async fn finish(mut self) {
        self.shutdown.send_replace(true);
        assert_eq!(self.peer.line().await, "QUIT");
        tokio::time::timeout(WAIT, self.task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}

/// Spawn an outbound session for `node` and complete its handshake
async fn start(node: &Node, capabilities: &[&str]) -> Running {
    let (client, server) = tokio::io::duplex(1 << 20);
    let mut peer = Peer::new(server);
    let (queue, commands) = mpsc::channel(16);
    let (shutdown, receiver) = watch::channel(false);

    let mut session = OutboundSession::new(client, "b.example", policy(), node.ctx.clone());
    let requeue = queue.clone();
    let task = tokio::spawn(async move {
        session.handshake().await?;
        session.stream(commands, requeue, receiver).await
    });

    accept_handshake(&mut peer, capabilities).await;
    Running {
        peer,
        queue,
        shutdown,
        task,
    }
}

#[tokio::test]
async fn test_handshake_requires_streaming() {
    let node = Node::start(DaemonConfig::new("a.example")).await;
    let (client, server) = tokio::io::duplex(4096);
    let mut peer = Peer::new(server);

    let mut session = OutboundSession::new(client, "b.example", policy(), node.ctx.clone());
    let task = tokio::spawn(async move { session.handshake().await });

    peer.send_line("200 ready").await;
    assert_eq!(peer.line().await, "CAPABILITIES");
    peer.send_line("101 capabilities").await;
    peer.send_line("VERSION 2").await;
    peer.send_line(".").await;

    let result = task.await.unwrap();
    assert!(matches!(result, Err(FeedError::StreamingUnsupported)));
}

#[tokio::test]
async fn test_handshake_requires_posting() {
    let node = Node::start(DaemonConfig::new("a.example")).await;
    let (client, server) = tokio::io::duplex(4096);
    let mut peer = Peer::new(server);

    let mut session = OutboundSession::new(client, "b.example", policy(), node.ctx.clone());
    let task = tokio::spawn(async move { session.handshake().await });

    peer.send_line("201 no posting").await;
    let result = task.await.unwrap();
    assert!(matches!(result, Err(FeedError::PostingNotPermitted)));
}

#[tokio::test]
async fn test_check_then_takethis() {
    let node = Node::start(DaemonConfig::new("a.example")).await;
    let article = post("a.example", "<m1@a.example>");
    node.store.store_post(&article).await.unwrap();

    let mut running = start(&node, &["VERSION 2", "STREAMING"]).await;
    running
        .queue
        .send(FeedCommand::Offer("<m1@a.example>".to_string()))
        .await
        .unwrap();

    assert_eq!(running.peer.line().await, "CHECK <m1@a.example>");
    running.peer.send_line("238 <m1@a.example>").await;
    assert_eq!(running.peer.line().await, "TAKETHIS <m1@a.example>");
    let lines = running.peer.block().await;
    assert!(lines.contains(&"Message-ID: <m1@a.example>".to_string()));
    assert!(lines.contains(&".leading dot".to_string()));
    running.peer.send_line("239 <m1@a.example>").await;

    running.finish().await;
}

#[tokio::test]
async fn test_unknown_articles_are_not_offered() {
    let node = Node::start(DaemonConfig::new("a.example")).await;
    let stored = post("a.example", "<have@a.example>");
    node.store.store_post(&stored).await.unwrap();

    let mut running = start(&node, &["VERSION 2", "STREAMING"]).await;
    for id in ["<missing@a.example>", "<have@a.example>"] {
        running
            .queue
            .send(FeedCommand::Offer(id.to_string()))
            .await
            .unwrap();
    }

    assert_eq!(running.peer.line().await, "CHECK <have@a.example>");
    running.peer.send_line("435 <have@a.example>").await;
    running.finish().await;
}

#[tokio::test]
async fn test_deferred_offer_is_retried() {
    let mut config = DaemonConfig::new("a.example");
    config.defer_secs = 0;
    let node = Node::start(config).await;
    node.store
        .store_post(&post("a.example", "<later@a.example>"))
        .await
        .unwrap();

    let mut running = start(&node, &["VERSION 2", "STREAMING"]).await;
    running
        .queue
        .send(FeedCommand::Offer("<later@a.example>".to_string()))
        .await
        .unwrap();

    assert_eq!(running.peer.line().await, "CHECK <later@a.example>");
    running.peer.send_line("431 <later@a.example>").await;
    assert_eq!(running.peer.line().await, "CHECK <later@a.example>");
    running.peer.send_line("438 <later@a.example>").await;

    running.finish().await;
}

#[tokio::test]
async fn test_pipelined_checks_are_matched_in_order() {
    let node = Node::start(DaemonConfig::new("a.example")).await;
    let ids = ["<p1@a.example>", "<p2@a.example>", "<p3@a.example>"];
    for id in ids {
        node.store.store_post(&post("a.example", id)).await.unwrap();
    }

    let mut running = start(&node, &["VERSION 2", "STREAMING"]).await;
    for id in ids {
        running
            .queue
            .send(FeedCommand::Offer(id.to_string()))
            .await
            .unwrap();
    }
    for id in ids {
        assert_eq!(running.peer.line().await, format!("CHECK {id}"));
    }

    // only the middle one is wanted
    running.peer.send_line("438 <p1@a.example>").await;
    running.peer.send_line("238 <p2@a.example>").await;
    running.peer.send_line("438 <p3@a.example>").await;
    assert_eq!(running.peer.line().await, "TAKETHIS <p2@a.example>");
    running.peer.block().await;
    running.peer.send_line("239 <p2@a.example>").await;

    running.finish().await;
}

#[tokio::test]
async fn test_fetch_pulls_article_in_reader_mode() {
    let node = Node::start(DaemonConfig::new("a.example")).await;
    let remote = post("b.example", "<pulled@b.example>");

    let mut running = start(&node, &["VERSION 2", "READER", "STREAMING"]).await;
    running
        .queue
        .send(FeedCommand::Fetch("<pulled@b.example>".to_string()))
        .await
        .unwrap();

    assert_eq!(running.peer.line().await, "MODE READER");
    running.peer.send_line("200 reader").await;
    assert_eq!(running.peer.line().await, "ARTICLE <pulled@b.example>");
    running
        .peer
        .send_article("220 0 <pulled@b.example>", &remote)
        .await;
    assert_eq!(running.peer.line().await, "MODE STREAM");
    running.peer.send_line("203 streaming").await;

    node.wait_stored("<pulled@b.example>").await;
    let bytes = node.store.read_article("<pulled@b.example>").await.unwrap();
    let stored = nntp_feed::parse_article(&bytes).unwrap();
    assert_eq!(stored.path(), "a.example!b.example");

    running.finish().await;
}
