//! Shared fixtures: an in-process node and a scripted peer

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use nntp_feed::article::{Article, ArticleBuilder};
use nntp_feed::commands::dot_stuff;
use nntp_feed::connection::{InboundSession, SessionContext};
use nntp_feed::{
    ArticleStore, DaemonConfig, Database, FsArticleStore, MemoryDatabase, NullFrontend, Router,
    RouterHandle,
};
use tokio::io::{
    AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf,
};
use tokio::sync::watch;
use tokio::time::timeout;

pub const WAIT: Duration = Duration::from_secs(5);

/// Router, backends and session context without a listener
pub struct Node<D = MemoryDatabase> {
    pub dir: tempfile::TempDir,
    pub store: Arc<FsArticleStore>,
    pub database: Arc<D>,
    pub router: RouterHandle,
    pub ctx: Arc<SessionContext>,
    pub shutdown: watch::Sender<bool>,
}

impl Node {
    pub async fn start(config: DaemonConfig) -> Node {
        Node::with_database(config, MemoryDatabase::new()).await
    }
}

impl<D: Database> Node<D> {
    pub async fn with_database(config: DaemonConfig, database: D) -> Node<D> {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsArticleStore::open(dir.path()).await.unwrap());
        let database = Arc::new(database);
        let (router, handle) = Router::new(
            config.instance_name.clone(),
            store.clone(),
            database.clone(),
            Box::new(NullFrontend),
        );
        let ctx = Arc::new(
            SessionContext::from_config(&config, store.clone(), database.clone(), handle.clone())
                .unwrap(),
        );
        let (shutdown, receiver) = watch::channel(false);
        tokio::spawn(router.run(receiver));

        Node {
            dir,
            store,
            database,
            router: handle,
            ctx,
            shutdown,
        }
    }

    /// Files left in the staging area
    pub fn staged(&self) -> usize {
        std::fs::read_dir(self.dir.path().join("tmp")).unwrap().count()
    }

    /// Open an inbound session and return the peer end
    pub fn connect(&self) -> Peer {
        let (client, server) = tokio::io::duplex(1 << 20);
        let session = InboundSession::new(server, None, self.ctx.clone());
        tokio::spawn(session.run(self.shutdown.subscribe()));
        Peer::new(client)
    }

    pub async fn wait_stored(&self, message_id: &str) {
        timeout(WAIT, async {
            while !self.store.has_article(message_id).await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("{message_id} was never stored"));
    }

    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }
}

/// Line-oriented far end of a duplex stream
pub struct Peer {
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
}

impl Peer {
    pub fn new(stream: DuplexStream) -> Self {
        let (read, write) = tokio::io::split(stream);
        Self {
            lines: BufReader::new(read).lines(),
            writer: write,
        }
    }

    /// Next line, panicking on timeout or EOF
    pub async fn line(&mut self) -> String {
        timeout(WAIT, self.lines.next_line())
            .await
            .expect("timed out waiting for a line")
            .unwrap()
            .expect("connection closed")
    }

    /// Next line, or `None` at EOF
    pub async fn maybe_line(&mut self) -> Option<String> {
        timeout(WAIT, self.lines.next_line())
            .await
            .expect("timed out waiting for a line")
            .ok()
            .flatten()
    }

    /// Lines up to (not including) the `.` terminator, unstuffed
    pub async fn block(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        loop {
            let line = self.line().await;
            if line == "." {
                return out;
            }
            out.push(line.strip_prefix('.').map(str::to_string).unwrap_or(line));
        }
    }

    pub async fn send(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    /// Half-close: the session sees EOF while we can still read
    pub async fn hang_up(&mut self) {
        self.writer.shutdown().await.unwrap();
    }

    pub async fn send_line(&mut self, line: &str) {
        self.send(format!("{line}\r\n").as_bytes()).await;
    }

    /// Send a command and return the single-line reply
    pub async fn command(&mut self, command: &str) -> String {
        self.send_line(command).await;
        self.line().await
    }

    /// Push `article` with TAKETHIS and return the reply
    pub async fn takethis(&mut self, article: &Article) -> String {
        let message_id = article.message_id().unwrap();
        let mut out = format!("TAKETHIS {message_id}\r\n").into_bytes();
        out.extend_from_slice(&dot_stuff(&article.to_bytes()));
        self.send(&out).await;
        self.line().await
    }

    /// Send an article block as an ARTICLE reply
    pub async fn send_article(&mut self, status: &str, article: &Article) {
        let mut out = format!("{status}\r\n").into_bytes();
        out.extend_from_slice(&dot_stuff(&article.to_bytes()));
        self.send(&out).await;
    }
}

/// Non-anonymous post from `origin` in `overchan.test`
pub fn post(origin: &str, message_id: &str) -> Article {
    ArticleBuilder::new(origin)
        .newsgroup("overchan.test")
        .message_id(message_id)
        .subject("test")
        .body("hello\r\n.leading dot\r\nbye")
        .encrypted_ip("c2VjcmV0")
        .build()
        .unwrap()
}
