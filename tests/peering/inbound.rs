//! Inbound streaming sessions (peer pushes to us)

use ed25519_dalek::SigningKey;
use nntp_feed::article::{Article, ArticleBuilder};
use nntp_feed::{ArticleStore, Database, DaemonConfig, FeedError, Result, RuleConfig};

use super::support::{Node, post};

fn config() -> DaemonConfig {
    DaemonConfig::new("a.example")
}

#[tokio::test]
async fn test_greeting_and_capabilities() {
    let node = Node::start(config()).await;
    let mut peer = node.connect();

    assert!(peer.line().await.starts_with("200 "));
    assert!(peer.command("CAPABILITIES").await.starts_with("101 "));
    let capabilities = peer.block().await;
    assert!(capabilities.contains(&"VERSION 2".to_string()));
    assert!(capabilities.contains(&"STREAMING".to_string()));
    assert!(capabilities.contains(&"READER".to_string()));

    assert!(peer.command("QUIT").await.starts_with("205 "));
    assert_eq!(peer.maybe_line().await, None);
}

#[tokio::test]
async fn test_streaming_commands_need_stream_mode() {
    let node = Node::start(config()).await;
    let mut peer = node.connect();
    peer.line().await;

    assert!(peer.command("CHECK <m1@b.example>").await.starts_with("502 "));
    assert!(peer.command("MODE STREAM").await.starts_with("203 "));
    assert_eq!(
        peer.command("CHECK <m1@b.example>").await,
        "238 <m1@b.example>"
    );
}

#[tokio::test]
async fn test_check_validates_message_id() {
    let node = Node::start(config()).await;
    let mut peer = node.connect();
    peer.line().await;
    peer.command("MODE STREAM").await;

    assert!(peer.command("CHECK <><><>").await.starts_with("501 "));
    assert!(peer.command("CHECK no-at-sign").await.starts_with("501 "));
    assert!(peer.command("CHECK").await.starts_with("501 "));
    assert!(peer.command("FROB").await.starts_with("500 "));
}

#[tokio::test]
async fn test_takethis_is_idempotent() {
    let node = Node::start(config()).await;
    let mut peer = node.connect();
    peer.line().await;
    peer.command("MODE STREAM").await;

    let article = post("b.example", "<m1@b.example>");
    assert_eq!(peer.takethis(&article).await, "239 <m1@b.example>");
    node.wait_stored("<m1@b.example>").await;

    let again = peer.takethis(&article).await;
    assert!(again.starts_with("439 <m1@b.example>"), "{again}");
    assert_eq!(
        peer.command("CHECK <m1@b.example>").await,
        "435 <m1@b.example>"
    );
    assert_eq!(node.database.article_count(), 1);
}

#[tokio::test]
async fn test_stored_article_gains_path_entry() {
    let node = Node::start(config()).await;
    let mut peer = node.connect();
    peer.line().await;
    peer.command("MODE STREAM").await;

    peer.takethis(&post("b.example", "<m2@b.example>")).await;
    node.wait_stored("<m2@b.example>").await;

    let bytes = node.store.read_article("<m2@b.example>").await.unwrap();
    let stored = nntp_feed::parse_article(&bytes).unwrap();
    assert_eq!(stored.path(), "a.example!b.example");
    assert!(stored.body_text().contains(".leading dot"));
}

#[tokio::test]
async fn test_anonymous_post_rejected() {
    let node = Node::start(config()).await;
    let mut peer = node.connect();
    peer.line().await;
    peer.command("MODE STREAM").await;

    let anonymous = ArticleBuilder::new("b.example")
        .newsgroup("overchan.test")
        .message_id("<anon@b.example>")
        .body("no address")
        .build()
        .unwrap();
    let reply = peer.takethis(&anonymous).await;
    assert!(reply.starts_with("439 <anon@b.example>"), "{reply}");
    assert!(!node.store.has_article("<anon@b.example>").await);

    // still usable afterwards
    assert_eq!(
        peer.command("CHECK <anon@b.example>").await,
        "238 <anon@b.example>"
    );
}

#[tokio::test]
async fn test_ban_and_signed_control_bypass() {
    let mut config = config();
    config.allow_anon = true;
    config.allow_anon_attachments = true;
    let node = Node::start(config).await;
    node.database.ban_enc_ip("YmFubmVk").unwrap();

    let mut peer = node.connect();
    peer.line().await;
    peer.command("MODE STREAM").await;

    let banned = ArticleBuilder::new("b.example")
        .newsgroup("overchan.test")
        .message_id("<banned@b.example>")
        .encrypted_ip("YmFubmVk")
        .build()
        .unwrap();
    let reply = peer.takethis(&banned).await;
    assert!(reply.starts_with("439 <banned@b.example>"), "{reply}");

    let control = ArticleBuilder::new("b.example")
        .newsgroup("ctl")
        .message_id("<ctl@b.example>")
        .encrypted_ip("YmFubmVk")
        .body("delete <x@b.example>")
        .sign_with(SigningKey::from_bytes(&[7u8; 32]))
        .build()
        .unwrap();
    assert_eq!(peer.takethis(&control).await, "239 <ctl@b.example>");
    node.wait_stored("<ctl@b.example>").await;
    assert!(!node.database.has_article("<banned@b.example>").await.unwrap());
}

#[tokio::test]
async fn test_oversized_article_keeps_framing() {
    let mut config = config();
    config.max_article_bytes = 256;
    let node = Node::start(config).await;
    let mut peer = node.connect();
    peer.line().await;
    peer.command("MODE STREAM").await;

    let big = ArticleBuilder::new("b.example")
        .newsgroup("overchan.test")
        .message_id("<big@b.example>")
        .encrypted_ip("c2VjcmV0")
        .body("x".repeat(100).repeat(20).as_str())
        .build()
        .unwrap();
    let reply = peer.takethis(&big).await;
    assert!(reply.starts_with("439 <big@b.example>"), "{reply}");
    assert_eq!(
        peer.command("CHECK <other@b.example>").await,
        "238 <other@b.example>"
    );
}

#[tokio::test]
async fn test_posting_disabled() {
    let mut config = config();
    config.inbound_posting = false;
    let node = Node::start(config).await;
    let mut peer = node.connect();

    assert!(peer.line().await.starts_with("201 "));
    peer.command("MODE STREAM").await;
    assert!(peer.command("CHECK <m1@b.example>").await.starts_with("437 "));
    let reply = peer.takethis(&post("b.example", "<m1@b.example>")).await;
    assert!(reply.starts_with("439 "), "{reply}");
}

#[tokio::test]
async fn test_inbound_policy_refuses_group() {
    let mut config = config();
    config.inbound_rules = Some(vec![RuleConfig {
        pattern: "ctl".to_string(),
        allow: true,
    }]);
    let node = Node::start(config).await;
    let mut peer = node.connect();
    peer.line().await;
    peer.command("MODE STREAM").await;

    let reply = peer.takethis(&post("b.example", "<m1@b.example>")).await;
    assert!(reply.starts_with("439 <m1@b.example>"), "{reply}");
}

#[tokio::test]
async fn test_reader_mode_article() {
    let node = Node::start(config()).await;
    let mut peer = node.connect();
    peer.line().await;
    peer.command("MODE STREAM").await;
    peer.takethis(&post("b.example", "<m3@b.example>")).await;
    node.wait_stored("<m3@b.example>").await;

    assert!(peer.command("ARTICLE <m3@b.example>").await.starts_with("502 "));
    assert!(peer.command("MODE READER").await.starts_with("200 "));
    assert_eq!(
        peer.command("ARTICLE <m3@b.example>").await,
        "220 0 <m3@b.example>"
    );
    let lines = peer.block().await;
    assert!(lines.contains(&"Message-ID: <m3@b.example>".to_string()));
    assert!(lines.contains(&".leading dot".to_string()));

    assert!(peer.command("ARTICLE <missing@b.example>").await.starts_with("430 "));
}

#[tokio::test]
async fn test_shutdown_closes_session() {
    let node = Node::start(config()).await;
    let mut peer = node.connect();
    peer.line().await;

    node.stop();
    assert!(peer.line().await.starts_with("400 "));
    assert_eq!(peer.maybe_line().await, None);
}

/// Index whose ban list cannot be reached
struct BanListDown;

#[async_trait::async_trait]
impl Database for BanListDown {
    async fn register_article(&self, _: &Article) -> Result<()> {
        Ok(())
    }
    async fn has_article(&self, _: &str) -> Result<bool> {
        Ok(false)
    }
    async fn check_enc_ip_banned(&self, _: &str) -> Result<bool> {
        Err(FeedError::Backend("ban list unavailable".to_string()))
    }
    async fn is_expired(&self, _: &str) -> Result<bool> {
        Ok(false)
    }
    async fn get_all_newsgroups(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
    async fn articles_in_group(&self, _: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn test_backend_failure_answers_400_and_closes() {
    let node = Node::with_database(config(), BanListDown).await;
    let mut peer = node.connect();
    peer.line().await;
    peer.command("MODE STREAM").await;

    let reply = peer.takethis(&post("b.example", "<m1@b.example>")).await;
    assert!(reply.starts_with("400 "), "{reply}");
    assert_eq!(peer.maybe_line().await, None);
    assert!(!node.store.has_article("<m1@b.example>").await);
    assert_eq!(node.staged(), 0);
}

#[tokio::test]
async fn test_truncated_takethis_is_not_acknowledged() {
    let node = Node::start(config()).await;
    let mut peer = node.connect();
    peer.line().await;
    peer.command("MODE STREAM").await;

    peer.send(
        b"TAKETHIS <cut@b.example>\r\n\
          Message-ID: <cut@b.example>\r\n\
          Newsgroups: overchan.test\r\n\
          X-Encrypted-IP: c2VjcmV0\r\n\
          \r\n\
          partial bo",
    )
    .await;
    peer.hang_up().await;

    assert_eq!(peer.maybe_line().await, None);
    assert!(!node.store.has_article("<cut@b.example>").await);
    assert!(!node.database.has_article("<cut@b.example>").await.unwrap());
    assert_eq!(node.staged(), 0);
}
