//! Dialing feeds through a SOCKS4a proxy

use std::time::Duration;

use nntp_feed::{Dial, FeedConfig, ProxyConfig, TcpDialer};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

/// Accept one client, read its request, answer with `code`
///
/// Returns the destination port, user id and hostname from the request.
async fn fake_proxy(listener: TcpListener, code: u8) -> (u16, String, String) {
    let (stream, _) = listener.accept().await.unwrap();
    let mut stream = BufReader::new(stream);

    let mut head = [0u8; 8];
    stream.read_exact(&mut head).await.unwrap();
    assert_eq!(head[0], 4);
    assert_eq!(head[1], 1);
    assert_eq!(&head[4..8], &[0, 0, 0, 1]);
    let port = u16::from_be_bytes([head[2], head[3]]);

    let mut ident = Vec::new();
    stream.read_until(0, &mut ident).await.unwrap();
    ident.pop();
    let mut host = Vec::new();
    stream.read_until(0, &mut host).await.unwrap();
    host.pop();

    stream
        .get_mut()
        .write_all(&[0, code, 0, 0, 0, 0, 0, 0])
        .await
        .unwrap();
    if code == 0x5a {
        stream
            .get_mut()
            .write_all(b"200 hidden.onion ready\r\n")
            .await
            .unwrap();
    }

    (
        port,
        String::from_utf8(ident).unwrap(),
        String::from_utf8(host).unwrap(),
    )
}

fn proxied_feed(proxy_port: u16) -> FeedConfig {
    let mut feed = FeedConfig::new("hidden.onion", "abcdefghijklmnop.onion", 1119, vec![]);
    feed.proxy = Some(ProxyConfig {
        host: "127.0.0.1".to_string(),
        port: proxy_port,
        ident: "nntp".to_string(),
    });
    feed
}

#[tokio::test]
async fn test_dial_through_proxy() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let feed = proxied_feed(listener.local_addr().unwrap().port());
    let proxy = tokio::spawn(fake_proxy(listener, 0x5a));

    let dialer = TcpDialer::with_timeout(Duration::from_secs(5));
    let stream = dialer.dial(&feed).await.unwrap();

    let (port, ident, host) = proxy.await.unwrap();
    assert_eq!(port, 1119);
    assert_eq!(ident, "nntp");
    assert_eq!(host, "abcdefghijklmnop.onion");

    let mut greeting = String::new();
    BufReader::new(stream).read_line(&mut greeting).await.unwrap();
    assert_eq!(greeting, "200 hidden.onion ready\r\n");
}

#[tokio::test]
async fn test_proxy_refusal_fails_dial() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let feed = proxied_feed(listener.local_addr().unwrap().port());
    let proxy = tokio::spawn(fake_proxy(listener, 0x5b));

    let dialer = TcpDialer::with_timeout(Duration::from_secs(5));
    let result = dialer.dial(&feed).await;
    assert!(matches!(result, Err(nntp_feed::FeedError::Socks(_))));
    proxy.await.unwrap();
}
