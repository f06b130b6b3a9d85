//! SOCKS4a client handshake
//!
//! Used to reach feeds behind Tor or I2P proxies. SOCKS4a lets the proxy
//! resolve the destination hostname, which is required for onion addresses.
//!
//! Request layout:
//!
//! ```text
//! +----+----+----+----+----+----+----+----+------...-+----+------...-+----+
//! | VN | CD | DSTPORT |    DSTIP 0.0.0.x  | USERID    |NULL| HOSTNAME  |NULL|
//! +----+----+----+----+----+----+----+----+------...-+----+------...-+----+
//! ```
//!
//! The reply is 8 bytes; byte 1 is `0x5a` on success.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::{FeedError, Result};

const VERSION: u8 = 0x04;
const CONNECT: u8 = 0x01;
const GRANTED: u8 = 0x5a;
const MAX_HOST_LEN: usize = 255;

/// Encode a SOCKS4a CONNECT request for `host:port`
pub fn encode_request(host: &str, port: u16, ident: &str) -> Result<Vec<u8>> {
    if host.is_empty() || host.len() > MAX_HOST_LEN || host.contains('\0') {
        return Err(FeedError::Socks(format!("invalid destination host '{host}'")));
    }
    if ident.contains('\0') {
        return Err(FeedError::Socks("ident contains NUL".to_string()));
    }

    let mut request = Vec::with_capacity(8 + ident.len() + 1 + host.len() + 1);
    request.push(VERSION);
    request.push(CONNECT);
    request.extend_from_slice(&port.to_be_bytes());
    // 0.0.0.1: "resolve the hostname for me"
    request.extend_from_slice(&[0, 0, 0, 1]);
    request.extend_from_slice(ident.as_bytes());
    request.push(0);
    request.extend_from_slice(host.as_bytes());
    request.push(0);
    Ok(request)
}

/// Check an 8-byte SOCKS4 reply
pub fn check_reply(reply: &[u8; 8]) -> Result<()> {
    match reply[1] {
        GRANTED => Ok(()),
        0x5b => Err(FeedError::Socks("request rejected or failed".to_string())),
        0x5c => Err(FeedError::Socks("proxy cannot reach client identd".to_string())),
        0x5d => Err(FeedError::Socks("identd user id mismatch".to_string())),
        other => Err(FeedError::Socks(format!("unexpected reply code {other:#04x}"))),
    }
}

/// Run the handshake over an already connected proxy stream
pub async fn connect<S>(stream: &mut S, host: &str, port: u16, ident: &str) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = encode_request(host, port, ident)?;
    stream.write_all(&request).await?;
    stream.flush().await?;

    let mut reply = [0u8; 8];
    stream.read_exact(&mut reply).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            FeedError::Socks("proxy closed during handshake".to_string())
        } else {
            FeedError::Io(e)
        }
    })?;
    check_reply(&reply)?;
    debug!(host, port, "SOCKS4a tunnel established");
    Ok(())
}
