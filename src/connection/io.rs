//! Line and block I/O shared by inbound and outbound sessions

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::timeout;
use tracing::trace;

use crate::commands::parse_single_response;
use crate::response::NntpResponse;
use crate::{FeedError, Result};

/// Maximum command/response line length, terminator excluded
pub const MAX_LINE: usize = 8 * 1024;

/// Time allowed for a peer to answer a command
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(60);

/// Time allowed for a complete dot-terminated block
pub const BLOCK_TIMEOUT: Duration = Duration::from_secs(180);

const READ_BUFFER: usize = 64 * 1024;
const BLOCK_CHUNK: u64 = 64 * 1024;

/// A dot-terminated block with stuffing removed
#[derive(Debug, Default)]
pub struct Block {
    /// CRLF-terminated lines, empty when `oversized`
    pub data: Vec<u8>,
    /// The block exceeded the caller's limit and was discarded
    pub oversized: bool,
}

/// Buffered reader half of a session
///
/// [`LineReader::read_line`] keeps partial input across calls, so it can sit
/// in a `select!` next to other branches without losing bytes.
pub struct LineReader<R> {
    inner: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::with_capacity(READ_BUFFER, inner),
            buf: Vec::with_capacity(512),
        }
    }

    /// Read one line without its terminator
    pub async fn read_line(&mut self) -> Result<String> {
        let remaining = (MAX_LINE + 2).saturating_sub(self.buf.len());
        (&mut self.inner)
            .take(remaining as u64)
            .read_until(b'\n', &mut self.buf)
            .await?;

        if self.buf.last() != Some(&b'\n') {
            if self.buf.len() >= MAX_LINE + 2 {
                self.buf.clear();
                return Err(FeedError::InvalidResponse(format!(
                    "line exceeds {MAX_LINE} bytes"
                )));
            }
            return Err(FeedError::ConnectionClosed);
        }

        let line = String::from_utf8_lossy(&self.buf)
            .trim_end_matches(['\r', '\n'])
            .to_string();
        self.buf.clear();
        trace!("Received: {}", line);
        Ok(line)
    }

    /// Read a status line within [`RESPONSE_TIMEOUT`]
    pub async fn read_response(&mut self) -> Result<NntpResponse> {
        let line = timeout(RESPONSE_TIMEOUT, self.read_line())
            .await
            .map_err(|_| FeedError::Timeout)??;
        parse_single_response(&line)
    }

    /// Read a status line followed by a dot-terminated list of text lines
    pub async fn read_multiline_response(&mut self) -> Result<NntpResponse> {
        let mut response = self.read_response().await?;
        if response.is_error() {
            return Ok(response);
        }
        let block = self.read_block(MAX_LINE * 64).await?;
        if block.oversized {
            return Err(FeedError::InvalidResponse(format!(
                "{} response body too large",
                response.code
            )));
        }
        response.lines = String::from_utf8_lossy(&block.data)
            .lines()
            .map(str::to_string)
            .collect();
        Ok(response)
    }

    /// Read a dot-terminated block within [`BLOCK_TIMEOUT`]
    ///
    /// Leading dots are unstuffed and every line ends in CRLF. Input past
    /// `limit` bytes is read and dropped so the stream stays framed.
    pub async fn read_block(&mut self, limit: usize) -> Result<Block> {
        timeout(BLOCK_TIMEOUT, self.read_block_inner(limit))
            .await
            .map_err(|_| FeedError::Timeout)?
    }

    async fn read_block_inner(&mut self, limit: usize) -> Result<Block> {
        let mut block = Block::default();
        let mut at_line_start = true;

        loop {
            let n = (&mut self.inner)
                .take(BLOCK_CHUNK)
                .read_until(b'\n', &mut self.buf)
                .await?;
            if n == 0 && self.buf.is_empty() {
                return Err(FeedError::ConnectionClosed);
            }

            let complete = self.buf.last() == Some(&b'\n');
            if !complete && n == 0 {
                self.buf.clear();
                return Err(FeedError::ConnectionClosed);
            }

            let chunk = if complete {
                let body = self.buf.strip_suffix(b"\n").unwrap_or(&self.buf[..]);
                body.strip_suffix(b"\r").unwrap_or(body)
            } else {
                &self.buf[..]
            };

            if at_line_start && complete && chunk == b"." {
                self.buf.clear();
                break;
            }

            let chunk = if at_line_start && chunk.starts_with(b"..") {
                &chunk[1..]
            } else {
                chunk
            };

            if !block.oversized {
                block.data.extend_from_slice(chunk);
                if complete {
                    block.data.extend_from_slice(b"\r\n");
                }
                if block.data.len() > limit {
                    block.oversized = true;
                    block.data = Vec::new();
                }
            }

            at_line_start = complete;
            self.buf.clear();
        }

        Ok(block)
    }
}

/// Writer half of a session; owned by exactly one task
pub struct LineWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> LineWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Write a CRLF-terminated line and flush
    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        trace!("Sending: {}", line.trim_end());
        self.inner.write_all(line.as_bytes()).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Write a command line followed by an already stuffed block, then flush
    pub async fn send_with_block(&mut self, line: &str, block: &[u8]) -> Result<()> {
        trace!("Sending: {} (+{} bytes)", line.trim_end(), block.len());
        self.inner.write_all(line.as_bytes()).await?;
        self.inner.write_all(block).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Flush and close the write side
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}
