//! Server side of a peering connection
//!
//! The peer pushes to us: after our greeting it may ask for capabilities,
//! switch to streaming, and then pipeline CHECK and TAKETHIS commands. Every
//! command gets exactly one reply, in order.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::SessionContext;
use super::accept::{self, Rejection, Verdict};
use super::io::{LineReader, LineWriter};
use super::state::{ConnectionState, Mode};
use crate::article::parse_article;
use crate::capabilities::server_capabilities;
use crate::commands::{Request, dot_stuff, reply};
use crate::response::codes;
use crate::router::Role;
use crate::validation::is_valid_message_id;
use crate::{FeedError, Result};

/// What the session loop should do after a command
enum Flow {
    Continue,
    Close,
}

/// One inbound connection
pub struct InboundSession<S> {
    reader: LineReader<ReadHalf<S>>,
    writer: LineWriter<WriteHalf<S>>,
    state: ConnectionState,
    ctx: Arc<SessionContext>,
}

impl<S> InboundSession<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(stream: S, remote: Option<SocketAddr>, ctx: Arc<SessionContext>) -> Self {
        let (read, write) = tokio::io::split(stream);
        Self {
            reader: LineReader::new(read),
            writer: LineWriter::new(write),
            state: ConnectionState::inbound(remote, ctx.inbound_policy.clone()),
            ctx,
        }
    }

    /// Serve the peer until it quits, errors, or shutdown is signalled
    ///
    /// The connection is registered with the router for its lifetime.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let id = self
            .ctx
            .router
            .register(self.state.name.clone(), Role::Inbound)
            .await?;
        info!(peer = %self.state.name, "Inbound connection");

        let result = self.serve(&mut shutdown).await;
        if let Err(e) = self.writer.shutdown().await {
            debug!(peer = %self.state.name, error = %e, "Shutdown after session failed");
        }
        if let Err(e) = self.ctx.router.deregister(id).await {
            debug!(error = %e, "Router gone before deregistration");
        }

        match &result {
            Ok(()) => info!(peer = %self.state.name, "Inbound connection closed"),
            Err(e) if e.is_disconnect() => {
                info!(peer = %self.state.name, error = %e, "Inbound connection lost")
            }
            Err(e) => warn!(peer = %self.state.name, error = %e, "Inbound connection failed"),
        }
        result
    }

    async fn serve(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        let greeting = if self.ctx.inbound_posting {
            reply(codes::READY_POSTING_ALLOWED, "posting allowed")
        } else {
            reply(codes::READY_NO_POSTING, "posting not allowed")
        };
        self.writer.send_line(&greeting).await?;

        loop {
            let line = tokio::select! {
                _ = shutdown.changed() => {
                    self.writer
                        .send_line(&reply(codes::SERVICE_UNAVAILABLE, "shutting down"))
                        .await?;
                    return Ok(());
                }
                line = self.reader.read_line() => line?,
            };

            match self.dispatch(Request::parse(&line)).await? {
                Flow::Continue => {}
                Flow::Close => return Ok(()),
            }
        }
    }

    async fn dispatch(&mut self, request: Request) -> Result<Flow> {
        match request {
            Request::Capabilities => {
                let mut out = reply(codes::CAPABILITY_LIST, "capabilities follow");
                for line in server_capabilities(true) {
                    out.push_str(&line);
                    out.push_str("\r\n");
                }
                out.push_str(".\r\n");
                self.writer.send_line(&out).await?;
            }
            Request::ModeStream => {
                self.state.mode = Mode::Stream;
                self.writer
                    .send_line(&reply(codes::STREAMING_OK, "streaming permitted"))
                    .await?;
            }
            Request::ModeReader => {
                // RFC 3977 codes, 200 or 201 depending on posting
                self.state.mode = Mode::Reader;
                let line = if self.ctx.inbound_posting {
                    reply(codes::READY_POSTING_ALLOWED, "reader mode, posting allowed")
                } else {
                    reply(codes::READY_NO_POSTING, "reader mode, posting not allowed")
                };
                self.writer.send_line(&line).await?;
            }
            Request::Check(message_id) => self.check(&message_id).await?,
            Request::Takethis(message_id) => return self.takethis(&message_id).await,
            Request::Article(message_id) => self.article(&message_id).await?,
            Request::Quit => {
                self.writer
                    .send_line(&reply(codes::CLOSING_CONNECTION, "bye"))
                    .await?;
                return Ok(Flow::Close);
            }
            Request::Syntax(verb) => {
                self.writer
                    .send_line(&reply(codes::COMMAND_SYNTAX_ERROR, &format!("bad {verb} syntax")))
                    .await?;
            }
            Request::Unknown(verb) => {
                debug!(peer = %self.state.name, %verb, "Unknown command");
                self.writer
                    .send_line(&reply(codes::COMMAND_NOT_RECOGNIZED, "unknown command"))
                    .await?;
            }
        }
        Ok(Flow::Continue)
    }

    async fn check(&mut self, message_id: &str) -> Result<()> {
        if self.state.mode != Mode::Stream {
            return self
                .writer
                .send_line(&reply(codes::ACCESS_DENIED, "not in streaming mode"))
                .await;
        }
        if !is_valid_message_id(message_id) {
            return self
                .writer
                .send_line(&reply(codes::COMMAND_SYNTAX_ERROR, "invalid message-id"))
                .await;
        }
        if !self.ctx.inbound_posting {
            return self
                .writer
                .send_line(&reply(codes::TRANSFER_REJECTED, message_id))
                .await;
        }

        match self.have(message_id).await {
            Ok(true) => {
                self.writer
                    .send_line(&reply(codes::ARTICLE_NOT_WANTED, message_id))
                    .await
            }
            Ok(false) => {
                self.writer
                    .send_line(&reply(codes::CHECK_SEND, message_id))
                    .await
            }
            Err(e) => self.backend_failure(e).await,
        }
    }

    async fn have(&self, message_id: &str) -> Result<bool> {
        if self.ctx.store.has_article(message_id).await {
            return Ok(true);
        }
        self.ctx.database.has_article(message_id).await
    }

    /// Receive a pushed article
    ///
    /// The body is always read to its terminator before replying so the
    /// stream stays framed; a read failure closes the connection with no
    /// reply.
    async fn takethis(&mut self, message_id: &str) -> Result<Flow> {
        let block = self.reader.read_block(self.ctx.max_article_bytes).await?;

        if self.state.mode != Mode::Stream {
            self.writer
                .send_line(&reply(codes::ACCESS_DENIED, "not in streaming mode"))
                .await?;
            return Ok(Flow::Continue);
        }
        if !self.ctx.inbound_posting {
            self.reject(message_id, &Rejection::PostingDisabled).await?;
            return Ok(Flow::Continue);
        }
        if block.oversized {
            self.reject(message_id, &Rejection::TooLarge).await?;
            return Ok(Flow::Continue);
        }

        let mut article = match parse_article(&block.data) {
            Ok(article) => article,
            Err(e) => {
                self.reject(message_id, &Rejection::Malformed(e.to_string()))
                    .await?;
                return Ok(Flow::Continue);
            }
        };

        let verdict = accept::decide(
            &article,
            message_id,
            &self.state,
            self.ctx.rules,
            self.ctx.store.as_ref(),
            self.ctx.database.as_ref(),
        )
        .await;

        match verdict {
            Ok(Verdict::Accept) => {}
            Ok(Verdict::Reject(reason)) => {
                self.reject(message_id, &reason).await?;
                return Ok(Flow::Continue);
            }
            Err(e) => return self.backend_failure(e).await.map(|()| Flow::Close),
        }

        match self.ctx.stage(&mut article, message_id).await {
            Ok(true) => {}
            Ok(false) => {
                self.reject(message_id, &Rejection::Duplicate).await?;
                return Ok(Flow::Continue);
            }
            Err(e) => return self.backend_failure(e).await.map(|()| Flow::Close),
        }

        self.writer
            .send_line(&reply(codes::TAKETHIS_RECEIVED, message_id))
            .await?;
        debug!(peer = %self.state.name, message_id, "Article received");
        self.ctx.router.ingest(message_id).await?;
        Ok(Flow::Continue)
    }

    async fn reject(&mut self, message_id: &str, reason: &Rejection) -> Result<()> {
        self.writer
            .send_line(&reply(
                codes::TAKETHIS_REJECTED,
                &format!("{message_id} {reason}"),
            ))
            .await
    }

    /// Reader-mode ARTICLE by message-id
    async fn article(&mut self, message_id: &str) -> Result<()> {
        if self.state.mode != Mode::Reader {
            return self
                .writer
                .send_line(&reply(codes::ACCESS_DENIED, "not in reader mode"))
                .await;
        }
        if !is_valid_message_id(message_id) || !self.ctx.store.has_article(message_id).await {
            return self
                .writer
                .send_line(&reply(codes::NO_SUCH_ARTICLE_ID, "no such article"))
                .await;
        }

        match self.ctx.store.read_article(message_id).await {
            Ok(bytes) => {
                let status = reply(codes::ARTICLE_FOLLOWS, &format!("0 {message_id}"));
                self.writer.send_with_block(&status, &dot_stuff(&bytes)).await
            }
            Err(e) => {
                warn!(message_id, error = %e, "Stored article unreadable");
                self.writer
                    .send_line(&reply(codes::NO_SUCH_ARTICLE_ID, "no such article"))
                    .await
            }
        }
    }

    /// Answer 400 and surface the error so the connection closes
    async fn backend_failure(&mut self, err: FeedError) -> Result<()> {
        tracing::error!(peer = %self.state.name, error = %err, "Backend failure, closing");
        self.writer
            .send_line(&reply(codes::SERVICE_UNAVAILABLE, "temporary backend failure"))
            .await?;
        Err(FeedError::Backend(err.to_string()))
    }
}
