//! Client side of a peering connection
//!
//! After the handshake the session pipelines `CHECK` commands for offered
//! message-ids, answers each `238` with a `TAKETHIS`, and matches replies
//! to commands strictly in send order. A pull request temporarily switches
//! the connection to READER mode once nothing is in flight.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::SessionContext;
use super::accept::{self, Verdict};
use super::io::{LineReader, LineWriter, RESPONSE_TIMEOUT};
use super::state::{ConnectionState, Mode};
use crate::article::parse_article;
use crate::capabilities::Capabilities;
use crate::commands::{self, dot_stuff, parse_single_response};
use crate::policy::FeedPolicy;
use crate::response::{NntpResponse, codes};
use crate::router::FeedCommand;
use crate::{FeedError, Result};

/// A command awaiting its reply
#[derive(Debug, Clone, PartialEq, Eq)]
enum InFlight {
    Check(String),
    Takethis(String),
}

/// One outbound feed connection
pub struct OutboundSession<S> {
    reader: LineReader<ReadHalf<S>>,
    writer: LineWriter<WriteHalf<S>>,
    state: ConnectionState,
    capabilities: Capabilities,
    ctx: Arc<SessionContext>,
    in_flight: VecDeque<InFlight>,
    pulls: VecDeque<String>,
}

impl<S> OutboundSession<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(
        stream: S,
        name: impl Into<String>,
        policy: Arc<FeedPolicy>,
        ctx: Arc<SessionContext>,
    ) -> Self {
        let (read, write) = tokio::io::split(stream);
        Self {
            reader: LineReader::new(read),
            writer: LineWriter::new(write),
            state: ConnectionState::outbound(name, policy),
            capabilities: Capabilities::new(),
            ctx,
            in_flight: VecDeque::new(),
            pulls: VecDeque::new(),
        }
    }

    /// Feed name
    pub fn name(&self) -> &str {
        &self.state.name
    }

    /// Current session mode
    pub fn mode(&self) -> Mode {
        self.state.mode
    }

    /// Capabilities advertised by the peer
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Greeting, CAPABILITIES and MODE STREAM
    ///
    /// # Errors
    ///
    /// - [`FeedError::PostingNotPermitted`] if the greeting is not 200
    /// - [`FeedError::StreamingUnsupported`] if `STREAMING` is not advertised
    /// - [`FeedError::Protocol`] for any other unexpected reply
    pub async fn handshake(&mut self) -> Result<()> {
        let greeting = self.reader.read_response().await?;
        if greeting.code != codes::READY_POSTING_ALLOWED {
            debug!(feed = %self.state.name, code = greeting.code, "Peer does not allow posting");
            return Err(FeedError::PostingNotPermitted);
        }

        self.writer.send_line(commands::capabilities()).await?;
        let response = self.reader.read_multiline_response().await?;
        if response.code != codes::CAPABILITY_LIST {
            return Err(protocol_error(response));
        }
        self.capabilities = Capabilities::parse(&response.lines);
        if !self.capabilities.supports_streaming() {
            return Err(FeedError::StreamingUnsupported);
        }

        self.enter_stream_mode().await?;
        info!(
            feed = %self.state.name,
            reader = self.capabilities.supports_reader(),
            "Streaming handshake complete"
        );
        Ok(())
    }

    async fn enter_stream_mode(&mut self) -> Result<()> {
        self.writer.send_line(commands::mode_stream()).await?;
        let response = self.reader.read_response().await?;
        if response.code != codes::STREAMING_OK {
            return Err(protocol_error(response));
        }
        self.state.mode = Mode::Stream;
        Ok(())
    }

    /// Run the streaming loop until the peer goes away or shutdown
    ///
    /// `requeue` is where 431-deferred offers are sent back after the defer
    /// delay; normally a clone of the sender feeding `queue`.
    pub async fn stream(
        mut self,
        mut queue: mpsc::Receiver<FeedCommand>,
        requeue: mpsc::Sender<FeedCommand>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let mut queue_open = true;

        loop {
            if self.in_flight.is_empty() {
                if let Some(message_id) = self.pulls.pop_front() {
                    self.pull(&message_id).await?;
                    continue;
                }
                if !queue_open {
                    break;
                }
            }

            let accepting = queue_open
                && self.pulls.is_empty()
                && self.in_flight.len() < self.ctx.max_in_flight;
            let awaiting = !self.in_flight.is_empty();

            // always reading, so a peer that hangs up while idle is noticed
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                line = next_reply(&mut self.reader, awaiting) => {
                    self.handle_reply(&line?, &requeue).await?;
                }
                command = queue.recv(), if accepting => match command {
                    Some(FeedCommand::Offer(message_id)) => self.offer(message_id).await?,
                    Some(FeedCommand::Fetch(message_id)) => self.pulls.push_back(message_id),
                    None => queue_open = false,
                },
            }
        }

        self.writer.send_line(commands::quit()).await?;
        info!(feed = %self.state.name, "Outbound session finished");
        Ok(())
    }

    async fn offer(&mut self, message_id: String) -> Result<()> {
        if !self.ctx.store.has_article(&message_id).await {
            debug!(feed = %self.state.name, %message_id, "Offered article not in store");
            return Ok(());
        }
        self.writer.send_line(&commands::check(&message_id)).await?;
        self.in_flight.push_back(InFlight::Check(message_id));
        Ok(())
    }

    async fn handle_reply(&mut self, line: &str, requeue: &mpsc::Sender<FeedCommand>) -> Result<()> {
        let response = parse_single_response(line)?;
        let Some(command) = self.in_flight.pop_front() else {
            return Err(FeedError::InvalidResponse(format!("unsolicited reply: {line}")));
        };

        let message_id = match &command {
            InFlight::Check(id) | InFlight::Takethis(id) => id.clone(),
        };
        if response.message_id().is_some_and(|id| id != message_id) {
            warn!(
                feed = %self.state.name,
                expected = %message_id,
                got = response.message_id().unwrap_or(""),
                "Reply for a different message-id"
            );
        }

        match (command, response.code) {
            (InFlight::Check(id), codes::CHECK_SEND) => self.send_article(id).await?,
            (InFlight::Takethis(id), codes::TAKETHIS_RECEIVED) => {
                debug!(feed = %self.state.name, message_id = %id, "Article accepted by peer");
            }
            (InFlight::Takethis(id), codes::TAKETHIS_REJECTED) => {
                debug!(feed = %self.state.name, message_id = %id, reason = %response.message, "Article rejected by peer");
            }
            (
                InFlight::Check(id),
                codes::ARTICLE_NOT_WANTED | codes::CHECK_NOT_WANTED | codes::TRANSFER_REJECTED,
            ) => {
                debug!(feed = %self.state.name, message_id = %id, code = response.code, "Peer does not want article");
            }
            (_, codes::CHECK_LATER) => self.defer(message_id, requeue),
            (_, codes::SERVICE_UNAVAILABLE) => return Err(protocol_error(response)),
            (command, code) => {
                warn!(feed = %self.state.name, ?command, code, "Unexpected streaming reply");
            }
        }
        Ok(())
    }

    async fn send_article(&mut self, message_id: String) -> Result<()> {
        let bytes = match self.ctx.store.read_article(&message_id).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(feed = %self.state.name, %message_id, error = %e, "Cannot read article to send");
                return Ok(());
            }
        };
        self.writer
            .send_with_block(&commands::takethis(&message_id), &dot_stuff(&bytes))
            .await?;
        self.in_flight.push_back(InFlight::Takethis(message_id));
        Ok(())
    }

    fn defer(&self, message_id: String, requeue: &mpsc::Sender<FeedCommand>) {
        debug!(feed = %self.state.name, %message_id, delay = ?self.ctx.defer, "Peer deferred article");
        let requeue = requeue.clone();
        let delay = self.ctx.defer;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if requeue.send(FeedCommand::Offer(message_id.clone())).await.is_err() {
                debug!(%message_id, "Connection gone, deferred offer dropped");
            }
        });
    }

    /// Pull one article with MODE READER / ARTICLE, then return to streaming
    async fn pull(&mut self, message_id: &str) -> Result<()> {
        if !self.capabilities.supports_reader() {
            debug!(feed = %self.state.name, message_id, "Peer has no reader mode, skipping pull");
            return Ok(());
        }
        if self.ctx.store.has_article(message_id).await {
            return Ok(());
        }

        self.writer.send_line(commands::mode_reader()).await?;
        let response = self.reader.read_response().await?;
        if !response.is_success() {
            warn!(feed = %self.state.name, code = response.code, "Peer refused reader mode");
            return Ok(());
        }
        self.state.mode = Mode::Reader;

        self.writer.send_line(&commands::article(message_id)).await?;
        let response = self.reader.read_response().await?;
        let block = if response.code == codes::ARTICLE_FOLLOWS {
            Some(self.reader.read_block(self.ctx.max_article_bytes).await?)
        } else {
            debug!(feed = %self.state.name, message_id, code = response.code, "Peer does not have article");
            None
        };

        self.enter_stream_mode().await?;

        let Some(block) = block else {
            return Ok(());
        };
        if block.oversized {
            warn!(feed = %self.state.name, message_id, "Pulled article too large");
            return Ok(());
        }
        let mut article = match parse_article(&block.data) {
            Ok(article) => article,
            Err(e) => {
                warn!(feed = %self.state.name, message_id, error = %e, "Pulled article malformed");
                return Ok(());
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
        .await?;
        if verdict != Verdict::Accept {
            return Ok(());
        }

        if self.ctx.stage(&mut article, message_id).await? {
            info!(feed = %self.state.name, message_id, "Pulled article");
            self.ctx.router.ingest(message_id).await?;
        }
        Ok(())
    }
}

/// Next line from the peer, bounded by the reply timeout while commands are outstanding
async fn next_reply<R>(reader: &mut LineReader<R>, awaiting: bool) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    if awaiting {
        timeout(RESPONSE_TIMEOUT, reader.read_line())
            .await
            .map_err(|_| FeedError::Timeout)?
    } else {
        reader.read_line().await
    }
}

fn protocol_error(response: NntpResponse) -> FeedError {
    FeedError::Protocol {
        code: response.code,
        message: response.message,
    }
}
