//! Controller side: a small async client for the JSON-lines protocol.

use std::time::Duration;

use debugbox_protocol::{
    decode_line, encode_line, BreakNotice, Inbound, Outbound, Request, RequestEnvelope, Response, ResumeDecision,
    SessionRequest,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};

pub type ClientResult<T> = Result<T, Box<dyn std::error::Error>>;

/// One controller connection.
pub struct Client
{
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    next_id: u64,
    notices: Vec<BreakNotice>,
}

impl Client
{
    /// Connect and attach as `name`.
    pub async fn connect(address: &str, name: &str) -> ClientResult<Self>
    {
        let stream = TcpStream::connect(address).await?;
        let (reader, writer) = stream.into_split();
        let mut client = Self {
            lines: BufReader::new(reader).lines(),
            writer,
            next_id: 0,
            notices: Vec::new(),
        };
        client
            .call(Request::Session(SessionRequest::Attach {
                client: name.to_string(),
            }))
            .await?;
        debug!(address, name, "attached");
        Ok(client)
    }

    /// Send a request and wait for its reply
    ///
    /// `break_now` notices arriving in between are kept and can be taken
    /// with [`Client::take_notices`].
    pub async fn call(&mut self, request: Request) -> ClientResult<Response>
    {
        self.next_id += 1;
        let id = self.next_id;
        self.send(&Inbound::Request(RequestEnvelope { id, request })).await?;
        loop {
            match self.next_message().await? {
                Outbound::Reply(reply) if reply.id == id => return Ok(reply.response),
                Outbound::Reply(reply) => trace!(id = reply.id, "skipping stale reply"),
                Outbound::BreakNow(notice) => self.notices.push(notice),
            }
        }
    }

    /// Answer the outstanding `break_now`.
    pub async fn decide(&mut self, decision: ResumeDecision) -> ClientResult<()>
    {
        self.send(&Inbound::Decision(decision)).await
    }

    /// Notices received so far, oldest first.
    pub fn take_notices(&mut self) -> Vec<BreakNotice>
    {
        std::mem::take(&mut self.notices)
    }

    /// Wait for the next `break_now`, giving up after `limit` if set.
    pub async fn wait_for_break(&mut self, limit: Option<Duration>) -> ClientResult<Option<BreakNotice>>
    {
        if !self.notices.is_empty() {
            return Ok(Some(self.notices.remove(0)));
        }
        loop {
            let message = match limit {
                Some(limit) => match timeout(limit, self.next_message()).await {
                    Ok(message) => message?,
                    Err(_) => return Ok(None),
                },
                None => self.next_message().await?,
            };
            if let Outbound::BreakNow(notice) = message {
                return Ok(Some(notice));
            }
        }
    }

    /// Detach and close the connection.
    pub async fn close(mut self, name: &str) -> ClientResult<()>
    {
        self.call(Request::Session(SessionRequest::Detach {
            client: name.to_string(),
        }))
        .await?;
        self.writer.shutdown().await?;
        Ok(())
    }

    async fn send(&mut self, message: &Inbound) -> ClientResult<()>
    {
        let line = encode_line(message)?;
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn next_message(&mut self) -> ClientResult<Outbound>
    {
        let Some(line) = self.lines.next_line().await? else {
            return Err("debugger closed the connection".into());
        };
        Ok(decode_line(&line)?)
    }
}
