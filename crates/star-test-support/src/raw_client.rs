//! A raw, un-reconnecting protocol client for edge-case integration tests.
//!
//! Grounded directly on the teacher's `rt-test-utils::MockWsClient`: it
//! speaks one WebSocket connection at a time with no retry, no handler
//! dispatch, and no correlation table, so tests can assert on exact wire
//! envelopes (malformed frames, oversized frames, raw close behavior)
//! without `star-client`'s reconnect machinery getting in the way.

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::MaybeTlsStream;

use star_protocol::{codec, Envelope};

type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Debug, thiserror::Error)]
pub enum RawClientError {
    #[error("websocket error: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),
    #[error(transparent)]
    Protocol(#[from] star_protocol::ProtocolError),
    #[error("connection closed by peer")]
    Closed,
}

pub struct RawClient {
    write: futures_util::stream::SplitSink<WsStream, Message>,
    read: futures_util::stream::SplitStream<WsStream>,
}

impl RawClient {
    pub async fn connect(url: &str) -> Result<Self, RawClientError> {
        let (ws_stream, _response) = tokio_tungstenite::connect_async(url).await?;
        let (write, read) = ws_stream.split();
        Ok(Self { write, read })
    }

    /// Encode and send one envelope.
    pub async fn send(&mut self, envelope: &Envelope) -> Result<(), RawClientError> {
        let frame = codec::encode(envelope)?;
        self.write.send(Message::Text(frame.into())).await?;
        Ok(())
    }

    /// Send a raw, unparsed text frame — for tests asserting on malformed
    /// or oversized input the codec would normally reject on the way out.
    pub async fn send_raw(&mut self, text: impl Into<String>) -> Result<(), RawClientError> {
        self.write.send(Message::Text(text.into().into())).await?;
        Ok(())
    }

    /// Receive and decode the next text frame, replying to pings and
    /// skipping anything else non-textual.
    pub async fn recv(&mut self) -> Result<Envelope, RawClientError> {
        loop {
            match self.read.next().await {
                Some(Ok(Message::Text(text))) => return Ok(codec::decode_default(&text)?),
                Some(Ok(Message::Ping(data))) => {
                    self.write.send(Message::Pong(data)).await?;
                    continue;
                }
                Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) | None => return Err(RawClientError::Closed),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    pub async fn close(&mut self) -> Result<(), RawClientError> {
        self.write.send(Message::Close(None)).await?;
        Ok(())
    }
}
