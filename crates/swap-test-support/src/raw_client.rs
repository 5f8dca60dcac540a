//! A deliberately untyped WebSocket peer for exercising the relay with
//! well-formed and adversarial frames alike (malformed JSON, tampered
//! signatures, missing fields) -- things a typed [`swap_client`] handle
//! won't let a test construct.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::MaybeTlsStream;

type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const SWAP_SUBPROTOCOL: &str = "3gpp.SWAP.v1";
const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_secs(2);

pub struct RawWsClient {
    write: SplitSink<WsStream, Message>,
    read: SplitStream<WsStream>,
}

impl RawWsClient {
    /// Connects to `url`, offering the SWAP v1 subprotocol the relay
    /// requires.
    pub async fn connect(url: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let mut request = url.into_client_request()?;
        request.headers_mut().insert("Sec-WebSocket-Protocol", SWAP_SUBPROTOCOL.parse()?);
        let (stream, _response) = tokio_tungstenite::connect_async(request).await?;
        let (write, read) = stream.split();
        Ok(Self { write, read })
    }

    /// Connects without offering any subprotocol, for asserting the relay
    /// rejects the upgrade.
    pub async fn connect_without_subprotocol(url: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let (stream, _response) = tokio_tungstenite::connect_async(url).await?;
        let (write, read) = stream.split();
        Ok(Self { write, read })
    }

    pub async fn send_text(&mut self, text: impl Into<String>) -> Result<(), Box<dyn std::error::Error>> {
        self.write.send(Message::Text(text.into().into())).await?;
        Ok(())
    }

    pub async fn send_json(&mut self, value: &serde_json::Value) -> Result<(), Box<dyn std::error::Error>> {
        self.send_text(value.to_string()).await
    }

    /// Waits up to [`DEFAULT_RECV_TIMEOUT`] for the next text frame,
    /// parsed as JSON. Skips ping/pong frames.
    pub async fn recv_json(&mut self) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
        let text = self.recv_text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    pub async fn recv_text(&mut self) -> Result<String, Box<dyn std::error::Error>> {
        tokio::time::timeout(DEFAULT_RECV_TIMEOUT, async {
            loop {
                match self.read.next().await {
                    Some(Ok(Message::Text(text))) => return Ok(text.to_string()),
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => {
                        return Err("connection closed before a text frame arrived".into())
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(Box::<dyn std::error::Error>::from(e.to_string())),
                }
            }
        })
        .await?
    }

    pub async fn close(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.write.send(Message::Close(None)).await?;
        Ok(())
    }
}
