//! WebSocket connection to the backend event feed

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::client::{Connector, FrameSource};
use crate::common::config::BackendConfig;
use crate::common::{Error, Result};

/// Connects to `ws://{host}/api/v1/ws`
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn from_config(config: &BackendConfig) -> Self {
        Self::new(config.ws_url())
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn url_for(&self, resume_after: Option<u64>) -> String {
        match resume_after {
            Some(seq) => {
                let sep = if self.url.contains('?') { '&' } else { '?' };
                format!("{}{}after={}", self.url, sep, seq)
            }
            None => self.url.clone(),
        }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, resume_after: Option<u64>) -> Result<Box<dyn FrameSource>> {
        let url = self.url_for(resume_after);
        tracing::debug!(%url, "Connecting to event stream");
        let (socket, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::Stream(format!("cannot connect to {url}: {e}")))?;
        Ok(Box::new(WebSocketSource { socket }))
    }
}

struct WebSocketSource {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl FrameSource for WebSocketSource {
    async fn next_frame(&mut self) -> Result<Option<String>> {
        loop {
            match self.socket.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text.to_string())),
                Some(Ok(Message::Binary(bytes))) => {
                    tracing::warn!(len = bytes.len(), "Ignoring binary event frame");
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                // pings are answered by tungstenite while reading
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(Error::Stream(e.to_string())),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.socket.close(None).await {
            tracing::debug!("Closing event stream: {}", e);
        }
    }
}
