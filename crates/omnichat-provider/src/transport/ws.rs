//! WebSocket session.

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::{cancellable, Flow};
use crate::error::{ProviderError, ProviderResult};

/// One WebSocket connection, used for a single request.
pub struct WsSession {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl std::fmt::Debug for WsSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsSession").finish_non_exhaustive()
    }
}

fn handshake_error(err: tungstenite::Error) -> ProviderError {
    match err {
        tungstenite::Error::Http(response) => {
            let status = response.status().as_u16();
            let body = response
                .body()
                .as_deref()
                .map(|b| String::from_utf8_lossy(b).to_string())
                .unwrap_or_default();
            ProviderError::api_error(status, body)
        }
        other => other.into(),
    }
}

impl WsSession {
    /// Connect and complete the handshake.
    pub async fn connect(url: &str, abort: &CancellationToken) -> ProviderResult<Self> {
        let (socket, response) = cancellable(abort, async {
            connect_async(url).await.map_err(handshake_error)
        })
        .await?;
        debug!(status = response.status().as_u16(), "WebSocket connected");
        Ok(Self { socket })
    }

    pub async fn send_text(&mut self, text: String) -> ProviderResult<()> {
        self.socket.send(Message::Text(text)).await?;
        Ok(())
    }

    /// Deliver each text frame to `on_message` until the peer closes, an
    /// error occurs, or `Flow::Stop`. A close frame counts as a clean end.
    pub async fn for_each_message<F>(
        mut self,
        abort: &CancellationToken,
        mut on_message: F,
    ) -> ProviderResult<()>
    where
        F: FnMut(&str) -> ProviderResult<Flow>,
    {
        loop {
            let next = tokio::select! {
                biased;
                _ = abort.cancelled() => {
                    let _ = self.socket.close(None).await;
                    return Err(ProviderError::Cancelled);
                }
                next = self.socket.next() => next,
            };

            let text = match next {
                None | Some(Ok(Message::Close(_))) => return Ok(()),
                Some(Err(tungstenite::Error::ConnectionClosed)) => return Ok(()),
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Binary(bytes))) => String::from_utf8_lossy(&bytes).to_string(),
                Some(Ok(_)) => continue,
            };

            trace!(frame = %text, "WebSocket frame");
            if on_message(&text)? == Flow::Stop {
                let _ = self.socket.close(None).await;
                return Ok(());
            }
        }
    }
}
