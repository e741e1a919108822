//! Websocket transport for flow sessions

use actix_ws::{Message, MessageStream, Session};
use async_trait::async_trait;
use flowruntime::{EventSink, MessageSource, SinkClosed};
use tokio::sync::mpsc;

/// Outbound half: text frames onto the websocket
pub struct WsSink {
    session: Session,
}

impl WsSink {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    pub async fn close(self) {
        let _ = self.session.close(None).await;
    }
}

#[async_trait]
impl EventSink for WsSink {
    async fn send_text(&mut self, text: String) -> Result<(), SinkClosed> {
        self.session
            .text(text)
            .await
            .map_err(|_| SinkClosed("websocket closed".to_string()))
    }
}

/// Inbound half: text frames relayed from the connection's reader task
pub struct ChannelSource {
    frames: mpsc::UnboundedReceiver<String>,
}

impl ChannelSource {
    pub fn new(frames: mpsc::UnboundedReceiver<String>) -> Self {
        Self { frames }
    }
}

#[async_trait]
impl MessageSource for ChannelSource {
    async fn next_text(&mut self) -> Option<String> {
        self.frames.recv().await
    }
}

/// Read the websocket on the local executor, answering pings and relaying text
///
/// The returned source yields `None` once the client closes or the stream
/// fails.
pub fn relay_frames(mut stream: MessageStream, mut session: Session) -> ChannelSource {
    let (tx, rx) = mpsc::unbounded_channel();

    actix_web::rt::spawn(async move {
        while let Some(frame) = stream.recv().await {
            match frame {
                Ok(Message::Text(text)) => {
                    if tx.send(text.to_string()).is_err() {
                        break;
                    }
                }
                Ok(Message::Ping(bytes)) => {
                    if session.pong(&bytes).await.is_err() {
                        break;
                    }
                }
                Ok(Message::Close(reason)) => {
                    tracing::debug!(?reason, "Client closed websocket");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("Websocket protocol error: {}", e);
                    break;
                }
            }
        }
    });

    ChannelSource::new(rx)
}
