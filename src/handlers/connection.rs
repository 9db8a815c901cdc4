use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use uuid::Uuid;

use crate::error::AppError;
use crate::message::ServerEvent;

pub type WebSocketStreamType = WebSocketStream<TcpStream>;

/// Who this connection authenticated as during the handshake.
#[derive(Clone)]
pub struct Identity {
    pub user_id: Uuid,
    pub role: String,
    pub display_name: String,
}

pub struct ConnectionHandler {
    ws_sender: SplitSink<WebSocketStreamType, WsMessage>,
    tx: mpsc::UnboundedSender<ServerEvent>,
    connection_id: Uuid,
    addr: SocketAddr,
    identity: Option<Identity>,
}

impl ConnectionHandler {
    pub fn new(
        ws_sender: SplitSink<WebSocketStreamType, WsMessage>,
        tx: mpsc::UnboundedSender<ServerEvent>,
        connection_id: Uuid,
        addr: SocketAddr,
    ) -> Self {
        Self {
            ws_sender,
            tx,
            connection_id,
            addr,
            identity: None,
        }
    }

    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn tx(&self) -> &mpsc::UnboundedSender<ServerEvent> {
        &self.tx
    }

    pub fn set_identity(&mut self, identity: Identity) {
        self.identity = Some(identity);
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn ws_sender_mut(&mut self) -> &mut SplitSink<WebSocketStreamType, WsMessage> {
        &mut self.ws_sender
    }

    pub async fn send_event(&mut self, event: &ServerEvent) -> Result<(), AppError> {
        let bytes = rmp_serde::to_vec_named(event)?;
        self.ws_sender
            .send(WsMessage::Binary(bytes))
            .await
            .map_err(AppError::from)?;
        Ok(())
    }

    /// Reports an operational failure to this connection only, as a
    /// structured `error` event.
    pub async fn send_app_error(&mut self, error: &AppError) {
        error.log();
        let event = ServerEvent::Error {
            code: error.error_code().to_string(),
            message: error.user_message(),
        };
        if self.send_event(&event).await.is_err() {
            tracing::debug!("Failed to send error to disconnected client {}", self.addr);
        }
    }
}
