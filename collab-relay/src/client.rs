//! WebSocket client for the relay, as used by an editor.
//!
//! A connected [`RelayClient`] owns two background tasks: a writer draining
//! the outgoing channel into the socket, and a reader decoding server frames
//! into [`ServerMessage`]s. [`ClientHandle`] is the cloneable sending half,
//! which is what [`spawn_autosave`] holds.

use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;

use crate::protocol::{ClientMessage, Payload, ProtocolError, ServerMessage};

/// How often an editor pushes its full content.
pub const AUTOSAVE_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Failed to connect: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("Connection closed")]
    Closed,
}

/// Sending half of a client connection.
#[derive(Clone)]
pub struct ClientHandle {
    outgoing_tx: mpsc::Sender<Message>,
    state: Arc<RwLock<ConnectionState>>,
}

impl ClientHandle {
    async fn send(&self, msg: &ClientMessage) -> Result<(), ClientError> {
        let frame = msg.encode()?;
        self.outgoing_tx
            .send(Message::Text(frame.into()))
            .await
            .map_err(|_| ClientError::Closed)
    }

    /// Ask to join `doc_id`; the server answers with `load-document`.
    pub async fn get_document(&self, doc_id: &str) -> Result<(), ClientError> {
        self.send(&ClientMessage::GetDocument(Some(doc_id.to_owned())))
            .await
    }

    pub async fn send_changes(&self, delta: &Payload) -> Result<(), ClientError> {
        self.send(&ClientMessage::SendChanges(delta.clone())).await
    }

    pub async fn save_document(&self, content: &Payload) -> Result<(), ClientError> {
        self.send(&ClientMessage::SaveDocument(content.clone()))
            .await
    }

    /// Send a close frame. The reader ends once the server acknowledges.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.outgoing_tx
            .send(Message::Close(None))
            .await
            .map_err(|_| ClientError::Closed)
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }
}

pub struct RelayClient {
    handle: ClientHandle,
    event_rx: mpsc::Receiver<ServerMessage>,
}

impl RelayClient {
    /// Connect to `request`, a `ws://` URL or a prepared handshake request.
    pub async fn connect<R>(request: R) -> Result<Self, ClientError>
    where
        R: IntoClientRequest + Unpin,
    {
        let (ws_stream, _) = tokio_tungstenite::connect_async(request).await?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<Message>(256);
        let (event_tx, event_rx) = mpsc::channel(256);
        let state = Arc::new(RwLock::new(ConnectionState::Connected));

        tokio::spawn(async move {
            while let Some(frame) = outgoing_rx.recv().await {
                let closing = matches!(frame, Message::Close(_));
                if let Err(e) = ws_writer.send(frame).await {
                    log::debug!("Client writer stopped: {e}");
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        let reader_state = state.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => match ServerMessage::decode(&text) {
                        Ok(event) => {
                            if event_tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => log::warn!("Ignoring server frame: {e}"),
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            *reader_state.write().await = ConnectionState::Disconnected;
        });

        Ok(Self {
            handle: ClientHandle { outgoing_tx, state },
            event_rx,
        })
    }

    pub fn handle(&self) -> ClientHandle {
        self.handle.clone()
    }

    pub async fn get_document(&self, doc_id: &str) -> Result<(), ClientError> {
        self.handle.get_document(doc_id).await
    }

    pub async fn send_changes(&self, delta: &Payload) -> Result<(), ClientError> {
        self.handle.send_changes(delta).await
    }

    pub async fn save_document(&self, content: &Payload) -> Result<(), ClientError> {
        self.handle.save_document(content).await
    }

    pub async fn close(&self) -> Result<(), ClientError> {
        self.handle.close().await
    }

    /// [`spawn_autosave`] at the editor's [`AUTOSAVE_INTERVAL`].
    pub fn autosave<F>(&self, snapshot: F) -> JoinHandle<()>
    where
        F: FnMut() -> Option<Payload> + Send + 'static,
    {
        spawn_autosave(self.handle(), AUTOSAVE_INTERVAL, snapshot)
    }

    /// Next frame from the server; `None` once the connection is gone.
    pub async fn next_event(&mut self) -> Option<ServerMessage> {
        self.event_rx.recv().await
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.handle.connection_state().await
    }
}

/// Periodically save whatever `snapshot` returns.
///
/// `None` skips that tick. The task ends when the connection does.
pub fn spawn_autosave<F>(handle: ClientHandle, period: Duration, mut snapshot: F) -> JoinHandle<()>
where
    F: FnMut() -> Option<Payload> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(content) = snapshot() else {
                continue;
            };
            if let Err(e) = handle.save_document(&content).await {
                log::debug!("Autosave stopped: {e}");
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detached_handle(capacity: usize) -> (ClientHandle, mpsc::Receiver<Message>) {
        let (outgoing_tx, outgoing_rx) = mpsc::channel(capacity);
        let handle = ClientHandle {
            outgoing_tx,
            state: Arc::new(RwLock::new(ConnectionState::Connected)),
        };
        (handle, outgoing_rx)
    }

    fn client_message(msg: Message) -> ClientMessage {
        match msg {
            Message::Text(t) => ClientMessage::decode(&t).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_handle_encodes_events() {
        let (handle, mut rx) = detached_handle(8);
        let delta = Payload::from_json(r#"{"ops":[{"retain":3}]}"#).unwrap();

        handle.get_document("doc-1").await.unwrap();
        handle.send_changes(&delta).await.unwrap();
        handle.save_document(&delta).await.unwrap();

        assert_eq!(
            client_message(rx.recv().await.unwrap()),
            ClientMessage::GetDocument(Some("doc-1".into()))
        );
        assert_eq!(
            client_message(rx.recv().await.unwrap()),
            ClientMessage::SendChanges(delta.clone())
        );
        assert_eq!(
            client_message(rx.recv().await.unwrap()),
            ClientMessage::SaveDocument(delta)
        );
    }

    #[tokio::test]
    async fn test_send_after_writer_gone() {
        let (handle, rx) = detached_handle(1);
        drop(rx);
        assert!(matches!(
            handle.get_document("doc").await,
            Err(ClientError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let result = RelayClient::connect(format!("ws://127.0.0.1:{port}")).await;
        assert!(matches!(result, Err(ClientError::Connect(_))));
    }

    #[tokio::test]
    async fn test_server_close_marks_disconnected() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.close(None).await.unwrap();
        });

        let mut client = RelayClient::connect(format!("ws://{addr}")).await.unwrap();
        let end = tokio::time::timeout(Duration::from_secs(2), client.next_event())
            .await
            .unwrap();
        assert!(end.is_none());
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_autosave_skips_empty_ticks() {
        let (handle, mut rx) = detached_handle(8);
        let mut tick = 0;
        let task = spawn_autosave(handle, Duration::from_millis(10), move || {
            tick += 1;
            (tick % 2 == 0).then(|| Payload::from_json(tick.to_string()).unwrap())
        });

        for expected in ["2", "4", "6"] {
            let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            match client_message(frame) {
                ClientMessage::SaveDocument(content) => assert_eq!(content.as_str(), expected),
                other => panic!("unexpected {other:?}"),
            }
        }

        drop(rx);
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }
}
