//! [`RpcSocket`] over a WebSocket connection that reconnects on its own.

use {
    super::{RpcSocket, SocketEvent},
    crate::error::Error,
    base64::Engine as _,
    futures::{SinkExt, StreamExt},
    std::{sync::Mutex, time::Duration},
    tokio::{net::TcpStream, sync::mpsc, task::JoinHandle},
    tokio_tungstenite::{
        MaybeTlsStream,
        WebSocketStream,
        connect_async,
        tungstenite::{
            client::IntoClientRequest,
            http::{HeaderValue, header::AUTHORIZATION},
            protocol::{Message, frame::Utf8Bytes},
        },
    },
    tracing::Instrument,
    url::Url,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Clone, Debug)]
pub struct Config {
    /// Pause between a lost connection and the next attempt.
    pub reconnect_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

pub struct WebSocket {
    url: Url,
    auth: Option<String>,
    config: Config,
    connection: Mutex<Option<Connection>>,
}

struct Connection {
    task: JoinHandle<()>,
    outgoing: mpsc::UnboundedSender<String>,
}

impl WebSocket {
    pub fn new(url: Url, auth: Option<String>, config: Config) -> Self {
        Self {
            url,
            auth,
            config,
            connection: Mutex::new(None),
        }
    }
}

impl RpcSocket for WebSocket {
    fn source(&self) -> String {
        self.url.host_str().unwrap_or("unknown").to_string()
    }

    fn start(&self, events: mpsc::UnboundedSender<SocketEvent>) {
        let (outgoing, frames) = mpsc::unbounded_channel();
        let task = tokio::spawn(
            maintain(
                self.url.clone(),
                self.auth.clone(),
                self.config.reconnect_delay,
                events,
                frames,
            )
            .instrument(tracing::info_span!("websocket", url = %self.source())),
        );
        let previous = self
            .connection
            .lock()
            .unwrap()
            .replace(Connection { task, outgoing });
        if let Some(previous) = previous {
            previous.task.abort();
        }
    }

    fn stop(&self) {
        if let Some(connection) = self.connection.lock().unwrap().take() {
            connection.task.abort();
        }
    }

    fn send(&self, frame: String) -> Result<(), Error> {
        let connection = self.connection.lock().unwrap();
        let connection = connection.as_ref().ok_or(Error::NotConnected)?;
        connection
            .outgoing
            .send(frame)
            .map_err(|_| Error::TransportClosed("websocket task stopped".to_string()))
    }
}

impl Drop for WebSocket {
    fn drop(&mut self) {
        if let Ok(Some(connection)) = self.connection.get_mut().map(Option::take) {
            connection.task.abort();
        }
    }
}

async fn connect(url: &Url, auth: Option<&str>) -> Result<WsStream, String> {
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|err| err.to_string())?;
    if let Some(auth) = auth {
        let credentials = base64::engine::general_purpose::STANDARD.encode(format!(":{auth}"));
        let value = HeaderValue::from_str(&format!("Basic {credentials}"))
            .map_err(|err| err.to_string())?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }
    let (stream, _) = connect_async(request).await.map_err(|err| err.to_string())?;
    Ok(stream)
}

/// Connects, pumps frames until the connection drops and tries again after
/// the reconnect delay. Runs until aborted or the syncer goes away.
async fn maintain(
    url: Url,
    auth: Option<String>,
    reconnect_delay: Duration,
    events: mpsc::UnboundedSender<SocketEvent>,
    mut frames: mpsc::UnboundedReceiver<String>,
) {
    loop {
        if events.send(SocketEvent::Connecting).is_err() {
            break;
        }
        let reason = match connect(&url, auth.as_deref()).await {
            Ok(stream) => {
                tracing::info!("websocket connected");
                // Frames queued for a previous connection are stale.
                while frames.try_recv().is_ok() {}
                let _ = events.send(SocketEvent::Connected);
                pump(stream, &mut frames, &events).await
            }
            Err(err) => err,
        };
        tracing::warn!(%reason, ?reconnect_delay, "websocket disconnected");
        if events.send(SocketEvent::Disconnected(reason)).is_err() {
            break;
        }
        tokio::time::sleep(reconnect_delay).await;
    }
}

/// Returns the reason the connection ended.
async fn pump(
    stream: WsStream,
    frames: &mut mpsc::UnboundedReceiver<String>,
    events: &mpsc::UnboundedSender<SocketEvent>,
) -> String {
    let (mut sink, mut stream) = stream.split();
    loop {
        tokio::select! {
            frame = frames.recv() => {
                let Some(frame) = frame else {
                    return "socket stopped".to_string();
                };
                tracing::trace!(%frame, "sending frame");
                if let Err(err) = sink.send(Message::Text(Utf8Bytes::from(frame))).await {
                    return err.to_string();
                }
            }
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    tracing::trace!(frame = %text.as_str(), "received frame");
                    let _ = events.send(SocketEvent::Message(text.as_str().to_owned()));
                }
                Some(Ok(Message::Close(frame))) => {
                    return frame
                        .map(|frame| frame.reason.as_str().to_owned())
                        .filter(|reason| !reason.is_empty())
                        .unwrap_or_else(|| "closed by node".to_string());
                }
                Some(Ok(_)) => (),
                Some(Err(err)) => return err.to_string(),
                None => return "connection closed".to_string(),
            },
        }
    }
}
