//! WebSocket dispatch client for the multiexec daemon

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use multiexec_api::{ControlMessage, DispatchRequest, RunEvent};

use crate::error::{ClientError, Result};

/// One run driven over the dispatch WebSocket
///
/// The request is sent as soon as the socket is open. Events are read by a
/// background task; [`DispatchClient::recv`] returns `None` once the server
/// closes the stream, normally right after `done`. A run cannot be resumed,
/// so a lost connection is not retried.
#[derive(Debug)]
pub struct DispatchClient {
    url: Url,
    receiver: mpsc::Receiver<RunEvent>,
    control: mpsc::UnboundedSender<ControlMessage>,
    _task_handle: tokio::task::JoinHandle<()>,
}

impl DispatchClient {
    /// Connect to the dispatch endpoint and submit `request`
    ///
    /// # Errors
    /// Returns an error if the URL is invalid, the connection cannot be
    /// established, or the request cannot be sent.
    ///
    /// # Example
    /// ```no_run
    /// use multiexec_client::DispatchClient;
    /// use multiexec_api::{DispatchRequest, RunEvent};
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let request = DispatchRequest {
    ///     host_range: "192.168.1.10-12".to_string(),
    ///     ssh_user: "deploy".to_string(),
    ///     ssh_pass: "secret".to_string(),
    ///     command: "uptime".to_string(),
    ///     ..DispatchRequest::default()
    /// };
    /// let mut client = DispatchClient::connect("ws://localhost:8080/ws", &request).await?;
    ///
    /// while let Some(event) = client.recv().await {
    ///     if let RunEvent::Output { host, data, .. } = event {
    ///         print!("[{host}] {data}");
    ///     }
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn connect(url: impl AsRef<str>, request: &DispatchRequest) -> Result<Self> {
        let url = Url::parse(url.as_ref())?;

        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| ClientError::WebSocket(e.to_string()))?;

        tracing::info!(url = %url, "WebSocket connected");

        let (mut write, read) = ws_stream.split();

        let payload = serde_json::to_string(request)?;
        write
            .send(Message::Text(payload.into()))
            .await
            .map_err(|e| ClientError::WebSocket(e.to_string()))?;

        let (tx, rx) = mpsc::channel(256);
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        let task_handle = tokio::spawn(async move {
            if let Err(e) = Self::connection_loop(write, read, tx, control_rx).await {
                tracing::warn!(error = %e, "dispatch stream ended abnormally");
            }
        });

        Ok(Self {
            url,
            receiver: rx,
            control: control_tx,
            _task_handle: task_handle,
        })
    }

    /// Endpoint this client is connected to
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Receive the next event; `None` once the stream has closed
    pub async fn recv(&mut self) -> Option<RunEvent> {
        self.receiver.recv().await
    }

    /// Ask the server to cancel the run
    ///
    /// Events keep arriving until the server's `done`.
    ///
    /// # Errors
    /// Returns an error if the connection task has already exited.
    pub fn stop(&self) -> Result<()> {
        self.control
            .send(ControlMessage::Stop)
            .map_err(|_| ClientError::ConnectionClosed("dispatch stream already closed".into()))
    }

    async fn connection_loop<W, R>(
        mut write: W,
        mut read: R,
        tx: mpsc::Sender<RunEvent>,
        mut control: mpsc::UnboundedReceiver<ControlMessage>,
    ) -> Result<()>
    where
        W: futures::Sink<Message> + Unpin,
        W::Error: std::fmt::Display,
        R: futures::Stream<Item = std::result::Result<Message, tokio_tungstenite::tungstenite::Error>>
            + Unpin,
    {
        let mut control_open = true;

        loop {
            tokio::select! {
                msg = control.recv(), if control_open => match msg {
                    Some(msg) => {
                        let payload = serde_json::to_string(&msg)?;
                        write
                            .send(Message::Text(payload.into()))
                            .await
                            .map_err(|e| ClientError::WebSocket(e.to_string()))?;
                        tracing::debug!("stop requested");
                    }
                    None => control_open = false,
                },
                msg = read.next() => {
                    let Some(msg) = msg else {
                        return Ok(());
                    };
                    match msg.map_err(|e| ClientError::WebSocket(e.to_string()))? {
                        Message::Text(text) => match serde_json::from_str::<RunEvent>(&text) {
                            Ok(event) => {
                                if tx.send(event).await.is_err() {
                                    // Receiver dropped, exit
                                    return Ok(());
                                }
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "failed to parse event");
                            }
                        },
                        Message::Close(frame) => {
                            tracing::debug!(?frame, "server closed connection");
                            return Ok(());
                        }
                        Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_) => {
                            // Ping/pong handled automatically by tungstenite
                        }
                    }
                }
            }
        }
    }
}
