//! Relay WebSocket client with fixed-backoff reconnection

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::ws::protocol::{ClientMsg, ServerMsg};

const OUTBOUND_CAPACITY: usize = 256;
const CLOSE_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay unreachable after {0} attempts")]
    Exhausted(u32),

    #[error("relay send queue closed")]
    Closed,

    #[error("relay send queue full")]
    Full,
}

/// What the relay task reports to the session
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    /// Socket open and `JOIN_SESSION` sent
    Connected { reconnect: bool },
    Message(ServerMsg),
    Disconnected,
    /// Retries exhausted, the task has ended
    Failed { attempts: u32 },
}

#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub url: String,
    pub session_id: String,
    pub username: String,
    pub backoff: Duration,
    pub max_retries: u32,
}

impl From<&SyncConfig> for RelaySettings {
    fn from(config: &SyncConfig) -> Self {
        Self {
            url: config.relay_url.clone(),
            session_id: config.session_id.clone(),
            username: config.username.clone(),
            backoff: config.relay_backoff,
            max_retries: config.relay_max_retries,
        }
    }
}

/// Owning side of the relay task
pub struct RelayClient {
    outbound: mpsc::Sender<ClientMsg>,
    task: JoinHandle<()>,
}

impl RelayClient {
    pub fn spawn(settings: RelaySettings, events: mpsc::Sender<RelayEvent>) -> Self {
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let task = tokio::spawn(run(settings, outbound_rx, events));
        Self { outbound, task }
    }

    /// Queue a message for the current connection. Never blocks the caller.
    pub fn send(&self, msg: ClientMsg) -> Result<(), RelayError> {
        self.outbound.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => RelayError::Full,
            mpsc::error::TrySendError::Closed(_) => RelayError::Closed,
        })
    }

    /// Let the task flush queued messages and close the socket, then stop it
    pub async fn close(self) {
        let Self { outbound, mut task } = self;
        drop(outbound);
        if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
            task.abort();
        }
    }
}

async fn run(
    settings: RelaySettings,
    mut outbound: mpsc::Receiver<ClientMsg>,
    events: mpsc::Sender<RelayEvent>,
) {
    let mut connected_once = false;
    let mut failures = 0u32;

    loop {
        match connect_async(settings.url.as_str()).await {
            Ok((socket, _)) => {
                failures = 0;
                // Anything queued while offline belongs to the previous connection.
                let mut stale = 0usize;
                while outbound.try_recv().is_ok() {
                    stale += 1;
                }
                if stale > 0 {
                    debug!(stale, "Discarded stale relay messages");
                }

                let reconnect = connected_once;
                connected_once = true;
                info!(url = %settings.url, reconnect, "Relay connected");

                let (mut sink, mut stream) = socket.split();
                let join = ClientMsg::JoinSession {
                    session_id: settings.session_id.clone(),
                    username: settings.username.clone(),
                    is_reconnecting: reconnect,
                };

                let joined = match serde_json::to_string(&join) {
                    Ok(text) => sink.send(Message::Text(text)).await.is_ok(),
                    Err(_) => false,
                };

                if joined {
                    if events.send(RelayEvent::Connected { reconnect }).await.is_err() {
                        return;
                    }

                    loop {
                        tokio::select! {
                            msg = outbound.recv() => {
                                let Some(msg) = msg else {
                                    let _ = sink.close().await;
                                    return;
                                };
                                let Ok(text) = serde_json::to_string(&msg) else {
                                    continue;
                                };
                                if let Err(e) = sink.send(Message::Text(text)).await {
                                    warn!(error = %e, "Relay send failed");
                                    break;
                                }
                            }
                            frame = stream.next() => match frame {
                                Some(Ok(Message::Text(text))) => {
                                    match serde_json::from_str::<ServerMsg>(&text) {
                                        Ok(msg) => {
                                            if events.send(RelayEvent::Message(msg)).await.is_err() {
                                                return;
                                            }
                                        }
                                        Err(e) => warn!(error = %e, "Dropped relay message"),
                                    }
                                }
                                Some(Ok(Message::Close(_))) | None => break,
                                Some(Ok(_)) => {}
                                Some(Err(e)) => {
                                    warn!(error = %e, "Relay read failed");
                                    break;
                                }
                            }
                        }
                    }
                }

                info!("Relay disconnected");
                if events.send(RelayEvent::Disconnected).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                warn!(url = %settings.url, error = %e, "Relay connect failed");
            }
        }

        failures += 1;
        if failures > settings.max_retries {
            warn!(error = %RelayError::Exhausted(failures), "Giving up on relay");
            let _ = events.send(RelayEvent::Failed { attempts: failures }).await;
            return;
        }
        tokio::time::sleep(settings.backoff).await;
    }
}
