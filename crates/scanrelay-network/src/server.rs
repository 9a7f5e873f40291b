//! TCP relay server.
//!
//! One task per connection. Each task reads [`ClientFrame`]s, answers them
//! through the shared [`RelayBroker`] and writes replies and pushed events
//! from the session's outbound queue.
//!
//! ```text
//! Device agent ┐                        ┌──> registry (DashMap)
//!              ├──> RelayServer ──> RelayBroker
//! Terminal     ┘        │               └──> terminal groups
//!                       └──> ServerCodec (STX/JSON/ETX framing)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use scanrelay_network::{BrokerSettings, RelayServer};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let server = RelayServer::bind(BrokerSettings::default()).await?;
//! println!("listening on {}", server.local_addr()?);
//!
//! let cancel = CancellationToken::new();
//! server.run(cancel).await?;
//! # Ok(())
//! # }
//! ```

use futures::{SinkExt, StreamExt};
use scanrelay_protocol::{ClientFrame, ServerCodec, ServerFrame};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broker::{RelayBroker, SESSION_QUEUE_DEPTH};
use crate::config::BrokerSettings;
use crate::error::ServerError;

/// Pause after a failed `accept`, e.g. when out of file descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// How long a closing connection may spend flushing queued frames.
const FLUSH_GRACE: Duration = Duration::from_secs(1);

/// How long shutdown waits for connection tasks before aborting them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

pub struct RelayServer {
    listener: TcpListener,
    settings: BrokerSettings,
    broker: Arc<RelayBroker>,
}

impl std::fmt::Debug for RelayServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayServer")
            .field("local_addr", &self.listener.local_addr().ok())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl RelayServer {
    /// Bind the listener.
    ///
    /// # Errors
    ///
    /// `ServerError::Configuration` for invalid settings, and
    /// `ServerError::BindFailed` when the address is in use or not
    /// permitted.
    pub async fn bind(settings: BrokerSettings) -> Result<Self, ServerError> {
        Self::with_broker(settings, Arc::new(RelayBroker::new())).await
    }

    /// Bind with an existing broker.
    pub async fn with_broker(
        settings: BrokerSettings,
        broker: Arc<RelayBroker>,
    ) -> Result<Self, ServerError> {
        settings
            .validate()
            .map_err(|e| ServerError::Configuration(e.to_string()))?;

        let listener = TcpListener::bind(settings.bind_addr)
            .await
            .map_err(|source| ServerError::BindFailed {
                addr: settings.bind_addr,
                source,
            })?;

        info!(
            addr = %listener.local_addr()?,
            max_connections = settings.max_connections,
            "Relay server listening"
        );

        Ok(Self {
            listener,
            settings,
            broker,
        })
    }

    /// The bound address; useful after binding port 0.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn broker(&self) -> Arc<RelayBroker> {
        Arc::clone(&self.broker)
    }

    /// Accept and serve connections until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), ServerError> {
        let sweeper = self.broker.spawn_sweeper(
            self.settings.sweep_interval,
            self.settings.inactivity_timeout,
            cancel.child_token(),
        );
        let mut connections = JoinSet::new();

        loop {
            while let Some(finished) = connections.try_join_next() {
                if let Err(e) = finished
                    && e.is_panic()
                {
                    error!(error = %e, "Connection task panicked");
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!(error = %e, "Accept failed");
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                            continue;
                        }
                    };

                    if connections.len() >= self.settings.max_connections {
                        error!(
                            %addr,
                            max_connections = self.settings.max_connections,
                            "Connection rejected: maximum connections reached"
                        );
                        drop(stream);
                        continue;
                    }

                    if let Err(e) = stream.set_nodelay(true) {
                        warn!(%addr, error = %e, "Failed to set TCP_NODELAY");
                    }

                    connections.spawn(serve_connection(
                        stream,
                        addr,
                        Arc::clone(&self.broker),
                        cancel.child_token(),
                    ));
                }
            }
        }

        info!(open = connections.len(), "Relay server stopping");
        let drain = async { while connections.join_next().await.is_some() {} };
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            warn!("Connections did not close in time, aborting");
            connections.abort_all();
        }
        if let Err(e) = sweeper.await
            && e.is_panic()
        {
            error!(error = %e, "Registry sweeper panicked");
        }
        info!("Relay server stopped");
        Ok(())
    }
}

async fn serve_connection(
    stream: TcpStream,
    addr: SocketAddr,
    broker: Arc<RelayBroker>,
    cancel: CancellationToken,
) {
    let (outbound, mut queue) = mpsc::channel::<ServerFrame>(SESSION_QUEUE_DEPTH);
    let connection = broker.open_session(outbound.clone());
    info!(%connection, %addr, "Connection accepted");

    let (mut sink, mut frames) = Framed::new(stream, ServerCodec::new()).split();

    let mut writer = tokio::spawn(async move {
        while let Some(frame) = queue.recv().await {
            if let Err(e) = sink.send(frame).await {
                debug!(%connection, error = %e, "Write failed, closing writer");
                break;
            }
        }
    });

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            item = frames.next() => match item {
                Some(Ok(ClientFrame { id, request })) => {
                    let reply = broker.handle_request(connection, request);
                    if outbound.send(ServerFrame::reply(id, reply)).await.is_err() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    warn!(%connection, %addr, error = %e, "Protocol violation, closing connection");
                    break;
                }
                None => break,
            },
        }
    }

    broker.close_session(connection);
    drop(outbound);

    // The writer ends once every queued frame is flushed.
    if tokio::time::timeout(FLUSH_GRACE, &mut writer).await.is_err() {
        writer.abort();
    }
    info!(%connection, %addr, "Connection closed");
}
