//! Gateway bridge service - main entry point.
//!
//! Owns the registry and the session context, runs the accept loop on an
//! already-bound listener and spawns one task per client session.

use crate::adapters::mqtt::session::{shutdown_requested, MqttSession, SessionContext};
use crate::domain::{
    BridgeConfig, CloseReason, ConnectionFeed, ConnectionRegistry, GatewayError, TransportKind,
};
use crate::ports::{AuthValidator, ConnectionDirectory};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Back-off after a failed accept.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Gateway bridge service state
pub struct GatewayBridgeService {
    ctx: Arc<SessionContext>,
    sessions: Arc<Semaphore>,
    max_sessions: usize,
    shutdown_tx: watch::Sender<bool>,
}

impl GatewayBridgeService {
    /// Create a new gateway bridge service
    pub fn new(
        config: BridgeConfig,
        validator: Arc<dyn AuthValidator>,
    ) -> Result<Self, GatewayError> {
        config.validate()?;

        let registry = Arc::new(ConnectionRegistry::new(config.duplicate_policy));
        let max_sessions = config.session.max_sessions;
        let (shutdown_tx, _) = watch::channel(false);

        info!(
            topic_prefix = %config.topic_prefix,
            duplicate_policy = ?config.duplicate_policy,
            max_sessions,
            "Gateway bridge initialized"
        );

        Ok(Self {
            ctx: Arc::new(SessionContext::new(config, registry, validator)),
            sessions: Arc::new(Semaphore::new(max_sessions)),
            max_sessions,
            shutdown_tx,
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.ctx.config
    }

    /// The live connection registry.
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.ctx.registry)
    }

    /// The registry as a driving port.
    pub fn directory(&self) -> Arc<dyn ConnectionDirectory> {
        self.registry()
    }

    /// Subscribe to connect/disconnect notifications.
    pub fn connections(&self) -> ConnectionFeed {
        self.ctx.registry.subscribe()
    }

    /// Sessions currently running, authenticated or not.
    pub fn active_sessions(&self) -> usize {
        self.max_sessions - self.sessions.available_permits()
    }

    /// Accept gateways on `listener` until shutdown.
    pub async fn start(
        &self,
        listener: TcpListener,
        transport: TransportKind,
    ) -> Result<(), GatewayError> {
        let addr = listener.local_addr()?;
        info!(addr = %addr, transport = %transport, "Gateway bridge listening");

        let mut shutdown = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                _ = shutdown_requested(&mut shutdown) => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
                        }
                        self.serve_connection(stream, Some(peer), transport);
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
            }
        }

        info!(addr = %addr, "Gateway bridge stopped accepting");
        Ok(())
    }

    /// Run a session on an already-established stream, e.g. one whose TLS
    /// was terminated elsewhere.
    ///
    /// Returns `None` and drops the stream when the session cap is reached.
    pub fn serve_connection<S>(
        &self,
        stream: S,
        peer: Option<SocketAddr>,
        transport: TransportKind,
    ) -> Option<JoinHandle<CloseReason>>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let Ok(permit) = Arc::clone(&self.sessions).try_acquire_owned() else {
            warn!(
                peer = ?peer,
                max_sessions = self.max_sessions,
                "Session limit reached, closing connection"
            );
            return None;
        };

        let session = MqttSession::new(
            stream,
            peer,
            transport,
            Arc::clone(&self.ctx),
            self.shutdown_tx.subscribe(),
        );
        Some(tokio::spawn(async move {
            let reason = session.run().await;
            drop(permit);
            reason
        }))
    }

    /// Stop accepting and close every session.
    pub fn shutdown(&self) {
        if !self.shutdown_tx.send_replace(true) {
            info!("Shutting down gateway bridge");
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Wait until every session has ended. Returns `false` on timeout.
    pub async fn wait_for_sessions(&self, timeout: Duration) -> bool {
        let all = u32::try_from(self.max_sessions).unwrap_or(u32::MAX);
        matches!(
            tokio::time::timeout(timeout, self.sessions.acquire_many(all)).await,
            Ok(Ok(_))
        )
    }
}

impl Drop for GatewayBridgeService {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}
