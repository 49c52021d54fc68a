//! # Connection
//!
//! One authenticated gateway session, independent of the transport.
//!
//! ```text
//!   session ──push_uplink──▶ [uplink queue] ──recv_uplink──▶ upstream
//!   session ──push_status──▶ [status queue] ──recv_status──▶ upstream
//!   upstream ──send_down───▶ [downlink queue] ──DownlinkStream──▶ session
//! ```
//!
//! Inbound queues are bounded and drop the newest message when full, so a
//! slow consumer never stalls the session. Closing drops the inbound senders:
//! consumers drain what is queued and then observe `None`.

use super::config::QueueConfig;
use super::errors::GatewayError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use shared_types::{DownlinkMessage, GatewayIdentity, GatewayStatus, UplinkMessage};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::sync::{mpsc, watch};
use tracing::warn;
use uuid::Uuid;

/// Transport a connection was established over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Plain MQTT over TCP
    Mqtt,
    /// MQTT over an externally terminated TLS stream
    Mqtts,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mqtt => "mqtt",
            Self::Mqtts => "mqtts",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Traffic counters of a connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub uplinks_received: u64,
    pub uplinks_dropped: u64,
    pub status_received: u64,
    pub status_dropped: u64,
    pub downlinks_queued: u64,
    pub last_uplink_at: Option<DateTime<Utc>>,
    pub last_status_at: Option<DateTime<Utc>>,
    pub last_downlink_at: Option<DateTime<Utc>>,
}

/// Receiving end of a connection's downlink queue, owned by the session.
pub struct DownlinkStream {
    rx: mpsc::Receiver<DownlinkMessage>,
}

impl DownlinkStream {
    /// Next downlink in submission order.
    pub async fn recv(&mut self) -> Option<DownlinkMessage> {
        self.rx.recv().await
    }
}

/// A live (or closed) gateway session.
pub struct Connection {
    id: Uuid,
    gateway: GatewayIdentity,
    transport: TransportKind,
    connected_at: DateTime<Utc>,
    peer: Option<SocketAddr>,
    uplink_tx: Mutex<Option<mpsc::Sender<UplinkMessage>>>,
    uplink_rx: tokio::sync::Mutex<mpsc::Receiver<UplinkMessage>>,
    status_tx: Mutex<Option<mpsc::Sender<GatewayStatus>>>,
    status_rx: tokio::sync::Mutex<mpsc::Receiver<GatewayStatus>>,
    downlink_tx: mpsc::Sender<DownlinkMessage>,
    closed_tx: watch::Sender<bool>,
    stats: Mutex<ConnectionStats>,
}

impl Connection {
    /// Create a connection and the downlink stream its session will pump.
    pub fn new(
        gateway: GatewayIdentity,
        transport: TransportKind,
        peer: Option<SocketAddr>,
        queues: &QueueConfig,
    ) -> (Arc<Self>, DownlinkStream) {
        let (uplink_tx, uplink_rx) = mpsc::channel(queues.uplink_capacity.max(1));
        let (status_tx, status_rx) = mpsc::channel(queues.status_capacity.max(1));
        let (downlink_tx, downlink_rx) = mpsc::channel(queues.downlink_capacity.max(1));
        let (closed_tx, _) = watch::channel(false);

        let connection = Arc::new(Self {
            id: Uuid::new_v4(),
            gateway,
            transport,
            connected_at: Utc::now(),
            peer,
            uplink_tx: Mutex::new(Some(uplink_tx)),
            uplink_rx: tokio::sync::Mutex::new(uplink_rx),
            status_tx: Mutex::new(Some(status_tx)),
            status_rx: tokio::sync::Mutex::new(status_rx),
            downlink_tx,
            closed_tx,
            stats: Mutex::new(ConnectionStats::default()),
        });
        (connection, DownlinkStream { rx: downlink_rx })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn gateway(&self) -> &GatewayIdentity {
        &self.gateway
    }

    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    /// Negotiated protocol name (`mqtt` or `mqtts`).
    pub fn protocol(&self) -> &'static str {
        self.transport.as_str()
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Snapshot of the traffic counters.
    pub fn stats(&self) -> ConnectionStats {
        self.stats.lock().clone()
    }

    /// Enqueue an uplink. Returns `false` if the queue is full or closed.
    pub fn push_uplink(&self, message: UplinkMessage) -> bool {
        let guard = self.uplink_tx.lock();
        let Some(tx) = guard.as_ref() else {
            return false;
        };
        match tx.try_send(message) {
            Ok(()) => {
                let mut stats = self.stats.lock();
                stats.uplinks_received += 1;
                stats.last_uplink_at = Some(Utc::now());
                true
            }
            Err(TrySendError::Full(_)) => {
                self.stats.lock().uplinks_dropped += 1;
                warn!(gateway = %self.gateway, "Uplink queue full, dropping newest uplink");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Enqueue a status report. Returns `false` if the queue is full or closed.
    pub fn push_status(&self, message: GatewayStatus) -> bool {
        let guard = self.status_tx.lock();
        let Some(tx) = guard.as_ref() else {
            return false;
        };
        match tx.try_send(message) {
            Ok(()) => {
                let mut stats = self.stats.lock();
                stats.status_received += 1;
                stats.last_status_at = Some(Utc::now());
                true
            }
            Err(TrySendError::Full(_)) => {
                self.stats.lock().status_dropped += 1;
                warn!(gateway = %self.gateway, "Status queue full, dropping newest status");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Next uplink; `None` once the connection is closed and drained.
    pub async fn recv_uplink(&self) -> Option<UplinkMessage> {
        self.uplink_rx.lock().await.recv().await
    }

    /// Next status report; `None` once the connection is closed and drained.
    pub async fn recv_status(&self) -> Option<GatewayStatus> {
        self.status_rx.lock().await.recv().await
    }

    /// Non-blocking uplink receive.
    ///
    /// Also `None` while another task is parked in
    /// [`recv_uplink`](Self::recv_uplink); that task receives the next uplink.
    pub fn try_recv_uplink(&self) -> Option<UplinkMessage> {
        let mut rx = self.uplink_rx.try_lock().ok()?;
        match rx.try_recv() {
            Ok(message) => Some(message),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Non-blocking status receive.
    ///
    /// Also `None` while another task is parked in
    /// [`recv_status`](Self::recv_status); that task receives the next report.
    pub fn try_recv_status(&self) -> Option<GatewayStatus> {
        let mut rx = self.status_rx.try_lock().ok()?;
        match rx.try_recv() {
            Ok(message) => Some(message),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Hand a downlink to the session.
    ///
    /// Resolves once the message is queued for the session pump, not once it
    /// reached the wire. Waits for queue space, unless the connection closes.
    pub async fn send_down(&self, message: DownlinkMessage) -> Result<(), GatewayError> {
        message.validate()?;
        if self.is_closed() {
            return Err(GatewayError::ConnectionClosed);
        }

        tokio::select! {
            biased;
            _ = self.closed() => Err(GatewayError::ConnectionClosed),
            sent = self.downlink_tx.send(message) => {
                sent.map_err(|_| GatewayError::ConnectionClosed)?;
                let mut stats = self.stats.lock();
                stats.downlinks_queued += 1;
                stats.last_downlink_at = Some(Utc::now());
                Ok(())
            }
        }
    }

    /// Close the connection. Returns `true` on the first call only.
    pub fn close(&self) -> bool {
        let first = self.closed_tx.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        });
        if first {
            self.uplink_tx.lock().take();
            self.status_tx.lock().take();
        }
        first
    }

    pub fn is_closed(&self) -> bool {
        *self.closed_tx.borrow()
    }

    /// Resolves once the connection is closed.
    pub async fn closed(&self) {
        let mut rx = self.closed_tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("gateway", &self.gateway)
            .field("transport", &self.transport)
            .field("connected_at", &self.connected_at)
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::TxSettings;
    use std::time::Duration;

    fn gateway(id: &str) -> GatewayIdentity {
        GatewayIdentity::new(id).unwrap()
    }

    fn small_queues() -> QueueConfig {
        QueueConfig {
            uplink_capacity: 2,
            status_capacity: 2,
            downlink_capacity: 1,
        }
    }

    fn connection() -> (Arc<Connection>, DownlinkStream) {
        Connection::new(gateway("gw"), TransportKind::Mqtt, None, &small_queues())
    }

    fn downlink(byte: u8) -> DownlinkMessage {
        DownlinkMessage::new(vec![byte], TxSettings::lora(868_100_000, 125_000, 7, "4/5"))
    }

    #[tokio::test]
    async fn test_uplinks_are_fifo() {
        let (conn, _down) = connection();
        assert!(conn.push_uplink(UplinkMessage::with_payload(vec![1])));
        assert!(conn.push_uplink(UplinkMessage::with_payload(vec![2])));

        assert_eq!(conn.recv_uplink().await.unwrap().raw_payload, vec![1]);
        assert_eq!(conn.recv_uplink().await.unwrap().raw_payload, vec![2]);
        assert_eq!(conn.stats().uplinks_received, 2);
    }

    #[tokio::test]
    async fn test_full_queue_drops_newest() {
        let (conn, _down) = connection();
        assert!(conn.push_uplink(UplinkMessage::with_payload(vec![1])));
        assert!(conn.push_uplink(UplinkMessage::with_payload(vec![2])));
        assert!(!conn.push_uplink(UplinkMessage::with_payload(vec![3])));

        assert_eq!(conn.try_recv_uplink().unwrap().raw_payload, vec![1]);
        assert_eq!(conn.try_recv_uplink().unwrap().raw_payload, vec![2]);
        assert!(conn.try_recv_uplink().is_none());
        assert_eq!(conn.stats().uplinks_dropped, 1);
    }

    #[tokio::test]
    async fn test_close_drains_then_ends_stream() {
        let (conn, _down) = connection();
        conn.push_status(GatewayStatus::default());
        assert!(conn.close());
        assert!(!conn.close());

        assert!(conn.recv_status().await.is_some());
        assert!(conn.recv_status().await.is_none());
        assert!(!conn.push_uplink(UplinkMessage::default()));
    }

    #[tokio::test]
    async fn test_close_wakes_blocked_consumer() {
        let (conn, _down) = connection();
        let consumer = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.recv_uplink().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        conn.close();

        let result = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_try_recv_yields_to_parked_consumer() {
        let (conn, _down) = connection();
        let parked = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.recv_uplink().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(conn.push_uplink(UplinkMessage::with_payload(vec![5])));
        assert_eq!(conn.try_recv_uplink(), None);

        let received = tokio::time::timeout(Duration::from_secs(1), parked)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.unwrap().raw_payload, vec![5]);
        assert_eq!(conn.try_recv_uplink(), None);
    }

    #[tokio::test]
    async fn test_send_down_validates_settings() {
        let (conn, mut down) = connection();
        let missing = DownlinkMessage {
            raw_payload: vec![0x01],
            ..Default::default()
        };
        assert!(matches!(
            conn.send_down(missing).await,
            Err(GatewayError::InvalidPayload(_))
        ));

        conn.send_down(downlink(7)).await.unwrap();
        assert_eq!(down.recv().await.unwrap().raw_payload, vec![7]);
        assert_eq!(conn.stats().downlinks_queued, 1);
    }

    #[tokio::test]
    async fn test_send_down_after_close_fails() {
        let (conn, _down) = connection();
        conn.close();
        assert_eq!(
            conn.send_down(downlink(1)).await,
            Err(GatewayError::ConnectionClosed)
        );
    }

    #[tokio::test]
    async fn test_blocked_send_down_fails_on_close() {
        let (conn, _down) = connection();
        conn.send_down(downlink(1)).await.unwrap();

        let blocked = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.send_down(downlink(2)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        conn.close();

        let result = tokio::time::timeout(Duration::from_secs(1), blocked)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, Err(GatewayError::ConnectionClosed));
    }

    #[test]
    fn test_closed_future_resolves_on_close() {
        let (conn, _down) = connection();
        let mut closed = tokio_test::task::spawn(conn.closed());
        tokio_test::assert_pending!(closed.poll());

        conn.close();
        assert!(closed.is_woken());
        tokio_test::assert_ready!(closed.poll());
    }

    #[test]
    fn test_connection_metadata() {
        let (conn, _down) =
            Connection::new(gateway("gw-meta"), TransportKind::Mqtts, None, &small_queues());
        assert_eq!(conn.gateway().as_str(), "gw-meta");
        assert_eq!(conn.protocol(), "mqtts");
        assert!(!conn.is_closed());
        assert!(format!("{:?}", conn).contains("gw-meta"));
    }
}
