//! # MQTT Session Driver
//!
//! Drives one client session through the lifecycle state machine:
//!
//! 1. **Connecting**: the first packet must be CONNECT, within the connect timeout.
//! 2. **Authenticating**: protocol level and credentials are checked, the
//!    validator is consulted under the auth timeout, and the new connection
//!    is registered. Any failure answers with a refusing CONNACK.
//! 3. **Active**: inbound publishes are authorized through the topic router
//!    and decoded onto the connection's queues; downlinks queued on the
//!    connection are published to the client's downlink subscription.
//! 4. **Closing**: the registry entry is removed (only if still ours) and the
//!    connection is closed, failing any pending `send_down`.
//!
//! Every outbound write races shutdown, connection close and the write
//! timeout, so a client that stops reading cannot pin its session.

use super::codec::{
    packet_name, ConnAck, Connect, ConnectReturnCode, MqttCodec, MqttCodecError, Packet,
    Protocol, PubAck, PubComp, PubRec, PubRel, Publish, QoS, SubAck, SubscribeReasonCode,
    UnsubAck,
};
use crate::domain::{
    BridgeConfig, CloseReason, Connection, ConnectionRegistry, DownlinkStream, GatewayError,
    Operation, SessionEvent, SessionLifecycle, TopicRouter, TransportKind,
};
use crate::ports::AuthValidator;
use futures::{SinkExt, StreamExt};
use shared_types::{
    Credentials, DownlinkMessage, GatewayDown, GatewayIdentity, GatewayStatus, Secret,
    UplinkMessage, WireMessage,
};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::time::{Duration, Instant};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

/// Everything a session needs from the service.
pub struct SessionContext {
    pub registry: Arc<ConnectionRegistry>,
    pub validator: Arc<dyn AuthValidator>,
    pub router: TopicRouter,
    pub config: BridgeConfig,
}

impl SessionContext {
    pub fn new(
        config: BridgeConfig,
        registry: Arc<ConnectionRegistry>,
        validator: Arc<dyn AuthValidator>,
    ) -> Self {
        Self {
            router: TopicRouter::new(config.topic_prefix.clone()),
            registry,
            validator,
            config,
        }
    }
}

/// Outcome of handling one inbound packet.
enum Flow {
    Continue,
    Close(CloseReason),
}

/// One MQTT client session.
pub struct MqttSession<S> {
    ctx: Arc<SessionContext>,
    framed: Framed<S, MqttCodec>,
    peer: Option<SocketAddr>,
    transport: TransportKind,
    lifecycle: SessionLifecycle,
    shutdown: watch::Receiver<bool>,
    /// QoS granted on the downlink subscription, if subscribed.
    downlink_qos: Option<QoS>,
    /// QoS 2 publishes awaiting PUBREL.
    awaiting_release: HashSet<u16>,
    next_packet_id: u16,
}

impl<S> MqttSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(
        stream: S,
        peer: Option<SocketAddr>,
        transport: TransportKind,
        ctx: Arc<SessionContext>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let codec = MqttCodec::new(ctx.config.session.max_packet_size);
        Self {
            lifecycle: SessionLifecycle::new(ctx.config.session.violation_limit),
            framed: Framed::new(stream, codec),
            peer,
            transport,
            ctx,
            shutdown,
            downlink_qos: None,
            awaiting_release: HashSet::new(),
            next_packet_id: 0,
        }
    }

    /// Run the session to completion and report why it ended.
    pub async fn run(mut self) -> CloseReason {
        let connect = match self.await_connect().await {
            Ok(connect) => connect,
            Err(reason) => return self.reject(reason),
        };
        self.lifecycle.process_event(SessionEvent::ConnectReceived);

        if !matches!(connect.protocol, Protocol::V4) {
            warn!(peer = ?self.peer, protocol = ?connect.protocol, "Unsupported protocol level");
            self.send_refusal(ConnectReturnCode::RefusedProtocolVersion).await;
            return self.reject(CloseReason::ProtocolViolation);
        }

        let (connection, downlinks) = match self.authenticate(&connect).await {
            Ok(accepted) => accepted,
            Err(e) => {
                let (code, reason) = refusal_for(&e);
                self.send_refusal(code).await;
                return self.reject(reason);
            }
        };
        self.lifecycle.process_event(SessionEvent::Authenticated);
        info!(
            gateway = %connection.gateway(),
            connection_id = %connection.id(),
            peer = ?self.peer,
            protocol = connection.protocol(),
            "Gateway connected"
        );

        let accepted = Packet::ConnAck(ConnAck::new(ConnectReturnCode::Success, false));
        let reason = match self.write(Some(&connection), accepted).await {
            Ok(()) => {
                let keep_alive = self
                    .ctx
                    .config
                    .session
                    .keep_alive_deadline(connect.keep_alive);
                self.pump(&connection, downlinks, keep_alive).await
            }
            Err(reason) => reason,
        };

        self.teardown(&connection, reason)
    }

    /// Wait for the opening CONNECT packet.
    async fn await_connect(&mut self) -> Result<Connect, CloseReason> {
        let timeout = self.ctx.config.session.connect_timeout();
        let first = tokio::select! {
            _ = shutdown_requested(&mut self.shutdown) => return Err(CloseReason::Shutdown),
            first = tokio::time::timeout(timeout, self.framed.next()) => first,
        };

        match first {
            Err(_) => {
                debug!(peer = ?self.peer, "No CONNECT within connect timeout");
                Err(CloseReason::ConnectTimeout)
            }
            Ok(None) => Err(CloseReason::ClientDisconnect),
            Ok(Some(Ok(Packet::Connect(connect)))) => Ok(connect),
            Ok(Some(Ok(packet))) => {
                warn!(peer = ?self.peer, packet = packet_name(&packet), "Expected CONNECT");
                Err(CloseReason::ProtocolViolation)
            }
            Ok(Some(Err(e))) if e.is_unsupported_protocol() => {
                warn!(peer = ?self.peer, error = %e, "Unsupported protocol");
                self.send_refusal(ConnectReturnCode::RefusedProtocolVersion).await;
                Err(CloseReason::ProtocolViolation)
            }
            Ok(Some(Err(e))) => {
                warn!(peer = ?self.peer, error = %e, "Failed to read CONNECT");
                Err(close_reason_for(&e))
            }
        }
    }

    /// Check credentials, consult the validator and register the connection.
    async fn authenticate(
        &mut self,
        connect: &Connect,
    ) -> Result<(Arc<Connection>, DownlinkStream), GatewayError> {
        let Some(login) = connect.login.as_ref() else {
            warn!(peer = ?self.peer, "CONNECT without credentials");
            return Err(GatewayError::AuthenticationFailed("missing credentials".into()));
        };
        let gateway = GatewayIdentity::new(login.username.as_str()).map_err(|e| {
            warn!(peer = ?self.peer, error = %e, "Invalid gateway identity");
            GatewayError::AuthenticationFailed(e.to_string())
        })?;
        if login.password.is_empty() {
            warn!(gateway = %gateway, peer = ?self.peer, "Missing gateway key");
            return Err(GatewayError::AuthenticationFailed("missing gateway key".into()));
        }
        let credentials = Credentials::new(gateway.clone(), Secret::new(login.password.as_str()));

        let timeout = self.ctx.config.session.auth_timeout();
        let verdict = tokio::select! {
            _ = shutdown_requested(&mut self.shutdown) => {
                return Err(GatewayError::ConnectionClosed);
            }
            verdict = tokio::time::timeout(
                timeout,
                self.ctx.validator.validate(&credentials),
            ) => verdict,
        };
        drop(credentials);

        match verdict {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) => {
                warn!(gateway = %gateway, peer = ?self.peer, "Gateway authentication rejected");
                return Err(GatewayError::AuthenticationFailed(format!(
                    "key rejected for {gateway}"
                )));
            }
            Ok(Err(e)) => {
                warn!(gateway = %gateway, error = %e, "Gateway authentication failed");
                return Err(GatewayError::Unauthorized(e.to_string()));
            }
            Err(_) => {
                warn!(gateway = %gateway, timeout = ?timeout, "Gateway authentication timed out");
                return Err(GatewayError::Unauthorized("validator timed out".into()));
            }
        }

        let (connection, downlinks) = Connection::new(
            gateway.clone(),
            self.transport,
            self.peer,
            &self.ctx.config.queues,
        );
        if let Err(e) = self.ctx.registry.register(Arc::clone(&connection)) {
            warn!(gateway = %gateway, peer = ?self.peer, error = %e, "Refusing duplicate session");
            return Err(e);
        }
        Ok((connection, downlinks))
    }

    /// Bidirectional pump of an active session.
    async fn pump(
        &mut self,
        connection: &Arc<Connection>,
        mut downlinks: DownlinkStream,
        keep_alive: Option<Duration>,
    ) -> CloseReason {
        let mut deadline = keep_alive.map(|interval| Instant::now() + interval);

        loop {
            let flow = tokio::select! {
                biased;
                _ = shutdown_requested(&mut self.shutdown) => Err(CloseReason::Shutdown),
                _ = connection.closed() => Err(CloseReason::ConnectionClosed),
                packet = self.framed.next() => match packet {
                    None => Err(CloseReason::ClientDisconnect),
                    Some(Err(e)) => {
                        warn!(gateway = %connection.gateway(), error = %e, "Failed to read packet");
                        Err(close_reason_for(&e))
                    }
                    Some(Ok(packet)) => {
                        deadline = keep_alive.map(|interval| Instant::now() + interval);
                        self.handle_packet(connection, packet).await
                    }
                },
                down = downlinks.recv() => match down {
                    Some(message) => self
                        .deliver_downlink(connection, message)
                        .await
                        .map(|()| Flow::Continue),
                    None => Err(CloseReason::ConnectionClosed),
                },
                _ = keep_alive_expired(deadline) => Err(CloseReason::KeepAliveExpired),
            };

            match flow {
                Ok(Flow::Continue) => {}
                Ok(Flow::Close(reason)) | Err(reason) => return reason,
            }
        }
    }

    async fn handle_packet(
        &mut self,
        connection: &Connection,
        packet: Packet,
    ) -> Result<Flow, CloseReason> {
        match packet {
            Packet::Publish(publish) => self.handle_publish(connection, publish).await,
            Packet::PubRel(release) => {
                self.awaiting_release.remove(&release.pkid);
                self.write(Some(connection), Packet::PubComp(PubComp::new(release.pkid)))
                    .await?;
                Ok(Flow::Continue)
            }
            Packet::PubAck(PubAck { pkid, .. }) | Packet::PubComp(PubComp { pkid, .. }) => {
                debug!(gateway = %connection.gateway(), packet_id = pkid, "Downlink acknowledged");
                Ok(Flow::Continue)
            }
            Packet::PubRec(received) => {
                self.write(Some(connection), Packet::PubRel(PubRel::new(received.pkid)))
                    .await?;
                Ok(Flow::Continue)
            }
            Packet::Subscribe(subscribe) => {
                let mut return_codes = Vec::with_capacity(subscribe.filters.len());
                let mut rejected = 0u32;
                for filter in &subscribe.filters {
                    let gateway = connection.gateway();
                    match self.ctx.router.authorize_subscribe(&filter.path, gateway) {
                        Ok(()) => {
                            let granted = cap_qos(filter.qos, self.max_downlink_qos());
                            self.downlink_qos = Some(granted);
                            debug!(
                                gateway = %gateway,
                                filter = %filter.path,
                                qos = ?granted,
                                "Downlink subscription granted"
                            );
                            return_codes.push(SubscribeReasonCode::Success(granted));
                        }
                        Err(e) => {
                            warn!(gateway = %gateway, error = %e, "Subscription rejected");
                            return_codes.push(SubscribeReasonCode::Failure);
                            rejected += 1;
                        }
                    }
                }
                let suback = SubAck::new(subscribe.pkid, return_codes);
                self.write(Some(connection), Packet::SubAck(suback)).await?;
                for _ in 0..rejected {
                    if self.lifecycle.record_violation() {
                        return Ok(Flow::Close(CloseReason::ViolationLimit));
                    }
                }
                Ok(Flow::Continue)
            }
            Packet::Unsubscribe(unsubscribe) => {
                let own = self
                    .ctx
                    .router
                    .topic_for(connection.gateway(), Operation::Downlink);
                if unsubscribe.topics.iter().any(|topic| *topic == own) {
                    self.downlink_qos = None;
                    debug!(gateway = %connection.gateway(), "Downlink subscription removed");
                }
                let unsuback = UnsubAck::new(unsubscribe.pkid);
                self.write(Some(connection), Packet::UnsubAck(unsuback)).await?;
                Ok(Flow::Continue)
            }
            Packet::PingReq => {
                self.write(Some(connection), Packet::PingResp).await?;
                Ok(Flow::Continue)
            }
            Packet::Disconnect => Ok(Flow::Close(CloseReason::ClientDisconnect)),
            other => {
                warn!(
                    gateway = %connection.gateway(),
                    packet = packet_name(&other),
                    "Unexpected packet from client"
                );
                Ok(Flow::Close(CloseReason::ProtocolViolation))
            }
        }
    }

    /// Route one inbound publish, then acknowledge it.
    async fn handle_publish(
        &mut self,
        connection: &Connection,
        publish: Publish,
    ) -> Result<Flow, CloseReason> {
        let redelivery =
            publish.qos == QoS::ExactlyOnce && self.awaiting_release.contains(&publish.pkid);

        let outcome = if redelivery {
            Ok(())
        } else {
            self.route_publish(connection, &publish)
        };

        match publish.qos {
            QoS::AtMostOnce => {}
            QoS::AtLeastOnce => {
                self.write(Some(connection), Packet::PubAck(PubAck::new(publish.pkid)))
                    .await?;
            }
            QoS::ExactlyOnce => {
                self.awaiting_release.insert(publish.pkid);
                self.write(Some(connection), Packet::PubRec(PubRec::new(publish.pkid)))
                    .await?;
            }
        }

        if let Err(e) = outcome {
            if e.is_fatal() {
                warn!(gateway = %connection.gateway(), error = %e, "Connection unusable");
                return Ok(Flow::Close(CloseReason::ConnectionClosed));
            }
            warn!(
                gateway = %connection.gateway(),
                topic = %publish.topic,
                error = %e,
                "Dropping publish"
            );
            if self.lifecycle.record_violation() {
                return Ok(Flow::Close(CloseReason::ViolationLimit));
            }
        }
        Ok(Flow::Continue)
    }

    /// Authorize and decode a publish onto the matching queue.
    ///
    /// A full queue drops the message without an error; a closed connection
    /// is reported as [`GatewayError::ConnectionClosed`].
    fn route_publish(
        &self,
        connection: &Connection,
        publish: &Publish,
    ) -> Result<(), GatewayError> {
        let operation = self
            .ctx
            .router
            .authorize_publish(&publish.topic, connection.gateway())?;
        let queued = match operation {
            Operation::Uplink => {
                let uplink = UplinkMessage::unmarshal(&publish.payload)?;
                connection.push_uplink(uplink)
            }
            Operation::Status => {
                let status = GatewayStatus::unmarshal(&publish.payload)?;
                connection.push_status(status)
            }
            Operation::Downlink => {
                return Err(GatewayError::Unauthorized(
                    "downlink topics are server-to-client only".into(),
                ));
            }
        };
        if queued {
            debug!(gateway = %connection.gateway(), operation = ?operation, "Message queued");
        } else if connection.is_closed() {
            return Err(GatewayError::ConnectionClosed);
        }
        Ok(())
    }

    /// Publish a downlink to the client's downlink topic.
    async fn deliver_downlink(
        &mut self,
        connection: &Connection,
        message: DownlinkMessage,
    ) -> Result<(), CloseReason> {
        let Some(qos) = self.downlink_qos else {
            warn!(
                gateway = %connection.gateway(),
                "Gateway not subscribed to downlink topic, dropping downlink"
            );
            return Ok(());
        };
        let payload = match GatewayDown::from(message).marshal() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(gateway = %connection.gateway(), error = %e, "Failed to encode downlink");
                return Ok(());
            }
        };

        let topic = self
            .ctx
            .router
            .topic_for(connection.gateway(), Operation::Downlink);
        let mut publish = Publish::new(topic, qos, payload);
        if qos != QoS::AtMostOnce {
            publish.pkid = self.allocate_packet_id();
        }
        self.write(Some(connection), Packet::Publish(publish)).await?;
        debug!(gateway = %connection.gateway(), "Downlink published");
        Ok(())
    }

    /// Write one packet.
    ///
    /// Gives up when shutdown is signalled, when `connection` closes, or when
    /// the peer does not take the bytes within the write timeout.
    async fn write(
        &mut self,
        connection: Option<&Connection>,
        packet: Packet,
    ) -> Result<(), CloseReason> {
        let timeout = self.ctx.config.session.write_timeout();
        let name = packet_name(&packet);
        let written = tokio::select! {
            biased;
            written = tokio::time::timeout(timeout, self.framed.send(packet)) => written,
            _ = shutdown_requested(&mut self.shutdown) => return Err(CloseReason::Shutdown),
            _ = connection_closed(connection) => return Err(CloseReason::ConnectionClosed),
        };

        match written {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!(peer = ?self.peer, packet = name, error = %e, "Failed to write packet");
                Err(CloseReason::TransportFailure)
            }
            Err(_) => {
                warn!(peer = ?self.peer, packet = name, timeout = ?timeout, "Write timed out");
                Err(CloseReason::TransportFailure)
            }
        }
    }

    /// Answer a refused CONNECT. The session ends whether or not it arrives.
    async fn send_refusal(&mut self, code: ConnectReturnCode) {
        let refusal = Packet::ConnAck(ConnAck::new(code, false));
        if let Err(reason) = self.write(None, refusal).await {
            debug!(peer = ?self.peer, code = ?code, reason = %reason, "Refusal not delivered");
        }
    }

    fn max_downlink_qos(&self) -> QoS {
        match self.ctx.config.session.downlink_qos {
            0 => QoS::AtMostOnce,
            2 => QoS::ExactlyOnce,
            _ => QoS::AtLeastOnce,
        }
    }

    fn allocate_packet_id(&mut self) -> u16 {
        self.next_packet_id = self.next_packet_id.wrapping_add(1);
        if self.next_packet_id == 0 {
            self.next_packet_id = 1;
        }
        self.next_packet_id
    }

    /// End a session that never became active.
    fn reject(&mut self, reason: CloseReason) -> CloseReason {
        self.lifecycle.process_event(SessionEvent::Terminate(reason));
        let reason = self.lifecycle.close_reason().unwrap_or(reason);
        debug!(
            peer = ?self.peer,
            reason = %reason,
            state = ?self.lifecycle.state(),
            "Session refused"
        );
        reason
    }

    fn teardown(&mut self, connection: &Connection, reason: CloseReason) -> CloseReason {
        self.lifecycle.process_event(SessionEvent::Terminate(reason));
        self.ctx.registry.remove_if_current(connection);
        connection.close();
        self.lifecycle.process_event(SessionEvent::TeardownComplete);

        let reason = self.lifecycle.close_reason().unwrap_or(reason);
        let stats = connection.stats();
        info!(
            gateway = %connection.gateway(),
            connection_id = %connection.id(),
            reason = %reason,
            uplinks = stats.uplinks_received,
            status = stats.status_received,
            downlinks = stats.downlinks_queued,
            violations = self.lifecycle.violations(),
            "Gateway disconnected"
        );
        reason
    }
}

/// CONNACK code and close reason for a refused CONNECT.
fn refusal_for(error: &GatewayError) -> (ConnectReturnCode, CloseReason) {
    match error {
        GatewayError::AlreadyConnected(_) => (
            ConnectReturnCode::BadClientId,
            CloseReason::AlreadyConnected,
        ),
        GatewayError::Unauthorized(_) => (
            ConnectReturnCode::NotAuthorized,
            CloseReason::AuthenticationFailed,
        ),
        GatewayError::ConnectionClosed => (
            ConnectReturnCode::ServiceUnavailable,
            CloseReason::Shutdown,
        ),
        _ => (
            ConnectReturnCode::BadUserNamePassword,
            CloseReason::AuthenticationFailed,
        ),
    }
}

fn cap_qos(requested: QoS, max: QoS) -> QoS {
    if requested as u8 > max as u8 {
        max
    } else {
        requested
    }
}

fn close_reason_for(error: &MqttCodecError) -> CloseReason {
    match error {
        MqttCodecError::Io(_) => CloseReason::TransportFailure,
        MqttCodecError::Protocol(_) => CloseReason::ProtocolViolation,
    }
}

/// Resolves once shutdown is signalled; never if the sender is gone.
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let signalled = shutdown.wait_for(|stop| *stop).await.is_ok();
    if !signalled {
        std::future::pending::<()>().await;
    }
}

async fn connection_closed(connection: Option<&Connection>) {
    match connection {
        Some(connection) => connection.closed().await,
        None => std::future::pending().await,
    }
}

async fn keep_alive_expired(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
