//! Shared fixtures for the loopback integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use gateway_bridge::{BridgeConfig, GatewayBridgeService, StaticKeyValidator, TransportKind};
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, MqttOptions, Outgoing, Packet,
    Publish, QoS, SubAck,
};
use shared_types::{GatewayIdentity, Secret, WireMessage};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

pub const STEP_TIMEOUT: Duration = Duration::from_secs(2);

/// Topic nobody subscribes to; unsubscribing from it is a side-effect free round trip.
const SYNC_TOPIC: &str = "v3/sync/down";

/// A bridge listening on an ephemeral loopback port.
pub struct TestBridge {
    pub service: Arc<GatewayBridgeService>,
    pub addr: SocketAddr,
}

impl TestBridge {
    /// Start a bridge that knows `gateway-<i>` with key `key-<i>` for `i < gateways`.
    pub async fn start(config: BridgeConfig, gateways: usize) -> Self {
        let validator = StaticKeyValidator::from_keys((0..gateways).map(|i| {
            (
                GatewayIdentity::new(gateway_id(i)).unwrap(),
                Secret::new(gateway_key(i)),
            )
        }));
        let service = Arc::new(GatewayBridgeService::new(config, Arc::new(validator)).unwrap());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn({
            let service = Arc::clone(&service);
            async move { service.start(listener, TransportKind::Mqtt).await }
        });

        Self { service, addr }
    }

    /// Connect gateway `i` with its own key, asserting the bridge accepts it.
    pub async fn connect(&self, i: usize) -> TestGateway {
        match self.try_connect(&gateway_id(i), &gateway_key(i)).await {
            Ok(gateway) => gateway,
            Err(code) => panic!("gateway {i} refused with {code:?}"),
        }
    }

    /// Connect with explicit credentials; `Err` carries the refusing CONNACK code.
    pub async fn try_connect(
        &self,
        username: &str,
        key: &str,
    ) -> Result<TestGateway, ConnectReturnCode> {
        let mut options =
            MqttOptions::new(username, self.addr.ip().to_string(), self.addr.port());
        options.set_credentials(username, key);
        options.set_keep_alive(Duration::from_secs(30));
        let (client, mut event_loop) = AsyncClient::new(options, 64);

        let (events_tx, events) = mpsc::channel(256);
        let task = tokio::spawn(async move {
            loop {
                let event = event_loop.poll().await;
                let failed = event.is_err();
                if events_tx.send(event).await.is_err() || failed {
                    break;
                }
            }
        });
        let mut gateway = TestGateway {
            client,
            events,
            task,
        };

        loop {
            match gateway.next_event().await {
                Some(Ok(Event::Incoming(Packet::ConnAck(_)))) => return Ok(gateway),
                Some(Ok(_)) => continue,
                Some(Err(ConnectionError::ConnectionRefused(code))) => return Err(code),
                Some(Err(e)) => panic!("connect failed: {e}"),
                None => panic!("event loop ended before CONNACK"),
            }
        }
    }
}

pub fn gateway_id(i: usize) -> String {
    format!("gateway-{i}")
}

pub fn gateway_key(i: usize) -> String {
    format!("key-{i}")
}

pub fn identity(i: usize) -> GatewayIdentity {
    GatewayIdentity::new(gateway_id(i)).unwrap()
}

/// A gateway on a `rumqttc` client; the event loop runs on its own task and
/// forwards every event here.
pub struct TestGateway {
    client: AsyncClient,
    events: mpsc::Receiver<Result<Event, ConnectionError>>,
    task: JoinHandle<()>,
}

impl TestGateway {
    async fn next_event(&mut self) -> Option<Result<Event, ConnectionError>> {
        timeout(STEP_TIMEOUT, self.events.recv())
            .await
            .expect("bridge did not answer in time")
    }

    /// Next packet from the bridge, `None` once the bridge hung up.
    pub async fn recv(&mut self) -> Option<Packet> {
        loop {
            match self.next_event().await {
                Some(Ok(Event::Incoming(packet))) => return Some(packet),
                Some(Ok(Event::Outgoing(_))) => continue,
                Some(Err(_)) | None => return None,
            }
        }
    }

    /// Wait until the bridge closes the connection.
    pub async fn expect_hang_up(&mut self) {
        while let Some(packet) = self.recv().await {
            assert!(
                !matches!(packet, Packet::Publish(_)),
                "unexpected publish {packet:?}"
            );
        }
    }

    /// Publish at QoS 1 and wait for the PUBACK.
    pub async fn publish<M: WireMessage>(&mut self, topic: &str, message: &M) {
        let payload = message.marshal().unwrap();
        self.publish_raw(topic, payload).await;
    }

    pub async fn publish_raw(&mut self, topic: &str, payload: Vec<u8>) {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .unwrap();
        match self.recv().await {
            Some(Packet::PubAck(_)) => {}
            other => panic!("expected PUBACK, got {:?}", other),
        }
    }

    pub async fn subscribe(&mut self, filter: &str) -> SubAck {
        self.client.subscribe(filter, QoS::AtLeastOnce).await.unwrap();
        match self.recv().await {
            Some(Packet::SubAck(suback)) => suback,
            other => panic!("expected SUBACK, got {:?}", other),
        }
    }

    /// Next downlink publish; QoS 1 publishes are acknowledged by the client.
    pub async fn recv_publish(&mut self) -> Publish {
        match self.recv().await {
            Some(Packet::Publish(publish)) => publish,
            other => panic!("expected PUBLISH, got {:?}", other),
        }
    }

    /// Round-trip an UNSUBSCRIBE so everything sent before it has been
    /// processed, and nothing else arrived in between.
    pub async fn sync(&mut self) {
        self.client.unsubscribe(SYNC_TOPIC).await.unwrap();
        match self.recv().await {
            Some(Packet::UnsubAck(_)) => {}
            other => panic!("expected UNSUBACK, got {:?}", other),
        }
    }

    /// Send DISCONNECT and wait until it has been written.
    pub async fn disconnect(mut self) {
        self.client.disconnect().await.unwrap();
        loop {
            match self.next_event().await {
                Some(Ok(Event::Outgoing(Outgoing::Disconnect))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => continue,
            }
        }
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.task.abort();
    }
}
