//! MQTT sink: one message per (device, field) pair.

use std::{future::Future, time::Duration};

use anyhow::{Context as _, Result, anyhow, bail};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{sleep, timeout},
};
use tracing::{debug, info, warn};

use crate::{config::MqttSettings, midea::Record, sink::Sink};

pub const MQTT_TIMEOUT: Duration = Duration::from_secs(3);

const KEEP_ALIVE: Duration = Duration::from_secs(30);

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

const DISCONNECT_TIMEOUT: Duration = Duration::from_millis(250);

/// Something that can publish a text payload to a topic and wait until it has
/// been handed to the broker.
pub trait Publisher {
    fn publish(&mut self, topic: &str, payload: String) -> impl Future<Output = Result<()>>;
}

/// A `(topic, payload)` pair for every field of every record, in record order.
pub fn messages(base_topic: &str, records: &[Record]) -> Vec<(String, String)> {
    records
        .iter()
        .flat_map(|record| {
            let device_id = record.topic_id();
            record.fields.iter().map(move |(key, value)| {
                (format!("{base_topic}/{device_id}/{key}"), value.to_string())
            })
        })
        .collect()
}

#[derive(Debug)]
pub struct BrokerSink<P> {
    publisher: P,
    base_topic: String,
}

impl<P: Publisher> BrokerSink<P> {
    pub fn new(publisher: P, base_topic: &str) -> Self {
        Self {
            publisher,
            base_topic: base_topic.to_string(),
        }
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    pub fn into_publisher(self) -> P {
        self.publisher
    }

    /// Publishes every message, stopping at the first failure.
    pub async fn publish_records(&mut self, records: &[Record]) -> Result<usize> {
        let messages = messages(&self.base_topic, records);
        let count = messages.len();
        for (topic, payload) in messages {
            debug!("Publishing to MQTT topic {topic}: {payload}");
            self.publisher
                .publish(&topic, payload)
                .await
                .with_context(|| format!("failed to publish to topic {topic}"))?;
        }
        Ok(count)
    }
}

impl<P: Publisher> Sink for BrokerSink<P> {
    fn name(&self) -> &'static str {
        "MQTT"
    }

    async fn deliver(&mut self, records: &[Record]) -> Result<()> {
        let count = self.publish_records(records).await?;
        info!(
            "Published {count} values for {} devices to MQTT",
            records.len()
        );
        Ok(())
    }
}

/// A connected broker session.
///
/// The rumqttc event loop runs on its own task so keep-alive pings go out
/// while the rest of the run is busy. Each publish takes a ticket and returns
/// once the event loop has written that many publishes to the broker.
pub struct MqttPublisher {
    client: AsyncClient,
    state: watch::Receiver<LoopState>,
    event_loop: JoinHandle<()>,
    queued: u64,
    timeout: Duration,
}

#[derive(Debug, Clone, Default)]
struct LoopState {
    connected: bool,
    disconnected: bool,
    /// Publishes written to the broker so far.
    sent: u64,
    failures: u64,
    last_error: Option<String>,
}

impl LoopState {
    fn settled(&self, ticket: u64, failures_before: u64) -> bool {
        self.sent >= ticket || self.failures > failures_before
    }
}

impl std::fmt::Debug for MqttPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttPublisher")
            .field("queued", &self.queued)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl MqttPublisher {
    pub async fn connect(settings: &MqttSettings, client_id: String) -> Result<Self> {
        Self::connect_with_keep_alive(settings, client_id, KEEP_ALIVE).await
    }

    pub async fn connect_with_keep_alive(
        settings: &MqttSettings,
        client_id: String,
        keep_alive: Duration,
    ) -> Result<Self> {
        let broker = format!("{}:{}", settings.host, settings.port);

        let mut opts = MqttOptions::new(client_id, settings.host.clone(), settings.port);
        opts.set_keep_alive(keep_alive);
        if let Some(username) = &settings.username {
            opts.set_credentials(username, settings.password.clone().unwrap_or_default());
        }

        let (client, event_loop) = AsyncClient::new(opts, 10);
        let (tx, mut state) = watch::channel(LoopState::default());
        let event_loop = spawn_event_loop(event_loop, broker.clone(), tx);

        let outcome = timeout(
            MQTT_TIMEOUT,
            state.wait_for(|s| s.connected || s.failures > 0),
        )
        .await
        .map(|r| r.map(|s| (s.connected, s.last_error.clone())));
        let result = match outcome {
            Ok(Ok((true, _))) => Ok(()),
            Ok(Ok((false, err))) => Err(anyhow!(err.unwrap_or_default())),
            Ok(Err(_)) => Err(anyhow!("MQTT event loop stopped")),
            Err(_) => Err(anyhow!("timed out")),
        };
        if let Err(err) = result {
            event_loop.abort();
            return Err(err.context(format!("failed to connect to {broker}")));
        }

        Ok(Self {
            client,
            state,
            event_loop,
            queued: 0,
            timeout: MQTT_TIMEOUT,
        })
    }

    pub async fn disconnect(mut self) {
        if let Err(err) = self.client.disconnect().await {
            debug!("failed to request MQTT disconnect: {err}");
            return;
        }
        let flushed = timeout(
            DISCONNECT_TIMEOUT,
            self.state.wait_for(|s| s.disconnected || s.failures > 0),
        )
        .await;
        if flushed.is_err() {
            debug!("timed out disconnecting from MQTT broker");
        }
    }
}

impl Drop for MqttPublisher {
    fn drop(&mut self) {
        self.event_loop.abort();
    }
}

impl Publisher for MqttPublisher {
    async fn publish(&mut self, topic: &str, payload: String) -> Result<()> {
        let failures_before = self.state.borrow().failures;

        self.client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await
            .context("failed to queue publish")?;
        self.queued += 1;
        let ticket = self.queued;

        let waited = timeout(
            self.timeout,
            self.state.wait_for(|s| s.settled(ticket, failures_before)),
        )
        .await
        .map(|r| r.map(|s| (s.sent >= ticket, s.last_error.clone())));

        match waited {
            Ok(Ok((true, _))) => Ok(()),
            Ok(Ok((false, err))) => {
                // Queued requests may have been lost with the connection.
                self.queued = self.state.borrow().sent;
                bail!("MQTT connection error: {}", err.unwrap_or_default())
            }
            Ok(Err(_)) => bail!("MQTT event loop stopped"),
            // Still queued; it keeps its place ahead of later tickets.
            Err(_) => bail!("timed out waiting for publish"),
        }
    }
}

/// Drives the event loop until disconnect, reporting progress through `state`.
/// Connection errors are retried by rumqttc on the next poll.
fn spawn_event_loop(
    mut event_loop: EventLoop,
    broker: String,
    state: watch::Sender<LoopState>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!("MQTT event loop started for {broker}");

        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    state.send_modify(|s| s.connected = true);
                }
                Ok(Event::Outgoing(Outgoing::Publish(_))) => {
                    state.send_modify(|s| s.sent += 1);
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    state.send_modify(|s| s.disconnected = true);
                    break;
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("MQTT event loop error for {broker}: {err}");
                    state.send_modify(|s| {
                        s.connected = false;
                        s.failures += 1;
                        s.last_error = Some(err.to_string());
                    });
                    sleep(RECONNECT_DELAY).await;
                }
            }
        }
    })
}
