//! Realtime change feed over Phoenix channels with reconnect backoff.
//!
//! Each subscription owns one websocket. The join is awaited before the
//! subscription is handed out; after that a background task pumps change
//! frames into the subscription, keeps the heartbeat going and reconnects
//! with jittered exponential backoff. Dropping the subscription sends
//! `phx_leave` and closes the socket.

use crate::config::{BackendConfig, RealtimeConfig, ReconnectConfig};
use crate::error::ClientError;
use crate::rows::{lap_change_from_records, ChatRow, CHAT_TABLE, LAPS_TABLE};
use async_trait::async_trait;
use fieldops_core::chat::ChatMessage;
use fieldops_core::error::{FieldOpsResult, RemoteError};
use fieldops_core::identity::VehicleId;
use fieldops_core::ports::{ChangeNotifier, Subscription, SubscriptionFeed};
use fieldops_core::sync::LapChange;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::TcpStream;
use tokio::time::{interval_at, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const JOIN_TIMEOUT: Duration = Duration::from_secs(10);
const SUBSCRIPTION_CAPACITY: usize = 64;
const JOIN_REF: &str = "1";

/// One Phoenix v1 frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct PhoenixMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

impl PhoenixMessage {
    fn new(topic: &str, event: &str, payload: Value, reference: String) -> Self {
        Self {
            topic: topic.to_string(),
            event: event.to_string(),
            payload,
            reference: Some(reference),
        }
    }

    fn to_frame(&self) -> Result<Message, ClientError> {
        Ok(Message::Text(serde_json::to_string(self)?))
    }
}

/// A `postgres_changes` listener on one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ChannelJoin {
    pub name: String,
    pub table: &'static str,
    pub event: &'static str,
    pub filter: String,
}

impl ChannelJoin {
    fn laps(vehicle: &VehicleId) -> Self {
        Self {
            name: format!("alertas-chofer-{}", vehicle),
            table: LAPS_TABLE,
            event: "UPDATE",
            filter: format!("patente=eq.{}", vehicle),
        }
    }

    fn chat(vehicle: &VehicleId) -> Self {
        Self {
            name: format!("chat-{}", vehicle),
            table: CHAT_TABLE,
            event: "INSERT",
            filter: format!("patente=eq.{}", vehicle),
        }
    }

    fn topic(&self) -> String {
        format!("realtime:{}", self.name)
    }

    fn join_payload(&self, access_token: &str) -> Value {
        json!({
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": [{
                    "event": self.event,
                    "schema": "public",
                    "table": self.table,
                    "filter": self.filter,
                }],
            },
            "access_token": access_token,
        })
    }
}

/// Exponential backoff with additive jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: ReconnectConfig,
    current_ms: u64,
}

impl Backoff {
    pub fn new(config: ReconnectConfig) -> Self {
        let current_ms = config.initial_ms;
        Self { config, current_ms }
    }

    pub fn reset(&mut self) {
        self.current_ms = self.config.initial_ms;
    }

    /// Delay before the next attempt; grows the base for the one after.
    pub fn next_delay(&mut self) -> Duration {
        let delay = jittered_backoff(self.current_ms, self.config.jitter_ms);
        let next = (self.current_ms as f64 * self.config.multiplier) as u64;
        self.current_ms = next.min(self.config.max_ms);
        Duration::from_millis(delay)
    }
}

fn jittered_backoff(base_ms: u64, jitter_ms: u64) -> u64 {
    if jitter_ms == 0 {
        return base_ms;
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_nanos(0))
        .subsec_nanos() as u64;
    let jitter = nanos % jitter_ms;
    base_ms.saturating_add(jitter)
}

/// Why the pump stopped.
enum PumpExit {
    TornDown,
    Lost(String),
}

type Decoder<T> = Arc<dyn Fn(&Value) -> Result<Option<T>, ClientError> + Send + Sync>;

#[derive(Clone)]
pub struct RealtimeClient {
    endpoint: String,
    access_token: String,
    heartbeat: Duration,
    reconnect: ReconnectConfig,
}

impl RealtimeClient {
    pub fn new(backend: &BackendConfig, realtime: &RealtimeConfig) -> Self {
        Self {
            endpoint: backend.realtime_url(),
            access_token: backend.anon_key.clone(),
            heartbeat: Duration::from_millis(realtime.heartbeat_ms),
            reconnect: realtime.reconnect.clone(),
        }
    }

    /// Connect and join `channel`, waiting for the server to accept the join.
    async fn open(&self, channel: &ChannelJoin) -> Result<WsStream, ClientError> {
        let (mut stream, _) = tokio_tungstenite::connect_async(self.endpoint.as_str()).await?;
        let topic = channel.topic();
        let request = PhoenixMessage::new(
            &topic,
            "phx_join",
            channel.join_payload(&self.access_token),
            JOIN_REF.to_string(),
        );
        stream.send(request.to_frame()?).await?;

        let reply = tokio::time::timeout(JOIN_TIMEOUT, async {
            while let Some(frame) = stream.next().await {
                if let Message::Text(text) = frame? {
                    let message: PhoenixMessage = serde_json::from_str(&text)?;
                    if message.topic == topic
                        && message.event == "phx_reply"
                        && message.reference.as_deref() == Some(JOIN_REF)
                    {
                        return Ok(message.payload);
                    }
                }
            }
            Err::<Value, ClientError>(ClientError::InvalidResponse(
                "socket closed before join reply".to_string(),
            ))
        })
        .await
        .map_err(|_| ClientError::InvalidResponse("join timed out".to_string()))??;

        match reply.get("status").and_then(Value::as_str) {
            Some("ok") => Ok(stream),
            _ => Err(ClientError::InvalidResponse(format!(
                "join rejected: {}",
                reply.get("response").cloned().unwrap_or(Value::Null)
            ))),
        }
    }

    async fn subscribe<T: Send + 'static>(
        &self,
        join: ChannelJoin,
        decode: Decoder<T>,
    ) -> FieldOpsResult<Subscription<T>> {
        let stream = self.open(&join).await.map_err(|e| {
            tracing::warn!(channel = %join.name, error = %e, "Realtime join failed");
            RemoteError::SubscriptionFailed {
                channel: join.name.clone(),
                reason: e.to_string(),
            }
        })?;
        tracing::info!(channel = %join.name, "Realtime channel joined");

        let (subscription, feed) = Subscription::channel(join.name.clone(), SUBSCRIPTION_CAPACITY);
        let client = self.clone();
        tokio::spawn(async move { client.run_channel(join, stream, feed, decode).await });
        Ok(subscription)
    }

    async fn run_channel<T: Send + 'static>(
        self,
        join: ChannelJoin,
        mut stream: WsStream,
        mut feed: SubscriptionFeed<T>,
        decode: Decoder<T>,
    ) {
        let mut backoff = Backoff::new(self.reconnect.clone());
        loop {
            match self.pump(&join, &mut stream, &mut feed, &decode).await {
                PumpExit::TornDown => {
                    let leave = PhoenixMessage::new(&join.topic(), "phx_leave", json!({}), "leave".to_string());
                    if let Ok(frame) = leave.to_frame() {
                        let _ = stream.send(frame).await;
                    }
                    let _ = stream.close(None).await;
                    tracing::info!(channel = %join.name, "Realtime channel left");
                    return;
                }
                PumpExit::Lost(reason) => {
                    tracing::warn!(channel = %join.name, %reason, "Realtime connection lost");
                }
            }

            backoff.reset();
            stream = loop {
                let delay = backoff.next_delay();
                tokio::select! {
                    _ = &mut feed.teardown => return,
                    _ = tokio::time::sleep(delay) => {}
                }
                match self.open(&join).await {
                    Ok(stream) => {
                        tracing::info!(channel = %join.name, "Realtime channel rejoined");
                        break stream;
                    }
                    Err(err) => {
                        tracing::warn!(channel = %join.name, error = %err, ?delay, "Realtime reconnect failed");
                    }
                }
            };
        }
    }

    async fn pump<T: Send + 'static>(
        &self,
        join: &ChannelJoin,
        stream: &mut WsStream,
        feed: &mut SubscriptionFeed<T>,
        decode: &Decoder<T>,
    ) -> PumpExit {
        let topic = join.topic();
        let mut heartbeat = interval_at(Instant::now() + self.heartbeat, self.heartbeat);
        let mut next_ref: u64 = 1;

        loop {
            tokio::select! {
                _ = &mut feed.teardown => return PumpExit::TornDown,
                _ = feed.events.closed() => return PumpExit::TornDown,
                _ = heartbeat.tick() => {
                    next_ref += 1;
                    let beat = PhoenixMessage::new("phoenix", "heartbeat", json!({}), next_ref.to_string());
                    let sent = match beat.to_frame() {
                        Ok(frame) => stream.send(frame).await.map_err(ClientError::from),
                        Err(err) => Err(err),
                    };
                    if let Err(err) = sent {
                        return PumpExit::Lost(err.to_string());
                    }
                }
                frame = stream.next() => {
                    let text = match frame {
                        None => return PumpExit::Lost("socket closed".to_string()),
                        Some(Err(err)) => return PumpExit::Lost(err.to_string()),
                        Some(Ok(Message::Close(_))) => return PumpExit::Lost("closed by server".to_string()),
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(_)) => continue,
                    };
                    let message: PhoenixMessage = match serde_json::from_str(&text) {
                        Ok(message) => message,
                        Err(err) => {
                            tracing::debug!(channel = %join.name, error = %err, "Skipping undecodable frame");
                            continue;
                        }
                    };
                    if message.topic != topic {
                        continue;
                    }
                    match message.event.as_str() {
                        "postgres_changes" => {
                            let data = message.payload.get("data").cloned().unwrap_or(Value::Null);
                            match decode(&data) {
                                Ok(Some(event)) => {
                                    if feed.events.send(event).await.is_err() {
                                        return PumpExit::TornDown;
                                    }
                                }
                                Ok(None) => {}
                                Err(err) => {
                                    tracing::warn!(channel = %join.name, error = %err, "Dropping malformed change");
                                }
                            }
                        }
                        "phx_error" | "phx_close" => {
                            return PumpExit::Lost(format!("server sent {}", message.event));
                        }
                        other => {
                            tracing::debug!(channel = %join.name, event = other, "Realtime frame");
                        }
                    }
                }
            }
        }
    }
}

fn change_type(data: &Value) -> Option<&str> {
    data.get("type")
        .or_else(|| data.get("eventType"))
        .and_then(Value::as_str)
}

fn lap_decoder(vehicle: VehicleId) -> Decoder<LapChange> {
    Arc::new(move |data: &Value| {
        if change_type(data).is_some_and(|t| t != "UPDATE") {
            return Ok(None);
        }
        let empty = Value::Null;
        let record = data.get("record").unwrap_or(&empty);
        let old_record = data.get("old_record").unwrap_or(&empty);
        lap_change_from_records(record, old_record, &vehicle).map(Some)
    })
}

fn chat_decoder() -> Decoder<ChatMessage> {
    Arc::new(|data: &Value| {
        if change_type(data).is_some_and(|t| t != "INSERT") {
            return Ok(None);
        }
        let record = data.get("record").cloned().unwrap_or(Value::Null);
        let row: ChatRow = serde_json::from_value(record)?;
        ChatMessage::try_from(row).map(Some)
    })
}

#[async_trait]
impl ChangeNotifier for RealtimeClient {
    async fn subscribe_laps(&self, vehicle: &VehicleId) -> FieldOpsResult<Subscription<LapChange>> {
        self.subscribe(ChannelJoin::laps(vehicle), lap_decoder(vehicle.clone()))
            .await
    }

    async fn subscribe_chat(
        &self,
        vehicle: &VehicleId,
    ) -> FieldOpsResult<Subscription<ChatMessage>> {
        self.subscribe(ChannelJoin::chat(vehicle), chat_decoder()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn reconnect(jitter_ms: u64) -> ReconnectConfig {
        ReconnectConfig {
            initial_ms: 100,
            max_ms: 1000,
            multiplier: 2.0,
            jitter_ms,
        }
    }

    #[test]
    fn test_backoff_grows_to_cap_and_resets() {
        let mut backoff = Backoff::new(reconnect(0));
        let delays: Vec<u64> = (0..6).map(|_| backoff.next_delay().as_millis() as u64).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000, 1000]);
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        for _ in 0..50 {
            let delay = jittered_backoff(100, 25);
            assert!((100..125).contains(&delay));
        }
    }

    #[test]
    fn test_join_payload_filters_by_vehicle() {
        let join = ChannelJoin::laps(&VehicleId::parse("AB1234").unwrap());
        assert_eq!(join.topic(), "realtime:alertas-chofer-AB1234");
        let payload = join.join_payload("anon");
        let change = &payload["config"]["postgres_changes"][0];
        assert_eq!(change["event"], "UPDATE");
        assert_eq!(change["table"], "asignaciones_transporte");
        assert_eq!(change["filter"], "patente=eq.AB1234");
        assert_eq!(payload["access_token"], "anon");
    }

    #[test]
    fn test_lap_decoder_skips_other_event_types() {
        let decode = lap_decoder(VehicleId::parse("AB1234").unwrap());
        let insert = json!({ "type": "INSERT", "record": { "id": 1 } });
        assert!(decode(&insert).unwrap().is_none());

        let update = json!({
            "type": "UPDATE",
            "record": { "id": 1, "patente": "AB1234", "comentario": "Llamar" },
            "old_record": { "id": 1 }
        });
        let change = decode(&update).unwrap().unwrap();
        assert_eq!(change.current.comment.as_deref(), Some("Llamar"));
    }

    #[test]
    fn test_chat_decoder() {
        let decode = chat_decoder();
        let data = json!({
            "type": "INSERT",
            "record": { "id": 9, "patente": "AB1234", "remitente": "admin", "contenido": "Hola" }
        });
        let message = decode(&data).unwrap().unwrap();
        assert_eq!(message.body, "Hola");
    }

    async fn next_message(ws: &mut WebSocketStream<TcpStream>) -> PhoenixMessage {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("socket ended: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_subscription_round_trip_against_local_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();

            let join = next_message(&mut ws).await;
            assert_eq!(join.event, "phx_join");
            let reply = PhoenixMessage {
                topic: join.topic.clone(),
                event: "phx_reply".to_string(),
                payload: json!({ "status": "ok", "response": {} }),
                reference: join.reference.clone(),
            };
            ws.send(reply.to_frame().unwrap()).await.unwrap();

            let change = PhoenixMessage {
                topic: join.topic.clone(),
                event: "postgres_changes".to_string(),
                payload: json!({
                    "data": {
                        "type": "UPDATE",
                        "record": { "id": 5, "patente": "AB1234", "mensaje_admin": "Dock 4" },
                        "old_record": { "id": 5 }
                    },
                    "ids": [1]
                }),
                reference: None,
            };
            ws.send(change.to_frame().unwrap()).await.unwrap();

            loop {
                let message = next_message(&mut ws).await;
                if message.event == "phx_leave" {
                    return message.topic;
                }
            }
        });

        let client = RealtimeClient::new(
            &BackendConfig {
                url: format!("http://{}", addr),
                anon_key: "anon".to_string(),
                request_timeout_ms: 1000,
            },
            &RealtimeConfig {
                heartbeat_ms: 60_000,
                reconnect: reconnect(0),
            },
        );
        let vehicle = VehicleId::parse("AB1234").unwrap();
        let mut subscription = client.subscribe_laps(&vehicle).await.unwrap();

        let change = tokio::time::timeout(Duration::from_secs(5), subscription.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(change.vehicle_id, vehicle);
        assert_eq!(change.current.message.as_deref(), Some("Dock 4"));

        drop(subscription);
        let left = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(left, "realtime:alertas-chofer-AB1234");
    }

    #[tokio::test]
    async fn test_unreachable_server_fails_subscription() {
        let client = RealtimeClient::new(
            &BackendConfig {
                url: "http://127.0.0.1:9".to_string(),
                anon_key: "anon".to_string(),
                request_timeout_ms: 1000,
            },
            &RealtimeConfig {
                heartbeat_ms: 1000,
                reconnect: reconnect(0),
            },
        );
        let err = client
            .subscribe_chat(&VehicleId::parse("AB1234").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            fieldops_core::FieldOpsError::Remote(RemoteError::SubscriptionFailed { .. })
        ));
    }
}
