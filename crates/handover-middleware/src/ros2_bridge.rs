//! rosbridge-compatible WebSocket bridge.
//!
//! This module provides [`Ros2Bridge`], which:
//!
//! 1. **Ingests** `geometry_msgs/TransformStamped` (Source A, vicon) and
//!    `geometry_msgs/PoseStamped` (Source B, VO) messages and publishes their
//!    positions on [`Topic::SourceUpdates`].
//!
//! 2. **Serves** the `std_srvs/SetBool` toggle service: a call is turned into
//!    a switch request on [`Topic::ModeCommands`] and answered once the
//!    dispatch loop acknowledges it.
//!
//! 3. **Streams** every [`EventPayload::OutputPose`] on [`Topic::Output`] to
//!    connected clients as a `PoseStamped` publish frame.
//!
//! Frames follow the rosbridge v2 JSON protocol (`op: publish`,
//! `op: call_service`, `op: service_response`), so a stock
//! `rosbridge_server` client can drive the switcher.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use handover_types::{Event, EventPayload, HandoverError, Source, Vec3};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::bus::{EventBus, Topic};

/// How long [`Ros2Bridge::call_toggle`] waits for the dispatch loop to
/// acknowledge a switch request.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(1);

const SOURCE_A_EVENT: &str = "handover-middleware::ros2/vicon";
const SOURCE_B_EVENT: &str = "handover-middleware::ros2/vo";
const TOGGLE_EVENT: &str = "handover-middleware::ros2/state_toggle";

/// External channel names the bridge binds to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeTopics {
    /// Topic carrying `TransformStamped` messages for Source A.
    pub source_a: String,
    /// Topic carrying `PoseStamped` messages for Source B.
    pub source_b: String,
    /// Topic the blended `PoseStamped` is published on.
    pub output: String,
    /// Name of the `SetBool` toggle service.
    pub toggle_service: String,
    /// `header.frame_id` stamped on outgoing poses.
    pub frame_id: String,
}

impl Default for BridgeTopics {
    fn default() -> Self {
        Self {
            source_a: "/vicon/uav/uav".to_string(),
            source_b: "/vo/pose".to_string(),
            output: "/handover/pose".to_string(),
            toggle_service: "state_toggle".to_string(),
            frame_id: "world".to_string(),
        }
    }
}

/// Bridge between rosbridge clients and the internal [`EventBus`].
#[derive(Clone)]
pub struct Ros2Bridge {
    bus: Arc<EventBus>,
    topics: Arc<BridgeTopics>,
    ack_timeout: Duration,
}

impl Ros2Bridge {
    /// Create a new bridge backed by `bus`.
    pub fn new(bus: Arc<EventBus>, topics: BridgeTopics) -> Self {
        Self {
            bus,
            topics: Arc::new(topics),
            ack_timeout: DEFAULT_ACK_TIMEOUT,
        }
    }

    /// Override how long toggle calls wait for an acknowledgement.
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// The channel names this bridge is bound to.
    pub fn topics(&self) -> &BridgeTopics {
        &self.topics
    }

    // -----------------------------------------------------------------------
    // Inbound poses
    // -----------------------------------------------------------------------

    /// Ingest a `TransformStamped` message body and publish its translation
    /// as a Source A update.
    pub fn ingest_transform(&self, msg: &Value) -> Result<usize, HandoverError> {
        let position = parse_translation(msg)?;
        self.ingest_position(Source::A, position)
    }

    /// Ingest a `PoseStamped` message body and publish its position as a
    /// Source B update.
    pub fn ingest_pose(&self, msg: &Value) -> Result<usize, HandoverError> {
        let position = parse_pose_position(msg)?;
        self.ingest_position(Source::B, position)
    }

    /// Publish an already-decoded position for `source`.
    pub fn ingest_position(&self, source: Source, position: Vec3) -> Result<usize, HandoverError> {
        let origin = match source {
            Source::A => SOURCE_A_EVENT,
            Source::B => SOURCE_B_EVENT,
        };
        self.bus.publish_to(
            Topic::SourceUpdates,
            Event::new(origin, EventPayload::SourceUpdate { source, position }),
        )
    }

    // -----------------------------------------------------------------------
    // Toggle service
    // -----------------------------------------------------------------------

    /// Handle a `SetBool` toggle call.
    ///
    /// `data == false` requests Source A, `data == true` Source B.  Resolves
    /// to the acknowledged mode in the same encoding.
    ///
    /// # Errors
    ///
    /// [`HandoverError::SwitchTimeout`] when no acknowledgement arrives within
    /// the ack timeout, [`HandoverError::Channel`] if the command lane closed.
    pub async fn call_toggle(&self, data: bool) -> Result<bool, HandoverError> {
        let request_id = Uuid::new_v4();
        let target = Source::from_set_bool(data);

        // Subscribe before publishing so the ack cannot slip past.
        let mut acks = self.bus.subscribe_to(Topic::ModeCommands);
        self.bus.publish_to(
            Topic::ModeCommands,
            Event::new(TOGGLE_EVENT, EventPayload::SwitchRequest { request_id, target }),
        )?;
        info!(%target, "mode toggled by service");

        let wait_for_ack = async {
            loop {
                match acks.recv().await {
                    Ok(Event {
                        payload: EventPayload::SwitchAck { request_id: id, mode },
                        ..
                    }) if id == request_id => return Ok(mode),
                    Ok(_) => continue,
                    Err(RecvError::Lagged(n)) => {
                        warn!(lagged_by = n, "toggle ack receiver lagged");
                    }
                    Err(RecvError::Closed) => {
                        return Err(HandoverError::Channel(
                            "mode command lane closed".to_string(),
                        ));
                    }
                }
            }
        };

        let mode = tokio::time::timeout(self.ack_timeout, wait_for_ack)
            .await
            .map_err(|_| HandoverError::SwitchTimeout(request_id))??;
        Ok(mode.as_set_bool())
    }

    // -----------------------------------------------------------------------
    // Outbound poses
    // -----------------------------------------------------------------------

    /// Build the rosbridge publish frame for one output sample.
    pub fn output_frame(&self, position: Vec3, stamp: DateTime<Utc>) -> Value {
        json!({
            "op": "publish",
            "topic": self.topics.output,
            "msg": pose_stamped(position, stamp, &self.topics.frame_id),
        })
    }

    // -----------------------------------------------------------------------
    // WebSocket server
    // -----------------------------------------------------------------------

    /// Start a WebSocket server on `addr`.
    ///
    /// Every connecting client receives the output pose stream and may
    /// publish source poses or call the toggle service.  The server runs
    /// until it encounters a fatal bind error.
    ///
    /// # Errors
    ///
    /// Returns [`HandoverError::Transport`] if the TCP listener cannot be
    /// bound.
    pub async fn run_ws_server(self, addr: SocketAddr) -> Result<(), HandoverError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HandoverError::Transport(format!("ws bind error on {addr}: {e}")))?;
        info!(%addr, "rosbridge endpoint listening");

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let bridge = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = bridge.handle_ws_client(stream, peer).await {
                            error!(peer = %peer, error = %e, "ws client error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "ws accept error");
                }
            }
        }
    }

    async fn handle_ws_client(&self, stream: TcpStream, peer: SocketAddr) -> Result<(), HandoverError> {
        let ws_stream = accept_async(stream)
            .await
            .map_err(|e| HandoverError::Transport(format!("ws handshake from {peer}: {e}")))?;

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let mut outputs = self.bus.subscribe_to(Topic::Output);

        loop {
            tokio::select! {
                result = outputs.recv() => {
                    match result {
                        Ok(Event { payload: EventPayload::OutputPose(position), timestamp, .. }) => {
                            let frame = self.output_frame(position, timestamp).to_string();
                            if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                                break;
                            }
                        }
                        Ok(_) => {}
                        Err(RecvError::Lagged(n)) => {
                            warn!(peer = %peer, lagged_by = n, "ws client lagged");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(_)) => break,
                        Some(Ok(Message::Text(text))) => {
                            if let Some(reply) = self.handle_incoming_ws_message(text.as_str()).await
                                && ws_tx.send(Message::Text(reply.into())).await.is_err()
                            {
                                break;
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        Ok(())
    }

    /// Dispatch one incoming rosbridge frame.
    ///
    /// * `publish` on the Source A / Source B topic – decoded and forwarded
    ///   as a source update.  Malformed bodies are logged and dropped.
    /// * `call_service` on the toggle service – answered with a
    ///   `service_response` frame, which is returned for the caller to send.
    ///
    /// Anything else is silently ignored.
    async fn handle_incoming_ws_message(&self, text: &str) -> Option<String> {
        let Ok(json) = serde_json::from_str::<Value>(text) else {
            return None;
        };

        match json.get("op").and_then(Value::as_str).unwrap_or("") {
            "publish" => {
                let topic = json.get("topic").and_then(Value::as_str).unwrap_or("");
                let msg = json.get("msg").cloned().unwrap_or_default();
                let result = if topic == self.topics.source_a {
                    self.ingest_transform(&msg)
                } else if topic == self.topics.source_b {
                    self.ingest_pose(&msg)
                } else {
                    return None;
                };
                if let Err(e) = result {
                    warn!(topic, error = %e, "dropping pose message");
                }
                None
            }
            "call_service" => {
                let service = json.get("service").and_then(Value::as_str).unwrap_or("");
                if service.trim_start_matches('/') != self.topics.toggle_service.trim_start_matches('/') {
                    return None;
                }
                // SetBool's `data` defaults to false when omitted.
                let data = json
                    .get("args")
                    .and_then(|a| a.get("data"))
                    .and_then(Value::as_bool)
                    .unwrap_or(false);

                let mut reply = match self.call_toggle(data).await {
                    Ok(success) => json!({
                        "op": "service_response",
                        "service": service,
                        "values": { "success": success, "message": "MODE TOGGLED" },
                        "result": true,
                    }),
                    Err(e) => {
                        warn!(error = %e, "toggle service call failed");
                        json!({
                            "op": "service_response",
                            "service": service,
                            "values": { "success": false, "message": e.to_string() },
                            "result": false,
                        })
                    }
                };
                if let Some(id) = json.get("id") {
                    reply["id"] = id.clone();
                }
                Some(reply.to_string())
            }
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Message codecs
// ---------------------------------------------------------------------------

/// Extract `transform.translation` from a `TransformStamped` body.
pub fn parse_translation(msg: &Value) -> Result<Vec3, HandoverError> {
    read_vec3(msg, "transform", "translation")
}

/// Extract `pose.position` from a `PoseStamped` body.
pub fn parse_pose_position(msg: &Value) -> Result<Vec3, HandoverError> {
    read_vec3(msg, "pose", "position")
}

fn read_vec3(msg: &Value, outer: &str, inner: &str) -> Result<Vec3, HandoverError> {
    let axis = |name: &str| {
        msg.get(outer)
            .and_then(|o| o.get(inner))
            .and_then(|v| v.get(name))
            .and_then(Value::as_f64)
            .ok_or_else(|| HandoverError::Parsing(format!("missing numeric {outer}.{inner}.{name}")))
    };
    Ok(Vec3::new(axis("x")?, axis("y")?, axis("z")?))
}

fn pose_stamped(position: Vec3, stamp: DateTime<Utc>, frame_id: &str) -> Value {
    json!({
        "header": {
            "stamp": { "sec": stamp.timestamp(), "nanosec": stamp.timestamp_subsec_nanos() },
            "frame_id": frame_id,
        },
        "pose": {
            "position": { "x": position.x, "y": position.y, "z": position.z },
            "orientation": { "x": 0.0, "y": 0.0, "z": 0.0, "w": 1.0 },
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    fn make_bridge() -> (Arc<EventBus>, Ros2Bridge) {
        let bus = Arc::new(EventBus::default());
        let bridge = Ros2Bridge::new(Arc::clone(&bus), BridgeTopics::default());
        (bus, bridge)
    }

    /// Stand-in for the dispatch loop: acknowledges every switch request with
    /// the requested target.
    fn spawn_acknowledger(bus: Arc<EventBus>) {
        let mut commands = bus.subscribe_to(Topic::ModeCommands);
        tokio::spawn(async move {
            while let Ok(event) = commands.recv().await {
                if let EventPayload::SwitchRequest { request_id, target } = event.payload {
                    let ack = Event::new(
                        "test::dispatch",
                        EventPayload::SwitchAck { request_id, mode: target },
                    );
                    let _ = bus.publish_to(Topic::ModeCommands, ack);
                }
            }
        });
    }

    fn expect_update(event: Event) -> (Source, Vec3) {
        match event.payload {
            EventPayload::SourceUpdate { source, position } => (source, position),
            other => panic!("expected SourceUpdate, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ingest_transform_publishes_source_a_update() {
        let (bus, bridge) = make_bridge();
        let mut rx = bus.subscribe_to(Topic::SourceUpdates);

        let msg = json!({
            "header": { "frame_id": "world" },
            "child_frame_id": "uav",
            "transform": {
                "translation": { "x": 1.0, "y": 2.0, "z": 3.0 },
                "rotation": { "x": 0.0, "y": 0.0, "z": 0.0, "w": 1.0 }
            }
        });
        bridge.ingest_transform(&msg).unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.source, SOURCE_A_EVENT);
        assert_eq!(expect_update(event), (Source::A, Vec3::new(1.0, 2.0, 3.0)));
    }

    #[tokio::test]
    async fn ingest_pose_publishes_source_b_update() {
        let (bus, bridge) = make_bridge();
        let mut rx = bus.subscribe_to(Topic::SourceUpdates);

        let msg = json!({ "pose": { "position": { "x": -1.5, "y": 0.25, "z": 8 } } });
        bridge.ingest_pose(&msg).unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(expect_update(event), (Source::B, Vec3::new(-1.5, 0.25, 8.0)));
    }

    #[test]
    fn malformed_pose_is_rejected() {
        let (bus, bridge) = make_bridge();
        let mut rx = bus.subscribe_to(Topic::SourceUpdates);

        let missing_z = json!({ "pose": { "position": { "x": 1.0, "y": 2.0 } } });
        let result = bridge.ingest_pose(&missing_z);
        assert!(
            matches!(result, Err(HandoverError::Parsing(ref m)) if m.contains("pose.position.z")),
            "expected Parsing error, got: {result:?}"
        );

        let wrong_type = json!({ "transform": { "translation": { "x": "1", "y": 0, "z": 0 } } });
        assert!(matches!(bridge.ingest_transform(&wrong_type), Err(HandoverError::Parsing(_))));
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn call_toggle_returns_acknowledged_mode() {
        let (bus, bridge) = make_bridge();
        spawn_acknowledger(Arc::clone(&bus));

        assert!(bridge.call_toggle(true).await.unwrap());
        assert!(!bridge.call_toggle(false).await.unwrap());
    }

    #[tokio::test]
    async fn call_toggle_times_out_without_dispatcher() {
        let (_, bridge) = make_bridge();
        let bridge = bridge.with_ack_timeout(Duration::from_millis(20));

        let result = bridge.call_toggle(true).await;
        assert!(matches!(result, Err(HandoverError::SwitchTimeout(_))), "got: {result:?}");
    }

    #[tokio::test]
    async fn incoming_publish_on_source_a_topic_is_routed() {
        let (bus, bridge) = make_bridge();
        let mut rx = bus.subscribe_to(Topic::SourceUpdates);

        let frame = r#"{"op":"publish","topic":"/vicon/uav/uav","msg":{"transform":{"translation":{"x":4.0,"y":5.0,"z":6.0}}}}"#;
        assert!(bridge.handle_incoming_ws_message(frame).await.is_none());

        let event = rx.recv().await.unwrap();
        assert_eq!(expect_update(event), (Source::A, Vec3::new(4.0, 5.0, 6.0)));
    }

    #[tokio::test]
    async fn incoming_publish_on_unknown_topic_is_ignored() {
        let (bus, bridge) = make_bridge();
        let mut rx = bus.subscribe_to(Topic::SourceUpdates);

        let frame = r#"{"op":"publish","topic":"/cmd_vel","msg":{"pose":{"position":{"x":1,"y":1,"z":1}}}}"#;
        assert!(bridge.handle_incoming_ws_message(frame).await.is_none());
        assert!(bridge.handle_incoming_ws_message("not json").await.is_none());
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn incoming_call_service_gets_service_response() {
        let (bus, bridge) = make_bridge();
        spawn_acknowledger(Arc::clone(&bus));

        let frame = r#"{"op":"call_service","service":"/state_toggle","args":{"data":true},"id":"call-7"}"#;
        let reply = bridge.handle_incoming_ws_message(frame).await.expect("service reply");
        let reply: Value = serde_json::from_str(&reply).unwrap();

        assert_eq!(reply["op"], "service_response");
        assert_eq!(reply["id"], "call-7");
        assert_eq!(reply["result"], true);
        assert_eq!(reply["values"]["success"], true);
        assert_eq!(reply["values"]["message"], "MODE TOGGLED");
    }

    #[tokio::test]
    async fn incoming_call_service_reports_timeout_as_failed_result() {
        let (_, bridge) = make_bridge();
        let bridge = bridge.with_ack_timeout(Duration::from_millis(20));

        let frame = r#"{"op":"call_service","service":"state_toggle","args":{"data":false}}"#;
        let reply = bridge.handle_incoming_ws_message(frame).await.expect("service reply");
        let reply: Value = serde_json::from_str(&reply).unwrap();

        assert_eq!(reply["result"], false);
        assert_eq!(reply["values"]["success"], false);
        assert!(reply.get("id").is_none());
    }

    #[test]
    fn output_frame_is_pose_stamped_publish() {
        let (_, bridge) = make_bridge();
        let stamp = DateTime::from_timestamp(1_700_000_000, 500).unwrap();
        let frame = bridge.output_frame(Vec3::new(1.0, 2.0, 3.0), stamp);

        assert_eq!(frame["op"], "publish");
        assert_eq!(frame["topic"], "/handover/pose");
        assert_eq!(frame["msg"]["header"]["frame_id"], "world");
        assert_eq!(frame["msg"]["header"]["stamp"]["sec"], 1_700_000_000i64);
        assert_eq!(frame["msg"]["header"]["stamp"]["nanosec"], 500);
        assert_eq!(frame["msg"]["pose"]["position"]["x"], 1.0);
        assert_eq!(frame["msg"]["pose"]["position"]["z"], 3.0);
        assert_eq!(frame["msg"]["pose"]["orientation"]["w"], 1.0);
        // The frame must decode back through the PoseStamped codec.
        assert_eq!(parse_pose_position(&frame["msg"]).unwrap(), Vec3::new(1.0, 2.0, 3.0));
    }
}
