//! `handover-middleware` – Transport plumbing
//!
//! Routes pose updates, switch requests and blended output between the
//! switcher and the outside world without caring about the offset logic.
//!
//! # Modules
//!
//! - [`bus`] – typed, topic-based publish/subscribe event bus built on Tokio
//!   broadcast channels.
//! - [`ros2_bridge`] – rosbridge-compatible WebSocket bridge that turns
//!   `TransformStamped` / `PoseStamped` JSON into source updates, serves the
//!   `state_toggle` service, and streams the output pose to clients.

pub mod bus;
pub mod ros2_bridge;

pub use bus::{EventBus, Topic, TopicReceiver};
pub use ros2_bridge::{BridgeTopics, Ros2Bridge};
