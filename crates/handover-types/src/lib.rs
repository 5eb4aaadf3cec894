use std::fmt;
use std::ops::{Add, Sub};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A 3-D position or displacement in the world frame (metres).
///
/// Used for raw source samples, per-source offsets and the published output
/// alike; the arithmetic is component-wise.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    /// Create a new vector.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// The zero vector.
    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }
}

impl Add for Vec3 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

/// One of the two position feeds the switcher blends between.
///
/// `A` is the motion-capture feed (vicon) and `B` the visual-odometry feed
/// in the reference deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    #[default]
    A,
    B,
}

impl Source {
    /// Decode a `std_srvs/SetBool` payload: `false` selects [`Source::A`],
    /// `true` selects [`Source::B`].
    pub fn from_set_bool(data: bool) -> Self {
        if data { Source::B } else { Source::A }
    }

    /// Inverse of [`Source::from_set_bool`].
    pub fn as_set_bool(self) -> bool {
        matches!(self, Source::B)
    }

    /// The other source.
    pub fn other(self) -> Self {
        match self {
            Source::A => Source::B,
            Source::B => Source::A,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::A => write!(f, "vicon"),
            Source::B => write!(f, "vo"),
        }
    }
}

/// Unified event wrapper for the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "handover-middleware::ros2/vicon"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Wrap `payload` in a fresh event stamped with the current time.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data that can be routed over the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    /// A fresh raw position from one of the two feeds.
    SourceUpdate { source: Source, position: Vec3 },
    /// Request to make `target` the active feed.
    SwitchRequest { request_id: Uuid, target: Source },
    /// Acknowledgement of a [`EventPayload::SwitchRequest`], carrying the
    /// mode that is active after the request was applied.
    SwitchAck { request_id: Uuid, mode: Source },
    /// A handover was resolved on a tick.
    ModeChanged { from: Source, to: Source, offset: Vec3 },
    /// The blended output position for one tick.
    OutputPose(Vec3),
}

/// Error type spanning bus, transport, parsing and configuration failures.
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum HandoverError {
    #[error("Channel Error: {0}")]
    Channel(String),

    #[error("Parsing Error: {0}")]
    Parsing(String),

    #[error("Transport Error: {0}")]
    Transport(String),

    #[error("Config Error: {0}")]
    Config(String),

    #[error("Switch request {0} was not acknowledged in time")]
    SwitchTimeout(Uuid),
}
