//! [`DispatchLoop`] – the single-threaded drain-then-tick event loop.
//!
//! Each cycle:
//!
//! 1. **Drain** – every buffered event on [`Topic::SourceUpdates`] and
//!    [`Topic::ModeCommands`] is applied to the [`SwitcherState`] with
//!    non-blocking `try_recv`.  Switch requests are acknowledged on the
//!    command lane immediately, before the tick that services them.
//! 2. **Tick** – a pending switch is resolved, the output is composed and
//!    published on [`Topic::Output`].  A resolved handover is additionally
//!    announced on [`Topic::SystemAlerts`].
//!
//! The loop is the only owner of the switcher, so the offsets and the
//! published output are never touched concurrently.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use handover_middleware::{EventBus, Topic};
//! use handover_runtime::{DispatchLoop, DispatchLoopConfig};
//! use handover_types::{Event, EventPayload, Source, Vec3};
//!
//! let bus = Arc::new(EventBus::default());
//! let mut dispatch = DispatchLoop::new(Arc::clone(&bus), DispatchLoopConfig::default());
//!
//! bus.publish_to(
//!     Topic::SourceUpdates,
//!     Event::new("doc", EventPayload::SourceUpdate {
//!         source: Source::A,
//!         position: Vec3::new(1.0, 2.0, 3.0),
//!     }),
//! ).unwrap();
//!
//! let report = dispatch.tick().unwrap();
//! assert_eq!(report.output, Vec3::new(1.0, 2.0, 3.0));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use handover_core::{SwitcherState, TickReport};
use handover_middleware::{EventBus, Topic, TopicReceiver};
use handover_types::{Event, EventPayload, HandoverError};
use tokio::sync::broadcast::error::TryRecvError;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

const EVENT_SOURCE: &str = "handover-runtime::dispatch";

/// Default output cadence.
pub const DEFAULT_RATE_HZ: u32 = 100;

/// Tunables for [`DispatchLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchLoopConfig {
    /// Ticks per second.  Zero is treated as one.
    pub rate_hz: u32,
}

impl Default for DispatchLoopConfig {
    fn default() -> Self {
        Self {
            rate_hz: DEFAULT_RATE_HZ,
        }
    }
}

impl DispatchLoopConfig {
    /// Time between two ticks.
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.rate_hz.max(1)))
    }
}

/// Drives a [`SwitcherState`] from the event bus at a fixed rate.
pub struct DispatchLoop {
    state: SwitcherState,
    bus: Arc<EventBus>,
    updates: TopicReceiver,
    commands: TopicReceiver,
    config: DispatchLoopConfig,
}

impl DispatchLoop {
    /// Subscribe to the inbound lanes of `bus`.
    ///
    /// Events published after this call are picked up by the next drain.
    pub fn new(bus: Arc<EventBus>, config: DispatchLoopConfig) -> Self {
        let updates = bus.subscribe_to(Topic::SourceUpdates);
        let commands = bus.subscribe_to(Topic::ModeCommands);
        Self {
            state: SwitcherState::new(),
            bus,
            updates,
            commands,
            config,
        }
    }

    /// Read-only view of the switcher.
    pub fn state(&self) -> &SwitcherState {
        &self.state
    }

    /// Apply every buffered inbound event without waiting.
    ///
    /// Returns the number of events applied.
    ///
    /// # Errors
    ///
    /// [`HandoverError::Channel`] once an inbound lane has closed.
    pub fn drain_inbound(&mut self) -> Result<usize, HandoverError> {
        let mut applied = 0;

        loop {
            match self.updates.try_recv() {
                Ok(Event {
                    payload: EventPayload::SourceUpdate { source, position },
                    ..
                }) => {
                    self.state.update(source, position);
                    applied += 1;
                }
                Ok(_) => {}
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Lagged(n)) => {
                    // The oldest samples were dropped; the newest are still
                    // buffered, so last-write-wins is unaffected.
                    warn!(lagged_by = n, "source update lane lagged");
                }
                Err(TryRecvError::Closed) => {
                    return Err(HandoverError::Channel("source update lane closed".to_string()));
                }
            }
        }

        loop {
            match self.commands.try_recv() {
                Ok(Event {
                    payload: EventPayload::SwitchRequest { request_id, target },
                    ..
                }) => {
                    let mode = self.state.request_switch(target);
                    applied += 1;
                    let ack = Event::new(EVENT_SOURCE, EventPayload::SwitchAck { request_id, mode });
                    if let Err(e) = self.bus.publish_to(Topic::ModeCommands, ack) {
                        debug!(error = %e, "switch ack had no listener");
                    }
                }
                // Our own acks come back on this lane.
                Ok(_) => {}
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Lagged(n)) => {
                    warn!(lagged_by = n, "mode command lane lagged; switch requests were lost");
                }
                Err(TryRecvError::Closed) => {
                    return Err(HandoverError::Channel("mode command lane closed".to_string()));
                }
            }
        }

        Ok(applied)
    }

    /// Run one cycle: drain, tick, publish.
    ///
    /// Publishing the output with nobody listening is not an error; the
    /// sample is simply dropped.
    pub fn tick(&mut self) -> Result<TickReport, HandoverError> {
        self.drain_inbound()?;
        let report = self.state.tick();

        if let Some(outcome) = report.switched {
            let alert = Event::new(
                EVENT_SOURCE,
                EventPayload::ModeChanged {
                    from: outcome.from,
                    to: outcome.to,
                    offset: outcome.offset,
                },
            );
            let _ = self.bus.publish_to(Topic::SystemAlerts, alert);
        }

        let output = Event::new(EVENT_SOURCE, EventPayload::OutputPose(report.output));
        if let Err(e) = self.bus.publish_to(Topic::Output, output) {
            debug!(error = %e, "output pose had no listener");
        }

        Ok(report)
    }

    /// Tick at the configured rate until `shutdown` is set.
    ///
    /// Missed ticks are skipped rather than replayed in a burst.
    pub async fn run(mut self, shutdown: Arc<AtomicBool>) -> Result<(), HandoverError> {
        let mut interval = tokio::time::interval(self.config.period());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(rate_hz = self.config.rate_hz, mode = %self.state.active(), "dispatch loop started");

        loop {
            interval.tick().await;
            if shutdown.load(Ordering::SeqCst) {
                info!("dispatch loop stopped");
                return Ok(());
            }
            self.tick()?;
        }
    }
}
