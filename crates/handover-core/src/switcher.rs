//! Offset-tracking mode switcher.
//!
//! Holds the latest raw position of each [`Source`], which source currently
//! drives the output, and one additive offset per source.  When the active
//! source changes, the newly active source's offset is re-anchored so that
//!
//! ```text
//! raw[active] + offset[active] == last published output
//! ```
//!
//! which makes the handover seamless: the first output after a switch equals
//! the last output before it (provided the raw sample did not move in
//! between).
//!
//! # Example
//!
//! ```rust
//! use handover_core::SwitcherState;
//! use handover_types::{Source, Vec3};
//!
//! let mut sw = SwitcherState::new();
//! sw.update_source_b(Vec3::new(10.0, 20.0, 30.0));
//! sw.update_source_a(Vec3::new(1.0, 2.0, 3.0));
//! assert_eq!(sw.tick().output, Vec3::new(1.0, 2.0, 3.0));
//!
//! sw.request_switch(Source::B);
//! let report = sw.tick();
//! assert_eq!(report.output, Vec3::new(1.0, 2.0, 3.0));
//! assert_eq!(sw.offset(Source::B), Vec3::new(-9.0, -18.0, -27.0));
//! ```

use handover_types::{Source, Vec3};
use tracing::info;

// ────────────────────────────────────────────────────────────────────────────
// Per-source storage
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
struct PerSource<T> {
    a: T,
    b: T,
}

impl<T: Copy> PerSource<T> {
    fn get(&self, source: Source) -> T {
        match source {
            Source::A => self.a,
            Source::B => self.b,
        }
    }

    fn get_mut(&mut self, source: Source) -> &mut T {
        match source {
            Source::A => &mut self.a,
            Source::B => &mut self.b,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Reports
// ────────────────────────────────────────────────────────────────────────────

/// A resolved handover.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SwitchOutcome {
    /// Source that produced the output the handover was anchored on.
    pub from: Source,
    /// Source that is active from this tick on.
    pub to: Source,
    /// Freshly computed offset of `to`.
    pub offset: Vec3,
}

/// Result of one [`SwitcherState::tick`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickReport {
    /// The sample to publish.
    pub output: Vec3,
    /// Set when this tick serviced a pending switch.
    pub switched: Option<SwitchOutcome>,
}

// ────────────────────────────────────────────────────────────────────────────
// SwitcherState
// ────────────────────────────────────────────────────────────────────────────

/// The whole switcher: source cache, mode state, offset ledger and the last
/// published output.
///
/// The value is owned by a single dispatch loop; every method takes
/// `&mut self` and runs to completion, so no locking is involved.
#[derive(Debug, Clone, Default)]
pub struct SwitcherState {
    raw: PerSource<Vec3>,
    offsets: PerSource<Vec3>,
    active: Source,
    pending_switch: bool,
    output: Vec3,
    /// Source that composed `output`.
    output_source: Source,
}

impl SwitcherState {
    /// Start in [`Source::A`] mode with zeroed caches and offsets.
    pub fn new() -> Self {
        Self::default()
    }

    // ── Source cache ─────────────────────────────────────────────────────────

    /// Overwrite the cached sample of `source`.  Last write wins.
    pub fn update(&mut self, source: Source, position: Vec3) {
        *self.raw.get_mut(source) = position;
    }

    /// Overwrite the cached motion-capture sample.
    pub fn update_source_a(&mut self, position: Vec3) {
        self.update(Source::A, position);
    }

    /// Overwrite the cached visual-odometry sample.
    pub fn update_source_b(&mut self, position: Vec3) {
        self.update(Source::B, position);
    }

    // ── Mode state ───────────────────────────────────────────────────────────

    /// Make `target` the active source and latch a pending switch.
    ///
    /// Requesting the already-active source still latches the switch; the
    /// next tick then re-anchors that source's offset.  Offsets and the
    /// output are left alone until the next [`tick`][Self::tick].
    ///
    /// Returns the mode now in effect.
    pub fn request_switch(&mut self, target: Source) -> Source {
        self.active = target;
        self.pending_switch = true;
        self.active
    }

    // ── Offset ledger ────────────────────────────────────────────────────────

    /// Service a pending switch, if any.
    ///
    /// Sets `offset[active] = output - raw[active]` over all three axes and
    /// clears the pending flag.  The inactive source keeps its offset.
    pub fn resolve_pending_switch(&mut self) -> Option<SwitchOutcome> {
        if !self.pending_switch {
            return None;
        }
        self.pending_switch = false;

        let active = self.active;
        let offset = self.output - self.raw.get(active);
        *self.offsets.get_mut(active) = offset;

        let outcome = SwitchOutcome {
            from: self.output_source,
            to: active,
            offset,
        };
        info!(
            from = %outcome.from,
            to = %outcome.to,
            offset_x = offset.x,
            offset_y = offset.y,
            offset_z = offset.z,
            "source handover"
        );
        Some(outcome)
    }

    // ── Output compositor ────────────────────────────────────────────────────

    /// Run one tick: resolve any pending switch, then compose the output.
    pub fn tick(&mut self) -> TickReport {
        let switched = self.resolve_pending_switch();
        let output = self.compose_output();
        TickReport { output, switched }
    }

    fn compose_output(&mut self) -> Vec3 {
        let active = self.active;
        let biased = self.raw.get(active) + self.offsets.get(active);
        // z always follows raw Source A, uncorrected, even in B mode.  This
        // matches the deployed node; see DESIGN.md before changing it.
        self.output = Vec3::new(biased.x, biased.y, self.raw.a.z);
        self.output_source = active;
        self.output
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    /// The currently active source.
    pub fn active(&self) -> Source {
        self.active
    }

    /// `true` between a [`request_switch`][Self::request_switch] and the
    /// tick that services it.
    pub fn is_switch_pending(&self) -> bool {
        self.pending_switch
    }

    /// Last cached raw sample of `source`.
    pub fn raw(&self, source: Source) -> Vec3 {
        self.raw.get(source)
    }

    /// Current offset of `source`.
    pub fn offset(&self, source: Source) -> Vec3 {
        self.offsets.get(source)
    }

    /// Last published output.
    pub fn output(&self) -> Vec3 {
        self.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn assert_close(actual: Vec3, expected: Vec3) {
        assert!(
            (actual.x - expected.x).abs() < EPS
                && (actual.y - expected.y).abs() < EPS
                && (actual.z - expected.z).abs() < EPS,
            "expected {expected:?}, got {actual:?}"
        );
    }

    #[test]
    fn starts_in_source_a_with_zero_offsets() {
        let sw = SwitcherState::new();
        assert_eq!(sw.active(), Source::A);
        assert!(!sw.is_switch_pending());
        assert_eq!(sw.offset(Source::A), Vec3::zero());
        assert_eq!(sw.offset(Source::B), Vec3::zero());
        assert_eq!(sw.output(), Vec3::zero());
    }

    #[test]
    fn handover_scenario_keeps_output_continuous() {
        let mut sw = SwitcherState::new();
        sw.update_source_b(Vec3::new(10.0, 20.0, 30.0));
        sw.update_source_a(Vec3::new(1.0, 2.0, 3.0));

        let before = sw.tick();
        assert_close(before.output, Vec3::new(1.0, 2.0, 3.0));
        assert!(before.switched.is_none());

        assert_eq!(sw.request_switch(Source::B), Source::B);
        let after = sw.tick();

        assert_close(sw.offset(Source::B), Vec3::new(-9.0, -18.0, -27.0));
        assert_close(after.output, Vec3::new(1.0, 2.0, 3.0));
        let outcome = after.switched.expect("switch must be resolved");
        assert_eq!(outcome.from, Source::A);
        assert_eq!(outcome.to, Source::B);
    }

    #[test]
    fn continuity_holds_across_repeated_switches() {
        let mut sw = SwitcherState::new();
        let samples = [
            (Vec3::new(0.5, -1.0, 1.2), Vec3::new(4.0, 4.0, 0.0)),
            (Vec3::new(0.7, -0.8, 1.1), Vec3::new(4.3, 4.1, 0.2)),
            (Vec3::new(1.9, 0.4, 1.0), Vec3::new(5.0, 5.6, 0.1)),
            (Vec3::new(-3.2, 2.2, 0.9), Vec3::new(-0.1, 7.5, 0.4)),
        ];
        let mut target = Source::B;
        for (a, b) in samples {
            sw.update_source_a(a);
            sw.update_source_b(b);
            let before = sw.tick().output;

            sw.request_switch(target);
            let after = sw.tick().output;
            assert!((after.x - before.x).abs() < EPS, "x jumped: {before:?} -> {after:?}");
            assert!((after.y - before.y).abs() < EPS, "y jumped: {before:?} -> {after:?}");
            target = target.other();
        }
    }

    #[test]
    fn inactive_offset_is_preserved_across_switch() {
        let mut sw = SwitcherState::new();
        sw.update_source_a(Vec3::new(1.0, 1.0, 0.0));
        sw.update_source_b(Vec3::new(5.0, 5.0, 0.0));
        sw.tick();
        sw.request_switch(Source::B);
        sw.tick();
        let b_offset = sw.offset(Source::B);

        sw.update_source_b(Vec3::new(6.0, 7.0, 0.0));
        sw.tick();
        sw.request_switch(Source::A);
        sw.tick();

        assert_eq!(sw.offset(Source::B), b_offset);
        // Output was (2, 3) when leaving B; A raw is still (1, 1).
        assert_close(sw.offset(Source::A), Vec3::new(1.0, 2.0, 0.0));
        assert_close(sw.output(), Vec3::new(2.0, 3.0, 0.0));
    }

    #[test]
    fn same_mode_switch_keeps_output_and_rewrites_offset() {
        let mut sw = SwitcherState::new();
        sw.update_source_a(Vec3::new(2.0, 3.0, 4.0));
        let before = sw.tick().output;

        assert_eq!(sw.request_switch(Source::A), Source::A);
        assert!(sw.is_switch_pending());
        let report = sw.tick();

        assert_close(report.output, before);
        let outcome = report.switched.expect("same-mode switch is still serviced");
        assert_eq!(outcome.from, Source::A);
        assert_eq!(outcome.to, Source::A);
        assert_close(sw.offset(Source::A), Vec3::zero());
    }

    #[test]
    fn same_mode_switch_reanchors_drifted_raw() {
        let mut sw = SwitcherState::new();
        sw.update_source_a(Vec3::new(2.0, 3.0, 4.0));
        sw.tick();
        // Raw moves after the last output, then a same-mode switch arrives.
        sw.update_source_a(Vec3::new(2.5, 3.5, 4.0));
        sw.request_switch(Source::A);
        let report = sw.tick();

        assert_close(sw.offset(Source::A), Vec3::new(-0.5, -0.5, 0.0));
        assert_close(report.output, Vec3::new(2.0, 3.0, 4.0));
    }

    #[test]
    fn z_always_tracks_raw_source_a() {
        let mut sw = SwitcherState::new();
        sw.update_source_a(Vec3::new(0.0, 0.0, 1.5));
        sw.update_source_b(Vec3::new(9.0, 9.0, 42.0));
        assert_eq!(sw.tick().output.z, 1.5);

        sw.request_switch(Source::B);
        assert_eq!(sw.tick().output.z, 1.5);

        sw.update_source_a(Vec3::new(0.0, 0.0, 2.25));
        sw.update_source_b(Vec3::new(9.0, 9.0, -7.0));
        assert_eq!(sw.tick().output.z, 2.25);
    }

    #[test]
    fn z_offset_is_stored_but_not_applied() {
        let mut sw = SwitcherState::new();
        sw.update_source_a(Vec3::new(1.0, 2.0, 3.0));
        sw.update_source_b(Vec3::new(10.0, 20.0, 30.0));
        sw.tick();
        sw.request_switch(Source::B);
        let out = sw.tick().output;

        assert_eq!(sw.offset(Source::B).z, -27.0);
        assert_eq!(out.z, 3.0);
    }

    #[test]
    fn last_write_wins_before_tick() {
        let mut sw = SwitcherState::new();
        sw.update_source_a(Vec3::new(1.0, 1.0, 1.0));
        sw.update_source_a(Vec3::new(2.0, 2.0, 2.0));
        assert_close(sw.tick().output, Vec3::new(2.0, 2.0, 2.0));
        assert_eq!(sw.raw(Source::A), Vec3::new(2.0, 2.0, 2.0));
    }

    #[test]
    fn output_tracks_raw_plus_offset_without_switch() {
        let mut sw = SwitcherState::new();
        sw.update_source_a(Vec3::new(1.0, 2.0, 3.0));
        sw.update_source_b(Vec3::new(10.0, 20.0, 30.0));
        sw.tick();
        sw.request_switch(Source::B);
        sw.tick();
        let offset = sw.offset(Source::B);

        for step in 1..=5 {
            let b = Vec3::new(10.0 + step as f64, 20.0 - step as f64, 30.0);
            sw.update_source_b(b);
            let report = sw.tick();
            assert!(report.switched.is_none());
            assert_close(sw.offset(Source::B), offset);
            assert_close(report.output, Vec3::new(b.x + offset.x, b.y + offset.y, 3.0));
        }
    }

    #[test]
    fn request_switch_does_not_touch_offsets_or_output() {
        let mut sw = SwitcherState::new();
        sw.update_source_a(Vec3::new(1.0, 2.0, 3.0));
        sw.update_source_b(Vec3::new(4.0, 5.0, 6.0));
        sw.tick();

        sw.request_switch(Source::B);
        assert_eq!(sw.active(), Source::B);
        assert_eq!(sw.offset(Source::B), Vec3::zero());
        assert_close(sw.output(), Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn pending_switch_is_cleared_after_tick() {
        let mut sw = SwitcherState::new();
        sw.request_switch(Source::B);
        assert!(sw.tick().switched.is_some());
        assert!(!sw.is_switch_pending());
        assert!(sw.tick().switched.is_none());
    }

    #[test]
    fn switching_to_unheard_source_anchors_against_zero() {
        let mut sw = SwitcherState::new();
        sw.update_source_a(Vec3::new(3.0, 4.0, 1.0));
        sw.tick();
        sw.request_switch(Source::B);
        let report = sw.tick();

        // No B sample yet: the offset absorbs the whole output.
        assert_close(sw.offset(Source::B), Vec3::new(3.0, 4.0, 1.0));
        assert_close(report.output, Vec3::new(3.0, 4.0, 1.0));

        // First real B sample produces the documented one-time jump.
        sw.update_source_b(Vec3::new(100.0, 0.0, 0.0));
        assert_close(sw.tick().output, Vec3::new(103.0, 4.0, 1.0));
    }

    #[test]
    fn double_request_before_tick_anchors_final_target() {
        let mut sw = SwitcherState::new();
        sw.update_source_a(Vec3::new(1.0, 1.0, 0.0));
        sw.update_source_b(Vec3::new(7.0, 7.0, 0.0));
        sw.tick();

        sw.request_switch(Source::B);
        sw.request_switch(Source::A);
        let report = sw.tick();

        let outcome = report.switched.expect("switch resolved");
        assert_eq!(outcome.to, Source::A);
        assert_eq!(sw.offset(Source::B), Vec3::zero());
        assert_close(report.output, Vec3::new(1.0, 1.0, 0.0));
    }
}
