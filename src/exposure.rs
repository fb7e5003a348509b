//! Exposure lifecycle state machine
//!
//! Tracks the detector timer through Idle → Preparing → Exposing → Idle (an
//! exposure) or Idle → Waiting → Idle (a dead timer used for client pacing,
//! with no hardware involvement). Transition legality is enforced here; the
//! dispatcher owns hardware calls and status publication.
//!
//! The machine is advanced by a cooperative tick from the server loop, not a
//! timer thread, so timing resolution is bounded by the poll interval (kept
//! at one millisecond).

use crate::dispatch::Caller;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Detector timer states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CamState {
    Idle,
    Preparing,
    Exposing,
    Waiting,
}

impl CamState {
    /// Status-store string for this state
    pub fn as_str(self) -> &'static str {
        match self {
            CamState::Idle => "idle",
            CamState::Preparing => "preparing",
            CamState::Exposing => "exposing",
            CamState::Waiting => "waiting",
        }
    }
}

/// Attempted transition was illegal for the current state
#[derive(Debug, Error, PartialEq, Eq)]
#[error("timer busy: detector is {0:?}")]
pub struct StateError(pub CamState);

/// What a finished run was, handed back to the dispatcher for wrap-up
#[derive(Debug)]
pub struct FinishedRun {
    pub was: CamState,
    pub target: Option<PathBuf>,
    pub initiator: Option<Caller>,
    pub wants_response: bool,
    pub elapsed: Duration,
}

/// The exposure timer and its bookkeeping.
///
/// The initiator is tracked separately from "controlling": a long exposure
/// may outlive the poll cycle of the worker that started it, and the final
/// OK/ERR frame must still reach that worker.
#[derive(Debug)]
pub struct ExposureState {
    state: CamState,
    started: Option<Instant>,
    ends: Option<Instant>,
    seconds: f64,
    target: Option<PathBuf>,
    pub shutter_open: bool,
    initiator: Option<Caller>,
    wants_response: bool,
}

impl Default for ExposureState {
    fn default() -> Self {
        Self::new()
    }
}

impl ExposureState {
    pub fn new() -> Self {
        ExposureState {
            state: CamState::Idle,
            started: None,
            ends: None,
            seconds: 0.0,
            target: None,
            shutter_open: false,
            initiator: None,
            wants_response: false,
        }
    }

    pub fn state(&self) -> CamState {
        self.state
    }

    /// True while any timer is active (state is not Idle)
    pub fn timer_running(&self) -> bool {
        self.state != CamState::Idle
    }

    pub fn target(&self) -> Option<&PathBuf> {
        self.target.as_ref()
    }

    pub fn initiator(&self) -> Option<Caller> {
        self.initiator
    }

    /// Seconds of the current run
    pub fn seconds(&self) -> f64 {
        self.seconds
    }

    /// Idle → Preparing. Only legal entry into an exposure.
    pub fn begin_preparing(
        &mut self,
        target: PathBuf,
        seconds: f64,
        by: Caller,
        wants_response: bool,
    ) -> Result<(), StateError> {
        if self.state != CamState::Idle {
            return Err(StateError(self.state));
        }
        self.state = CamState::Preparing;
        self.seconds = seconds;
        self.target = Some(target);
        self.initiator = Some(by);
        self.wants_response = wants_response;
        Ok(())
    }

    /// Preparing → Exposing after successful hardware prepare+start;
    /// arms the timer.
    pub fn confirm_started(&mut self, now: Instant) {
        debug_assert_eq!(self.state, CamState::Preparing);
        self.state = CamState::Exposing;
        self.started = Some(now);
        self.ends = Some(now + Duration::from_secs_f64(self.seconds));
    }

    /// Preparing → Idle when hardware prepare or start fails
    pub fn cancel_preparing(&mut self) {
        debug_assert_eq!(self.state, CamState::Preparing);
        self.reset();
    }

    /// Idle → Waiting: a dead timer with no hardware exposure
    pub fn begin_wait(
        &mut self,
        seconds: f64,
        now: Instant,
        by: Caller,
        wants_response: bool,
    ) -> Result<(), StateError> {
        if self.state != CamState::Idle {
            return Err(StateError(self.state));
        }
        self.state = CamState::Waiting;
        self.seconds = seconds;
        self.started = Some(now);
        self.ends = Some(now + Duration::from_secs_f64(seconds.max(0.0)));
        self.initiator = Some(by);
        self.wants_response = wants_response;
        Ok(())
    }

    /// Timer has reached its end time
    pub fn expired(&self, now: Instant) -> bool {
        match self.ends {
            Some(ends) => now >= ends,
            None => false,
        }
    }

    /// Seconds left on the running timer, clamped at zero
    pub fn remaining(&self, now: Instant) -> f64 {
        match self.ends {
            Some(ends) => ends.saturating_duration_since(now).as_secs_f64(),
            None => 0.0,
        }
    }

    /// Seconds since the timer was armed
    pub fn elapsed(&self, now: Instant) -> f64 {
        match self.started {
            Some(started) => now.saturating_duration_since(started).as_secs_f64(),
            None => 0.0,
        }
    }

    /// Any → Idle on expiry or explicit stop; returns the run summary for
    /// the dispatcher wrap-up (readout, status, initiator response).
    pub fn finish(&mut self, now: Instant) -> FinishedRun {
        let run = FinishedRun {
            was: self.state,
            target: self.target.take(),
            initiator: self.initiator.take(),
            wants_response: self.wants_response,
            elapsed: self
                .started
                .map(|s| now.saturating_duration_since(s))
                .unwrap_or_default(),
        };
        self.reset();
        run
    }

    fn reset(&mut self) {
        self.state = CamState::Idle;
        self.started = None;
        self.ends = None;
        self.target = None;
        self.initiator = None;
        self.wants_response = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exp() -> ExposureState {
        ExposureState::new()
    }

    #[test]
    fn test_initial_state_idle() {
        let e = exp();
        assert_eq!(e.state(), CamState::Idle);
        assert!(!e.timer_running());
    }

    #[test]
    fn test_exposure_path() {
        let mut e = exp();
        let now = Instant::now();
        e.begin_preparing("/tmp/a.img".into(), 0.5, Caller::Worker(1), true)
            .unwrap();
        assert_eq!(e.state(), CamState::Preparing);
        e.confirm_started(now);
        assert_eq!(e.state(), CamState::Exposing);
        assert!(!e.expired(now));
        assert!(e.expired(now + Duration::from_millis(501)));
        let run = e.finish(now + Duration::from_millis(501));
        assert_eq!(run.was, CamState::Exposing);
        assert_eq!(run.initiator, Some(Caller::Worker(1)));
        assert_eq!(run.target, Some("/tmp/a.img".into()));
        assert_eq!(e.state(), CamState::Idle);
    }

    #[test]
    fn test_preparing_reachable_only_from_idle() {
        let mut e = exp();
        let now = Instant::now();
        e.begin_wait(1.0, now, Caller::Console, false).unwrap();
        let err = e
            .begin_preparing("/tmp/a.img".into(), 1.0, Caller::Console, false)
            .unwrap_err();
        assert_eq!(err, StateError(CamState::Waiting));

        let mut e = exp();
        e.begin_preparing("/tmp/a.img".into(), 1.0, Caller::Console, false)
            .unwrap();
        assert!(e
            .begin_preparing("/tmp/b.img".into(), 1.0, Caller::Console, false)
            .is_err());
    }

    #[test]
    fn test_wait_rejected_while_busy() {
        let mut e = exp();
        let now = Instant::now();
        e.begin_preparing("/tmp/a.img".into(), 1.0, Caller::Worker(2), true)
            .unwrap();
        e.confirm_started(now);
        assert_eq!(
            e.begin_wait(0.1, now, Caller::Worker(2), true),
            Err(StateError(CamState::Exposing))
        );
    }

    #[test]
    fn test_zero_second_wait_expires_immediately() {
        let mut e = exp();
        let now = Instant::now();
        e.begin_wait(0.0, now, Caller::Worker(1), true).unwrap();
        assert_eq!(e.state(), CamState::Waiting);
        assert!(e.expired(now));
    }

    #[test]
    fn test_cancel_preparing_reverts_to_idle() {
        let mut e = exp();
        e.begin_preparing("/tmp/a.img".into(), 1.0, Caller::Worker(1), true)
            .unwrap();
        e.cancel_preparing();
        assert_eq!(e.state(), CamState::Idle);
        assert!(e.target().is_none());
    }

    #[test]
    fn test_remaining_counts_down() {
        let mut e = exp();
        let now = Instant::now();
        e.begin_wait(2.0, now, Caller::Console, false).unwrap();
        let r = e.remaining(now + Duration::from_millis(500));
        assert!((r - 1.5).abs() < 0.01, "remaining = {}", r);
        assert_eq!(e.remaining(now + Duration::from_secs(3)), 0.0);
    }

    #[test]
    fn test_sub_second_timer_resolution() {
        // The tick runs every millisecond-scale poll cycle; a 50 ms wait
        // must be seen as expired well inside a second.
        let mut e = exp();
        let now = Instant::now();
        e.begin_wait(0.05, now, Caller::Worker(1), true).unwrap();
        let deadline = Instant::now() + Duration::from_millis(900);
        loop {
            let t = Instant::now();
            if e.expired(t) {
                break;
            }
            assert!(t < deadline, "50 ms wait not expired within 900 ms");
            std::thread::sleep(Duration::from_micros(500));
        }
    }

    #[test]
    fn test_invariant_start_before_end() {
        let mut e = exp();
        let now = Instant::now();
        e.begin_preparing("/t".into(), 0.25, Caller::Worker(1), true)
            .unwrap();
        e.confirm_started(now);
        // state != Idle implies started <= now <= ends + epsilon
        let mid = now + Duration::from_millis(100);
        assert!(e.elapsed(mid) >= 0.0);
        assert!(e.remaining(mid) > 0.0);
    }
}
