//! Liveness state machine for one connection.
//!
//! Both ends of a connection run an idle watchdog. The client proactively
//! sends a heartbeat when the connection has been quiet for
//! `heartbeat_interval`; either end closes the connection when nothing has
//! been received for `idle_timeout`. Heartbeat frames are intercepted here,
//! so business handlers never see them.
//!
//! # Architecture: Action-Based State Machine
//!
//! - Methods accept time as a parameter (no clock is stored)
//! - Methods return [`LivenessAction`]s instead of performing I/O
//! - The driver (pooled client connection or server connection task)
//!   executes the actions
//!
//! ```text
//!           inbound / outbound traffic
//!              ┌──────────┐
//!              │          │
//!              ▼          │
//!          ┌────────┐─────┘       idle_timeout without inbound
//!  new ───>│ Active │───────────────────────────────┐
//!          └────────┘                               ▼
//!              │ heartbeat_interval quiet      ┌────────┐
//!              │ (client role only)            │ Closed │
//!              ▼                               └────────┘
//!        SendFrame(heartbeat)
//! ```

use std::time::{Duration, Instant};

use driftmq_proto::Frame;

/// Actions returned by the liveness state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LivenessAction {
    /// Send this frame to the peer
    SendFrame(Frame),

    /// Close the connection
    Close {
        /// Why the connection is being closed
        reason: String,
    },
}

/// Liveness state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessState {
    /// Traffic is flowing, or the connection is within its idle budget
    Active,
    /// Connection has been declared dead or closed explicitly
    Closed,
}

/// Which end of the connection this state machine runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Initiates heartbeats, absorbs heartbeat replies
    Client,
    /// Answers heartbeats, never initiates them
    Server,
}

/// Liveness timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessConfig {
    /// Close after this long without receiving anything
    pub idle_timeout: Duration,
    /// Client sends a heartbeat after this long without traffic
    /// (should be well below `idle_timeout`)
    pub heartbeat_interval: Duration,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self { idle_timeout: Duration::from_secs(90), heartbeat_interval: Duration::from_secs(30) }
    }
}

/// Result of offering an inbound frame to the liveness layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observed {
    /// Not a heartbeat; hand the frame to the application
    Application,
    /// Heartbeat consumed here; execute the returned actions
    Heartbeat(Vec<LivenessAction>),
}

/// Liveness state machine for a single connection.
#[derive(Debug, Clone)]
pub struct Liveness {
    role: Role,
    state: LivenessState,
    config: LivenessConfig,
    last_inbound: Instant,
    last_outbound: Instant,
}

impl Liveness {
    /// Create a state machine for a connection established at `now`.
    pub fn new(role: Role, now: Instant, config: LivenessConfig) -> Self {
        Self { role, state: LivenessState::Active, config, last_inbound: now, last_outbound: now }
    }

    /// Current state.
    pub fn state(&self) -> LivenessState {
        self.state
    }

    /// Whether the connection is still considered alive.
    pub fn is_active(&self) -> bool {
        self.state == LivenessState::Active
    }

    /// Role of this end.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Configured timing.
    pub fn config(&self) -> &LivenessConfig {
        &self.config
    }

    /// Mark the connection closed.
    pub fn close(&mut self) {
        self.state = LivenessState::Closed;
    }

    /// Call when any bytes or frames arrive from the peer.
    pub fn record_inbound(&mut self, now: Instant) {
        self.last_inbound = self.last_inbound.max(now);
    }

    /// Call when a frame is written to the peer.
    pub fn record_outbound(&mut self, now: Instant) {
        self.last_outbound = self.last_outbound.max(now);
    }

    /// Time since the peer was last heard from, once that reaches the idle
    /// timeout.
    #[must_use]
    pub fn check_timeout(&self, now: Instant) -> Option<Duration> {
        if self.state != LivenessState::Active {
            return None;
        }

        let elapsed = now.saturating_duration_since(self.last_inbound);
        if elapsed >= self.config.idle_timeout { Some(elapsed) } else { None }
    }

    /// Whether a client heartbeat should go out at `now`.
    #[must_use]
    pub fn heartbeat_due(&self, now: Instant) -> bool {
        if self.role != Role::Client || self.state != LivenessState::Active {
            return false;
        }

        let last_traffic = self.last_inbound.max(self.last_outbound);
        now.saturating_duration_since(last_traffic) >= self.config.heartbeat_interval
    }

    /// Earliest instant at which [`Self::tick`] could produce an action.
    ///
    /// Drivers sleep until this deadline instead of polling. Ticking at the
    /// deadline always yields an action, so the deadline moves forward.
    pub fn next_deadline(&self) -> Instant {
        let timeout_at = self.last_inbound + self.config.idle_timeout;
        match self.role {
            Role::Server => timeout_at,
            Role::Client => {
                let heartbeat_at = self.last_inbound.max(self.last_outbound)
                    + self.config.heartbeat_interval;
                timeout_at.min(heartbeat_at)
            },
        }
    }

    /// Check for idle timeout and heartbeat deadlines.
    ///
    /// Returns at most one action. A timeout closes the state machine and
    /// suppresses any heartbeat.
    pub fn tick(&mut self, now: Instant) -> Vec<LivenessAction> {
        if let Some(elapsed) = self.check_timeout(now) {
            self.close();
            return vec![LivenessAction::Close {
                reason: format!("idle timeout after {elapsed:?}"),
            }];
        }

        if self.heartbeat_due(now) {
            self.record_outbound(now);
            return vec![LivenessAction::SendFrame(Frame::heartbeat())];
        }

        Vec::new()
    }

    /// Offer an inbound frame to the liveness layer.
    ///
    /// Every frame counts as inbound activity. Heartbeats are consumed: the
    /// server answers them, the client absorbs them.
    pub fn observe(&mut self, frame: &Frame, now: Instant) -> Observed {
        self.record_inbound(now);

        if !frame.is_heartbeat() {
            return Observed::Application;
        }

        match self.role {
            Role::Server => {
                self.record_outbound(now);
                Observed::Heartbeat(vec![LivenessAction::SendFrame(Frame::heartbeat())])
            },
            Role::Client => Observed::Heartbeat(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use driftmq_proto::MessageType;

    use super::*;

    fn config() -> LivenessConfig {
        LivenessConfig {
            idle_timeout: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(20),
        }
    }

    #[test]
    fn client_heartbeat_timing() {
        let t0 = Instant::now();
        let mut live = Liveness::new(Role::Client, t0, config());

        // Fresh connection - nothing due
        assert!(live.tick(t0).is_empty());
        assert!(live.tick(t0 + Duration::from_secs(19)).is_empty());

        // Quiet for the heartbeat interval
        let t1 = t0 + Duration::from_secs(20);
        let actions = live.tick(t1);
        assert_eq!(actions, vec![LivenessAction::SendFrame(Frame::heartbeat())]);

        // Heartbeat counts as outbound traffic
        assert!(live.tick(t1 + Duration::from_secs(1)).is_empty());
        assert_eq!(live.tick(t1 + Duration::from_secs(20)).len(), 1);
    }

    #[test]
    fn outbound_traffic_defers_heartbeat() {
        let t0 = Instant::now();
        let mut live = Liveness::new(Role::Client, t0, config());

        live.record_outbound(t0 + Duration::from_secs(15));
        assert!(live.tick(t0 + Duration::from_secs(25)).is_empty());
        assert!(!live.tick(t0 + Duration::from_secs(35)).is_empty());
    }

    #[test]
    fn server_never_initiates_heartbeat() {
        let t0 = Instant::now();
        let mut live = Liveness::new(Role::Server, t0, config());

        assert!(live.tick(t0 + Duration::from_secs(59)).is_empty());
        assert!(!live.heartbeat_due(t0 + Duration::from_secs(59)));
    }

    #[test]
    fn idle_timeout_closes() {
        let t0 = Instant::now();
        let mut live = Liveness::new(Role::Server, t0, config());

        assert!(live.check_timeout(t0 + Duration::from_secs(59)).is_none());

        let t1 = t0 + Duration::from_secs(60);
        let actions = live.tick(t1);
        assert_eq!(actions.len(), 1);
        assert!(matches!(actions[0], LivenessAction::Close { .. }));
        assert_eq!(live.state(), LivenessState::Closed);

        // Closed connections stay quiet
        assert!(live.tick(t1 + Duration::from_secs(100)).is_empty());
    }

    #[test]
    fn client_heartbeats_do_not_mask_a_dead_peer() {
        let t0 = Instant::now();
        let mut live = Liveness::new(Role::Client, t0, config());

        // Heartbeats go out, nothing comes back
        for secs in [20, 40] {
            assert_eq!(live.tick(t0 + Duration::from_secs(secs)).len(), 1);
        }

        let actions = live.tick(t0 + Duration::from_secs(60));
        assert!(matches!(actions.as_slice(), [LivenessAction::Close { .. }]));
        assert!(!live.is_active());
    }

    #[test]
    fn server_answers_heartbeat() {
        let t0 = Instant::now();
        let mut live = Liveness::new(Role::Server, t0, config());

        let observed = live.observe(&Frame::heartbeat(), t0 + Duration::from_secs(50));
        assert_eq!(
            observed,
            Observed::Heartbeat(vec![LivenessAction::SendFrame(Frame::heartbeat())])
        );

        // Heartbeat refreshed the idle budget
        assert!(live.check_timeout(t0 + Duration::from_secs(100)).is_none());
    }

    #[test]
    fn client_absorbs_heartbeat() {
        let t0 = Instant::now();
        let mut live = Liveness::new(Role::Client, t0, config());

        assert_eq!(live.observe(&Frame::heartbeat(), t0), Observed::Heartbeat(Vec::new()));
    }

    #[test]
    fn application_frames_pass_through() {
        let t0 = Instant::now();
        let mut live = Liveness::new(Role::Server, t0, config());
        let frame = Frame::new(MessageType::Fetch, vec![0xA0]).unwrap();

        let t1 = t0 + Duration::from_secs(45);
        assert_eq!(live.observe(&frame, t1), Observed::Application);
        assert!(live.check_timeout(t1 + Duration::from_secs(59)).is_none());
    }

    #[test]
    fn next_deadline_tracks_role() {
        let t0 = Instant::now();
        let client = Liveness::new(Role::Client, t0, config());
        let server = Liveness::new(Role::Server, t0, config());

        assert_eq!(client.next_deadline(), t0 + Duration::from_secs(20));
        assert_eq!(server.next_deadline(), t0 + Duration::from_secs(60));
    }

    mod properties {
        use proptest::prelude::*;

        use super::*;

        #[derive(Debug, Clone)]
        enum Event {
            Inbound(u64),
            Outbound(u64),
            Tick(u64),
        }

        fn arb_event() -> impl Strategy<Value = Event> {
            prop_oneof![
                (0u64..40).prop_map(Event::Inbound),
                (0u64..40).prop_map(Event::Outbound),
                (0u64..40).prop_map(Event::Tick),
            ]
        }

        proptest! {
            #[test]
            fn server_only_ever_closes(events in prop::collection::vec(arb_event(), 0..64)) {
                let t0 = Instant::now();
                let mut live = Liveness::new(Role::Server, t0, config());
                let mut now = t0;
                let mut closes = 0;

                for event in events {
                    match event {
                        Event::Inbound(dt) => {
                            now += Duration::from_secs(dt);
                            live.record_inbound(now);
                        },
                        Event::Outbound(dt) => {
                            now += Duration::from_secs(dt);
                            live.record_outbound(now);
                        },
                        Event::Tick(dt) => {
                            now += Duration::from_secs(dt);
                            for action in live.tick(now) {
                                let is_close = matches!(action, LivenessAction::Close { .. });
                                prop_assert!(is_close);
                                closes += 1;
                            }
                        },
                    }
                }

                prop_assert!(closes <= 1);
                prop_assert_eq!(closes == 1, !live.is_active());
            }
        }
    }
}
