//! Session lifecycle and control-message handling.
//!
//! # Connection state machine
//! ```text
//! ┌──────────────┐      attempt_connect       ┌──────────────┐
//! │ Disconnected │ ──────────────────────────▶│  Connecting  │
//! └──────────────┘                            └──────────────┘
//!        ▲                                      │         │
//!        │                   ConnectionRejected │         │ ConnectionAccepted
//!        │◀─────────────────────────────────────┘         ▼
//!        │                                          ┌──────────────┐
//!        │        channel failure / peer close      │              │
//!        └◀─────────────────────────────────────────│  Connected   │
//!                     (full roster teardown)        └──────────────┘
//! ```
//!
//! While offline the publish timer doubles as the reconnect timer, so the
//! session keeps retrying at a bounded rate without busy-looping. The
//! embedding event loop owns scheduling: it calls [`Session::update`] with a
//! delta time and the readiness entry points when a socket is readable;
//! nothing here blocks and nothing runs concurrently.

use std::io;

use glam::Vec3;
use log::{debug, info, trace, warn};

use crate::config::ClientConfig;
use crate::interpolation::Interpolator;
use crate::protocol::{
    ControlEvent, ControlFrame, LocalState, MAX_DATAGRAM_SIZE, ParticipantState, Snapshot,
};
use crate::roster::Roster;
use crate::transport::{ControlChannel, StateChannel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// The local participant's current transform, sampled by the embedding
/// application (input/physics) and handed to [`Session::update`] each frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LocalPose {
    pub position: Vec3,
    pub rotation: Vec3,
    pub moving: bool,
}

pub struct Session {
    config: ClientConfig,
    state_channel: StateChannel,
    control: ControlChannel,
    state: ConnectionState,
    local_id: Option<u32>,
    last_sequence: u32,
    /// Working copy of the most recent snapshot, sized to the participant
    /// count. Roster rebuilds draw their initial state from here.
    latest: Vec<ParticipantState>,
    roster: Roster,
    interpolator: Interpolator,
    publish_clock: f32,
    idle_clock: f32,
}

impl Session {
    /// Binds the state channel and prepares the control channel. Transport
    /// setup failure here is the only fault that propagates to the embedding
    /// application; everything later is handled internally.
    pub fn new(config: ClientConfig) -> io::Result<Self> {
        let state_channel = StateChannel::open(config.local_port, config.state_addr)?;
        let control = ControlChannel::new(config.control_addr);

        Ok(Self {
            config,
            state_channel,
            control,
            state: ConnectionState::Disconnected,
            local_id: None,
            last_sequence: 0,
            latest: Vec::new(),
            roster: Roster::new(),
            interpolator: Interpolator::new(),
            publish_clock: 0.0,
            idle_clock: 0.0,
        })
    }

    /// Open the control channel and start the handshake. A no-op while
    /// already connected; a stalled `Connecting` attempt is replaced by a
    /// fresh one.
    pub fn attempt_connect(&mut self) {
        if self.state == ConnectionState::Connected {
            info!("already connected to {}", self.control.remote_addr());
            return;
        }

        info!("connecting to {}", self.control.remote_addr());
        self.idle_clock = 0.0;
        match self.control.connect() {
            Ok(()) => self.state = ConnectionState::Connecting,
            Err(e) => {
                warn!("connect to {} failed: {}", self.control.remote_addr(), e);
                self.control.close();
                self.state = ConnectionState::Disconnected;
            }
        }
    }

    /// Time-advance entry point, called once per render frame. While
    /// connected it drives the outbound publish tick and interpolation;
    /// while offline the same timer drives reconnection attempts.
    pub fn update(&mut self, dt: f32, pose: &LocalPose) {
        if self.state == ConnectionState::Connected {
            self.publish_clock += dt;
            if self.publish_clock >= self.config.publish_interval {
                self.publish(pose);
                self.interpolator.begin_interval();
                self.publish_clock = 0.0;
            }
            self.interpolator.advance(&mut self.roster, self.local_id);
        } else {
            self.idle_clock += dt;
            if self.idle_clock >= self.config.reconnect_wait {
                self.attempt_connect();
            }
        }
    }

    /// State-channel readiness entry point: one bounded read, then decode.
    pub fn on_state_readable(&mut self) {
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        match self.state_channel.recv(&mut buf) {
            Ok(Some(len)) => self.handle_state_datagram(&buf[..len]),
            Ok(None) => {}
            Err(e) => warn!("state channel read failed: {}", e),
        }
    }

    fn handle_state_datagram(&mut self, bytes: &[u8]) {
        let snapshot = match Snapshot::decode(bytes, self.roster.len()) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                debug!("discarding state message: {}", e);
                return;
            }
        };

        // Forward progress only. Plain comparison, no wraparound handling:
        // after a sequence wrap the receiver discards until the counter
        // catches back up.
        if snapshot.sequence <= self.last_sequence {
            trace!(
                "discarding snapshot {} (last seen {})",
                snapshot.sequence, self.last_sequence
            );
            return;
        }

        self.last_sequence = snapshot.sequence;
        self.latest.clear();
        self.latest.extend_from_slice(&snapshot.participants);
        self.roster.retarget(&self.latest);
    }

    /// Control-channel readiness entry point. Frames are applied strictly in
    /// arrival order; a read failure or peer close tears the session down.
    pub fn on_control_readable(&mut self) {
        match self.control.read_frames() {
            Ok(read) => {
                for frame in read.frames {
                    self.handle_control_frame(frame);
                }
                if read.closed {
                    self.on_control_lost("server closed the control channel");
                }
            }
            Err(e) => {
                let reason = e.to_string();
                self.on_control_lost(&reason);
            }
        }
    }

    fn handle_control_frame(&mut self, frame: ControlFrame) {
        if self.state == ConnectionState::Disconnected {
            debug!("ignoring control frame while disconnected");
            return;
        }
        let event = frame.into_event(self.state == ConnectionState::Connecting);
        self.apply_control_event(event);
    }

    fn apply_control_event(&mut self, event: ControlEvent) {
        match event {
            ControlEvent::ConnectionAccepted { assigned_id } => {
                // The server occupies slot 0, so the assigned id also tells
                // us how many participants precede us.
                let count = assigned_id as usize + 1;
                info!(
                    "connected, assigned participant id {} ({} participants)",
                    assigned_id, count
                );

                self.local_id = Some(assigned_id);
                self.state = ConnectionState::Connected;
                self.last_sequence = 0;
                self.publish_clock = 0.0;
                self.interpolator.reset();

                self.latest = (0..count as u32).map(ParticipantState::new).collect();
                self.roster.clear();
                for _ in 0..count {
                    self.roster.add_participant();
                }
                self.roster.resync(&self.latest);
            }
            ControlEvent::ConnectionRejected => {
                info!("server rejected connection");
                self.control.close();
                self.state = ConnectionState::Disconnected;
            }
            ControlEvent::ParticipantJoined { id } => {
                info!("participant {} joined", id);
                self.roster.add_participant();
                self.latest.push(ParticipantState::new(id));
                self.roster.resync(&self.latest);
            }
            ControlEvent::ParticipantLeft { id } => {
                info!("participant {} left", id);
                if !self.roster.remove_participant(id) {
                    warn!("leave event for unknown participant {}", id);
                }
                let count = self.roster.len().saturating_sub(1);
                self.latest.truncate(count);
                self.roster.resync(&self.latest);
            }
        }
    }

    /// Losing the control channel invalidates all membership knowledge, so
    /// everyone but the local participant is dropped and the session reverts
    /// to offline; the idle timer drives the retry.
    fn on_control_lost(&mut self, reason: &str) {
        if self.state == ConnectionState::Connected {
            warn!(
                "control channel lost ({}); continuing offline, will retry",
                reason
            );
            self.roster.teardown(self.local_id);
            self.latest = self
                .roster
                .iter()
                .map(|r| ParticipantState {
                    id: r.id,
                    position: r.target.position,
                    rotation: r.target.rotation,
                })
                .collect();
            self.interpolator.reset();
        } else {
            warn!("control channel failed while connecting: {}", reason);
        }

        self.control.close();
        self.state = ConnectionState::Disconnected;
        self.idle_clock = 0.0;
        self.publish_clock = 0.0;
    }

    /// Serialize the local pose and send it on the state channel. No ack, no
    /// retry: the next tick supersedes a lost message.
    fn publish(&mut self, pose: &LocalPose) {
        let Some(id) = self.local_id else {
            return;
        };
        let message = LocalState {
            id,
            position: pose.position,
            rotation: pose.rotation,
            moving: pose.moving,
        };
        if let Err(e) = self.state_channel.send(&message.encode()) {
            debug!("state publish failed: {}", e);
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn local_id(&self) -> Option<u32> {
        self.local_id
    }

    pub fn participant_count(&self) -> usize {
        self.roster.len()
    }

    pub fn last_sequence(&self) -> u32 {
        self.last_sequence
    }

    /// Read-only roster access for the render consumer.
    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.state_channel.local_addr()
    }
}
