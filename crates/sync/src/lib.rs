//! Client-side session synchronization for a real-time multi-participant
//! simulation. Keeps a live connection to a central server over a reliable
//! control channel (TCP) and an unreliable state channel (UDP), maintains a
//! roster of remote participants, reconciles it against sequence-numbered
//! snapshots, and smooths displayed motion between them.

pub mod config;
pub mod interpolation;
pub mod protocol;
pub mod roster;
pub mod session;
pub mod transport;

pub use config::ClientConfig;
pub use interpolation::Interpolator;
pub use protocol::{
    ControlEvent, ControlFrame, DEFAULT_STATE_PORT, LocalState, MAX_DATAGRAM_SIZE,
    PARTICIPANT_RECORD_LEN, ParticipantState, SERVER_PARTICIPANT_ID, SNAPSHOT_HEADER_LEN, Snapshot,
    WireError,
};
pub use roster::{ParticipantRecord, Roster, Transform};
pub use session::{ConnectionState, LocalPose, Session};
pub use transport::{ControlChannel, ControlRead, StateChannel};
