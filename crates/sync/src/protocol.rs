use glam::Vec3;
use thiserror::Error;

pub const MAX_DATAGRAM_SIZE: usize = 1200;
pub const DEFAULT_STATE_PORT: u16 = 5500;

/// The server itself occupies the first roster slot.
pub const SERVER_PARTICIPANT_ID: u32 = 0;

pub const SNAPSHOT_HEADER_LEN: usize = 4;
pub const PARTICIPANT_RECORD_LEN: usize = 28;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("message too short: {actual} bytes, need {expected}")]
    TooShort { expected: usize, actual: usize },
    #[error("length mismatch: {actual} bytes, expected {expected} for {count} participants")]
    LengthMismatch {
        expected: usize,
        actual: usize,
        count: usize,
    },
}

fn read_u32(buf: &[u8]) -> u32 {
    u32::from_le_bytes(buf[0..4].try_into().expect("slice length is 4"))
}

fn read_f32(buf: &[u8]) -> f32 {
    f32::from_le_bytes(buf[0..4].try_into().expect("slice length is 4"))
}

fn read_vec3(buf: &[u8]) -> Vec3 {
    Vec3::new(read_f32(&buf[0..4]), read_f32(&buf[4..8]), read_f32(&buf[8..12]))
}

fn put_vec3(out: &mut [u8], v: Vec3) {
    out[0..4].copy_from_slice(&v.x.to_le_bytes());
    out[4..8].copy_from_slice(&v.y.to_le_bytes());
    out[8..12].copy_from_slice(&v.z.to_le_bytes());
}

/// One participant's authoritative state as carried in a snapshot.
///
/// Wire layout (28 bytes, little-endian):
/// - 0..4    id (u32)
/// - 4..16   position (3×f32)
/// - 16..28  rotation, Euler angles (3×f32)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParticipantState {
    pub id: u32,
    pub position: Vec3,
    pub rotation: Vec3,
}

impl ParticipantState {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
        }
    }

    fn decode(buf: &[u8]) -> Self {
        Self {
            id: read_u32(&buf[0..4]),
            position: read_vec3(&buf[4..16]),
            rotation: read_vec3(&buf[16..28]),
        }
    }

    fn encode_into(&self, out: &mut [u8]) {
        out[0..4].copy_from_slice(&self.id.to_le_bytes());
        put_vec3(&mut out[4..16], self.position);
        put_vec3(&mut out[16..28], self.rotation);
    }
}

/// One authoritative batch of all participants' transforms, received on the
/// state channel. Layout: `[sequence: u32][record × count]`. The record count
/// is not transmitted; the receiver decodes against its current roster size
/// and discards anything that does not match exactly.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub sequence: u32,
    pub participants: Vec<ParticipantState>,
}

impl Snapshot {
    pub fn decode(buf: &[u8], count: usize) -> Result<Self, WireError> {
        let expected = SNAPSHOT_HEADER_LEN + count * PARTICIPANT_RECORD_LEN;
        if buf.len() != expected {
            return Err(WireError::LengthMismatch {
                expected,
                actual: buf.len(),
                count,
            });
        }

        let sequence = read_u32(&buf[0..4]);
        let participants = buf[SNAPSHOT_HEADER_LEN..]
            .chunks_exact(PARTICIPANT_RECORD_LEN)
            .map(ParticipantState::decode)
            .collect();

        Ok(Self {
            sequence,
            participants,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out =
            vec![0u8; SNAPSHOT_HEADER_LEN + self.participants.len() * PARTICIPANT_RECORD_LEN];
        out[0..4].copy_from_slice(&self.sequence.to_le_bytes());
        for (i, state) in self.participants.iter().enumerate() {
            let offset = SNAPSHOT_HEADER_LEN + i * PARTICIPANT_RECORD_LEN;
            state.encode_into(&mut out[offset..offset + PARTICIPANT_RECORD_LEN]);
        }
        out
    }
}

/// Control message on the reliable channel (5 bytes):
/// - 0     connected flag (0 = false, anything else = true)
/// - 1..5  participant id (u32 LE)
///
/// What the frame means depends on the connection phase; see
/// [`ControlFrame::into_event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlFrame {
    pub connected: bool,
    pub participant_id: u32,
}

impl ControlFrame {
    pub const LEN: usize = 5;

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < Self::LEN {
            return Err(WireError::TooShort {
                expected: Self::LEN,
                actual: buf.len(),
            });
        }
        Ok(Self {
            connected: buf[0] != 0,
            participant_id: read_u32(&buf[1..5]),
        })
    }

    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        out[0] = self.connected as u8;
        out[1..5].copy_from_slice(&self.participant_id.to_le_bytes());
        out
    }

    /// Interpret the frame against the connection phase. While the handshake
    /// is outstanding the frame answers the connect request; once connected
    /// it announces a membership change.
    pub fn into_event(self, handshaking: bool) -> ControlEvent {
        match (handshaking, self.connected) {
            (true, true) => ControlEvent::ConnectionAccepted {
                assigned_id: self.participant_id,
            },
            (true, false) => ControlEvent::ConnectionRejected,
            (false, true) => ControlEvent::ParticipantJoined {
                id: self.participant_id,
            },
            (false, false) => ControlEvent::ParticipantLeft {
                id: self.participant_id,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    ConnectionAccepted { assigned_id: u32 },
    ConnectionRejected,
    ParticipantJoined { id: u32 },
    ParticipantLeft { id: u32 },
}

/// Outbound local-state message on the state channel (29 bytes):
/// - 0..4    local participant id (u32)
/// - 4..16   position (3×f32)
/// - 16..28  rotation (3×f32)
/// - 28      moving flag
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalState {
    pub id: u32,
    pub position: Vec3,
    pub rotation: Vec3,
    pub moving: bool,
}

impl LocalState {
    pub const LEN: usize = 29;

    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        out[0..4].copy_from_slice(&self.id.to_le_bytes());
        put_vec3(&mut out[4..16], self.position);
        put_vec3(&mut out[16..28], self.rotation);
        out[28] = self.moving as u8;
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < Self::LEN {
            return Err(WireError::TooShort {
                expected: Self::LEN,
                actual: buf.len(),
            });
        }
        Ok(Self {
            id: read_u32(&buf[0..4]),
            position: read_vec3(&buf[4..16]),
            rotation: read_vec3(&buf[16..28]),
            moving: buf[28] != 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_round_trip() {
        let snapshot = Snapshot {
            sequence: 7,
            participants: vec![
                ParticipantState {
                    id: 0,
                    position: Vec3::new(1.0, 2.0, 3.0),
                    rotation: Vec3::new(0.0, 1.5, 0.0),
                },
                ParticipantState {
                    id: 1,
                    position: Vec3::new(-4.0, 0.5, 9.0),
                    rotation: Vec3::ZERO,
                },
            ],
        };

        let bytes = snapshot.encode();
        assert_eq!(bytes.len(), SNAPSHOT_HEADER_LEN + 2 * PARTICIPANT_RECORD_LEN);

        let decoded = Snapshot::decode(&bytes, 2).unwrap();
        assert_eq!(decoded.sequence, 7);
        assert_eq!(decoded.participants, snapshot.participants);
    }

    #[test]
    fn test_snapshot_length_fence() {
        let snapshot = Snapshot {
            sequence: 1,
            participants: vec![ParticipantState::new(0), ParticipantState::new(1)],
        };
        let bytes = snapshot.encode();

        // Decoding against the wrong participant count must fail.
        assert!(matches!(
            Snapshot::decode(&bytes, 3),
            Err(WireError::LengthMismatch { count: 3, .. })
        ));
        assert!(Snapshot::decode(&bytes[..bytes.len() - 1], 2).is_err());
        assert!(Snapshot::decode(&[], 0).is_err());
    }

    #[test]
    fn test_snapshot_layout_offsets() {
        let snapshot = Snapshot {
            sequence: 0x01020304,
            participants: vec![ParticipantState {
                id: 5,
                position: Vec3::new(1.0, 0.0, 0.0),
                rotation: Vec3::ZERO,
            }],
        };
        let bytes = snapshot.encode();

        assert_eq!(&bytes[0..4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&bytes[4..8], &5u32.to_le_bytes());
        assert_eq!(&bytes[8..12], &1.0f32.to_le_bytes());
    }

    #[test]
    fn test_control_frame_round_trip() {
        let frame = ControlFrame {
            connected: true,
            participant_id: 3,
        };
        let decoded = ControlFrame::decode(&frame.encode()).unwrap();
        assert_eq!(decoded, frame);

        assert!(ControlFrame::decode(&[1, 0, 0]).is_err());
    }

    #[test]
    fn test_control_frame_interpretation() {
        let accepted = ControlFrame {
            connected: true,
            participant_id: 2,
        };
        assert_eq!(
            accepted.into_event(true),
            ControlEvent::ConnectionAccepted { assigned_id: 2 }
        );
        assert_eq!(
            accepted.into_event(false),
            ControlEvent::ParticipantJoined { id: 2 }
        );

        let dropped = ControlFrame {
            connected: false,
            participant_id: 2,
        };
        assert_eq!(dropped.into_event(true), ControlEvent::ConnectionRejected);
        assert_eq!(
            dropped.into_event(false),
            ControlEvent::ParticipantLeft { id: 2 }
        );
    }

    #[test]
    fn test_local_state_layout() {
        let state = LocalState {
            id: 4,
            position: Vec3::new(10.0, 0.0, -2.0),
            rotation: Vec3::new(0.0, 0.25, 0.0),
            moving: true,
        };

        let bytes = state.encode();
        assert_eq!(bytes.len(), LocalState::LEN);
        assert_eq!(&bytes[0..4], &4u32.to_le_bytes());
        assert_eq!(bytes[28], 1);

        let decoded = LocalState::decode(&bytes).unwrap();
        assert_eq!(decoded, state);
    }
}
