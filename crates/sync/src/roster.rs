use glam::Vec3;

use crate::protocol::ParticipantState;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Vec3,
}

impl From<&ParticipantState> for Transform {
    fn from(state: &ParticipantState) -> Self {
        Self {
            position: state.position,
            rotation: state.rotation,
        }
    }
}

/// One roster slot. `displayed` is what the embedding application renders;
/// `target` is the most recent authoritative value. A slot whose participant
/// has left keeps its index and is flagged dead instead of being removed,
/// so other slots never shift underneath the renderer.
#[derive(Debug, Clone)]
pub struct ParticipantRecord {
    pub id: u32,
    pub displayed: Transform,
    pub target: Transform,
    pub live: bool,
}

impl ParticipantRecord {
    fn new(id: u32) -> Self {
        Self {
            id,
            displayed: Transform::default(),
            target: Transform::default(),
            live: true,
        }
    }

    fn from_state(state: &ParticipantState) -> Self {
        let transform = Transform::from(state);
        Self {
            id: state.id,
            displayed: transform,
            target: transform,
            live: true,
        }
    }
}

/// Local copy of session membership. Length always equals the known
/// participant count; any membership change goes through a full
/// reallocation via [`Roster::resync`].
#[derive(Debug, Default)]
pub struct Roster {
    records: Vec<ParticipantRecord>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: u32) -> Option<&ParticipantRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParticipantRecord> {
        self.records.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ParticipantRecord> {
        self.records.iter_mut()
    }

    pub fn live_count(&self) -> usize {
        self.records.iter().filter(|r| r.live).count()
    }

    /// Grow by one slot, assigning the next sequential id.
    pub fn add_participant(&mut self) -> u32 {
        let id = self.records.len() as u32;
        self.records.push(ParticipantRecord::new(id));
        id
    }

    /// Tombstone the slot for `id`. The id is never reused within a session.
    pub fn remove_participant(&mut self, id: u32) -> bool {
        match self.records.iter_mut().find(|r| r.id == id) {
            Some(record) => {
                record.live = false;
                true
            }
            None => false,
        }
    }

    /// Rebuild the roster sized exactly to `states`. Ids that already had a
    /// record keep their displayed transform and liveness flag (tombstones
    /// survive a resync); new ids enter snapped to the supplied state.
    pub fn resync(&mut self, states: &[ParticipantState]) {
        let old = std::mem::take(&mut self.records);
        self.records = states
            .iter()
            .map(|state| match old.iter().find(|r| r.id == state.id) {
                Some(prev) => ParticipantRecord {
                    id: state.id,
                    displayed: prev.displayed,
                    target: Transform::from(state),
                    live: prev.live,
                },
                None => ParticipantRecord::from_state(state),
            })
            .collect();
    }

    /// Index-aligned copy of authoritative transforms into record targets.
    /// Snapshot records arrive in roster order.
    pub fn retarget(&mut self, states: &[ParticipantState]) {
        for (record, state) in self.records.iter_mut().zip(states) {
            record.target = Transform::from(state);
        }
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Full teardown on control-channel loss: every participant except the
    /// local one is dropped, since the server's view of membership is no
    /// longer known.
    pub fn teardown(&mut self, local_id: Option<u32>) {
        self.records.retain(|r| Some(r.id) == local_id);
    }
}
