use crate::roster::Roster;

/// Smooths displayed transforms between authoritative snapshots.
///
/// The publish tick divides time into intervals. At each tick the engine
/// measures how many render frames the previous interval spanned and sets
/// the per-frame step to `1 / frames`, so the accumulated fraction reaches
/// 1.0 right around the next tick regardless of frame rate. The fraction is
/// clamped; displayed transforms never move past their targets.
#[derive(Debug)]
pub struct Interpolator {
    step: f32,
    fraction: f32,
    frames_in_interval: u32,
}

impl Default for Interpolator {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpolator {
    pub fn new() -> Self {
        Self {
            step: 0.0,
            fraction: 0.0,
            frames_in_interval: 0,
        }
    }

    /// Called on each outbound publish tick: rebase the fraction and derive
    /// the step from the frame count of the interval just ended.
    pub fn begin_interval(&mut self) {
        self.step = 1.0 / self.frames_in_interval.max(1) as f32;
        self.frames_in_interval = 0;
        self.fraction = 0.0;
    }

    /// Advance every live remote record's displayed transform toward its
    /// target. Called once per render frame.
    pub fn advance(&mut self, roster: &mut Roster, local_id: Option<u32>) {
        self.frames_in_interval += 1;
        self.fraction = (self.fraction + self.step).min(1.0);
        let t = self.fraction;

        for record in roster.iter_mut() {
            if !record.live || Some(record.id) == local_id {
                continue;
            }
            record.displayed.position = record.displayed.position.lerp(record.target.position, t);
            record.displayed.rotation = record.displayed.rotation.lerp(record.target.rotation, t);
        }
    }

    pub fn fraction(&self) -> f32 {
        self.fraction
    }

    pub fn reset(&mut self) {
        self.step = 0.0;
        self.fraction = 0.0;
        self.frames_in_interval = 0;
    }
}
