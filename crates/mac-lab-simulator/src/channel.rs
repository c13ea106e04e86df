use mac_lab_abstract::Packet;
use tracing::trace;

use crate::scheduler::{EventKind, NodeId, Scheduler};

/// Per-receiver channel annotation attached to every delivered frame copy.
///
/// The value lands in [`Packet::prob_correct`] and is consumed by the
/// receiver at end of reception: the frame survives the channel when a
/// uniform draw is `>= prob_correct`. Colocated receivers must therefore get
/// 0 from a model that never corrupts them.
pub trait Propagation {
    fn prob_correct(&self, distance: f64, size: u32) -> f64;
}

/// Collisions are the only corruption source.
pub struct Original;

impl Propagation for Original {
    fn prob_correct(&self, _distance: f64, _size: u32) -> f64 {
        1.0
    }
}

/// Distance-proportional channel corruption: colocated receivers always
/// decode, receivers at the edge of the range almost never do.
pub struct Realistic {
    pub range: f64,
}

impl Propagation for Realistic {
    fn prob_correct(&self, distance: f64, _size: u32) -> f64 {
        (distance / self.range).clamp(0.0, 1.0)
    }
}

/// The shared medium. Fans every transmission out to all other nodes within
/// range, with zero propagation delay.
pub struct Channel {
    positions: Vec<(f64, f64)>,
    range: f64,
    propagation: Box<dyn Propagation>,
}

impl Channel {
    pub fn new(positions: Vec<(f64, f64)>, range: f64, propagation: Box<dyn Propagation>) -> Self {
        Self {
            positions,
            range,
            propagation,
        }
    }

    /// Schedule a `StartRx` on every node other than `source` that is within
    /// range, each with its own frame copy annotated for its distance.
    /// A node never hears its own transmission.
    pub fn start_transmission(&self, scheduler: &mut Scheduler, source: NodeId, packet: &Packet) {
        let (sx, sy) = self.positions[source];
        let now = scheduler.now();
        for (dst, &(x, y)) in self.positions.iter().enumerate() {
            if dst == source {
                continue;
            }
            let distance = (x - sx).hypot(y - sy);
            if distance > self.range {
                continue;
            }
            let mut copy = packet.clone();
            copy.prob_correct = self.propagation.prob_correct(distance, copy.size);
            trace!(src = source, dst, distance, prob_correct = copy.prob_correct, "fan-out");
            scheduler.schedule(now, EventKind::StartRx { packet: copy }, source, dst);
        }
    }
}
