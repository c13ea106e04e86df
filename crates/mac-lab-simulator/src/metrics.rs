use std::collections::BTreeMap;

use mac_lab_abstract::{Record, SimulationConfig, event_code};
use serde::Serialize;

/// Per-receiver statistics derived from the event log.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NodeStats {
    pub generated: u64,
    pub dropped: u64,
    pub received: u64,
    pub corrupted: u64,
    pub corrupted_by_channel: u64,
    pub received_bytes: u64,
    /// Mbps at this receiver.
    pub throughput: f64,
    /// Fraction of incoming frames destroyed by collisions.
    pub collision_rate: f64,
    /// Fraction of generated frames dropped at the sender's queue.
    pub drop_rate: f64,
    /// Fraction of incoming frames destroyed by the channel.
    pub channel_corruption_rate: f64,
}

/// Serializable summary of a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub simulator: String,
    pub propagation: String,
    pub duration: f64,
    pub seed: u64,
    pub nodes: BTreeMap<usize, NodeStats>,
}

impl SimulationReport {
    pub fn new(config: &SimulationConfig, records: &[Record]) -> Self {
        Self {
            simulator: config.simulator.to_string(),
            propagation: config.propagation.to_string(),
            duration: config.duration,
            seed: config.seed,
            nodes: per_node_stats(records, config.duration),
        }
    }
}

/// Group the log rows by destination and compute throughput, collision rate,
/// drop rate and channel corruption rate over the simulated time.
pub fn per_node_stats(records: &[Record], sim_time: f64) -> BTreeMap<usize, NodeStats> {
    #[derive(Default)]
    struct Counters {
        generated: u64,
        dropped: u64,
        received: u64,
        corrupted: u64,
        corrupted_by_channel: u64,
        received_bytes: u64,
    }

    let mut by_dst: BTreeMap<usize, Counters> = BTreeMap::new();
    for record in records {
        let counters = by_dst.entry(record.dst).or_default();
        match record.event {
            event_code::GENERATED => counters.generated += 1,
            event_code::QUEUE_DROPPED => counters.dropped += 1,
            event_code::RECEIVED => {
                counters.received += 1;
                counters.received_bytes += u64::from(record.size);
            }
            event_code::CORRUPTED => counters.corrupted += 1,
            event_code::CORRUPTED_BY_CHANNEL => counters.corrupted_by_channel += 1,
            _ => {}
        }
    }

    let ratio = |num: u64, den: u64| if den == 0 { 0.0 } else { num as f64 / den as f64 };

    by_dst
        .into_iter()
        .map(|(dst, c)| {
            let incoming = c.received + c.corrupted + c.corrupted_by_channel;
            let stats = NodeStats {
                generated: c.generated,
                dropped: c.dropped,
                received: c.received,
                corrupted: c.corrupted,
                corrupted_by_channel: c.corrupted_by_channel,
                received_bytes: c.received_bytes,
                throughput: c.received_bytes as f64 * 8.0 / sim_time / (1024.0 * 1024.0),
                collision_rate: ratio(c.corrupted, incoming),
                drop_rate: ratio(c.dropped, c.generated),
                channel_corruption_rate: ratio(c.corrupted_by_channel, incoming),
            };
            (dst, stats)
        })
        .collect()
}
