use std::path::Path;

use anyhow::Context;
use mac_lab_abstract::{Packet, Record, event_code};

use crate::node::NodeState;
use crate::scheduler::NodeId;

/// Append-only sink of observation rows, the sole output of the engine.
///
/// Records are pushed in dispatch order, so `time` is non-decreasing.
#[derive(Debug, Default)]
pub struct Log {
    records: Vec<Record>,
}

impl Log {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    fn push(&mut self, time: f64, src: NodeId, dst: NodeId, event: u32, size: u32) {
        self.records.push(Record {
            time,
            src,
            dst,
            event,
            size,
        });
    }

    /// The traffic generator produced a frame of `size` bytes at `node`.
    pub fn arrival(&mut self, time: f64, node: NodeId, size: u32) {
        self.push(time, node, node, event_code::GENERATED, size);
    }

    /// A frame found the queue full and was thrown away.
    pub fn queue_drop(&mut self, time: f64, node: NodeId, size: u32) {
        self.push(time, node, node, event_code::QUEUE_DROPPED, size);
    }

    pub fn queue_length(&mut self, time: f64, node: NodeId, len: usize) {
        self.push(time, node, node, event_code::QUEUE_LENGTH, len as u32);
    }

    pub fn state_change(&mut self, time: f64, node: NodeId, state: NodeState) {
        self.push(time, node, node, event_code::STATE_CHANGED, state.code());
    }

    /// Final verdict on a frame at one receiver.
    pub fn packet_outcome(&mut self, time: f64, src: NodeId, dst: NodeId, packet: &Packet) {
        self.push(time, src, dst, packet.status.code(), packet.size);
    }

    /// Write all rows as `time,src,dst,event,size` CSV.
    pub fn write_csv(&self, path: &Path) -> anyhow::Result<()> {
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("cannot create log file {}", path.display()))?;
        for record in &self.records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mac_lab_abstract::PacketStatus;

    #[test]
    fn test_rows_carry_the_fixed_codes() {
        let mut log = Log::new();
        log.arrival(0.5, 2, 1460);
        log.queue_drop(0.6, 2, 900);
        log.queue_length(0.7, 2, 3);
        log.state_change(0.8, 2, NodeState::Tx);
        let mut packet = Packet::new(0, 1460, 0.00146);
        packet.status = PacketStatus::Corrupted;
        log.packet_outcome(0.9, 2, 4, &packet);

        let events: Vec<u32> = log.records().iter().map(|r| r.event).collect();
        assert_eq!(events, vec![10, 11, 21, 20, 2]);
        assert_eq!(log.records()[3].size, NodeState::Tx.code());
        assert_eq!(log.records()[4].src, 2);
        assert_eq!(log.records()[4].dst, 4);
    }

    #[test]
    fn test_write_csv_round_trip() {
        let mut log = Log::new();
        log.arrival(0.25, 0, 128);
        let mut packet = Packet::new(0, 128, 0.000128);
        packet.status = PacketStatus::Received;
        log.packet_outcome(0.5, 0, 1, &packet);

        let path = std::env::temp_dir().join("mac-lab-log-test.csv");
        log.write_csv(&path).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let mut lines = written.lines();
        assert_eq!(lines.next(), Some("time,src,dst,event,size"));
        assert_eq!(lines.next(), Some("0.25,0,0,10,128"));
        assert_eq!(lines.next(), Some("0.5,0,1,1,128"));
    }
}
