use serde::{Deserialize, Serialize};

/// Reception outcome of a frame at one receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PacketStatus {
    /// The frame is still on the air; no verdict yet.
    Receiving,
    /// The frame was decoded successfully.
    Received,
    /// The frame overlapped with another one at this receiver.
    Corrupted,
    /// The frame survived all overlaps but the channel destroyed it
    /// (realistic propagation only).
    CorruptedByChannel,
}

impl PacketStatus {
    /// Fixed code understood by the downstream processing scripts.
    pub fn code(&self) -> u32 {
        match self {
            PacketStatus::Receiving => 0,
            PacketStatus::Received => 1,
            PacketStatus::Corrupted => 2,
            PacketStatus::CorruptedByChannel => 3,
        }
    }
}

/// A frame in flight.
///
/// The channel hands every receiver its own clone, so one receiver marking a
/// frame corrupted never leaks into another receiver's view. `prob_correct`
/// is written by the channel before dispatch and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct Packet {
    /// Unique, monotonically increasing per run.
    pub id: u64,
    /// Frame size in bytes.
    pub size: u32,
    /// Time the frame occupies the medium, in seconds.
    pub duration: f64,
    pub status: PacketStatus,
    /// Channel annotation consumed by the receiver at end of reception.
    pub prob_correct: f64,
}

impl Packet {
    pub fn new(id: u64, size: u32, duration: f64) -> Self {
        Self {
            id,
            size,
            duration,
            status: PacketStatus::Receiving,
            prob_correct: 1.0,
        }
    }
}
