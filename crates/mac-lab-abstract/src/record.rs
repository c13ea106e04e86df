use serde::{Deserialize, Serialize};

/// Fixed event codes written to the output log.
///
/// The packet outcome codes (0..=3) and the generation codes (10, 11) are
/// consumed by the downstream statistics; the remaining codes only matter to
/// anyone eyeballing the raw rows.
pub mod event_code {
    pub const RECEIVING: u32 = 0;
    pub const RECEIVED: u32 = 1;
    pub const CORRUPTED: u32 = 2;
    pub const CORRUPTED_BY_CHANNEL: u32 = 3;
    pub const GENERATED: u32 = 10;
    pub const QUEUE_DROPPED: u32 = 11;
    /// Node state transition; the state id travels in the `size` column.
    pub const STATE_CHANGED: u32 = 20;
    /// Queue length sample; the length travels in the `size` column.
    pub const QUEUE_LENGTH: u32 = 21;
}

/// One observation row: `time,src,dst,event,size`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub time: f64,
    pub src: usize,
    pub dst: usize,
    pub event: u32,
    pub size: u32,
}
