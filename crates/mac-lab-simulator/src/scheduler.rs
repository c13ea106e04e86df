use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use mac_lab_abstract::Packet;

pub type NodeId = usize;
pub type EventId = u64;

#[derive(Debug, Clone)]
pub enum EventKind {
    /// The traffic generator produced a new frame at `dst`.
    PacketArrival,
    /// Reserved; nothing schedules it.
    StartTx,
    /// The node's own transmission is over.
    EndTx { packet: Packet },
    /// A peer's frame starts hitting this node. The payload is this
    /// receiver's private copy of the frame.
    StartRx { packet: Packet },
    /// A frame that started hitting this node is over.
    EndRx { packet_id: u64 },
    /// Radio turnaround finished; the node may resume operations.
    EndProc,
    /// Guard against being stuck in RX forever.
    RxTimeout,
    /// p-persistence backoff expired.
    WtTimeout,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::PacketArrival => "PACKET_ARRIVAL",
            EventKind::StartTx => "START_TX",
            EventKind::EndTx { .. } => "END_TX",
            EventKind::StartRx { .. } => "START_RX",
            EventKind::EndRx { .. } => "END_RX",
            EventKind::EndProc => "END_PROC",
            EventKind::RxTimeout => "RX_TIMEOUT",
            EventKind::WtTimeout => "WT_TIMEOUT",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Event {
    pub time: f64,
    pub kind: EventKind,
    pub src: NodeId,
    pub dst: NodeId,
    /// Insertion counter, unique per run; ties on `time` dispatch in
    /// insertion order.
    pub seq: EventId,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse comparison for time: earliest time pops first
        other
            .time
            .total_cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Priority queue driving the simulation clock.
///
/// Cancellation is mark-and-skip: cancelled ids stay in the heap and are
/// discarded on extraction, which keeps `cancel` O(1).
pub struct Scheduler {
    queue: BinaryHeap<Event>,
    cancelled: HashSet<EventId>,
    seq: EventId,
    now: f64,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            queue: BinaryHeap::new(),
            cancelled: HashSet::new(),
            seq: 0,
            now: 0.0,
        }
    }

    /// Current simulated time in seconds. Never moves backwards.
    pub fn now(&self) -> f64 {
        self.now
    }

    pub fn schedule(&mut self, time: f64, kind: EventKind, src: NodeId, dst: NodeId) -> EventId {
        assert!(
            time >= self.now,
            "event {} scheduled in the past: {} < {}",
            kind.name(),
            time,
            self.now
        );
        let seq = self.seq;
        self.seq += 1;
        self.queue.push(Event {
            time,
            kind,
            src,
            dst,
            seq,
        });
        seq
    }

    /// Make a previously scheduled event a no-op.
    pub fn cancel(&mut self, id: EventId) {
        self.cancelled.insert(id);
    }

    /// Extract the next live event with `time <= t_end`, advancing the clock
    /// to it. Returns `None` when the queue is drained or the horizon is hit.
    pub fn pop_next(&mut self, t_end: f64) -> Option<Event> {
        while let Some(event) = self.queue.pop() {
            if event.time > t_end {
                self.queue.push(event);
                return None;
            }
            if self.cancelled.remove(&event.seq) {
                continue;
            }
            assert!(
                event.time >= self.now,
                "time went backwards: {} < {}",
                event.time,
                self.now
            );
            self.now = event.time;
            return Some(event);
        }
        None
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}
