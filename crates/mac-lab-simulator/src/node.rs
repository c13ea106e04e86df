use std::collections::{HashMap, VecDeque};

use mac_lab_abstract::{
    ConfigError, Packet, PacketStatus, PropagationKind, SimulationConfig, SimulatorKind,
};
use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::channel::Channel;
use crate::distribution::Distribution;
use crate::log::Log;
use crate::scheduler::{Event, EventId, EventKind, NodeId, Scheduler};

/// Extra guard on top of the longest possible frame before the RX timeout
/// fires: 10 microseconds.
const RX_TIMEOUT_GUARD: f64 = 10e-6;

/// Backoff mean is this many times the longest frame's transmission time.
const BACKOFF_MEAN_FACTOR: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Idle,
    Tx,
    Rx,
    Proc,
    /// Waiting for the channel to go quiet, then transmit immediately.
    Wc,
    /// Waiting a random exponential time before sensing again.
    Wt,
}

impl NodeState {
    /// Fixed state id written to the output log.
    pub fn code(&self) -> u32 {
        match self {
            NodeState::Idle => 0,
            NodeState::Tx => 1,
            NodeState::Rx => 2,
            NodeState::Proc => 3,
            NodeState::Wc => 4,
            NodeState::Wt => 5,
        }
    }
}

/// Everything a node may touch while handling one event.
///
/// The simulator owns all of these; it splits the borrows per dispatch so a
/// node can schedule, draw, log and fan out without seeing other nodes.
pub struct Ctx<'a> {
    pub scheduler: &'a mut Scheduler,
    pub channel: &'a Channel,
    pub rng: &'a mut ChaCha8Rng,
    pub log: &'a mut Log,
    pub packet_seq: &'a mut u64,
}

impl Ctx<'_> {
    fn next_packet_id(&mut self) -> u64 {
        let id = *self.packet_seq;
        *self.packet_seq += 1;
        id
    }
}

/// Shared per-node parameters derived from the run configuration.
#[derive(Clone)]
pub struct NodeParams {
    pub datarate: f64,
    /// 0 means unbounded.
    pub queue_capacity: usize,
    pub maxsize: u32,
    pub p_persistence: f64,
    /// false for pure ALOHA: the node resumes after processing without
    /// looking at the channel.
    pub sensing: bool,
    /// Roll the channel-corruption check at end of reception.
    pub realistic: bool,
    pub interarrival: Distribution,
    pub size: Distribution,
    pub proc_time: Distribution,
}

impl NodeParams {
    pub fn from_config(config: &SimulationConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            datarate: config.datarate,
            queue_capacity: config.queue,
            maxsize: config.maxsize,
            p_persistence: config.effective_persistence(),
            sensing: config.simulator != SimulatorKind::Aloha,
            realistic: config.propagation == PropagationKind::Realistic,
            interarrival: Distribution::from_spec(&config.interarrival)?,
            size: Distribution::from_spec(&config.size)?,
            proc_time: Distribution::from_spec(&config.processing)?,
        })
    }
}

/// One station on the shared medium: traffic generator, bounded FIFO queue,
/// MAC state machine and bookkeeping for every frame currently hitting it.
pub struct Node {
    pub id: NodeId,
    /// Position in metres; the channel keeps its own copy for the fan-out.
    pub x: f64,
    pub y: f64,
    state: NodeState,
    /// Sizes (bytes) of frames waiting to be sent.
    queue: VecDeque<u32>,
    /// Id of the frame being transmitted (TX) or decoded (RX).
    current_pkt: Option<u64>,
    /// This receiver's private copy of every frame currently on the air here.
    inflight: HashMap<u64, Packet>,
    receiving_count: u32,
    timeout_rx: Option<EventId>,
    timeout_wt: Option<EventId>,
    params: NodeParams,
    /// Strictly longer than the longest possible frame.
    rx_timeout_time: f64,
    backoff: Distribution,
}

impl Node {
    pub fn new(id: NodeId, x: f64, y: f64, params: NodeParams) -> Result<Self, ConfigError> {
        let packet_max_tx_time = f64::from(params.maxsize) * 8.0 / params.datarate;
        let backoff = Distribution::exponential(BACKOFF_MEAN_FACTOR * packet_max_tx_time)?;
        Ok(Self {
            id,
            x,
            y,
            state: NodeState::Idle,
            queue: VecDeque::new(),
            current_pkt: None,
            inflight: HashMap::new(),
            receiving_count: 0,
            timeout_rx: None,
            timeout_wt: None,
            rx_timeout_time: packet_max_tx_time + RX_TIMEOUT_GUARD,
            backoff,
            params,
        })
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn receiving_count(&self) -> u32 {
        self.receiving_count
    }

    /// Start node operation by scheduling its first arrival. The initial
    /// IDLE state is logged here as well.
    pub fn initialize(&mut self, ctx: &mut Ctx) {
        ctx.log
            .state_change(ctx.scheduler.now(), self.id, NodeState::Idle);
        self.schedule_next_arrival(ctx);
    }

    pub fn handle_event(&mut self, ctx: &mut Ctx, event: Event) {
        debug_assert_eq!(event.dst, self.id);
        match event.kind {
            EventKind::PacketArrival => self.handle_arrival(ctx),
            EventKind::StartRx { packet } => self.handle_start_rx(ctx, event.src, packet),
            EventKind::EndRx { packet_id } => self.handle_end_rx(ctx, event.src, packet_id),
            EventKind::EndTx { packet } => self.handle_end_tx(ctx, &packet),
            EventKind::EndProc => self.handle_end_proc(ctx),
            EventKind::RxTimeout => self.handle_rx_timeout(ctx),
            EventKind::WtTimeout => self.handle_wt_timeout(ctx),
            EventKind::StartTx => panic!(
                "node {} received a START_TX event, which is never scheduled",
                self.id
            ),
        }
        debug_assert_eq!(self.receiving_count as usize, self.inflight.len());
    }

    fn schedule_next_arrival(&mut self, ctx: &mut Ctx) {
        let gap = self.params.interarrival.draw(ctx.rng);
        let at = ctx.scheduler.now() + gap;
        ctx.scheduler
            .schedule(at, EventKind::PacketArrival, self.id, self.id);
    }

    /// The traffic generator produced a frame: transmit it right away when
    /// idle, otherwise queue it (or drop it when the queue is full).
    fn handle_arrival(&mut self, ctx: &mut Ctx) {
        // draws above maxsize would outlive the RX timeout at the receivers
        let size = (self.params.size.draw(ctx.rng).round() as u32).clamp(1, self.params.maxsize);
        ctx.log.arrival(ctx.scheduler.now(), self.id, size);

        if self.state == NodeState::Idle {
            assert!(
                self.queue.is_empty(),
                "node {} idle with a non-empty queue",
                self.id
            );
            self.transmit_packet(ctx, size);
            self.change_state(ctx, NodeState::Tx);
        } else if self.params.queue_capacity == 0 || self.queue.len() < self.params.queue_capacity {
            self.queue.push_back(size);
            ctx.log
                .queue_length(ctx.scheduler.now(), self.id, self.queue.len());
        } else {
            ctx.log.queue_drop(ctx.scheduler.now(), self.id, size);
        }

        self.schedule_next_arrival(ctx);
    }

    /// A peer's frame starts hitting this node.
    fn handle_start_rx(&mut self, ctx: &mut Ctx, src: NodeId, mut packet: Packet) {
        if self.state == NodeState::Idle && self.receiving_count == 0 {
            self.receive_packet(ctx, &mut packet);
        } else if self.state == NodeState::Wt && self.receiving_count == 0 {
            // backoff interrupted by a frame on the air: listen to it instead
            match self.timeout_wt.take() {
                Some(id) => ctx.scheduler.cancel(id),
                None => panic!("node {} in WT without a live backoff timeout", self.id),
            }
            self.receive_packet(ctx, &mut packet);
        } else {
            // a sensing node resumes through WC, so it can never sit idle
            // while frames are still on the air
            assert!(
                !(self.params.sensing && self.state == NodeState::Idle),
                "node {} idle with {} frames on the air",
                self.id,
                self.receiving_count
            );
            // busy: the new frame overlaps with whatever this node is doing,
            // and so does the frame currently being decoded, if any
            if self.state == NodeState::Rx
                && let Some(current) = self.current_pkt
                && let Some(frame) = self.inflight.get_mut(&current)
            {
                frame.status = PacketStatus::Corrupted;
            }
            packet.status = PacketStatus::Corrupted;
        }

        let end = ctx.scheduler.now() + packet.duration;
        ctx.scheduler.schedule(
            end,
            EventKind::EndRx {
                packet_id: packet.id,
            },
            src,
            self.id,
        );
        self.receiving_count += 1;
        self.inflight.insert(packet.id, packet);
    }

    /// Lock onto a frame. Only valid when nothing else is on the air.
    fn receive_packet(&mut self, ctx: &mut Ctx, packet: &mut Packet) {
        assert!(
            self.current_pkt.is_none(),
            "node {} locking onto a frame while already decoding one",
            self.id
        );
        assert!(
            self.timeout_rx.is_none(),
            "node {} entering RX with a live rx timeout",
            self.id
        );
        packet.status = PacketStatus::Receiving;
        self.current_pkt = Some(packet.id);
        let at = ctx.scheduler.now() + self.rx_timeout_time;
        self.timeout_rx = Some(
            ctx.scheduler
                .schedule(at, EventKind::RxTimeout, self.id, self.id),
        );
        self.change_state(ctx, NodeState::Rx);
    }

    /// A frame that was hitting this node is over: settle its verdict.
    fn handle_end_rx(&mut self, ctx: &mut Ctx, src: NodeId, packet_id: u64) {
        if self.params.sensing {
            assert!(
                self.state != NodeState::Idle,
                "node {} got an end of reception while idle",
                self.id
            );
        }
        assert!(
            self.receiving_count >= 1,
            "node {} got an end of reception with no frame on the air",
            self.id
        );

        let mut packet = match self.inflight.remove(&packet_id) {
            Some(packet) => packet,
            None => panic!(
                "node {}: end of reception for unknown frame {}",
                self.id, packet_id
            ),
        };

        if self.current_pkt == Some(packet_id) {
            assert!(
                self.state == NodeState::Rx,
                "node {} holds frame {} outside RX",
                self.id,
                packet_id
            );
        }

        if self.state == NodeState::Rx {
            if packet.status == PacketStatus::Receiving {
                // no overlap so far: the channel has the last word
                if self.params.realistic {
                    let roll: f64 = ctx.rng.random();
                    packet.status = if roll >= packet.prob_correct {
                        PacketStatus::Received
                    } else {
                        PacketStatus::CorruptedByChannel
                    };
                } else {
                    packet.status = PacketStatus::Received;
                }
                // only the frame we locked onto can still be clean
                assert_eq!(
                    self.current_pkt,
                    Some(packet_id),
                    "node {} decoded a frame it was not locked onto",
                    self.id
                );
            }
            // the node may sit in RX with no current frame when an
            // overlapping frame outlives the one it was locked onto; it
            // stays in RX because it cannot detect the end of the frame
            if self.current_pkt == Some(packet_id) {
                self.current_pkt = None;
            }
            if self.receiving_count == 1 {
                // last frame on the air, resume through the turnaround
                match self.timeout_rx.take() {
                    Some(id) => ctx.scheduler.cancel(id),
                    None => panic!("node {} leaving RX without a live rx timeout", self.id),
                }
                self.switch_to_proc(ctx);
            }
        } else if self.state == NodeState::Wc && self.receiving_count == 1 {
            // the channel just went quiet
            if self.queue.is_empty() {
                self.change_state(ctx, NodeState::Idle);
            } else {
                self.dequeue_and_transmit(ctx);
            }
        }

        self.receiving_count -= 1;
        ctx.log
            .packet_outcome(ctx.scheduler.now(), src, self.id, &packet);
    }

    /// The RX timeout is strictly longer than any frame, so it can only fire
    /// when the node lost its lock and kept waiting for overlapping frames.
    fn handle_rx_timeout(&mut self, ctx: &mut Ctx) {
        assert!(
            self.state == NodeState::Rx,
            "node {} rx timeout outside RX",
            self.id
        );
        assert!(
            self.current_pkt.is_none(),
            "node {} rx timeout while decoding a frame",
            self.id
        );
        self.timeout_rx = None;
        self.switch_to_proc(ctx);
    }

    fn handle_end_tx(&mut self, ctx: &mut Ctx, packet: &Packet) {
        assert!(
            self.state == NodeState::Tx,
            "node {} got an end of transmission in state {:?}",
            self.id,
            self.state
        );
        match self.current_pkt {
            Some(id) => assert_eq!(
                id, packet.id,
                "node {} finished transmitting a frame it never started",
                self.id
            ),
            None => panic!("node {} transmitting without a current frame", self.id),
        }
        self.current_pkt = None;
        self.switch_to_proc(ctx);
    }

    /// Radio turnaround finished; resume operation.
    fn handle_end_proc(&mut self, ctx: &mut Ctx) {
        assert!(
            self.state == NodeState::Proc,
            "node {} got an end of processing in state {:?}",
            self.id,
            self.state
        );

        if !self.params.sensing {
            // pure ALOHA resumes blindly, whatever is on the air
            if self.queue.is_empty() {
                self.change_state(ctx, NodeState::Idle);
            } else {
                self.dequeue_and_transmit(ctx);
            }
            return;
        }

        if self.receiving_count == 0 {
            if self.queue.is_empty() {
                self.change_state(ctx, NodeState::Idle);
            } else {
                self.dequeue_and_transmit(ctx);
            }
        } else if self.queue.is_empty() {
            // nothing to send: just wait for the channel to go quiet
            self.change_state(ctx, NodeState::Wc);
        } else {
            self.schedule_packet_transmission(ctx);
        }
    }

    fn handle_wt_timeout(&mut self, ctx: &mut Ctx) {
        assert!(
            self.state == NodeState::Wt,
            "node {} backoff expired in state {:?}",
            self.id,
            self.state
        );
        self.timeout_wt = None;
        if self.receiving_count == 0 {
            self.dequeue_and_transmit(ctx);
        } else {
            self.schedule_packet_transmission(ctx);
        }
    }

    fn switch_to_proc(&mut self, ctx: &mut Ctx) {
        let delay = self.params.proc_time.draw(ctx.rng);
        let at = ctx.scheduler.now() + delay;
        ctx.scheduler
            .schedule(at, EventKind::EndProc, self.id, self.id);
        self.change_state(ctx, NodeState::Proc);
    }

    /// Put a new frame on the air and schedule the end of its transmission.
    fn transmit_packet(&mut self, ctx: &mut Ctx, size: u32) {
        assert!(
            self.current_pkt.is_none(),
            "node {} transmitting while busy with another frame",
            self.id
        );
        let duration = f64::from(size) * 8.0 / self.params.datarate;
        let packet = Packet::new(ctx.next_packet_id(), size, duration);
        ctx.channel.start_transmission(ctx.scheduler, self.id, &packet);
        let end = ctx.scheduler.now() + duration;
        self.current_pkt = Some(packet.id);
        ctx.scheduler
            .schedule(end, EventKind::EndTx { packet }, self.id, self.id);
    }

    fn dequeue_and_transmit(&mut self, ctx: &mut Ctx) {
        let size = match self.queue.pop_front() {
            Some(size) => size,
            None => panic!("node {} dequeueing from an empty queue", self.id),
        };
        self.transmit_packet(ctx, size);
        self.change_state(ctx, NodeState::Tx);
        ctx.log
            .queue_length(ctx.scheduler.now(), self.id, self.queue.len());
    }

    /// p-persistence: with probability `p` back off for an exponential time,
    /// otherwise wait for the channel to go quiet and transmit immediately.
    fn schedule_packet_transmission(&mut self, ctx: &mut Ctx) {
        assert!(
            !self.queue.is_empty(),
            "node {} scheduling a transmission with an empty queue",
            self.id
        );
        let roll: f64 = ctx.rng.random();
        if roll >= self.params.p_persistence {
            self.change_state(ctx, NodeState::Wc);
        } else {
            let backoff = self.backoff.draw(ctx.rng);
            let at = ctx.scheduler.now() + backoff;
            self.timeout_wt = Some(
                ctx.scheduler
                    .schedule(at, EventKind::WtTimeout, self.id, self.id),
            );
            self.change_state(ctx, NodeState::Wt);
        }
    }

    fn change_state(&mut self, ctx: &mut Ctx, state: NodeState) {
        if state != NodeState::Wt {
            assert!(
                self.timeout_wt.is_none(),
                "node {} keeps a backoff timeout while entering {:?}",
                self.id,
                state
            );
        }
        self.state = state;
        ctx.log.state_change(ctx.scheduler.now(), self.id, state);
    }
}
