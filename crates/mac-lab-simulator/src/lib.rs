pub mod channel;
pub mod distribution;
pub mod engine;
pub mod log;
pub mod metrics;
pub mod node;
pub mod scheduler;

pub use channel::{Channel, Original, Propagation, Realistic};
pub use distribution::Distribution;
pub use engine::Simulator;
pub use log::Log;
pub use metrics::{NodeStats, SimulationReport, per_node_stats};
pub use node::{Node, NodeState};
pub use scheduler::{Event, EventId, EventKind, NodeId, Scheduler};
