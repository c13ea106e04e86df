pub mod config;
pub mod packet;
pub mod record;
pub mod topology;

pub use config::{
    ConfigError, ConfigOverride, DistributionSpec, PropagationKind, SimulationConfig,
    SimulatorKind,
};
pub use packet::{Packet, PacketStatus};
pub use record::{Record, event_code};
pub use topology::ring;
