mod time;
mod error;
mod scheduler;
mod packet;
mod flow;
mod loss;
mod link;
mod routing;
mod network;
mod traffic;
mod iface;
mod sim;
mod report;

pub use time::SimTime;
pub use error::{EventFault, SimError};
pub use scheduler::{Action, EventHandle, FaultAction, FaultHandler, Scheduler};
pub use packet::{Packet, Protocol};
pub use flow::{DropReason, FiveTuple, FlowClassifier, FlowId, FlowStats, FlowStatsCollector, Metric};
pub use loss::{LinkLoad, LossModel};
pub use link::{Channel, ChannelKind, ChannelStats, DataRate, DEFAULT_QUEUE_PACKETS, LinkConfig};
pub use routing::{Hop, RoutingTable};
pub use network::{ChannelId, Device, DeviceId, Node, NodeId, Topology, TopologyBuilder};
pub use traffic::{AppStats, Application, Distribution, SourceHandle, SourceStats, TrafficPattern};
pub use sim::{Network, RunSummary, Simulation};
pub use report::{FlowReport, FlowReportIter, FlowSummary};
