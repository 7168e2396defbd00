use std::fmt;
use std::net::Ipv4Addr;

use thiserror::Error;

use crate::{FlowId, Metric, SimTime};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimError {
    #[error("node {0} not found")]
    UnknownNode(String),
    #[error("nodes {0} and {1} are already linked")]
    DuplicateLink(String, String),
    #[error("invalid link config: {0}")]
    InvalidLinkConfig(String),
    #[error("invalid traffic config: {0}")]
    InvalidTrafficConfig(String),
    #[error("no device owns address {0}")]
    UnknownAddress(Ipv4Addr),
    #[error("port {port} already bound on node {node}")]
    PortInUse { node: String, port: u16 },

    #[error("cannot schedule at {at}, clock is already at {now}")]
    ScheduleInPast { at: SimTime, now: SimTime },
    #[error("simulation time overflow")]
    TimeOverflow,
    #[error("simulation has ended")]
    SimulationEnded,
    #[error("simulation is still running")]
    RunInProgress,
    #[error("run aborted by fault handler at {0}")]
    Aborted(SimTime),

    #[error("event failed: {0}")]
    EventFailed(String),

    #[error("{metric} undefined for flow {flow}")]
    NoData { flow: FlowId, metric: Metric },
}

impl SimError {
    /// errors raised while validating a topology or traffic description,
    /// before any event runs.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            SimError::UnknownNode(_)
                | SimError::DuplicateLink(..)
                | SimError::InvalidLinkConfig(_)
                | SimError::InvalidTrafficConfig(_)
                | SimError::UnknownAddress(_)
                | SimError::PortInUse { .. }
        )
    }
}

/// an event action that returned an error.
#[derive(Debug, Clone, PartialEq)]
pub struct EventFault {
    pub at: SimTime,
    pub label: &'static str,
    pub error: SimError,
}

impl fmt::Display for EventFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}: {}", self.label, self.at, self.error)
    }
}
