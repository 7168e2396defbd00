use rand::{SeedableRng, rngs::StdRng};
use std::{
    collections::HashMap,
    net::SocketAddrV4,
    time::Duration,
};

use crate::{
    error::{EventFault, SimError},
    flow::FlowStatsCollector,
    iface,
    link::ChannelStats,
    network::{ChannelId, NodeId, Topology},
    report::FlowReport,
    scheduler::{EventHandle, FaultAction, Scheduler},
    time::SimTime,
    traffic::{AppStats, Application, SourceHandle, SourceStats, TrafficPattern, TrafficSource},
};

/// first port handed to a traffic source on each node
const EPHEMERAL_PORT_START: u16 = 49153;

/// the world the scheduler's events act on.
pub struct Network {
    pub(crate) topology: Topology,
    pub(crate) flows: FlowStatsCollector,
    pub(crate) sources: Vec<TrafficSource>,
    pub(crate) apps: HashMap<(NodeId, u16), Application>,
    pub(crate) rng: StdRng,
    next_port: HashMap<NodeId, u16>,
}

impl Network {
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn flows(&self) -> &FlowStatsCollector {
        &self.flows
    }

    fn ephemeral_port(&mut self, node: NodeId) -> Result<u16, SimError> {
        let next = self.next_port.entry(node).or_insert(EPHEMERAL_PORT_START);
        loop {
            let port = *next;
            *next = next.checked_add(1).ok_or_else(|| {
                SimError::InvalidTrafficConfig(format!("node {} ran out of source ports", node.0))
            })?;
            if !self.apps.contains_key(&(node, port)) {
                return Ok(port);
            }
        }
    }
}

/// outcome of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub stopped_at: SimTime,
    pub events_executed: u64,
    /// events still queued at the stop time, dropped unexecuted
    pub events_discarded: usize,
    pub faults: usize,
}

/// one simulation run: topology, traffic, scheduler and collected statistics.
///
/// ```no_run
/// use flowsim::{DataRate, LinkConfig, SimTime, Simulation, TopologyBuilder, TrafficPattern};
/// use std::{net::SocketAddrV4, time::Duration};
///
/// let mut builder = TopologyBuilder::new();
/// builder.add_node("n0").add_node("n1").add_link(
///     "n0",
///     "n1",
///     LinkConfig::new(DataRate::from_mbps(10), Duration::from_millis(2)),
/// );
/// let topology = builder.build()?;
/// let (n0, n1) = (topology.node_id("n0")?, topology.node_id("n1")?);
/// let server = topology.address(n1).unwrap();
///
/// let mut sim = Simulation::new(topology, 1);
/// sim.install_echo_server(n1, 9)?;
/// sim.attach_traffic_source(
///     n0,
///     SocketAddrV4::new(server, 9),
///     TrafficPattern::periodic(Duration::from_millis(10), 1000, 512),
///     SimTime::from_secs(2),
///     SimTime::from_secs(9),
/// )?;
/// sim.run(SimTime::from_secs(10))?;
/// for flow in sim.flow_report()? {
///     println!("{} {:?}", flow.tuple, flow.throughput_bps);
/// }
/// # Ok::<(), flowsim::SimError>(())
/// ```
pub struct Simulation {
    scheduler: Scheduler<Network>,
    network: Network,
    seed: u64,
}

impl Simulation {
    pub fn new(topology: Topology, seed: u64) -> Self {
        Self {
            scheduler: Scheduler::new(),
            network: Network {
                topology,
                flows: FlowStatsCollector::new(),
                sources: Vec::new(),
                apps: HashMap::new(),
                rng: StdRng::seed_from_u64(seed),
                next_port: HashMap::new(),
            },
            seed,
        }
    }

    pub fn now(&self) -> SimTime {
        self.scheduler.now()
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn topology(&self) -> &Topology {
        &self.network.topology
    }

    /// bind a packet sink to `port` on `node`.
    pub fn install_sink(&mut self, node: NodeId, port: u16) -> Result<(), SimError> {
        self.install(node, port, Application::Sink(AppStats::default()))
    }

    /// bind a UDP echo server to `port` on `node`.
    pub fn install_echo_server(&mut self, node: NodeId, port: u16) -> Result<(), SimError> {
        self.install(node, port, Application::Echo(AppStats::default()))
    }

    fn install(&mut self, node: NodeId, port: u16, app: Application) -> Result<(), SimError> {
        let name = self.node_name(node)?;
        if self.network.apps.contains_key(&(node, port)) {
            return Err(SimError::PortInUse { node: name, port });
        }
        self.network.apps.insert((node, port), app);
        Ok(())
    }

    fn node_name(&self, node: NodeId) -> Result<String, SimError> {
        self.network
            .topology
            .node(node)
            .map(|n| n.name.clone())
            .ok_or_else(|| SimError::UnknownNode(format!("#{}", node.0)))
    }

    /// start a traffic source on `node` sending to `destination` between
    /// `start` and `stop`. The source gets the next free ephemeral port and
    /// the address of the device its packets leave through.
    pub fn attach_traffic_source(
        &mut self,
        node: NodeId,
        destination: SocketAddrV4,
        pattern: TrafficPattern,
        start: SimTime,
        stop: SimTime,
    ) -> Result<SourceHandle, SimError> {
        self.node_name(node)?;
        let topology = &self.network.topology;
        let remote_node = topology
            .owner(*destination.ip())
            .ok_or(SimError::UnknownAddress(*destination.ip()))?;
        let local_ip = topology
            .route(node, remote_node)
            .and_then(|hop| topology.device(hop.out))
            .map(|d| d.addr)
            .or_else(|| topology.address(node))
            .ok_or_else(|| SimError::InvalidTrafficConfig(format!("node {} has no devices", node.0)))?;

        let port = self.network.ephemeral_port(node)?;
        let local = SocketAddrV4::new(local_ip, port);
        let mut source = TrafficSource::new(node, local, destination, pattern, start, stop)?;

        let idx = self.network.sources.len();
        if let Some(first) = source.first_send(&mut self.network.rng) {
            self.scheduler.schedule_at(first, "source", move |sched, net| {
                iface::fire_source(sched, net, idx)
            })?;
        }
        self.network.sources.push(source);
        tracing::debug!(node = node.0, %local, %destination, %start, %stop, "traffic source attached");
        Ok(SourceHandle(idx))
    }

    /// schedule a user event `delay` after the current time.
    pub fn schedule<F>(
        &mut self,
        delay: Duration,
        label: &'static str,
        action: F,
    ) -> Result<EventHandle, SimError>
    where
        F: FnOnce(&mut Scheduler<Network>, &mut Network) -> Result<(), SimError> + 'static,
    {
        self.scheduler.schedule(delay, label, action)
    }

    pub fn cancel(&mut self, handle: EventHandle) -> bool {
        self.scheduler.cancel(handle)
    }

    /// decide what happens after an event fails; the default continues.
    pub fn on_fault(&mut self, handler: impl FnMut(&EventFault) -> FaultAction + 'static) {
        self.scheduler.set_fault_handler(handler);
    }

    /// run every event up to and including `stop`, then discard the rest.
    /// A simulation runs once.
    pub fn run(&mut self, stop: SimTime) -> Result<RunSummary, SimError> {
        if self.scheduler.is_closed() {
            return Err(SimError::SimulationEnded);
        }
        tracing::info!(
            %stop,
            seed = self.seed,
            sources = self.network.sources.len(),
            pending = self.scheduler.pending(),
            "starting run"
        );

        let outcome = self.scheduler.run_until(stop, &mut self.network);
        let events_discarded = self.scheduler.shutdown();
        outcome?;

        let summary = RunSummary {
            stopped_at: self.scheduler.now(),
            events_executed: self.scheduler.executed(),
            events_discarded,
            faults: self.scheduler.faults().len(),
        };
        tracing::info!(
            stopped_at = %summary.stopped_at,
            executed = summary.events_executed,
            discarded = summary.events_discarded,
            faults = summary.faults,
            flows = self.network.flows.len(),
            "run finished"
        );
        Ok(summary)
    }

    pub fn faults(&self) -> &[EventFault] {
        self.scheduler.faults()
    }

    /// live statistics; safe to read at any time.
    pub fn flows(&self) -> &FlowStatsCollector {
        &self.network.flows
    }

    /// per-flow metrics, available once the run has stopped.
    pub fn flow_report(&self) -> Result<FlowReport<'_>, SimError> {
        if !self.scheduler.is_closed() {
            return Err(SimError::RunInProgress);
        }
        Ok(FlowReport::new(&self.network.flows))
    }

    pub fn source_stats(&self, handle: SourceHandle) -> Option<SourceStats> {
        self.network.sources.get(handle.0).map(TrafficSource::stats)
    }

    pub fn app_stats(&self, node: NodeId, port: u16) -> Option<AppStats> {
        self.network.apps.get(&(node, port)).map(Application::stats)
    }

    pub fn channel_stats(&self, channel: ChannelId) -> Option<ChannelStats> {
        self.network.topology.channel_stats(channel)
    }
}
