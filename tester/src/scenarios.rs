use std::{net::SocketAddrV4, time::Duration};

use flowsim::{
    DataRate, FlowSummary, LinkConfig, LossModel, RunSummary, SimError, SimTime, Simulation,
    TopologyBuilder, TrafficPattern,
};

/// what one scenario run produced.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub name: &'static str,
    pub run: RunSummary,
    pub flows: Vec<FlowSummary>,
}

fn p2p(rate: DataRate, delay: Duration) -> LinkConfig {
    LinkConfig::new(rate, delay)
}

fn socket(sim: &Simulation, node: &str, port: u16) -> Result<SocketAddrV4, SimError> {
    let id = sim.topology().node_id(node)?;
    let addr = sim
        .topology()
        .address(id)
        .ok_or_else(|| SimError::UnknownNode(node.to_string()))?;
    Ok(SocketAddrV4::new(addr, port))
}

fn finish(name: &'static str, mut sim: Simulation, stop: SimTime) -> Result<Outcome, SimError> {
    let run = sim.run(stop)?;
    let flows = sim.flow_report()?.iter().collect();
    Ok(Outcome { name, run, flows })
}

/// echo client on n0 talking to an echo server on n1.
pub fn basic(seed: u64) -> Result<Outcome, SimError> {
    let mut b = TopologyBuilder::new();
    b.add_node("n0")
        .add_node("n1")
        .add_link("n0", "n1", p2p(DataRate::from_mbps(10), Duration::from_millis(2)));
    let mut sim = Simulation::new(b.build()?, seed);

    let (n0, n1) = (sim.topology().node_id("n0")?, sim.topology().node_id("n1")?);
    sim.install_echo_server(n1, 9)?;
    let server = socket(&sim, "n1", 9)?;
    sim.attach_traffic_source(
        n0,
        server,
        TrafficPattern::periodic(Duration::from_millis(10), 1000, 512),
        SimTime::from_secs(2),
        SimTime::from_secs(9),
    )?;
    finish("basic", sim, SimTime::from_secs(10))
}

/// dumbbell: n0 and n1 reach n3 through the n2-n3 bottleneck. n0 runs an
/// always-on 800 Kbps background source, n1 an echo client.
///
/// The background source goes to a sink on n3:9 and the echo client to its
/// own echo server on n3:10. In the ns-3 udp-congestion script both sources
/// target port 9 with no server bound there, so the receiver never answers.
/// Here each flow has a receiver, the foreground flow gets echo replies, and
/// the two forward flows are counted separately.
pub fn congestion(seed: u64, bottleneck: DataRate, queue_packets: usize) -> Result<Outcome, SimError> {
    let edge = p2p(DataRate::from_mbps(10), Duration::from_millis(2));
    let mut b = TopologyBuilder::new();
    b.add_node("n0")
        .add_node("n1")
        .add_node("n2")
        .add_node("n3")
        .add_link("n0", "n2", edge.clone())
        .add_link("n1", "n2", edge)
        .add_link(
            "n2",
            "n3",
            p2p(bottleneck, Duration::from_millis(10)).with_queue_capacity(queue_packets),
        );
    let mut sim = Simulation::new(b.build()?, seed);

    let n3 = sim.topology().node_id("n3")?;
    sim.install_sink(n3, 9)?;
    sim.install_echo_server(n3, 10)?;

    let background = socket(&sim, "n3", 9)?;
    sim.attach_traffic_source(
        sim.topology().node_id("n0")?,
        background,
        TrafficPattern::on_off(DataRate::from_kbps(800), 512),
        SimTime::from_secs(1),
        SimTime::from_secs(9),
    )?;
    let server = socket(&sim, "n3", 10)?;
    sim.attach_traffic_source(
        sim.topology().node_id("n1")?,
        server,
        TrafficPattern::periodic(Duration::from_millis(20), 500, 512),
        SimTime::from_secs(2),
        SimTime::from_secs(8),
    )?;
    finish("congestion", sim, SimTime::from_secs(10))
}

/// three 1 ms clients on n0, n1 and n2 sending to sinks on n5, two of them
/// sharing the n3-n5 link.
pub fn three_flows(seed: u64) -> Result<Outcome, SimError> {
    let cfg = p2p(DataRate::from_mbps(10), Duration::from_millis(2));
    let mut b = TopologyBuilder::new();
    for n in 0..6 {
        b.add_node(format!("n{n}"));
    }
    for (a, z) in [("n0", "n3"), ("n1", "n3"), ("n2", "n4"), ("n3", "n5"), ("n4", "n5")] {
        b.add_link(a, z, cfg.clone());
    }
    let mut sim = Simulation::new(b.build()?, seed);

    let n5 = sim.topology().node_id("n5")?;
    for (client, port) in [("n0", 8001), ("n1", 8002), ("n2", 8003)] {
        sim.install_sink(n5, port)?;
        let sink = socket(&sim, "n5", port)?;
        sim.attach_traffic_source(
            sim.topology().node_id(client)?,
            sink,
            TrafficPattern::periodic(Duration::from_millis(1), 10_000, 1024),
            SimTime::from_secs(2),
            SimTime::from_secs(10),
        )?;
    }
    finish("three-flows", sim, SimTime::from_secs(11))
}

/// ad-hoc cell: echo server on w0, clients on w1..w4 starting a second apart.
pub fn wireless(seed: u64, loss: f64) -> Result<Outcome, SimError> {
    let names: Vec<String> = (0..5).map(|i| format!("w{i}")).collect();
    let mut b = TopologyBuilder::new();
    for name in &names {
        b.add_node(name.as_str());
    }
    b.add_shared_medium(
        names.iter().map(String::as_str),
        LinkConfig::new(DataRate::from_mbps(54), Duration::from_micros(100)).with_loss(LossModel::Random(loss)),
    );
    let mut sim = Simulation::new(b.build()?, seed);

    sim.install_echo_server(sim.topology().node_id("w0")?, 9)?;
    let server = socket(&sim, "w0", 9)?;
    for (i, name) in names.iter().enumerate().skip(1) {
        sim.attach_traffic_source(
            sim.topology().node_id(name)?,
            server,
            TrafficPattern::periodic(Duration::from_secs(1), 10, 512),
            SimTime::from_secs(2 + i as u64),
            SimTime::from_secs(18),
        )?;
    }
    finish("wireless", sim, SimTime::from_secs(20))
}
