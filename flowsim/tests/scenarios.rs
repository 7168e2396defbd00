use std::{cell::Cell, net::SocketAddrV4, rc::Rc, time::Duration};

use flowsim::{
    ChannelId, DataRate, Distribution, DropReason, FaultAction, FlowId,
    FlowSummary, LinkConfig, LossModel, Metric, SimError, SimTime, Simulation, SourceHandle,
    TopologyBuilder, TrafficPattern,
};

fn link(mbps: u64, delay_ms: u64) -> LinkConfig {
    LinkConfig::new(DataRate::from_mbps(mbps), Duration::from_millis(delay_ms))
}

fn endpoint(sim: &Simulation, node: &str, port: u16) -> SocketAddrV4 {
    let id = sim.topology().node_id(node).unwrap();
    SocketAddrV4::new(sim.topology().address(id).unwrap(), port)
}

fn report(sim: &Simulation) -> Vec<FlowSummary> {
    sim.flow_report().unwrap().iter().collect()
}

/// n0 -- n1 at 10 Mbps / 2 ms, echo server on n1:9, one periodic client.
fn basic(seed: u64, packets: u64) -> Simulation {
    let mut b = TopologyBuilder::new();
    b.add_node("n0").add_node("n1").add_link("n0", "n1", link(10, 2));
    let mut sim = Simulation::new(b.build().unwrap(), seed);

    let (n0, n1) = (sim.topology().node_id("n0").unwrap(), sim.topology().node_id("n1").unwrap());
    sim.install_echo_server(n1, 9).unwrap();
    let server = endpoint(&sim, "n1", 9);
    sim.attach_traffic_source(
        n0,
        server,
        TrafficPattern::periodic(Duration::from_millis(10), packets, 512),
        SimTime::from_secs(2),
        SimTime::from_secs(15),
    )
    .unwrap();
    sim
}

#[test]
fn periodic_client_over_clean_link() {
    let mut sim = basic(1, 1000);
    let summary = sim.run(SimTime::from_secs(20)).unwrap();
    assert_eq!(summary.stopped_at, SimTime::from_secs(20));
    assert_eq!(summary.faults, 0);

    let flows = report(&sim);
    assert_eq!(flows.len(), 2);
    let request = &flows[0];
    assert_eq!(request.tx_packets, 1000);
    assert_eq!(request.rx_packets, 1000);
    assert_eq!(request.tx_bytes, 1000 * 540);
    assert_eq!(request.loss_ratio, Some(0.0));
    // 540 bytes at 10 Mbps take 432 us, plus 2 ms propagation
    assert_eq!(request.average_delay, Some(Duration::from_micros(2432)));
    assert_eq!(request.average_jitter, Some(Duration::ZERO));

    // last send at 11.99 s, received 2.432 ms later
    let expected = 540_000.0 * 8.0 / 9.992432;
    let throughput = request.throughput_bps.unwrap();
    assert!((throughput - expected).abs() < 1e-3, "{throughput} vs {expected}");

    let n1 = sim.topology().node_id("n1").unwrap();
    let server = sim.app_stats(n1, 9).unwrap();
    assert_eq!(server.packets, 1000);
    assert_eq!(server.bytes, 1000 * 512);
}

#[test]
fn echo_replies_form_the_reverse_flow() {
    let mut sim = basic(1, 50);
    sim.run(SimTime::from_secs(10)).unwrap();

    let flows = report(&sim);
    let (request, reply) = (&flows[0], &flows[1]);
    assert_eq!(reply.tuple.src_addr, request.tuple.dst_addr);
    assert_eq!(reply.tuple.dst_addr, request.tuple.src_addr);
    assert_eq!(reply.tuple.src_port, 9);
    assert_eq!(reply.tuple.dst_port, request.tuple.src_port);
    assert_eq!(reply.tx_packets, 50);
    assert_eq!(reply.rx_packets, 50);
    assert_eq!(reply.average_delay, Some(Duration::from_micros(2432)));
}

/// n0 and n1 feed n2, which reaches n3 over a 1 Mbps / 10 ms bottleneck.
/// n0 sends always-on 800 Kbps to a sink on n3:9 from 1 s to 12 s, n1 sends
/// 500 packets every 20 ms to a sink on n3:10 from 2 s. Runs to 15 s.
fn dumbbell(queue_packets: Option<usize>) -> (Simulation, SourceHandle, SourceHandle) {
    let mut bottleneck = LinkConfig::new(DataRate::from_mbps(1), Duration::from_millis(10));
    if let Some(capacity) = queue_packets {
        bottleneck = bottleneck.with_queue_capacity(capacity);
    }
    let mut b = TopologyBuilder::new();
    b.add_node("n0")
        .add_node("n1")
        .add_node("n2")
        .add_node("n3")
        .add_link("n0", "n2", link(10, 2))
        .add_link("n1", "n2", link(10, 2))
        .add_link("n2", "n3", bottleneck);
    let mut sim = Simulation::new(b.build().unwrap(), 7);
    let ids = |name| sim.topology().node_id(name).unwrap();
    let (n0, n1, n3) = (ids("n0"), ids("n1"), ids("n3"));

    sim.install_sink(n3, 9).unwrap();
    sim.install_sink(n3, 10).unwrap();
    let background = sim
        .attach_traffic_source(
            n0,
            endpoint(&sim, "n3", 9),
            TrafficPattern::on_off(DataRate::from_kbps(800), 512),
            SimTime::from_secs(1),
            SimTime::from_secs(12),
        )
        .unwrap();
    let foreground = sim
        .attach_traffic_source(
            n1,
            endpoint(&sim, "n3", 10),
            TrafficPattern::periodic(Duration::from_millis(20), 500, 512),
            SimTime::from_secs(2),
            SimTime::from_secs(12),
        )
        .unwrap();
    sim.run(SimTime::from_secs(15)).unwrap();
    (sim, background, foreground)
}

/// checks shared by every dumbbell run; returns (background, foreground).
fn dumbbell_flows(
    sim: &Simulation,
    background: SourceHandle,
    foreground: SourceHandle,
) -> (FlowSummary, FlowSummary) {
    assert_eq!(sim.source_stats(foreground).unwrap().packets, 500);
    assert!(sim.source_stats(background).unwrap().packets > 2000);

    let flows = report(sim);
    assert_eq!(flows.len(), 2);
    let bg = flows.iter().find(|f| f.tuple.dst_port == 9).unwrap().clone();
    let fg = flows.iter().find(|f| f.tuple.dst_port == 10).unwrap().clone();
    assert_ne!(bg.flow, fg.flow);
    assert_ne!(bg.tuple, fg.tuple);
    assert_eq!(fg.tx_packets, 500);
    for f in &flows {
        assert!(f.tx_packets >= f.rx_packets);
    }

    // every loss is a drop-tail drop on the bottleneck
    let bottleneck = sim.channel_stats(ChannelId(2)).unwrap();
    let queue_drops: u64 = [bg.flow, fg.flow]
        .iter()
        .map(|id| sim.flows().stats(*id).unwrap().dropped(DropReason::QueueFull))
        .sum();
    assert!(queue_drops > 0);
    assert_eq!(bottleneck.dropped_queue_full, queue_drops);
    assert_eq!(queue_drops, bg.lost_packets + fg.lost_packets);
    assert_eq!(bg.times_forwarded + fg.times_forwarded, bg.tx_packets + fg.tx_packets);
    (bg, fg)
}

#[test]
fn bottleneck_overflow_hits_the_foreground_flow() {
    let (sim, background, foreground) = dumbbell(Some(10));
    let (bg, fg) = dumbbell_flows(&sim, background, foreground);

    let fg_loss = fg.loss_ratio.unwrap();
    assert!(fg_loss > 0.0 && fg_loss < 1.0, "foreground loss {fg_loss}");
    assert!(bg.loss_ratio.unwrap() > 0.0);
}

#[test]
fn default_queue_still_overflows_under_sustained_load() {
    // about 1.06 Mbps of 540 byte packets offered to a 1 Mbps link fills the
    // 100 packet queue
    let (sim, background, foreground) = dumbbell(None);
    let (bg, fg) = dumbbell_flows(&sim, background, foreground);

    let fg_loss = fg.loss_ratio.unwrap();
    assert!(fg_loss > 0.0 && fg_loss < 0.5, "foreground loss {fg_loss}");
    assert!(fg.rx_packets < 500);
    assert!(bg.lost_packets > 0);
}

#[test]
fn flow_without_receptions_has_no_throughput() {
    let mut b = TopologyBuilder::new();
    b.add_node("a")
        .add_node("b")
        .add_link("a", "b", link(10, 1).with_loss(LossModel::EveryNth(1)));
    let mut sim = Simulation::new(b.build().unwrap(), 3);
    let a = sim.topology().node_id("a").unwrap();
    let sink = endpoint(&sim, "b", 9);
    sim.install_sink(sim.topology().node_id("b").unwrap(), 9).unwrap();
    sim.attach_traffic_source(
        a,
        sink,
        TrafficPattern::periodic(Duration::from_millis(100), 5, 64),
        SimTime::ZERO,
        SimTime::from_secs(1),
    )
    .unwrap();
    sim.run(SimTime::from_secs(2)).unwrap();

    let stats = sim.flows().stats(FlowId(0)).unwrap();
    assert_eq!(stats.rx_packets, 0);
    assert_eq!(
        stats.throughput_bps(),
        Err(SimError::NoData {
            flow: FlowId(0),
            metric: Metric::Throughput
        })
    );
    assert_eq!(stats.dropped(DropReason::LossModel), 5);

    let row = &report(&sim)[0];
    assert_eq!(row.throughput_bps, None);
    assert_eq!(row.average_delay, None);
    assert_eq!(row.loss_ratio, Some(1.0));
}

#[test]
fn same_tuple_seconds_apart_is_one_flow() {
    let mut b = TopologyBuilder::new();
    b.add_node("a").add_node("b").add_link("a", "b", link(10, 2));
    let mut sim = Simulation::new(b.build().unwrap(), 0);
    let a = sim.topology().node_id("a").unwrap();
    let sink = endpoint(&sim, "b", 9);
    sim.attach_traffic_source(
        a,
        sink,
        TrafficPattern::periodic(Duration::from_secs(5), 2, 100),
        SimTime::from_secs(1),
        SimTime::from_secs(10),
    )
    .unwrap();
    sim.run(SimTime::from_secs(10)).unwrap();

    let flows = report(&sim);
    assert_eq!(flows.len(), 1);
    assert_eq!(flows[0].tx_packets, 2);
    assert_eq!(flows[0].rx_packets, 2);
    let stats = sim.flows().stats(FlowId(0)).unwrap();
    assert_eq!(stats.first_tx, Some(SimTime::from_secs(1)));
    assert_eq!(stats.last_tx, Some(SimTime::from_secs(6)));
}

#[test]
fn report_is_stable_across_reads() {
    let mut sim = basic(5, 100);
    assert_eq!(sim.flow_report().err(), Some(SimError::RunInProgress));
    sim.run(SimTime::from_secs(5)).unwrap();

    let view = sim.flow_report().unwrap();
    let first: Vec<_> = view.iter().collect();
    let second: Vec<_> = view.iter().collect();
    assert_eq!(first, second);
    assert_eq!(first, report(&sim));
}

/// shared medium with random loss and bursty on/off clients
fn lossy_cell(seed: u64) -> Vec<FlowSummary> {
    let mut b = TopologyBuilder::new();
    let names = ["w0", "w1", "w2", "w3"];
    for name in names {
        b.add_node(name);
    }
    b.add_shared_medium(
        names,
        LinkConfig::new(DataRate::from_mbps(2), Duration::from_micros(50)).with_loss(LossModel::Random(0.05)),
    );
    let mut sim = Simulation::new(b.build().unwrap(), seed);
    let w0 = sim.topology().node_id("w0").unwrap();
    sim.install_echo_server(w0, 9).unwrap();
    let server = endpoint(&sim, "w0", 9);

    for name in &names[1..] {
        let node = sim.topology().node_id(name).unwrap();
        let pattern = TrafficPattern::on_off(DataRate::from_kbps(300), 256).with_periods(
            Distribution::Exponential {
                mean: Duration::from_millis(200),
            },
            Distribution::Uniform {
                min: Duration::from_millis(50),
                max: Duration::from_millis(250),
            },
        );
        sim.attach_traffic_source(node, server, pattern, SimTime::from_secs(1), SimTime::from_secs(4))
            .unwrap();
    }
    sim.run(SimTime::from_secs(5)).unwrap();
    report(&sim)
}

#[test]
fn same_seed_same_statistics() {
    let a = lossy_cell(42);
    let b = lossy_cell(42);
    assert_eq!(a, b);
    assert_eq!(a.len(), 6);
    assert!(a.iter().any(|f| f.lost_packets > 0));
    for f in &a {
        let loss = f.loss_ratio.unwrap();
        assert!((0.0..=1.0).contains(&loss));
    }
}

#[test]
fn multi_hop_counts_forwarding() {
    let mut b = TopologyBuilder::new();
    b.add_node("a")
        .add_node("b")
        .add_node("c")
        .add_node("d")
        .add_link("a", "b", link(10, 1))
        .add_link("b", "c", link(10, 1))
        .add_link("c", "d", link(10, 1));
    let mut sim = Simulation::new(b.build().unwrap(), 0);
    let a = sim.topology().node_id("a").unwrap();
    let sink = endpoint(&sim, "d", 8001);
    sim.install_sink(sim.topology().node_id("d").unwrap(), 8001).unwrap();
    sim.attach_traffic_source(
        a,
        sink,
        TrafficPattern::periodic(Duration::from_millis(10), 20, 1024),
        SimTime::ZERO,
        SimTime::from_secs(1),
    )
    .unwrap();
    sim.run(SimTime::from_secs(2)).unwrap();

    let flow = &report(&sim)[0];
    assert_eq!(flow.rx_packets, 20);
    // routers b and c each forward every packet
    assert_eq!(flow.times_forwarded, 40);
    // three hops of 1052 bytes at 10 Mbps plus 1 ms each
    let hop = Duration::from_nanos(841_600) + Duration::from_millis(1);
    assert_eq!(flow.average_delay, Some(hop * 3));
}

#[test]
fn unreachable_destination_is_a_no_route_drop() {
    let mut b = TopologyBuilder::new();
    b.add_node("a")
        .add_node("b")
        .add_node("c")
        .add_node("d")
        .add_link("a", "b", link(10, 1))
        .add_link("c", "d", link(10, 1));
    let mut sim = Simulation::new(b.build().unwrap(), 0);
    let a = sim.topology().node_id("a").unwrap();
    let far = endpoint(&sim, "d", 9);
    sim.attach_traffic_source(
        a,
        far,
        TrafficPattern::periodic(Duration::from_millis(10), 3, 10),
        SimTime::ZERO,
        SimTime::from_secs(1),
    )
    .unwrap();
    sim.run(SimTime::from_secs(1)).unwrap();

    let stats = sim.flows().stats(FlowId(0)).unwrap();
    assert_eq!(stats.tx_packets, 3);
    assert_eq!(stats.dropped(DropReason::NoRoute), 3);
    assert_eq!(stats.rx_packets, 0);
}

#[test]
fn faulting_event_does_not_stop_the_run() {
    let mut sim = basic(1, 10);
    let ran = Rc::new(Cell::new(false));
    let flag = Rc::clone(&ran);

    sim.schedule(Duration::from_secs(1), "broken", |_, _| {
        Err(SimError::EventFailed("broken on purpose".into()))
    })
    .unwrap();
    sim.schedule(Duration::from_secs(3), "check-flows", move |_, net| {
        flag.set(net.flows().len() == 2);
        Ok(())
    })
    .unwrap();
    let summary = sim.run(SimTime::from_secs(5)).unwrap();

    assert!(ran.get());
    assert_eq!(summary.faults, 1);
    let fault = &sim.faults()[0];
    assert_eq!(fault.label, "broken");
    assert_eq!(fault.at, SimTime::from_secs(1));
    assert_eq!(report(&sim)[0].rx_packets, 10);
}

#[test]
fn panicking_event_is_recorded_as_a_fault() {
    let mut sim = basic(1, 10);
    sim.schedule(Duration::from_secs(1), "panics", |_, _| -> Result<(), SimError> {
        panic!("handler bug")
    })
    .unwrap();
    let summary = sim.run(SimTime::from_secs(5)).unwrap();

    assert_eq!(summary.faults, 1);
    let fault = &sim.faults()[0];
    assert_eq!(fault.label, "panics");
    assert_eq!(fault.at, SimTime::from_secs(1));
    assert!(matches!(&fault.error, SimError::EventFailed(msg) if msg.contains("handler bug")));
    // the sources kept running after the panic
    assert_eq!(report(&sim)[0].rx_packets, 10);
    assert_eq!(report(&sim)[1].rx_packets, 10);
}

#[test]
fn fault_handler_can_abort() {
    let mut sim = basic(1, 1000);
    sim.on_fault(|_| FaultAction::Abort);
    sim.schedule(Duration::from_millis(2500), "broken", |_, _| {
        Err(SimError::EventFailed("stop here".into()))
    })
    .unwrap();

    assert_eq!(
        sim.run(SimTime::from_secs(20)),
        Err(SimError::Aborted(SimTime::from_millis(2500)))
    );
    // the run is over; what was collected is still reportable
    let flows = report(&sim);
    assert!(flows[0].tx_packets > 0 && flows[0].tx_packets < 1000);
    assert_eq!(
        sim.schedule(Duration::ZERO, "late", |_, _| Ok(())).err(),
        Some(SimError::SimulationEnded)
    );
}

#[test]
fn cancelled_events_never_run() {
    let mut sim = basic(1, 1);
    let handle = sim
        .schedule(Duration::from_secs(1), "broken", |_, _| {
            Err(SimError::EventFailed("should be cancelled".into()))
        })
        .unwrap();
    assert!(sim.cancel(handle));
    assert!(!sim.cancel(handle));
    sim.run(SimTime::from_secs(3)).unwrap();
    assert!(sim.faults().is_empty());
}

#[test]
fn configuration_errors_surface_before_running() {
    let mut b = TopologyBuilder::new();
    b.add_node("a").add_link("a", "ghost", link(10, 1));
    let err = b.build().unwrap_err();
    assert_eq!(err, SimError::UnknownNode("ghost".into()));
    assert!(err.is_configuration());

    let mut b = TopologyBuilder::new();
    b.add_node("a")
        .add_node("b")
        .add_link("a", "b", link(10, 1))
        .add_link("b", "a", link(5, 1));
    assert_eq!(
        b.build().unwrap_err(),
        SimError::DuplicateLink("b".into(), "a".into())
    );
    assert!(b.allow_multi_links(true).build().is_ok());

    let mut b = TopologyBuilder::new();
    b.add_node("a")
        .add_node("b")
        .add_link("a", "b", link(10, 1).with_loss(LossModel::Random(2.0)));
    assert!(matches!(b.build(), Err(SimError::InvalidLinkConfig(_))));

    let mut sim = basic(1, 1);
    let n0 = sim.topology().node_id("n0").unwrap();
    let server = endpoint(&sim, "n1", 9);
    let err = sim
        .attach_traffic_source(
            n0,
            server,
            TrafficPattern::periodic(Duration::ZERO, 1, 10),
            SimTime::ZERO,
            SimTime::from_secs(1),
        )
        .unwrap_err();
    assert!(err.is_configuration());
}
