use std::fmt;

use crate::{
    error::SimError,
    flow::DropReason,
    link::Transmission,
    network::{DeviceId, NodeId},
    packet::Packet,
    scheduler::Scheduler,
    sim::Network,
    traffic::{Application, Firing},
};

/// route `packet` out of `node`, or deliver it locally when the node owns
/// the destination address.
pub(crate) fn send_from(
    sched: &mut Scheduler<Network>,
    net: &mut Network,
    node: NodeId,
    packet: Packet,
) -> Result<(), SimError> {
    let Some(dst_node) = net.topology.owner(*packet.dst.ip()) else {
        packet_log(format_args!("drop {packet:?}: no node owns the destination"));
        net.flows.on_drop(&packet, DropReason::NoRoute);
        return Ok(());
    };
    if dst_node == node {
        return deliver_local(sched, net, node, packet);
    }
    let Some(hop) = net.topology.route(node, dst_node) else {
        packet_log(format_args!("drop {packet:?}: no route from node {}", node.0));
        net.flows.on_drop(&packet, DropReason::NoRoute);
        return Ok(());
    };

    let now = sched.now();
    let channel_id = net
        .topology
        .device(hop.out)
        .map(|d| d.channel)
        .ok_or_else(|| SimError::EventFailed(format!("device {} missing", hop.out.0)))?;
    let channel = net
        .topology
        .channel_mut(channel_id)
        .ok_or_else(|| SimError::EventFailed(format!("channel {} missing", channel_id.0)))?;

    match channel.transmit(hop.out, &packet, now, &mut net.rng) {
        Transmission::Dropped(reason) => {
            net.flows.on_drop(&packet, reason);
        }
        Transmission::Delivered { arrival } => {
            packet_log(format_args!("tx {packet:?} on channel {} at {now}", channel_id.0));
            sched.schedule_at(arrival, "arrival", move |sched, net| {
                arrive(sched, net, hop.next, packet)
            })?;
        }
    }
    Ok(())
}

/// a packet finished crossing a channel and reached `device`.
fn arrive(
    sched: &mut Scheduler<Network>,
    net: &mut Network,
    device: DeviceId,
    packet: Packet,
) -> Result<(), SimError> {
    let node = net
        .topology
        .device(device)
        .map(|d| d.node)
        .ok_or_else(|| SimError::EventFailed(format!("device {} missing", device.0)))?;

    if net.topology.owner(*packet.dst.ip()) == Some(node) {
        deliver_local(sched, net, node, packet)
    } else {
        net.flows.on_forward(&packet);
        send_from(sched, net, node, packet)
    }
}

fn deliver_local(
    sched: &mut Scheduler<Network>,
    net: &mut Network,
    node: NodeId,
    packet: Packet,
) -> Result<(), SimError> {
    let now = sched.now();
    packet_log(format_args!("rx {packet:?} at {now}"));
    net.flows.on_receive(&packet, now);

    // nothing listening: counted as received by the flow, then discarded
    let Some(app) = net.apps.get_mut(&(node, packet.dst.port())) else {
        return Ok(());
    };
    app.record(&packet);
    if !matches!(app, Application::Echo(_)) {
        return Ok(());
    }

    let reply = Packet::udp(packet.dst, packet.src, packet.payload.clone(), now, packet.seq);
    net.flows.on_send(&reply);
    send_from(sched, net, node, reply)
}

/// emit the next packet of source `idx` and keep it going.
pub(crate) fn fire_source(
    sched: &mut Scheduler<Network>,
    net: &mut Network,
    idx: usize,
) -> Result<(), SimError> {
    let now = sched.now();
    let source = net
        .sources
        .get_mut(idx)
        .ok_or_else(|| SimError::EventFailed(format!("traffic source {idx} missing")))?;
    let node = source.node;
    let Firing { packet, next } = source.fire(now, &mut net.rng);

    if let Some(next) = next {
        sched.schedule_at(next, "source", move |sched, net| fire_source(sched, net, idx))?;
    }
    match packet {
        Some(packet) => {
            net.flows.on_send(&packet);
            send_from(sched, net, node, packet)
        }
        None => Ok(()),
    }
}

#[cfg(feature = "packet_tracing")]
fn packet_log(args: fmt::Arguments<'_>) {
    tracing::debug!("{args}");
}

#[cfg(not(feature = "packet_tracing"))]
fn packet_log(_args: fmt::Arguments<'_>) {}
