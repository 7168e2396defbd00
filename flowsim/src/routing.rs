use std::collections::{HashMap, VecDeque};

use crate::{
    link::Channel,
    network::{Device, DeviceId, Node, NodeId},
};

/// where to send a packet next: out of `out`, to be received by `next`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Hop {
    pub out: DeviceId,
    pub next: DeviceId,
}

/// shortest-hop routes between every pair of nodes.
#[derive(Debug, Default)]
pub struct RoutingTable {
    next_hop: HashMap<(NodeId, NodeId), Hop>,
}

impl RoutingTable {
    pub(crate) fn compute(nodes: &[Node], devices: &[Device], channels: &[Channel]) -> Self {
        // adjacency in index order so ties resolve the same way every build
        let neighbours: Vec<Vec<(NodeId, Hop)>> = nodes
            .iter()
            .map(|node| {
                node.devices
                    .iter()
                    .flat_map(|out| {
                        let channel = &channels[devices[out.0 as usize].channel.0 as usize];
                        channel
                            .devices()
                            .iter()
                            .filter(move |next| *next != out)
                            .map(move |next| {
                                (
                                    devices[next.0 as usize].node,
                                    Hop {
                                        out: *out,
                                        next: *next,
                                    },
                                )
                            })
                    })
                    .collect()
            })
            .collect();

        let mut next_hop = HashMap::new();
        for source in nodes {
            let mut visited = vec![false; nodes.len()];
            visited[source.id.0 as usize] = true;
            let mut frontier = VecDeque::new();

            for (peer, hop) in &neighbours[source.id.0 as usize] {
                if !visited[peer.0 as usize] {
                    visited[peer.0 as usize] = true;
                    next_hop.insert((source.id, *peer), *hop);
                    frontier.push_back((*peer, *hop));
                }
            }
            while let Some((node, first)) = frontier.pop_front() {
                for (peer, _) in &neighbours[node.0 as usize] {
                    if !visited[peer.0 as usize] {
                        visited[peer.0 as usize] = true;
                        next_hop.insert((source.id, *peer), first);
                        frontier.push_back((*peer, first));
                    }
                }
            }
        }

        Self { next_hop }
    }

    pub fn next_hop(&self, from: NodeId, to: NodeId) -> Option<Hop> {
        self.next_hop.get(&(from, to)).copied()
    }

    pub fn len(&self) -> usize {
        self.next_hop.len()
    }

    pub fn is_empty(&self) -> bool {
        self.next_hop.is_empty()
    }
}
