use std::{
    collections::{HashMap, HashSet},
    net::Ipv4Addr,
};

use crate::{
    error::SimError,
    link::{Channel, ChannelKind, ChannelStats, LinkConfig},
    routing::{Hop, RoutingTable},
};

/// unique node handle
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct NodeId(pub u32);

/// network interface handle
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct DeviceId(pub u32);

/// link or shared medium handle
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ChannelId(pub u32);

#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub devices: Vec<DeviceId>,
}

#[derive(Debug, Clone)]
pub struct Device {
    pub id: DeviceId,
    pub node: NodeId,
    pub channel: ChannelId,
    pub addr: Ipv4Addr,
}

/// first subnet handed out; channel `k` gets `10.1.(k+1).0/24`.
const SUBNET_BASE: u32 = u32::from_be_bytes([10, 1, 1, 0]);
const MAX_HOSTS_PER_SUBNET: usize = 254;

#[derive(Clone, Debug)]
enum ChannelSpec {
    Link(String, String, LinkConfig),
    Shared(Vec<String>, LinkConfig),
}

/// builder for the topology
pub struct TopologyBuilder {
    nodes: Vec<String>,
    channels: Vec<ChannelSpec>,
    multi_links: bool,
}

impl Default for TopologyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TopologyBuilder {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            channels: Vec::new(),
            multi_links: false,
        }
    }

    /// adding a name that already exists is a no-op.
    pub fn add_node(&mut self, name: impl Into<String>) -> &mut Self {
        let name = name.into();
        if !self.nodes.contains(&name) {
            self.nodes.push(name);
        }
        self
    }

    /// bidirectional point-to-point link.
    pub fn add_link(
        &mut self,
        a: impl Into<String>,
        b: impl Into<String>,
        cfg: LinkConfig,
    ) -> &mut Self {
        self.channels.push(ChannelSpec::Link(a.into(), b.into(), cfg));
        self
    }

    /// one medium shared by all `members`, e.g. an ad-hoc wireless cell.
    pub fn add_shared_medium<I, S>(&mut self, members: I, cfg: LinkConfig) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let members = members.into_iter().map(Into::into).collect();
        self.channels.push(ChannelSpec::Shared(members, cfg));
        self
    }

    /// permit several links between the same pair of nodes.
    pub fn allow_multi_links(&mut self, allow: bool) -> &mut Self {
        self.multi_links = allow;
        self
    }

    pub fn build(&self) -> Result<Topology, SimError> {
        let mut nodes: Vec<Node> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, name)| Node {
                id: NodeId(i as u32),
                name: name.clone(),
                devices: Vec::new(),
            })
            .collect();
        let by_name: HashMap<String, NodeId> = nodes.iter().map(|n| (n.name.clone(), n.id)).collect();
        let resolve = |name: &String| {
            by_name
                .get(name)
                .copied()
                .ok_or_else(|| SimError::UnknownNode(name.clone()))
        };

        let mut devices: Vec<Device> = Vec::new();
        let mut channels: Vec<Channel> = Vec::new();
        let mut linked: HashSet<(NodeId, NodeId)> = HashSet::new();

        for (k, spec) in self.channels.iter().enumerate() {
            let (kind, members, cfg) = match spec {
                ChannelSpec::Link(a, b, cfg) => {
                    let (na, nb) = (resolve(a)?, resolve(b)?);
                    if na == nb {
                        return Err(SimError::InvalidLinkConfig(format!("link from {a} to itself")));
                    }
                    let pair = (na.min(nb), na.max(nb));
                    if !linked.insert(pair) && !self.multi_links {
                        return Err(SimError::DuplicateLink(a.clone(), b.clone()));
                    }
                    (ChannelKind::PointToPoint, vec![na, nb], cfg)
                }
                ChannelSpec::Shared(names, cfg) => {
                    let members = names.iter().map(resolve).collect::<Result<Vec<_>, _>>()?;
                    let distinct: HashSet<_> = members.iter().collect();
                    if distinct.len() != members.len() || members.len() < 2 {
                        return Err(SimError::InvalidLinkConfig(
                            "shared medium needs at least two distinct nodes".into(),
                        ));
                    }
                    if members.len() > MAX_HOSTS_PER_SUBNET {
                        return Err(SimError::InvalidLinkConfig(format!(
                            "shared medium holds at most {MAX_HOSTS_PER_SUBNET} nodes"
                        )));
                    }
                    (ChannelKind::Shared, members, cfg)
                }
            };
            cfg.validate()?;

            let channel_id = ChannelId(k as u32);
            let subnet = (k as u32)
                .checked_mul(256)
                .and_then(|offset| SUBNET_BASE.checked_add(offset))
                .ok_or_else(|| SimError::InvalidLinkConfig("address space exhausted".into()))?;

            let mut attached = Vec::with_capacity(members.len());
            for (host, node) in members.into_iter().enumerate() {
                let id = DeviceId(devices.len() as u32);
                devices.push(Device {
                    id,
                    node,
                    channel: channel_id,
                    addr: Ipv4Addr::from(subnet + host as u32 + 1),
                });
                nodes[node.0 as usize].devices.push(id);
                attached.push(id);
            }
            channels.push(Channel::new(channel_id, kind, cfg.clone(), attached));
        }

        let by_addr = devices.iter().map(|d| (d.addr, d.id)).collect();
        let routes = RoutingTable::compute(&nodes, &devices, &channels);
        tracing::debug!(
            nodes = nodes.len(),
            devices = devices.len(),
            channels = channels.len(),
            routes = routes.len(),
            "topology built"
        );

        Ok(Topology {
            nodes,
            devices,
            channels,
            by_name,
            by_addr,
            routes,
        })
    }
}

/// immutable layout of nodes, devices and channels plus the mutable
/// per-channel transmit state.
#[derive(Debug)]
pub struct Topology {
    nodes: Vec<Node>,
    devices: Vec<Device>,
    channels: Vec<Channel>,
    by_name: HashMap<String, NodeId>,
    by_addr: HashMap<Ipv4Addr, DeviceId>,
    routes: RoutingTable,
}

impl Topology {
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0 as usize)
    }

    pub fn node_id(&self, name: &str) -> Result<NodeId, SimError> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| SimError::UnknownNode(name.to_string()))
    }

    pub fn device(&self, id: DeviceId) -> Option<&Device> {
        self.devices.get(id.0 as usize)
    }

    pub fn channel(&self, id: ChannelId) -> Option<&Channel> {
        self.channels.get(id.0 as usize)
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub(crate) fn channel_mut(&mut self, id: ChannelId) -> Option<&mut Channel> {
        self.channels.get_mut(id.0 as usize)
    }

    pub fn channel_stats(&self, id: ChannelId) -> Option<ChannelStats> {
        self.channel(id).map(Channel::stats)
    }

    /// address of the node's first device.
    pub fn address(&self, node: NodeId) -> Option<Ipv4Addr> {
        let first = self.node(node)?.devices.first()?;
        self.device(*first).map(|d| d.addr)
    }

    /// node owning an address.
    pub fn owner(&self, addr: Ipv4Addr) -> Option<NodeId> {
        let device = self.by_addr.get(&addr)?;
        self.device(*device).map(|d| d.node)
    }

    pub fn route(&self, from: NodeId, to: NodeId) -> Option<Hop> {
        self.routes.next_hop(from, to)
    }
}
