use std::{collections::HashMap, fmt, net::Ipv4Addr, time::Duration};

use crate::{error::SimError, packet::Packet, packet::Protocol, time::SimTime};

/// dense flow index into both the classifier and the collector. Flows are
/// never removed.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct FlowId(pub u32);

impl FlowId {
    fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// exact-match flow key.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct FiveTuple {
    pub src_addr: Ipv4Addr,
    pub dst_addr: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: Protocol,
}

impl fmt::Display for FiveTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{} ({})",
            self.src_addr, self.src_port, self.dst_addr, self.dst_port, self.protocol
        )
    }
}

/// maps five-tuples to flow ids in first-seen order.
#[derive(Debug, Default, Clone)]
pub struct FlowClassifier {
    ids: HashMap<FiveTuple, FlowId>,
    tuples: Vec<FiveTuple>,
}

impl FlowClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// id of the packet's flow, assigning the next free id on first sight.
    pub fn classify(&mut self, packet: &Packet) -> FlowId {
        let tuple = packet.five_tuple();
        if let Some(id) = self.ids.get(&tuple) {
            return *id;
        }
        let id = FlowId(self.tuples.len() as u32);
        self.tuples.push(tuple);
        self.ids.insert(tuple, id);
        id
    }

    pub fn lookup(&self, tuple: &FiveTuple) -> Option<FlowId> {
        self.ids.get(tuple).copied()
    }

    pub fn tuple(&self, id: FlowId) -> Option<&FiveTuple> {
        self.tuples.get(id.index())
    }

    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FlowId, &FiveTuple)> {
        self.tuples
            .iter()
            .enumerate()
            .map(|(i, t)| (FlowId(i as u32), t))
    }
}

const DROP_REASONS: usize = 3;

/// why a packet never reached its destination.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum DropReason {
    /// drop-tail queue overflow on the outgoing transmitter
    QueueFull,
    /// rejected by the channel's loss model
    LossModel,
    /// no route to the destination address
    NoRoute,
}

impl DropReason {
    pub const ALL: [DropReason; DROP_REASONS] =
        [DropReason::QueueFull, DropReason::LossModel, DropReason::NoRoute];

    fn index(&self) -> usize {
        match self {
            DropReason::QueueFull => 0,
            DropReason::LossModel => 1,
            DropReason::NoRoute => 2,
        }
    }
}

/// derived per-flow metrics, for error reporting.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Metric {
    Throughput,
    AverageDelay,
    AverageJitter,
    LossRatio,
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Metric::Throughput => "throughput",
            Metric::AverageDelay => "average delay",
            Metric::AverageJitter => "average jitter",
            Metric::LossRatio => "loss ratio",
        };
        f.write_str(name)
    }
}

/// running aggregates for one flow. Counters only grow.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowStats {
    pub flow: FlowId,
    pub tx_packets: u64,
    pub rx_packets: u64,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub delay_sum: Duration,
    /// sum of |delay(n) - delay(n-1)| over consecutive receptions
    pub jitter_sum: Duration,
    pub last_delay: Option<Duration>,
    pub first_tx: Option<SimTime>,
    pub last_tx: Option<SimTime>,
    pub first_rx: Option<SimTime>,
    pub last_rx: Option<SimTime>,
    /// hops at which a router forwarded one of the flow's packets
    pub times_forwarded: u64,
    dropped: [u64; DROP_REASONS],
}

impl FlowStats {
    pub fn new(flow: FlowId) -> Self {
        Self {
            flow,
            tx_packets: 0,
            rx_packets: 0,
            tx_bytes: 0,
            rx_bytes: 0,
            delay_sum: Duration::ZERO,
            jitter_sum: Duration::ZERO,
            last_delay: None,
            first_tx: None,
            last_tx: None,
            first_rx: None,
            last_rx: None,
            times_forwarded: 0,
            dropped: [0; DROP_REASONS],
        }
    }

    pub fn dropped(&self, reason: DropReason) -> u64 {
        self.dropped[reason.index()]
    }

    pub fn lost_packets(&self) -> u64 {
        self.tx_packets.saturating_sub(self.rx_packets)
    }

    fn no_data(&self, metric: Metric) -> SimError {
        SimError::NoData { flow: self.flow, metric }
    }

    /// received bits per second over the window from the first send to the
    /// last reception.
    pub fn throughput_bps(&self) -> Result<f64, SimError> {
        let (Some(first_tx), Some(last_rx)) = (self.first_tx, self.last_rx) else {
            return Err(self.no_data(Metric::Throughput));
        };
        let window = last_rx.saturating_since(first_tx);
        if self.rx_packets == 0 || window.is_zero() {
            return Err(self.no_data(Metric::Throughput));
        }
        Ok(self.rx_bytes as f64 * 8.0 / window.as_secs_f64())
    }

    pub fn average_delay(&self) -> Result<Duration, SimError> {
        if self.rx_packets == 0 {
            return Err(self.no_data(Metric::AverageDelay));
        }
        Ok(div_duration(self.delay_sum, self.rx_packets))
    }

    pub fn average_jitter(&self) -> Result<Duration, SimError> {
        if self.rx_packets < 2 {
            return Err(self.no_data(Metric::AverageJitter));
        }
        Ok(div_duration(self.jitter_sum, self.rx_packets - 1))
    }

    /// fraction of sent packets that were not received, in `[0, 1]`.
    pub fn loss_ratio(&self) -> Result<f64, SimError> {
        if self.tx_packets == 0 {
            return Err(self.no_data(Metric::LossRatio));
        }
        Ok(self.lost_packets() as f64 / self.tx_packets as f64)
    }
}

fn div_duration(total: Duration, n: u64) -> Duration {
    let nanos = total.as_nanos() / u128::from(n);
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

/// classifies every send/receive and keeps the matching flow's aggregates.
#[derive(Debug, Default, Clone)]
pub struct FlowStatsCollector {
    classifier: FlowClassifier,
    stats: Vec<FlowStats>,
}

impl FlowStatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn classifier(&self) -> &FlowClassifier {
        &self.classifier
    }

    fn entry(&mut self, packet: &Packet) -> &mut FlowStats {
        let id = self.classifier.classify(packet);
        if id.index() == self.stats.len() {
            self.stats.push(FlowStats::new(id));
        }
        &mut self.stats[id.index()]
    }

    pub fn on_send(&mut self, packet: &Packet) -> FlowId {
        let size = u64::from(packet.size_bytes());
        let stats = self.entry(packet);
        stats.tx_packets += 1;
        stats.tx_bytes += size;
        if stats.first_tx.is_none() {
            stats.first_tx = Some(packet.sent_at);
        }
        stats.last_tx = Some(stats.last_tx.map_or(packet.sent_at, |t| t.max(packet.sent_at)));
        stats.flow
    }

    pub fn on_receive(&mut self, packet: &Packet, arrival: SimTime) -> FlowId {
        let size = u64::from(packet.size_bytes());
        let delay = arrival.saturating_since(packet.sent_at);
        let stats = self.entry(packet);
        stats.rx_packets += 1;
        stats.rx_bytes += size;
        stats.delay_sum += delay;
        if let Some(prev) = stats.last_delay {
            stats.jitter_sum += delay.abs_diff(prev);
        }
        stats.last_delay = Some(delay);
        if stats.first_rx.is_none() {
            stats.first_rx = Some(arrival);
        }
        stats.last_rx = Some(stats.last_rx.map_or(arrival, |t| t.max(arrival)));
        stats.flow
    }

    pub fn on_forward(&mut self, packet: &Packet) -> FlowId {
        let stats = self.entry(packet);
        stats.times_forwarded += 1;
        stats.flow
    }

    pub fn on_drop(&mut self, packet: &Packet, reason: DropReason) -> FlowId {
        let stats = self.entry(packet);
        stats.dropped[reason.index()] += 1;
        stats.flow
    }

    pub fn stats(&self, id: FlowId) -> Option<&FlowStats> {
        self.stats.get(id.index())
    }

    pub fn tuple(&self, id: FlowId) -> Option<&FiveTuple> {
        self.classifier.tuple(id)
    }

    pub fn len(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FiveTuple, &FlowStats)> {
        self.classifier.tuples.iter().zip(self.stats.iter())
    }
}
