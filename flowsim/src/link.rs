use rand::rngs::StdRng;
use std::{collections::VecDeque, fmt, str::FromStr, time::Duration};

use crate::{
    error::SimError,
    flow::DropReason,
    loss::{LinkLoad, LossModel, LossState},
    network::{ChannelId, DeviceId},
    packet::Packet,
    time::SimTime,
};

/// packets a transmitter queue holds unless configured otherwise.
pub const DEFAULT_QUEUE_PACKETS: usize = 100;

/// link capacity in bits per second.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct DataRate(pub u64);

impl DataRate {
    pub const fn from_bps(bps: u64) -> Self {
        DataRate(bps)
    }

    pub const fn from_kbps(kbps: u64) -> Self {
        DataRate(kbps * 1_000)
    }

    pub const fn from_mbps(mbps: u64) -> Self {
        DataRate(mbps * 1_000_000)
    }

    pub fn bps(&self) -> u64 {
        self.0
    }

    /// time to serialize `bytes` onto the wire, rounded up to the nanosecond.
    pub fn tx_time(&self, bytes: u32) -> Duration {
        if self.0 == 0 {
            return Duration::MAX;
        }
        let bits = u128::from(bytes) * 8;
        let nanos = (bits * 1_000_000_000).div_ceil(u128::from(self.0));
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

impl fmt::Display for DataRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            bps if bps >= 1_000_000_000 && bps % 1_000_000_000 == 0 => write!(f, "{}Gbps", bps / 1_000_000_000),
            bps if bps >= 1_000_000 && bps % 1_000_000 == 0 => write!(f, "{}Mbps", bps / 1_000_000),
            bps if bps >= 1_000 && bps % 1_000 == 0 => write!(f, "{}Kbps", bps / 1_000),
            bps => write!(f, "{bps}bps"),
        }
    }
}

/// parses `"10Mbps"`, `"800Kbps"`, `"1.5Gbps"` or `"9600bps"` (case-insensitive).
impl FromStr for DataRate {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SimError::InvalidLinkConfig(format!("cannot parse data rate {s:?}"));
        let lower = s.trim().to_ascii_lowercase();
        let body = lower.strip_suffix("bps").ok_or_else(invalid)?;
        let (number, scale) = if let Some(n) = body.strip_suffix('g') {
            (n, 1e9)
        } else if let Some(n) = body.strip_suffix('m') {
            (n, 1e6)
        } else if let Some(n) = body.strip_suffix('k') {
            (n, 1e3)
        } else {
            (body, 1.0)
        };
        let value: f64 = number.trim().parse().map_err(|_| invalid())?;
        let bps = (value * scale).round();
        if !bps.is_finite() || bps < 1.0 || bps > u64::MAX as f64 {
            return Err(invalid());
        }
        Ok(DataRate(bps as u64))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct LinkConfig {
    pub data_rate: DataRate,
    pub latency: Duration,
    /// packets that may wait behind the one being transmitted
    pub queue_capacity: usize,
    pub loss: LossModel,
}

impl LinkConfig {
    pub fn new(data_rate: DataRate, latency: Duration) -> Self {
        Self {
            data_rate,
            latency,
            queue_capacity: DEFAULT_QUEUE_PACKETS,
            loss: LossModel::None,
        }
    }

    pub fn with_queue_capacity(mut self, packets: usize) -> Self {
        self.queue_capacity = packets;
        self
    }

    pub fn with_loss(mut self, loss: LossModel) -> Self {
        self.loss = loss;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), SimError> {
        if self.data_rate.bps() == 0 {
            return Err(SimError::InvalidLinkConfig("data rate must be positive".into()));
        }
        self.loss.validate()
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ChannelKind {
    /// two devices, one transmitter per direction
    PointToPoint,
    /// any number of devices contending for a single transmitter
    Shared,
}

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct ChannelStats {
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub dropped_queue_full: u64,
    pub dropped_loss: u64,
}

pub(crate) enum Transmission {
    Delivered { arrival: SimTime },
    Dropped(DropReason),
}

/// serializes packets FIFO behind a drop-tail queue.
///
/// The queue is tracked by the start times of waiting packets: a packet
/// leaves the queue once its transmission has started.
#[derive(Debug, Default)]
struct Transmitter {
    busy_until: SimTime,
    waiting: VecDeque<SimTime>,
}

impl Transmitter {
    fn drain(&mut self, now: SimTime) {
        while self.waiting.front().is_some_and(|start| *start <= now) {
            self.waiting.pop_front();
        }
    }

    fn load(&mut self, now: SimTime, capacity: usize) -> LinkLoad {
        self.drain(now);
        LinkLoad {
            queued: self.waiting.len(),
            capacity,
            busy: self.busy_until > now,
        }
    }

    /// reserve the wire; `None` when the packet would wait behind a full queue.
    fn admit(&mut self, now: SimTime, tx_time: Duration, capacity: usize) -> Option<SimTime> {
        self.drain(now);
        let start = self.busy_until.max(now);
        if start > now {
            if self.waiting.len() >= capacity {
                return None;
            }
            self.waiting.push_back(start);
        }
        let done = start.checked_add(tx_time).unwrap_or(SimTime(u64::MAX));
        self.busy_until = done;
        Some(done)
    }
}

/// a point-to-point link or a shared medium.
#[derive(Debug)]
pub struct Channel {
    id: ChannelId,
    kind: ChannelKind,
    config: LinkConfig,
    devices: Vec<DeviceId>,
    transmitters: Vec<Transmitter>,
    loss: LossState,
    stats: ChannelStats,
}

impl Channel {
    pub(crate) fn new(id: ChannelId, kind: ChannelKind, config: LinkConfig, devices: Vec<DeviceId>) -> Self {
        let transmitters = match kind {
            ChannelKind::PointToPoint => devices.iter().map(|_| Transmitter::default()).collect(),
            ChannelKind::Shared => vec![Transmitter::default()],
        };
        Self {
            id,
            kind,
            loss: LossState::new(config.loss.clone()),
            config,
            devices,
            transmitters,
            stats: ChannelStats::default(),
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn devices(&self) -> &[DeviceId] {
        &self.devices
    }

    pub fn stats(&self) -> ChannelStats {
        self.stats
    }

    fn transmitter_index(&self, from: DeviceId) -> usize {
        match self.kind {
            ChannelKind::Shared => 0,
            ChannelKind::PointToPoint => self.devices.iter().position(|d| *d == from).unwrap_or(0),
        }
    }

    /// offer `packet` from device `from` at `now`.
    pub(crate) fn transmit(
        &mut self,
        from: DeviceId,
        packet: &Packet,
        now: SimTime,
        rng: &mut StdRng,
    ) -> Transmission {
        let tx_time = self.config.data_rate.tx_time(packet.size_bytes());
        let capacity = self.config.queue_capacity;
        let idx = self.transmitter_index(from);
        let transmitter = &mut self.transmitters[idx];

        let load = transmitter.load(now, capacity);
        let Some(done) = transmitter.admit(now, tx_time, capacity) else {
            self.stats.dropped_queue_full += 1;
            tracing::debug!(channel = self.id.0, queued = load.queued, "queue full, dropping {packet:?}");
            return Transmission::Dropped(DropReason::QueueFull);
        };

        self.stats.packets_sent += 1;
        self.stats.bytes_sent += u64::from(packet.size_bytes());

        if self.loss.should_drop(packet, load, now, rng) {
            self.stats.dropped_loss += 1;
            tracing::debug!(channel = self.id.0, "loss model dropped {packet:?}");
            return Transmission::Dropped(DropReason::LossModel);
        }

        let arrival = done.checked_add(self.config.latency).unwrap_or(SimTime(u64::MAX));
        Transmission::Delivered { arrival }
    }
}
