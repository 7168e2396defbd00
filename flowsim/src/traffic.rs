use bytes::Bytes;
use rand::{Rng, rngs::StdRng};
use rand_distr::{Distribution as _, Exp};
use std::{net::SocketAddrV4, time::Duration};

use crate::{
    error::SimError,
    link::DataRate,
    network::NodeId,
    packet::Packet,
    time::SimTime,
};

/// random duration used for on/off periods.
#[derive(Debug, Clone, PartialEq)]
pub enum Distribution {
    Constant(Duration),
    Uniform { min: Duration, max: Duration },
    Exponential { mean: Duration },
}

impl Distribution {
    pub(crate) fn sample(&self, rng: &mut StdRng) -> Duration {
        match self {
            Distribution::Constant(d) => *d,
            Distribution::Uniform { min, max } => {
                let lo = u64::try_from(min.as_nanos()).unwrap_or(u64::MAX);
                let hi = u64::try_from(max.as_nanos()).unwrap_or(u64::MAX);
                Duration::from_nanos(rng.random_range(lo..=hi))
            }
            Distribution::Exponential { mean } => match Exp::new(1.0 / mean.as_secs_f64()) {
                Ok(exp) => Duration::try_from_secs_f64(exp.sample(rng)).unwrap_or(Duration::MAX),
                Err(_) => *mean,
            },
        }
    }

    /// true when every sample is zero.
    fn always_zero(&self) -> bool {
        match self {
            Distribution::Constant(d) => d.is_zero(),
            Distribution::Uniform { max, .. } => max.is_zero(),
            Distribution::Exponential { mean } => mean.is_zero(),
        }
    }

    fn validate(&self) -> Result<(), SimError> {
        if let Distribution::Uniform { min, max } = self {
            if min > max {
                return Err(SimError::InvalidTrafficConfig(format!(
                    "uniform period {min:?}..{max:?} is empty"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrafficPattern {
    /// one packet every `interval`, `max_packets` in total
    Periodic {
        interval: Duration,
        max_packets: u64,
        payload_bytes: u32,
    },
    /// sends at `rate` during on periods, silent during off periods. The
    /// source opens with an on period, so its first packet leaves at `start`
    /// rather than after an off period and one packet gap.
    OnOff {
        rate: DataRate,
        payload_bytes: u32,
        on_time: Distribution,
        off_time: Distribution,
        max_bytes: Option<u64>,
    },
}

impl TrafficPattern {
    pub fn periodic(interval: Duration, max_packets: u64, payload_bytes: u32) -> Self {
        TrafficPattern::Periodic {
            interval,
            max_packets,
            payload_bytes,
        }
    }

    /// always-on generator: 1 s on periods with no gap between them. The
    /// first packet goes out at the source's start time.
    pub fn on_off(rate: DataRate, payload_bytes: u32) -> Self {
        TrafficPattern::OnOff {
            rate,
            payload_bytes,
            on_time: Distribution::Constant(Duration::from_secs(1)),
            off_time: Distribution::Constant(Duration::ZERO),
            max_bytes: None,
        }
    }

    /// replace the on/off periods of an `OnOff` pattern.
    pub fn with_periods(self, on: Distribution, off: Distribution) -> Self {
        match self {
            TrafficPattern::OnOff {
                rate,
                payload_bytes,
                max_bytes,
                ..
            } => TrafficPattern::OnOff {
                rate,
                payload_bytes,
                on_time: on,
                off_time: off,
                max_bytes,
            },
            other => other,
        }
    }

    pub fn payload_bytes(&self) -> u32 {
        match self {
            TrafficPattern::Periodic { payload_bytes, .. } | TrafficPattern::OnOff { payload_bytes, .. } => {
                *payload_bytes
            }
        }
    }

    fn validate(&self) -> Result<(), SimError> {
        let invalid = |msg: &str| Err(SimError::InvalidTrafficConfig(msg.to_string()));
        match self {
            TrafficPattern::Periodic { interval, .. } if interval.is_zero() => {
                invalid("periodic interval must be positive")
            }
            TrafficPattern::OnOff {
                rate,
                on_time,
                off_time,
                ..
            } => {
                if rate.bps() == 0 {
                    return invalid("on/off rate must be positive");
                }
                if on_time.always_zero() {
                    return invalid("on period is always zero");
                }
                on_time.validate()?;
                off_time.validate()
            }
            _ => Ok(()),
        }
    }
}

/// identifies an attached traffic source.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct SourceHandle(pub(crate) usize);

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct SourceStats {
    pub packets: u64,
    pub payload_bytes: u64,
}

/// outcome of one source firing.
pub(crate) struct Firing {
    pub packet: Option<Packet>,
    pub next: Option<SimTime>,
}

pub(crate) struct TrafficSource {
    pub node: NodeId,
    local: SocketAddrV4,
    remote: SocketAddrV4,
    pattern: TrafficPattern,
    start: SimTime,
    stop: SimTime,
    payload: Bytes,
    stats: SourceStats,
    /// end of the current on period, drawn at the first send
    on_until: Option<SimTime>,
}

impl TrafficSource {
    pub fn new(
        node: NodeId,
        local: SocketAddrV4,
        remote: SocketAddrV4,
        pattern: TrafficPattern,
        start: SimTime,
        stop: SimTime,
    ) -> Result<Self, SimError> {
        pattern.validate()?;
        if stop < start {
            return Err(SimError::InvalidTrafficConfig(format!(
                "source stops at {stop} before starting at {start}"
            )));
        }
        let payload = Bytes::from(vec![0u8; pattern.payload_bytes() as usize]);
        Ok(Self {
            node,
            local,
            remote,
            pattern,
            start,
            stop,
            payload,
            stats: SourceStats::default(),
            on_until: None,
        })
    }

    pub fn stats(&self) -> SourceStats {
        self.stats
    }

    /// time of the first send, if the source sends at all.
    pub fn first_send(&mut self, rng: &mut StdRng) -> Option<SimTime> {
        if !self.budget_left() {
            return None;
        }
        if matches!(self.pattern, TrafficPattern::OnOff { .. }) {
            self.next_on_send(self.start, rng)
        } else {
            Some(self.start)
        }
    }

    /// emit one packet at `now` and decide when to fire next.
    pub fn fire(&mut self, now: SimTime, rng: &mut StdRng) -> Firing {
        let packet = if now <= self.stop && self.budget_left() {
            let packet = Packet::udp(self.local, self.remote, self.payload.clone(), now, self.stats.packets);
            self.stats.packets += 1;
            self.stats.payload_bytes += self.payload.len() as u64;
            Some(packet)
        } else {
            None
        };

        let next = if !self.budget_left() {
            None
        } else {
            match self.pattern {
                TrafficPattern::Periodic { interval, .. } => {
                    now.checked_add(interval).filter(|t| *t <= self.stop)
                }
                TrafficPattern::OnOff {
                    rate, payload_bytes, ..
                } => {
                    let gap = rate.tx_time(payload_bytes);
                    now.checked_add(gap).and_then(|t| self.next_on_send(t, rng))
                }
            }
        };

        Firing { packet, next }
    }

    fn budget_left(&self) -> bool {
        match &self.pattern {
            TrafficPattern::Periodic { max_packets, .. } => self.stats.packets < *max_packets,
            TrafficPattern::OnOff { max_bytes, .. } => {
                max_bytes.is_none_or(|max| self.stats.payload_bytes + self.payload.len() as u64 <= max)
            }
        }
    }

    /// earliest send time `>= candidate` that falls inside an on period,
    /// drawing new off/on periods as needed.
    fn next_on_send(&mut self, candidate: SimTime, rng: &mut StdRng) -> Option<SimTime> {
        let TrafficPattern::OnOff { on_time, off_time, .. } = &self.pattern else {
            return Some(candidate);
        };
        // an on period past the end of time lasts forever; an off period
        // past it ends the source
        let mut on_until = match self.on_until {
            Some(t) => t,
            None => self.start.saturating_add(on_time.sample(rng)),
        };

        let mut at = candidate;
        while at >= on_until && at <= self.stop && on_until < SimTime::MAX {
            let resume = on_until.checked_add(off_time.sample(rng))?;
            on_until = resume.saturating_add(on_time.sample(rng));
            at = at.max(resume);
        }
        self.on_until = Some(on_until);
        (at <= self.stop).then_some(at)
    }
}

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct AppStats {
    pub packets: u64,
    pub bytes: u64,
}

/// receiver bound to a UDP port.
#[derive(Debug, Clone, PartialEq)]
pub enum Application {
    /// counts what it receives
    Sink(AppStats),
    /// counts and returns every datagram to its sender
    Echo(AppStats),
}

impl Application {
    pub fn stats(&self) -> AppStats {
        match self {
            Application::Sink(stats) | Application::Echo(stats) => *stats,
        }
    }

    pub(crate) fn record(&mut self, packet: &Packet) {
        let (Application::Sink(stats) | Application::Echo(stats)) = self;
        stats.packets += 1;
        stats.bytes += packet.payload.len() as u64;
    }
}
