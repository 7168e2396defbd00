use rand::{Rng, rngs::StdRng};
use std::collections::BTreeSet;

use crate::{error::SimError, link::DataRate, packet::Packet, time::SimTime};

#[derive(Debug, Clone, Default, PartialEq)]
pub enum LossModel {
    #[default]
    None,
    /// drops every n-th packet offered to the channel
    EveryNth(u64),
    /// drops each packet independently with this probability
    Random(f64),
    /// drops the packets whose zero-based ordinal on the channel is listed
    Scripted(BTreeSet<u64>),
    /// drops packets that find too few tokens; tokens are bytes refilled at `rate`
    TokenBucket { rate: DataRate, burst_bytes: u64 },
    /// random early drop between two queue lengths, certain above `max_queued`
    Red {
        min_queued: usize,
        max_queued: usize,
        max_p: f64,
    },
}

impl LossModel {
    pub(crate) fn validate(&self) -> Result<(), SimError> {
        let invalid = |msg: String| Err(SimError::InvalidLinkConfig(msg));
        match self {
            LossModel::EveryNth(0) => invalid("loss period must be at least 1".into()),
            LossModel::Random(p) if !(0.0..=1.0).contains(p) => {
                invalid(format!("loss probability {p} outside [0, 1]"))
            }
            LossModel::TokenBucket { rate, burst_bytes } if rate.bps() == 0 || *burst_bytes == 0 => {
                invalid("token bucket needs a non-zero rate and burst".into())
            }
            LossModel::Red {
                min_queued,
                max_queued,
                max_p,
            } if min_queued >= max_queued || !(0.0..=1.0).contains(max_p) => invalid(format!(
                "red thresholds {min_queued}..{max_queued} with max_p {max_p} are invalid"
            )),
            _ => Ok(()),
        }
    }
}

/// transmitter queue as seen by the packet being offered.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct LinkLoad {
    /// packets waiting behind the one on the wire
    pub queued: usize,
    pub capacity: usize,
    pub busy: bool,
}

/// per-channel state of a loss model.
#[derive(Debug)]
pub(crate) struct LossState {
    model: LossModel,
    offered: u64,
    tokens: f64,
    refilled_at: SimTime,
}

impl LossState {
    pub fn new(model: LossModel) -> Self {
        let tokens = match &model {
            LossModel::TokenBucket { burst_bytes, .. } => *burst_bytes as f64,
            _ => 0.0,
        };
        Self {
            model,
            offered: 0,
            tokens,
            refilled_at: SimTime::ZERO,
        }
    }

    pub fn should_drop(&mut self, packet: &Packet, load: LinkLoad, now: SimTime, rng: &mut StdRng) -> bool {
        let ordinal = self.offered;
        self.offered += 1;

        match &self.model {
            LossModel::None => false,
            LossModel::EveryNth(n) => (ordinal + 1) % n == 0,
            LossModel::Random(p) => rng.random::<f64>() < *p,
            LossModel::Scripted(drops) => drops.contains(&ordinal),
            LossModel::TokenBucket { rate, burst_bytes } => {
                let elapsed = now.saturating_since(self.refilled_at).as_secs_f64();
                self.refilled_at = now;
                self.tokens = (self.tokens + elapsed * rate.bps() as f64 / 8.0).min(*burst_bytes as f64);

                let needed = f64::from(packet.size_bytes());
                if self.tokens >= needed {
                    self.tokens -= needed;
                    false
                } else {
                    true
                }
            }
            LossModel::Red {
                min_queued,
                max_queued,
                max_p,
            } => {
                if load.queued < *min_queued {
                    false
                } else if load.queued >= *max_queued {
                    true
                } else {
                    let span = (max_queued - min_queued) as f64;
                    let p = max_p * (load.queued - min_queued) as f64 / span;
                    rng.random::<f64>() < p
                }
            }
        }
    }
}
