use std::time::Duration;

use crate::flow::{FiveTuple, FlowId, FlowStats, FlowStatsCollector};

/// one line of the flow report. Metrics with a zero denominator are `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowSummary {
    pub flow: FlowId,
    pub tuple: FiveTuple,
    pub tx_packets: u64,
    pub rx_packets: u64,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub throughput_bps: Option<f64>,
    pub average_delay: Option<Duration>,
    pub loss_ratio: Option<f64>,
    pub average_jitter: Option<Duration>,
    pub lost_packets: u64,
    pub times_forwarded: u64,
}

impl FlowSummary {
    fn new(tuple: &FiveTuple, stats: &FlowStats) -> Self {
        Self {
            flow: stats.flow,
            tuple: *tuple,
            tx_packets: stats.tx_packets,
            rx_packets: stats.rx_packets,
            tx_bytes: stats.tx_bytes,
            rx_bytes: stats.rx_bytes,
            throughput_bps: stats.throughput_bps().ok(),
            average_delay: stats.average_delay().ok(),
            loss_ratio: stats.loss_ratio().ok(),
            average_jitter: stats.average_jitter().ok(),
            lost_packets: stats.lost_packets(),
            times_forwarded: stats.times_forwarded,
        }
    }
}

/// view over the flows of a stopped run. Iterating does not touch the
/// collector, so the report can be walked any number of times.
#[derive(Debug, Clone, Copy)]
pub struct FlowReport<'a> {
    flows: &'a FlowStatsCollector,
}

impl<'a> FlowReport<'a> {
    pub(crate) fn new(flows: &'a FlowStatsCollector) -> Self {
        Self { flows }
    }

    pub fn iter(&self) -> FlowReportIter<'a> {
        FlowReportIter {
            flows: self.flows,
            next: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    pub fn get(&self, flow: FlowId) -> Option<FlowSummary> {
        let stats = self.flows.stats(flow)?;
        let tuple = self.flows.tuple(flow)?;
        Some(FlowSummary::new(tuple, stats))
    }
}

impl<'a> IntoIterator for FlowReport<'a> {
    type Item = FlowSummary;
    type IntoIter = FlowReportIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a> IntoIterator for &FlowReport<'a> {
    type Item = FlowSummary;
    type IntoIter = FlowReportIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// flows in id order.
#[derive(Debug, Clone)]
pub struct FlowReportIter<'a> {
    flows: &'a FlowStatsCollector,
    next: u32,
}

impl Iterator for FlowReportIter<'_> {
    type Item = FlowSummary;

    fn next(&mut self) -> Option<FlowSummary> {
        let id = FlowId(self.next);
        let stats = self.flows.stats(id)?;
        let tuple = self.flows.tuple(id)?;
        self.next += 1;
        Some(FlowSummary::new(tuple, stats))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.flows.len().saturating_sub(self.next as usize);
        (left, Some(left))
    }
}

impl ExactSizeIterator for FlowReportIter<'_> {}
