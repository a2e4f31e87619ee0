use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::net::IpAddr;

use crate::types::{EchoReply, Outcome};

/// Aggregate of several probes sent to one target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingSummary {
    pub target: IpAddr,
    pub sent: usize,
    pub received: usize,
    pub min_rtt_ms: Option<f64>,
    pub avg_rtt_ms: Option<f64>,
    pub max_rtt_ms: Option<f64>,
    pub jitter_ms: Option<f64>,
    pub ttl: Option<u8>,
    /// Outcome of the last non-successful probe, if any
    pub last_failure: Option<Outcome>,
    pub replies: Vec<EchoReply>,
}

impl PingSummary {
    pub fn from_replies(target: IpAddr, replies: Vec<EchoReply>) -> Self {
        let rtts: Vec<f64> = replies
            .iter()
            .filter(|r| r.is_success())
            .filter_map(|r| r.rtt)
            .map(|rtt| rtt.as_secs_f64() * 1000.0)
            .collect();

        let (min_rtt_ms, avg_rtt_ms, max_rtt_ms) = if rtts.is_empty() {
            (None, None, None)
        } else {
            (
                Some(Statistics::min(rtts.iter())),
                Some(rtts.iter().mean()),
                Some(Statistics::max(rtts.iter())),
            )
        };

        // Sample standard deviation needs at least two values.
        let jitter_ms = if rtts.len() > 1 {
            Some(rtts.iter().std_dev())
        } else {
            None
        };

        let ttl = replies.iter().rev().find_map(|r| r.ttl);
        let last_failure = replies
            .iter()
            .rev()
            .map(|r| r.outcome)
            .find(|outcome| *outcome != Outcome::Success);

        Self {
            target,
            sent: replies.len(),
            received: rtts.len(),
            min_rtt_ms,
            avg_rtt_ms,
            max_rtt_ms,
            jitter_ms,
            ttl,
            last_failure,
            replies,
        }
    }

    /// At least one probe was answered
    pub fn is_alive(&self) -> bool {
        self.received > 0
    }

    /// Percentage of probes without an echo reply
    pub fn packet_loss(&self) -> f64 {
        if self.sent == 0 {
            return 0.0;
        }
        (self.sent - self.received) as f64 * 100.0 / self.sent as f64
    }
}
