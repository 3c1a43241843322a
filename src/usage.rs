//! Per-channel usage history for diagnostics

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};

/// One recorded operation
#[derive(Debug, Clone, Serialize)]
pub struct UsageRecord {
    pub operation: String,
    pub params: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct ChannelUsage {
    recent: VecDeque<UsageRecord>,
    /// Lifetime count per operation, unaffected by the ring cap
    totals: BTreeMap<String, u64>,
}

/// Summary of one channel's activity
#[derive(Debug, Clone, Serialize)]
pub struct UsageSummary {
    pub total: u64,
    pub by_operation: BTreeMap<String, u64>,
    pub last_used: Option<DateTime<Utc>>,
    pub recent: Vec<UsageRecord>,
}

/// Bounded ring of recent operations per channel
pub struct UsageTracker {
    channels: DashMap<String, ChannelUsage>,
    capacity: usize,
}

impl UsageTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Append a record, dropping the oldest once the cap is exceeded
    pub fn record(&self, channel: &str, operation: &str, params: serde_json::Value) {
        let mut usage = self.channels.entry(channel.to_string()).or_default();
        usage.recent.push_back(UsageRecord {
            operation: operation.to_string(),
            params,
            timestamp: Utc::now(),
        });
        while usage.recent.len() > self.capacity {
            usage.recent.pop_front();
        }
        *usage.totals.entry(operation.to_string()).or_insert(0) += 1;
    }

    /// Recent records of a channel, oldest first
    pub fn recent(&self, channel: &str) -> Vec<UsageRecord> {
        self.channels
            .get(channel)
            .map(|u| u.recent.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Summaries keyed by channel id, with the last `recent_limit` records
    pub fn summaries(&self, recent_limit: usize) -> BTreeMap<String, UsageSummary> {
        self.channels
            .iter()
            .map(|entry| {
                let usage = entry.value();
                let skip = usage.recent.len().saturating_sub(recent_limit);
                let summary = UsageSummary {
                    total: usage.totals.values().sum(),
                    by_operation: usage.totals.clone(),
                    last_used: usage.recent.back().map(|r| r.timestamp),
                    recent: usage.recent.iter().skip(skip).cloned().collect(),
                };
                (entry.key().clone(), summary)
            })
            .collect()
    }

    pub fn clear(&self) {
        self.channels.clear();
    }
}
