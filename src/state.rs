//! Application state management
//!
//! This module defines the AppState structure that holds:
//! - Resolver and its result caches
//! - Delivery service with the admission controller
//! - Usage tracker and metrics
//! - Server configuration

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::cache::CacheStats;
use crate::config::{ChannelProfile, ServerConfig};
use crate::delivery::{DeliveryService, StreamSession};
use crate::extract::Extractor;
use crate::formats::{DeliveryLinks, FormatNormalizer};
use crate::limits::AdmissionController;
use crate::metrics::Metrics;
use crate::proxy::StreamProxy;
use crate::resolver::Resolver;
use crate::usage::{UsageSummary, UsageTracker};

/// Recent usage records included per channel in the status report
const STATUS_RECENT_USAGE: usize = 10;

/// Application state shared across all handlers
pub struct AppState {
    /// Resolution operations and their caches
    pub resolver: Arc<Resolver>,

    /// Stream delivery
    pub delivery: DeliveryService,

    /// Concurrency ceiling for deliveries
    pub admission: Arc<AdmissionController>,

    pub usage: Arc<UsageTracker>,

    pub metrics: Arc<Metrics>,

    /// Configured channels by id
    pub channels: HashMap<String, ChannelProfile>,

    /// Server shutdown flag
    pub shutdown: AtomicBool,

    /// Server configuration
    pub config: ServerConfig,
}

/// Extraction tool part of the status report
#[derive(Debug, Serialize)]
pub struct ExtractorStatus {
    pub program: String,
    pub available: bool,
    pub version: Option<String>,
}

/// Delivery part of the status report
#[derive(Debug, Serialize)]
pub struct StreamStatus {
    pub active: usize,
    pub max_concurrent: usize,
    pub sessions: Vec<StreamSession>,
}

/// Diagnostics snapshot
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub version: &'static str,
    pub uptime_secs: u64,
    pub extractor: ExtractorStatus,
    pub streams: StreamStatus,
    pub caches: Vec<CacheStats>,
    pub usage: BTreeMap<String, UsageSummary>,
}

impl AppState {
    /// Create a new AppState around an extractor
    pub fn new(config: ServerConfig, extractor: Arc<dyn Extractor>) -> Self {
        let usage = Arc::new(UsageTracker::new(config.usage_history));
        let metrics = Arc::new(Metrics::new());
        let admission = Arc::new(AdmissionController::new(config.stream.max_concurrent));

        let links = DeliveryLinks::new(config.base_url(), config.stream.direct_urls);
        let resolver = Arc::new(Resolver::new(
            extractor,
            &config.extractor,
            &config.caches,
            FormatNormalizer::new(links),
            Arc::clone(&usage),
        ));

        let delivery = DeliveryService::new(
            Arc::clone(&resolver),
            StreamProxy::new(config.stream.timeout()),
            Arc::clone(&admission),
            Arc::clone(&metrics),
            Arc::clone(&usage),
            config.stream.channel_buffer,
        );

        let channels = config
            .channels
            .iter()
            .map(|c| (c.id.clone(), c.clone()))
            .collect();

        Self {
            resolver,
            delivery,
            admission,
            usage,
            metrics,
            channels,
            shutdown: AtomicBool::new(false),
            config,
        }
    }

    /// Look up a configured channel
    pub fn channel(&self, id: &str) -> Option<&ChannelProfile> {
        self.channels.get(id)
    }

    /// Remove expired cache entries.
    /// Returns number of removed entries
    pub fn sweep_caches(&self) -> usize {
        self.resolver.sweep()
    }

    /// Diagnostics snapshot
    pub fn status(&self) -> StatusReport {
        let extractor = self.resolver.extractor();
        StatusReport {
            version: env!("CARGO_PKG_VERSION"),
            uptime_secs: self.metrics.uptime_secs(),
            extractor: ExtractorStatus {
                program: extractor.program().to_string(),
                available: extractor.is_available(),
                version: extractor.version(),
            },
            streams: StreamStatus {
                active: self.admission.active(),
                max_concurrent: self.admission.max_concurrent(),
                sessions: self.delivery.sessions(),
            },
            caches: self.resolver.cache_stats(),
            usage: self.usage.summaries(STATUS_RECENT_USAGE),
        }
    }

    /// Signal shutdown and tear down in-memory state
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.resolver.clear();
        self.usage.clear();
        self.admission.reset();
        self.metrics.reset();
        tracing::info!("Caches cleared, counters reset");
    }

    /// Check if shutdown is requested
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}
