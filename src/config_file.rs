//! Configuration file support
//!
//! Loads server configuration from TOML files. Every section is optional
//! and falls back to the built-in defaults.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::{
    CacheConfig, CachesConfig, ChannelProfile, ExtractorConfig, ServerConfig, StreamConfig,
};

/// Configuration file format
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Server settings
    pub server: Option<ServerSettings>,
    /// Logging settings
    pub logging: Option<LoggingSettings>,
    /// Cache settings
    pub cache: Option<CacheSettings>,
    /// Extraction tool settings
    pub extractor: Option<ExtractorSettings>,
    /// Limits settings
    pub limits: Option<LimitsSettings>,
    /// Channel profiles
    #[serde(default, rename = "channel")]
    pub channels: Vec<ChannelProfile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Host address to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Externally visible base URL
    pub public_url: Option<String>,
    /// Enable CORS
    pub cors_enabled: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    pub search: Option<CacheConfig>,
    pub metadata: Option<CacheConfig>,
    pub formats: Option<CacheConfig>,
    pub listings: Option<CacheConfig>,
    pub urls: Option<CacheConfig>,
    /// Sweep interval in seconds
    pub sweep_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorSettings {
    /// Executable name or path
    pub program: String,
    pub extra_args: Option<Vec<String>>,
    pub metadata_timeout_secs: Option<u64>,
    pub search_timeout_secs: Option<u64>,
    pub listing_timeout_secs: Option<u64>,
    pub url_timeout_secs: Option<u64>,
    pub max_results: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsSettings {
    /// Maximum concurrent streams
    pub max_concurrent_streams: Option<usize>,
    /// Upstream safety timeout in seconds
    pub stream_timeout_secs: Option<u64>,
    /// Advertise upstream URLs instead of proxy URLs
    pub direct_urls: Option<bool>,
    /// Usage records kept per channel
    pub usage_history: Option<usize>,
}

impl ConfigFile {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: ConfigFile = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    /// Generate default configuration file
    pub fn default_config() -> Self {
        let defaults = ServerConfig::default();
        Self {
            server: Some(ServerSettings {
                host: defaults.host,
                port: defaults.port,
                public_url: None,
                cors_enabled: Some(true),
            }),
            logging: Some(LoggingSettings {
                level: "debug".to_string(),
                format: Some("pretty".to_string()),
            }),
            cache: Some(CacheSettings {
                search: Some(defaults.caches.search),
                metadata: Some(defaults.caches.metadata),
                formats: Some(defaults.caches.formats),
                listings: Some(defaults.caches.listings),
                urls: Some(defaults.caches.urls),
                sweep_interval_secs: Some(defaults.caches.sweep_interval_secs),
            }),
            extractor: Some(ExtractorSettings {
                program: defaults.extractor.program,
                extra_args: Some(Vec::new()),
                metadata_timeout_secs: Some(defaults.extractor.metadata_timeout_secs),
                search_timeout_secs: Some(defaults.extractor.search_timeout_secs),
                listing_timeout_secs: Some(defaults.extractor.listing_timeout_secs),
                url_timeout_secs: Some(defaults.extractor.url_timeout_secs),
                max_results: Some(defaults.extractor.max_results),
            }),
            limits: Some(LimitsSettings {
                max_concurrent_streams: Some(defaults.stream.max_concurrent),
                stream_timeout_secs: Some(defaults.stream.timeout_secs),
                direct_urls: Some(false),
                usage_history: Some(defaults.usage_history),
            }),
            channels: defaults.channels,
        }
    }

    /// Convert to ServerConfig
    pub fn into_server_config(self) -> ServerConfig {
        let defaults = ServerConfig::default();

        let (host, port, public_url, cors_enabled) = match self.server {
            Some(s) => (s.host, s.port, s.public_url, s.cors_enabled.unwrap_or(true)),
            None => (defaults.host, defaults.port, None, true),
        };

        let (log_level, log_format) = match self.logging {
            Some(l) => (l.level, l.format.unwrap_or_else(|| "pretty".to_string())),
            None => (defaults.log_level, defaults.log_format),
        };

        let caches = match self.cache {
            Some(c) => {
                let d = defaults.caches;
                CachesConfig {
                    search: c.search.unwrap_or(d.search),
                    metadata: c.metadata.unwrap_or(d.metadata),
                    formats: c.formats.unwrap_or(d.formats),
                    listings: c.listings.unwrap_or(d.listings),
                    urls: c.urls.unwrap_or(d.urls),
                    sweep_interval_secs: c.sweep_interval_secs.unwrap_or(d.sweep_interval_secs),
                }
            }
            None => defaults.caches,
        };

        let extractor = match self.extractor {
            Some(e) => {
                let d = defaults.extractor;
                ExtractorConfig {
                    program: e.program,
                    extra_args: e.extra_args.unwrap_or_default(),
                    metadata_timeout_secs: e.metadata_timeout_secs.unwrap_or(d.metadata_timeout_secs),
                    search_timeout_secs: e.search_timeout_secs.unwrap_or(d.search_timeout_secs),
                    listing_timeout_secs: e.listing_timeout_secs.unwrap_or(d.listing_timeout_secs),
                    url_timeout_secs: e.url_timeout_secs.unwrap_or(d.url_timeout_secs),
                    max_results: e.max_results.unwrap_or(d.max_results),
                }
            }
            None => defaults.extractor,
        };

        let limits = self.limits.as_ref();
        let stream = StreamConfig {
            max_concurrent: limits
                .and_then(|l| l.max_concurrent_streams)
                .unwrap_or(defaults.stream.max_concurrent),
            timeout_secs: limits
                .and_then(|l| l.stream_timeout_secs)
                .unwrap_or(defaults.stream.timeout_secs),
            direct_urls: limits.and_then(|l| l.direct_urls).unwrap_or(false),
            channel_buffer: defaults.stream.channel_buffer,
        };
        let usage_history = limits
            .and_then(|l| l.usage_history)
            .unwrap_or(defaults.usage_history);

        let channels = if self.channels.is_empty() {
            defaults.channels
        } else {
            self.channels
        };

        ServerConfig {
            host,
            port,
            public_url,
            cors_enabled,
            log_level,
            log_format,
            caches,
            extractor,
            stream,
            usage_history,
            channels,
        }
    }
}

/// Generate default configuration file at the specified path
pub fn generate_default_config<P: AsRef<Path>>(path: P) -> Result<(), Box<dyn std::error::Error>> {
    let config = ConfigFile::default_config();
    config.to_file(path)?;
    Ok(())
}
