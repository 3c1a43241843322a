//! Extraction invoker
//!
//! This module drives the external extraction tool:
//! - Supervised subprocess with a wall-clock timeout
//! - Argument lists for search, metadata, listings and direct URLs
//! - Line-delimited JSON parsing into typed records

pub mod args;
pub mod invoker;
pub mod models;
pub mod parser;
pub mod process;

use async_trait::async_trait;
use std::time::Duration;

use crate::error::ExtractError;

pub use args::{ArgsBuilder, DateFilter, DurationFilter, FormatSelector, SearchFilters, SearchType};
pub use invoker::ToolInvoker;
pub use models::{RawFormat, RawVideo, SubtitleTrack, VideoRecord};

/// Something that runs the extraction tool and returns its stdout
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Run with `args`, failing if the tool has not exited within `timeout`
    async fn run(&self, args: Vec<String>, timeout: Duration) -> Result<String, ExtractError>;

    /// Result of the startup availability probe
    fn is_available(&self) -> bool;

    fn version(&self) -> Option<String> {
        None
    }

    fn program(&self) -> &str;
}
