use thiserror::Error;

/// Failures of the external extraction tool
#[derive(Error, Debug, Clone)]
pub enum ExtractError {
    #[error("Extraction tool unavailable: {0}")]
    Unavailable(String),

    #[error("Extraction tool timed out after {0}s")]
    Timeout(u64),

    #[error("Extraction tool exited with code {code}: {stderr}")]
    Process { code: i32, stderr: String },

    #[error("Unparseable extraction record at line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("Extraction tool returned no usable output")]
    EmptyOutput,

    #[error("IO error while running extraction tool: {0}")]
    Io(String),
}

impl ExtractError {
    /// Short machine-readable kind, used in error bodies and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ExtractError::Unavailable(_) => "extraction_unavailable",
            ExtractError::Timeout(_) => "extraction_timeout",
            ExtractError::Process { .. } => "extraction_process_error",
            ExtractError::Parse { .. } => "extraction_parse_error",
            ExtractError::EmptyOutput => "extraction_empty_output",
            ExtractError::Io(_) => "extraction_io_error",
        }
    }

    /// Whether the tool reported that the requested item does not exist
    pub fn is_not_found(&self) -> bool {
        const MARKERS: &[&str] = &["unavailable", "does not exist", "not found", "http error 404"];
        match self {
            ExtractError::Process { stderr, .. } => {
                let stderr = stderr.to_lowercase();
                MARKERS.iter().any(|m| stderr.contains(m))
            }
            _ => false,
        }
    }
}

/// Failures of a delivery request
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Server at capacity: {active}/{max} concurrent streams")]
    AdmissionRejected { active: usize, max: usize },

    #[error("Format not found: {0}")]
    FormatNotFound(String),

    #[error("Upstream returned HTTP {status}: {message}")]
    UpstreamHttp { status: u16, message: String },

    #[error("Upstream request timed out after {0}s")]
    StreamTimeout(u64),

    #[error("Client disconnected")]
    ClientAborted,

    #[error(transparent)]
    Extraction(#[from] ExtractError),
}

impl DeliveryError {
    pub fn kind(&self) -> &'static str {
        match self {
            DeliveryError::AdmissionRejected { .. } => "admission_rejected",
            DeliveryError::FormatNotFound(_) => "format_not_found",
            DeliveryError::UpstreamHttp { .. } => "upstream_http_error",
            DeliveryError::StreamTimeout(_) => "stream_timeout",
            DeliveryError::ClientAborted => "client_aborted",
            DeliveryError::Extraction(e) => e.kind(),
        }
    }
}

/// Startup and configuration errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, ServerError>;
