pub mod elasticsearch;
pub mod stdout;

use anyhow::Result;
use serde::Serialize;

/// The kind of divergence a `LogRecord` reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonType {
    StatusDiff,
    HeaderDiff,
    BodyDiff,
}

/// Shape written to the sink. Bodies and `request_body` are omitted (not
/// emitted as null) unless the resolved `EffectivePolicy` allows them.
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    pub url: String,
    pub method: String,
    pub route: String,
    pub headers: Vec<(String, String)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_body: Option<String>,
    pub main_status: u16,
    pub test_status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub main_response_body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_response_body: Option<String>,
    pub comparison_type: ComparisonType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub different_headers: Option<Vec<String>>,
}

/// Uniform interface for log storage backends. Called from
/// worker tasks; implementations must be safe for concurrent use.
#[async_trait::async_trait]
pub trait Sink: Send + Sync {
    async fn store(&self, record: &LogRecord) -> Result<()>;
}

/// Runtime-selected sink, built once at startup from `StorageType`.
pub enum AnySink {
    Stdout(stdout::StdoutSink),
    Elasticsearch(elasticsearch::ElasticsearchSink),
}

#[async_trait::async_trait]
impl Sink for AnySink {
    async fn store(&self, record: &LogRecord) -> Result<()> {
        match self {
            AnySink::Stdout(s) => s.store(record).await,
            AnySink::Elasticsearch(s) => s.store(record).await,
        }
    }
}
