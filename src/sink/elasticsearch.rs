use anyhow::Result;

use crate::config::ElasticsearchConfig;
use crate::error::ShadowProxyError;

use super::{LogRecord, Sink};

/// Elasticsearch log sink: one document per record, POSTed as JSON to the
/// configured cluster's `_doc` endpoint. Failures are
/// logged and counted but never halt processing — a divergence record that
/// fails to persist is not worth failing the proxy over.
#[derive(Clone)]
pub struct ElasticsearchSink {
    http: reqwest::Client,
    base_url: String,
    index: String,
    auth_header: Option<String>,
}

impl ElasticsearchSink {
    pub fn new(config: &ElasticsearchConfig) -> Result<Self> {
        let base_url = config
            .addresses
            .first()
            .cloned()
            .ok_or_else(|| ShadowProxyError::SinkInit("elasticsearch: no addresses configured".into()))?;

        let auth_header = if let Some(ref key) = config.api_key {
            Some(format!("ApiKey {key}"))
        } else if let Some(ref token) = config.service_token {
            Some(format!("Bearer {token}"))
        } else if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            use base64::Engine;
            let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pass}"));
            Some(format!("Basic {encoded}"))
        } else {
            None
        };

        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| anyhow::anyhow!("elasticsearch: failed to build http client: {e}"))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            index: config.index.clone(),
            auth_header,
        })
    }

    async fn post_document(&self, record: &LogRecord) -> Result<()> {
        let url = format!("{}/{}/_doc", self.base_url, self.index);
        let mut req = self.http.post(&url).json(record);
        if let Some(ref header) = self.auth_header {
            req = req.header("Authorization", header);
        }
        let resp = req.send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("elasticsearch: indexing failed: {status} - {body}");
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Sink for ElasticsearchSink {
    async fn store(&self, record: &LogRecord) -> Result<()> {
        if let Err(e) = self.post_document(record).await {
            metrics::counter!("sink_store_errors_total").increment(1);
            tracing::error!(error = %e, "elasticsearch: failed to store comparison record");
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_requires_at_least_one_address() {
        let config = ElasticsearchConfig::default();
        assert!(ElasticsearchSink::new(&config).is_err());
    }

    #[test]
    fn test_new_succeeds_with_address() {
        let config = ElasticsearchConfig {
            addresses: vec!["http://localhost:9200".into()],
            ..ElasticsearchConfig::default()
        };
        let sink = ElasticsearchSink::new(&config).unwrap();
        assert_eq!(sink.base_url, "http://localhost:9200");
    }

    #[test]
    fn test_api_key_auth_header() {
        let config = ElasticsearchConfig {
            addresses: vec!["http://localhost:9200".into()],
            api_key: Some("secret".into()),
            ..ElasticsearchConfig::default()
        };
        let sink = ElasticsearchSink::new(&config).unwrap();
        assert_eq!(sink.auth_header, Some("ApiKey secret".into()));
    }

    #[test]
    fn test_basic_auth_header_from_username_password() {
        let config = ElasticsearchConfig {
            addresses: vec!["http://localhost:9200".into()],
            username: Some("elastic".into()),
            password: Some("changeme".into()),
            ..ElasticsearchConfig::default()
        };
        let sink = ElasticsearchSink::new(&config).unwrap();
        assert!(sink.auth_header.unwrap().starts_with("Basic "));
    }
}
