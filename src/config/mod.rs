pub mod types;


pub use types::*;

use crate::error::ShadowProxyError;
use anyhow::Result;
use std::path::Path;

impl GatewayConfig {
    /// Load configuration from a file, apply environment overrides, and
    /// validate. Unlike a control-plane-driven gateway, this proxy has no
    /// sensible built-in default for `upstreams.*.address`, so the config
    /// file is required to exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!(
                "config file not found at {}: a config file is required",
                path.display()
            );
        }

        let content = std::fs::read_to_string(path)?;
        let mut config: GatewayConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&content)?,
            Some("json") => serde_json::from_str(&content)?,
            Some(ext) => anyhow::bail!("unsupported config format: .{ext}, use .toml or .json"),
            None => anyhow::bail!("config file has no extension, use .toml or .json"),
        };

        config.apply_env_overrides();
        config.validate()?;
        tracing::info!("config: loaded, bind={}, routes={}", config.bind, config.route_configs.len());
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SHADOWPROXY_BIND") {
            self.bind = v;
        }
        if let Ok(v) = std::env::var("SHADOWPROXY_MAIN_UPSTREAM") {
            self.upstreams.main.address = v;
        }
        if let Ok(v) = std::env::var("SHADOWPROXY_TEST_UPSTREAM") {
            self.upstreams.test.address = v;
        }
        if let Ok(v) = std::env::var("SHADOWPROXY_LOG_LEVEL") {
            self.log_level = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.upstreams.main.address.trim().is_empty() {
            return Err(ShadowProxyError::Config("upstreams.main.address must not be empty".into()).into());
        }
        if self.upstreams.test.address.trim().is_empty() {
            return Err(ShadowProxyError::Config("upstreams.test.address must not be empty".into()).into());
        }
        if self.worker.count < 1 {
            return Err(ShadowProxyError::Config("worker.count must be >= 1".into()).into());
        }
        if self.worker.queue_size < 1 {
            return Err(ShadowProxyError::Config("worker.queue_size must be >= 1".into()).into());
        }
        if self.storage_type == StorageType::Elasticsearch && self.elasticsearch.addresses.is_empty() {
            return Err(ShadowProxyError::Config(
                "storage_type=elasticsearch requires elasticsearch.addresses".into(),
            )
            .into());
        }
        for pattern in self
            .skip_routes
            .iter()
            .chain(self.route_configs.iter().map(|e| &e.pattern))
        {
            crate::routing::RoutePattern::compile(pattern)
                .map_err(ShadowProxyError::InvalidPattern)?;
        }
        Ok(())
    }

    /// Resolve the effective `GlobalPolicy`, folding legacy top-level fields
    /// in when `global_config` was not explicitly set.
    pub fn resolve_global_policy(&self) -> GlobalPolicy {
        if let Some(ref g) = self.global_config {
            return g.clone();
        }

        let mut g = GlobalPolicy::default();
        if let Some(v) = self.compare_headers {
            g.compare_headers = v;
        }
        if let Some(v) = self.test_probability {
            g.test_probability = v;
        }
        if let Some(v) = self.log_response_payload {
            g.store_resp_bodies = v;
        }
        if !self.skip_json_paths.is_empty() {
            g.skip_json_paths = self.skip_json_paths.clone();
        }
        g
    }
}
