use serde::{Deserialize, Deserializer, Serialize};

/// Deserialize a `T` that implements `Default` — treats JSON `null` the same as
/// a missing field (returns `T::default()`).  Use with:
///   `#[serde(default, deserialize_with = "deserialize_null_default")]`
fn deserialize_null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Top-level gateway configuration, as loaded from `--config`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub storage_type: StorageType,

    #[serde(default)]
    pub elasticsearch: ElasticsearchConfig,

    pub upstreams: UpstreamsConfig,

    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Explicit global policy. When absent (the whole key is missing from
    /// the file), the legacy top-level fields below are folded into it.
    #[serde(default)]
    pub global_config: Option<GlobalPolicy>,

    /// A sequence, not a map: `resolve()`'s precedence contract is config
    /// order, and a JSON/TOML object has no ordering guarantee.
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub route_configs: Vec<RouteConfigEntry>,

    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub skip_routes: Vec<String>,

    // --- Legacy top-level fields, folded into `global_config` by
    //     `GatewayConfig::resolve_global_policy` when `global_config` is
    //     absent. Ignored when `global_config` is explicitly set. ---
    #[serde(default)]
    pub compare_headers: Option<bool>,

    #[serde(default)]
    pub test_probability: Option<u32>,

    #[serde(default)]
    pub log_response_payload: Option<bool>,

    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub skip_json_paths: Vec<String>,
}

fn default_bind() -> String {
    "0.0.0.0:9090".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageType {
    #[default]
    Stdout,
    Elasticsearch,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ElasticsearchConfig {
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub addresses: Vec<String>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub cloud_id: Option<String>,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default)]
    pub service_token: Option<String>,

    #[serde(default)]
    pub certificate_fingerprint: Option<String>,

    /// Index or index-alias each log record is written to.
    #[serde(default = "default_es_index")]
    pub index: String,
}

fn default_es_index() -> String {
    "shadowproxy-comparisons".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamsConfig {
    pub main: UpstreamTarget,
    pub test: UpstreamTarget,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamTarget {
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_worker_count")]
    pub count: usize,

    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            queue_size: default_queue_size(),
        }
    }
}

fn default_worker_count() -> usize {
    8
}

fn default_queue_size() -> usize {
    1024
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_metrics_bind")]
    pub bind: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            bind: default_metrics_bind(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_metrics_bind() -> String {
    "0.0.0.0:9091".to_string()
}

/// Global defaults for the policy engine. All fields have defaults — see
/// each `default_*` helper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalPolicy {
    #[serde(default = "default_true")]
    pub compare_headers: bool,

    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub skip_headers: Vec<String>,

    #[serde(default)]
    pub store_req_body: bool,

    #[serde(default = "default_true")]
    pub store_resp_bodies: bool,

    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub skip_json_paths: Vec<String>,

    #[serde(default = "default_test_probability")]
    pub test_probability: u32,

    /// Requests (and captured responses) larger than this are rejected
    /// with 413 and never enter the shadow pipeline. `None` = unbounded.
    #[serde(default)]
    pub max_body_bytes: Option<u64>,
}

impl Default for GlobalPolicy {
    fn default() -> Self {
        Self {
            compare_headers: true,
            skip_headers: Vec::new(),
            store_req_body: false,
            store_resp_bodies: true,
            skip_json_paths: Vec::new(),
            test_probability: default_test_probability(),
            max_body_bytes: None,
        }
    }
}

fn default_test_probability() -> u32 {
    100
}

/// Tri-valued boolean — distinguishes "operator didn't set this" from
/// "operator explicitly set this to false". Resolved to a concrete `bool`
/// exactly once, at load time, by `policy::resolve`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriBool {
    #[default]
    Inherit,
    Enable,
    Disable,
}

impl TriBool {
    pub fn resolve(self, global: bool) -> bool {
        match self {
            TriBool::Inherit => global,
            TriBool::Enable => true,
            TriBool::Disable => false,
        }
    }
}

/// Per-route override of `GlobalPolicy`. Booleans are tri-valued; list
/// fields are additive over the global values (see `policy::resolve`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteOverride {
    #[serde(default)]
    pub compare_headers: TriBool,

    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub skip_headers: Vec<String>,

    #[serde(default)]
    pub store_req_body: TriBool,

    #[serde(default)]
    pub store_resp_bodies: TriBool,

    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub skip_json_paths: Vec<String>,

    /// `0` means inherit — operators cannot disable testing for a single
    /// route via probability alone; use `skip_routes` for that.
    #[serde(default)]
    pub test_probability: u32,
}

/// One entry of `route_configs`. Kept as a `pattern` + flattened override
/// rather than a map key so that `GatewayConfig::route_configs` preserves
/// the order operators wrote it in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteConfigEntry {
    pub pattern: String,

    #[serde(flatten)]
    pub policy: RouteOverride,
}

/// Fully resolved policy for one route pattern. Produced once at load
/// time by `policy::resolve`; immutable afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectivePolicy {
    pub compare_headers: bool,
    pub skip_headers: Vec<String>,
    pub store_req_body: bool,
    pub store_resp_bodies: bool,
    pub skip_json_paths: Vec<String>,
    pub test_probability: u32,
    pub max_body_bytes: Option<u64>,
}

impl From<&GlobalPolicy> for EffectivePolicy {
    fn from(g: &GlobalPolicy) -> Self {
        Self {
            compare_headers: g.compare_headers,
            skip_headers: g.skip_headers.clone(),
            store_req_body: g.store_req_body,
            store_resp_bodies: g.store_resp_bodies,
            skip_json_paths: g.skip_json_paths.clone(),
            test_probability: g.test_probability,
            max_body_bytes: g.max_body_bytes,
        }
    }
}
