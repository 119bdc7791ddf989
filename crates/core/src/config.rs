use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `DRIPLINE__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub intake: IntakeConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_tick_batch_limit")]
    pub tick_batch_limit: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IntakeConfig {
    #[serde(default = "default_intake_buffer")]
    pub buffer_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    #[serde(default = "default_from_email")]
    pub from_email: String,
    #[serde(default = "default_from_name")]
    pub from_name: String,
    /// When set, outbound mail is logged instead of handed to a provider.
    #[serde(default = "default_sandbox")]
    pub sandbox: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_max_events_per_contact")]
    pub max_events_per_contact: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default functions
fn default_node_id() -> String {
    "node-01".to_string()
}
fn default_tick_interval_ms() -> u64 {
    1000
}
fn default_tick_batch_limit() -> usize {
    500
}
fn default_intake_buffer() -> usize {
    8192
}
fn default_from_email() -> String {
    "hello@dripline.dev".to_string()
}
fn default_from_name() -> String {
    "Dripline".to_string()
}
fn default_sandbox() -> bool {
    true
}
fn default_max_events_per_contact() -> usize {
    1000
}
fn default_metrics_port() -> u16 {
    9091
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            tick_batch_limit: default_tick_batch_limit(),
        }
    }
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_intake_buffer(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            from_email: default_from_email(),
            from_name: default_from_name(),
            sandbox: default_sandbox(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_events_per_contact: default_max_events_per_contact(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: default_metrics_port(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            scheduler: SchedulerConfig::default(),
            intake: IntakeConfig::default(),
            delivery: DeliveryConfig::default(),
            history: HistoryConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("DRIPLINE")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}
