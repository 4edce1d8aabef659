use std::time::Duration;

/// §6's recognized configuration options, plus the per-processor opaque
/// string map. Loaded once at startup by the application host; the core
/// itself only ever sees an already-built `HostConfig`.
#[derive(Debug, Clone)]
pub struct HostConfig {
    pub bootstrap_endpoints: String,
    pub consumer_group_id: String,
    pub polling_interval: Duration,
    pub update_subscription_interval: Duration,
    pub max_batch_size: usize,
    pub max_processor_queue_size: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            bootstrap_endpoints: String::new(),
            consumer_group_id: default_group_id(),
            polling_interval: Duration::from_millis(500),
            update_subscription_interval: Duration::from_secs(30),
            max_batch_size: 100,
            max_processor_queue_size: 1000,
        }
    }
}

fn default_group_id() -> String {
    let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown-host".to_string());
    format!("{}@{hostname}", env!("CARGO_PKG_NAME"))
}

impl HostConfig {
    /// Build from `STREAMHOST_*` environment variables, falling back to
    /// the defaults above for anything unset. Follows a plain
    /// `env::var("X").unwrap_or_else(...).parse().expect(...)` startup
    /// pattern rather than a layered config-file/flags system.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let bootstrap_endpoints = std::env::var("STREAMHOST_KAFKA_BOOTSTRAP_ENDPOINTS")
            .unwrap_or(defaults.bootstrap_endpoints);

        let consumer_group_id = std::env::var("STREAMHOST_CONSUMER_GROUP_ID")
            .unwrap_or(defaults.consumer_group_id);

        let polling_interval = parse_millis_env(
            "STREAMHOST_POLLING_INTERVAL_MS",
            defaults.polling_interval,
        );

        let update_subscription_interval = parse_millis_env(
            "STREAMHOST_UPDATE_SUBSCRIPTION_INTERVAL_MS",
            defaults.update_subscription_interval,
        );

        let max_batch_size = parse_usize_env("STREAMHOST_MAX_BATCH_SIZE", defaults.max_batch_size);

        let max_processor_queue_size = parse_usize_env(
            "STREAMHOST_MAX_PROCESSOR_QUEUE_SIZE",
            defaults.max_processor_queue_size,
        );

        Self {
            bootstrap_endpoints,
            consumer_group_id,
            polling_interval,
            update_subscription_interval,
            max_batch_size,
            max_processor_queue_size,
        }
    }

    /// Collect `STREAMHOST_PROCESSOR_*` variables into a string map, the
    /// opaque per-processor config passed through to the processor
    /// provider (§6).
    pub fn processor_env() -> std::collections::HashMap<String, String> {
        const PREFIX: &str = "STREAMHOST_PROCESSOR_";
        std::env::vars()
            .filter_map(|(k, v)| {
                k.strip_prefix(PREFIX).map(|rest| (rest.to_string(), v))
            })
            .collect()
    }
}

fn parse_millis_env(key: &str, default: Duration) -> Duration {
    match std::env::var(key) {
        Ok(raw) => Duration::from_millis(
            raw.parse()
                .unwrap_or_else(|_| panic!("{key} must be a valid u64 (milliseconds)")),
        ),
        Err(_) => default,
    }
}

fn parse_usize_env(key: &str, default: usize) -> usize {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|_| panic!("{key} must be a valid usize")),
        Err(_) => default,
    }
}
