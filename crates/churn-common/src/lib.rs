use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub stats: StatsConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub publishers: Vec<EndpointSpec>,
    #[serde(default)]
    pub consumers: Vec<EndpointSpec>,
    #[serde(default)]
    pub failing: Vec<EndpointSpec>,
    #[serde(default)]
    pub broken: BrokenConfig,
    /// Positional argument vectors passed to the control executable, in order,
    /// while the routing stage runs.
    #[serde(default)]
    pub control_commands: Vec<Vec<String>>,
}

impl Config {
    pub fn from_yaml(data: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(data)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProxyConfig {
    /// Path of the proxy binary. `-` means the proxy is managed externally.
    pub executable: String,
    pub control_executable: String,
    #[serde(default = "default_control_path")]
    pub control_path: String,
    #[serde(default = "default_cleanup_interval_ms")]
    pub cleanup_interval_ms: u64,
    #[serde(default = "default_startup_poll_tries")]
    pub startup_poll_tries: u32,
}

impl ProxyConfig {
    pub fn is_external(&self) -> bool {
        self.executable == "-"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RunConfig {
    #[serde(default = "default_soak_secs")]
    pub soak_secs: u64,
    #[serde(default = "default_stage_poll_interval_ms")]
    pub stage_poll_interval_ms: u64,
    /// When true, stable clients may disconnect without failing the run.
    #[serde(default)]
    pub tolerate_disconnects: bool,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_prefetch")]
    pub consumer_prefetch: u16,
    /// Upper bound of the random kill delay for broken connections and the
    /// severing servers. The lower bound is always 1ms.
    #[serde(default = "default_max_kill_delay_ms")]
    pub max_kill_delay_ms: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            soak_secs: default_soak_secs(),
            stage_poll_interval_ms: default_stage_poll_interval_ms(),
            tolerate_disconnects: false,
            reconnect_delay_ms: default_reconnect_delay_ms(),
            consumer_prefetch: default_prefetch(),
            max_kill_delay_ms: default_max_kill_delay_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StatsConfig {
    #[serde(default = "default_stats_host")]
    pub host: String,
    #[serde(default = "default_stats_port")]
    pub port: u16,
    #[serde(default = "default_stats_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            host: default_stats_host(),
            port: default_stats_port(),
            timeout_ms: default_stats_timeout_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub port: u16,
}

/// Raw TCP servers that sever every accepted socket, plus the client
/// endpoints whose routes resolve to them.
#[derive(Debug, Deserialize, Clone)]
pub struct BrokenConfig {
    #[serde(default = "default_broken_ports")]
    pub listen_ports: Vec<u16>,
    #[serde(default)]
    pub endpoints: Vec<EndpointSpec>,
}

impl Default for BrokenConfig {
    fn default() -> Self {
        Self {
            listen_ports: default_broken_ports(),
            endpoints: Vec::new(),
        }
    }
}

/// How many simulated clients of one kind to create, and against what.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct EndpointSpec {
    pub uri: String,
    #[serde(default)]
    pub queue_name: Option<String>,
    #[serde(default)]
    pub send_interval_ms: Option<u64>,
    #[serde(default = "default_count")]
    pub count: usize,
}

fn default_control_path() -> String {
    "/tmp/amqpprox".to_string()
}

fn default_cleanup_interval_ms() -> u64 {
    10
}

fn default_startup_poll_tries() -> u32 {
    100
}

fn default_soak_secs() -> u64 {
    30
}

fn default_stage_poll_interval_ms() -> u64 {
    100
}

fn default_reconnect_delay_ms() -> u64 {
    5000
}

fn default_prefetch() -> u16 {
    500
}

fn default_max_kill_delay_ms() -> u64 {
    10_000
}

fn default_stats_host() -> String {
    "localhost".to_string()
}

fn default_stats_port() -> u16 {
    6666
}

fn default_stats_timeout_ms() -> u64 {
    5000
}

fn default_broken_ports() -> Vec<u16> {
    vec![5900, 5901, 5902]
}

fn default_count() -> usize {
    1
}
