use clap::builder::TypedValueParser as _;
use clap::Parser;
use dotenvy::dotenv;
use log::LevelFilter;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Topics subscribed at startup when none are configured.
pub const DEFAULT_TOPICS: &str = "posts,message_posts";

#[derive(Clone, Debug, PartialEq)]
pub enum RustEnv {
    Development,
    Production,
    Staging,
}

#[derive(Debug, PartialEq, Eq)]
pub struct RustEnvParseError;

impl FromStr for RustEnv {
    type Err = RustEnvParseError;
    fn from_str(level: &str) -> Result<RustEnv, Self::Err> {
        match level.to_lowercase().as_str() {
            "development" => Ok(RustEnv::Development),
            "production" => Ok(RustEnv::Production),
            "staging" => Ok(RustEnv::Staging),
            _ => Err(RustEnvParseError),
        }
    }
}

impl fmt::Display for RustEnv {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RustEnv::Development => write!(f, "development"),
            RustEnv::Production => write!(f, "production"),
            RustEnv::Staging => write!(f, "staging"),
        }
    }
}

/// Which pub/sub backend carries live updates between service instances.
#[derive(Clone, Debug, PartialEq)]
pub enum BrokerKind {
    /// Redis PUBLISH/SUBSCRIBE, shared by every instance pointed at the same server.
    Redis,
    /// In-process channel. Updates never leave this process.
    Memory,
}

#[derive(Debug, PartialEq, Eq)]
pub struct BrokerKindParseError;

impl FromStr for BrokerKind {
    type Err = BrokerKindParseError;
    fn from_str(kind: &str) -> Result<BrokerKind, Self::Err> {
        match kind.to_lowercase().as_str() {
            "redis" => Ok(BrokerKind::Redis),
            "memory" => Ok(BrokerKind::Memory),
            _ => Err(BrokerKindParseError),
        }
    }
}

impl fmt::Display for BrokerKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BrokerKind::Redis => write!(f, "redis"),
            BrokerKind::Memory => write!(f, "memory"),
        }
    }
}

/// Topic names are passed straight to the broker, so they must be non-empty
/// and free of whitespace.
fn parse_topic(topic: &str) -> Result<String, String> {
    let topic = topic.trim();
    if topic.is_empty() {
        return Err("topic names must not be empty".to_string());
    }
    if topic.chars().any(char::is_whitespace) {
        return Err(format!("topic name `{topic}` must not contain whitespace"));
    }
    Ok(topic.to_string())
}

#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// A list of full CORS origin URLs that allowed to receive server responses.
    #[arg(
        long,
        env,
        value_delimiter = ',',
        use_value_delimiter = true,
        default_value = "http://localhost:3000,https://localhost:3000"
    )]
    pub allowed_origins: Vec<String>,

    /// Pub/sub backend used to fan live updates out across instances.
    #[arg(
        long,
        env,
        default_value_t = BrokerKind::Redis,
        value_parser = clap::builder::PossibleValuesParser::new([
            "REDIS", "MEMORY", "redis", "memory"
        ])
            .map(|s| s.parse::<BrokerKind>().unwrap()),
    )]
    pub broker: BrokerKind,

    /// Sets the Redis URL used for live-update publish and subscribe
    #[arg(long, env, default_value = "redis://redis_db:6379")]
    redis_url: Option<String>,

    /// Topics subscribed at startup. Every message on any of them is pushed to
    /// every live connection.
    #[arg(
        long,
        env,
        value_delimiter = ',',
        use_value_delimiter = true,
        default_value = DEFAULT_TOPICS,
        value_parser = parse_topic,
    )]
    pub topics: Vec<String>,

    /// Number of undelivered payloads a single live connection may hold before it
    /// is treated as a slow consumer and evicted
    #[arg(long, env, default_value_t = 256)]
    pub connection_queue_capacity: usize,

    /// Number of payloads waiting to be published before new ones are dropped
    #[arg(long, env, default_value_t = 1000)]
    pub publish_queue_capacity: usize,

    /// Milliseconds to wait before reconnecting to the broker after a failure
    #[arg(long, env, default_value_t = 1000)]
    pub reconnect_delay_ms: u64,

    /// The host interface to listen for incoming connections
    #[arg(short, long, env, default_value = "127.0.0.1")]
    pub interface: Option<String>,

    /// The host TCP port to listen for incoming connections
    #[arg(short, long, env, default_value_t = 8000)]
    pub port: u16,

    /// Set the log level verbosity threshold (level) to control what gets displayed on console output
    #[arg(
        short,
        long,
        env,
        default_value_t = LevelFilter::Info,
        value_parser = clap::builder::PossibleValuesParser::new(["OFF", "ERROR", "WARN", "INFO", "DEBUG", "TRACE"])
            .map(|s| s.parse::<LevelFilter>().unwrap()),
        )]
    pub log_level_filter: LevelFilter,

    /// Set the Rust runtime environment to use.
    #[arg(
    short,
    long,
    env,
    default_value_t = RustEnv::Development,
    value_parser = clap::builder::PossibleValuesParser::new([
        "DEVELOPMENT", "PRODUCTION", "STAGING",
        "development", "production", "staging"
    ])
        .map(|s| s.parse::<RustEnv>().unwrap()),
    )]
    pub runtime_env: RustEnv,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        // Load .env file first
        dotenv().ok();
        // Then parse the command line parameters and flags
        Config::parse()
    }

    pub fn redis_url(&self) -> &str {
        self.redis_url.as_deref().unwrap_or("redis://redis_db:6379")
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// The `interface:port` pair the HTTP listener binds to.
    pub fn listen_address(&self) -> String {
        format!(
            "{}:{}",
            self.interface.as_deref().unwrap_or("127.0.0.1"),
            self.port
        )
    }

    pub fn runtime_env(&self) -> RustEnv {
        self.runtime_env.clone()
    }
}
