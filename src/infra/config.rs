//! Configuration loading from TOML files
//!
//! Config file is selected via the `--config <path>` command line argument
//! (default: config/dev.toml). Unlike optional sections, a config file that
//! cannot be read or parsed is a startup error: the server must not run
//! with an unknown zone set.

use crate::domain::types::ControlDescriptor;
use crate::domain::zone::ZoneDefinition;
use anyhow::Context;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_mqtt_client_id")]
    pub client_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Topic carrying plain stamped poses
    #[serde(default = "default_pose_topic")]
    pub pose_topic: String,
    /// Topic carrying odometry samples
    #[serde(default = "default_odom_topic")]
    pub odom_topic: String,
    /// Topic carrying poses with covariance (localizer output)
    #[serde(default = "default_pose_with_cov_topic")]
    pub pose_with_covariance_topic: String,
}

fn default_mqtt_client_id() -> String {
    "zone-server".to_string()
}

fn default_pose_topic() -> String {
    "robot/pose".to_string()
}

fn default_odom_topic() -> String {
    "robot/odom".to_string()
}

fn default_pose_with_cov_topic() -> String {
    "robot/amcl_pose".to_string()
}

/// Static 2-D transform from `frame` into the map frame
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StaticFrameConfig {
    pub frame: String,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    /// Rotation about Z in radians
    #[serde(default)]
    pub yaw: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FramesConfig {
    #[serde(default = "default_map_frame")]
    pub map_frame: String,
    #[serde(default, rename = "static")]
    pub static_frames: Vec<StaticFrameConfig>,
}

fn default_map_frame() -> String {
    "map".to_string()
}

impl Default for FramesConfig {
    fn default() -> Self {
        Self { map_frame: default_map_frame(), static_frames: Vec::new() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// Base URL of the device/location registry (may embed user:pass@)
    pub url: String,
    /// Base URL of the localization service
    pub localization_url: String,
    #[serde(default = "default_registry_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_registry_timeout_ms() -> u64 {
    2000
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Capacity of the pose observation queue
    #[serde(default = "default_pose_queue_size")]
    pub pose_queue_size: usize,
    /// Treat a pose outside every zone as leaving all zones
    #[serde(default)]
    pub exit_on_empty: bool,
}

fn default_pose_queue_size() -> usize {
    1000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pose_queue_size: default_pose_queue_size(),
            exit_on_empty: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EgressConfig {
    /// Topic for transition events (QoS 1, retained)
    #[serde(default = "default_transition_topic")]
    pub transition_topic: String,
    #[serde(default = "default_egress_queue_size")]
    pub queue_size: usize,
}

fn default_transition_topic() -> String {
    "zones/transition".to_string()
}

fn default_egress_queue_size() -> usize {
    1000
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self { transition_topic: default_transition_topic(), queue_size: default_egress_queue_size() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// HTTP API port (0 to disable)
    #[serde(default = "default_http_port")]
    pub port: u16,
}

fn default_http_port() -> u16 {
    8080
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { port: default_http_port() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
}

fn default_metrics_interval() -> u64 {
    30
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Unique site identifier, used as metrics label
    #[serde(default = "default_site_id")]
    pub id: String,
}

fn default_site_id() -> String {
    "zone-server".to_string()
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub frames: FramesConfig,
    #[serde(default)]
    pub zones: Vec<ZoneDefinition>,
    #[serde(default)]
    pub zone_controls: HashMap<String, Vec<ControlDescriptor>>,
    pub registry: RegistryConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub egress: EgressConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_client_id: String,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    pose_topic: String,
    odom_topic: String,
    pose_with_covariance_topic: String,
    map_frame: String,
    static_frames: Vec<StaticFrameConfig>,
    zones: Vec<ZoneDefinition>,
    zone_controls: HashMap<String, Vec<ControlDescriptor>>,
    registry_url: String,
    localization_url: String,
    registry_timeout_ms: u64,
    pose_queue_size: usize,
    exit_on_empty: bool,
    transition_topic: String,
    egress_queue_size: usize,
    http_port: u16,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            site_id: default_site_id(),
            mqtt_host: "localhost".to_string(),
            mqtt_port: 1883,
            mqtt_client_id: default_mqtt_client_id(),
            mqtt_username: None,
            mqtt_password: None,
            pose_topic: default_pose_topic(),
            odom_topic: default_odom_topic(),
            pose_with_covariance_topic: default_pose_with_cov_topic(),
            map_frame: default_map_frame(),
            static_frames: Vec::new(),
            zones: Vec::new(),
            zone_controls: HashMap::new(),
            registry_url: "http://localhost:8090".to_string(),
            localization_url: "http://localhost:8091".to_string(),
            registry_timeout_ms: default_registry_timeout_ms(),
            pose_queue_size: default_pose_queue_size(),
            exit_on_empty: false,
            transition_topic: default_transition_topic(),
            egress_queue_size: default_egress_queue_size(),
            http_port: default_http_port(),
            metrics_interval_secs: default_metrics_interval(),
            config_file: "default".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let mut config = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.config_file = path.display().to_string();
        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let toml_config: TomlConfig = toml::from_str(content)?;

        // Zero-capacity channels panic at construction and a zero interval
        // panics the metrics ticker
        anyhow::ensure!(toml_config.engine.pose_queue_size > 0, "engine.pose_queue_size must be at least 1");
        anyhow::ensure!(toml_config.egress.queue_size > 0, "egress.queue_size must be at least 1");
        anyhow::ensure!(toml_config.metrics.interval_secs > 0, "metrics.interval_secs must be at least 1");

        Ok(Self {
            site_id: toml_config.site.id,
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_client_id: toml_config.mqtt.client_id,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            pose_topic: toml_config.mqtt.pose_topic,
            odom_topic: toml_config.mqtt.odom_topic,
            pose_with_covariance_topic: toml_config.mqtt.pose_with_covariance_topic,
            map_frame: toml_config.frames.map_frame,
            static_frames: toml_config.frames.static_frames,
            zones: toml_config.zones,
            zone_controls: toml_config.zone_controls,
            registry_url: toml_config.registry.url,
            localization_url: toml_config.registry.localization_url,
            registry_timeout_ms: toml_config.registry.timeout_ms,
            pose_queue_size: toml_config.engine.pose_queue_size,
            exit_on_empty: toml_config.engine.exit_on_empty,
            transition_topic: toml_config.egress.transition_topic,
            egress_queue_size: toml_config.egress.queue_size,
            http_port: toml_config.http.port,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            config_file: "inline".to_string(),
        })
    }

    /// Control descriptors configured for a zone (empty if none)
    pub fn controls_for(&self, zone: &str) -> &[ControlDescriptor] {
        self.zone_controls.get(zone).map(|v| v.as_slice()).unwrap_or(&[])
    }

    // Getters for all config fields
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_client_id(&self) -> &str {
        &self.mqtt_client_id
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn pose_topic(&self) -> &str {
        &self.pose_topic
    }

    pub fn odom_topic(&self) -> &str {
        &self.odom_topic
    }

    pub fn pose_with_covariance_topic(&self) -> &str {
        &self.pose_with_covariance_topic
    }

    pub fn map_frame(&self) -> &str {
        &self.map_frame
    }

    pub fn static_frames(&self) -> &[StaticFrameConfig] {
        &self.static_frames
    }

    pub fn zones(&self) -> &[ZoneDefinition] {
        &self.zones
    }

    pub fn zone_controls(&self) -> &HashMap<String, Vec<ControlDescriptor>> {
        &self.zone_controls
    }

    pub fn registry_url(&self) -> &str {
        &self.registry_url
    }

    pub fn localization_url(&self) -> &str {
        &self.localization_url
    }

    pub fn registry_timeout_ms(&self) -> u64 {
        self.registry_timeout_ms
    }

    pub fn pose_queue_size(&self) -> usize {
        self.pose_queue_size
    }

    pub fn exit_on_empty(&self) -> bool {
        self.exit_on_empty
    }

    pub fn transition_topic(&self) -> &str {
        &self.transition_topic
    }

    pub fn egress_queue_size(&self) -> usize {
        self.egress_queue_size
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }
}
