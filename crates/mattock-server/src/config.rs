use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_players")]
    pub max_players: u32,
    #[serde(default = "default_motd")]
    pub motd: String,
    #[serde(default = "default_online_mode")]
    pub online_mode: bool,
    #[serde(default = "default_compression_enabled")]
    pub enable_compression: bool,
    #[serde(default = "default_compression_threshold")]
    pub compression_threshold: i32,
    #[serde(default = "default_view_distance")]
    pub view_distance: u32,
    #[serde(default = "default_ticks_per_second")]
    pub ticks_per_second: u32,
    #[serde(default = "default_world_dir")]
    pub world_dir: String,
    #[serde(default = "default_world_type")]
    pub world_type: String,
    #[serde(default = "default_flat_preset")]
    pub flat_world_preset: String,
    #[serde(default = "default_registry_file")]
    pub registry_file: String,
    /// Optional path to a PNG served as the status favicon.
    #[serde(default)]
    pub favicon: Option<String>,
    #[serde(default)]
    pub enable_secure_chat: bool,
    #[serde(default)]
    pub world_border: WorldBorderConfig,
    #[serde(default)]
    pub resource_packs: Vec<ResourcePackConfig>,
    #[serde(default)]
    pub server_links: Vec<ServerLinkConfig>,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorldBorderConfig {
    #[serde(default = "default_border_size")]
    pub size: f64,
    #[serde(default)]
    pub center: [f64; 2],
    #[serde(default = "default_border_warning_time")]
    pub warning_time: i32,
    #[serde(default = "default_border_warning_blocks")]
    pub warning_blocks: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResourcePackConfig {
    pub url: String,
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub forced: bool,
    #[serde(default)]
    pub prompt: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerLinkConfig {
    /// Built-in label id; omitted means `label` text is used.
    #[serde(default)]
    pub builtin: Option<i32>,
    #[serde(default)]
    pub label: Option<String>,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_profile_base")]
    pub profile_base: String,
    #[serde(default = "default_session_base")]
    pub session_base: String,
}

fn default_bind() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    25565
}

fn default_max_players() -> u32 {
    20
}

fn default_motd() -> String {
    "A Mattock Server".into()
}

fn default_online_mode() -> bool {
    true
}

fn default_compression_enabled() -> bool {
    true
}

fn default_compression_threshold() -> i32 {
    256
}

fn default_view_distance() -> u32 {
    8
}

fn default_ticks_per_second() -> u32 {
    20
}

fn default_world_dir() -> String {
    "world".into()
}

fn default_world_type() -> String {
    "flat".into()
}

fn default_flat_preset() -> String {
    "classic_flat".into()
}

fn default_registry_file() -> String {
    "resources/registry_data.json".into()
}

fn default_border_size() -> f64 {
    59_999_968.0
}

fn default_border_warning_time() -> i32 {
    15
}

fn default_border_warning_blocks() -> i32 {
    5
}

fn default_profile_base() -> String {
    "https://api.mojang.com".into()
}

fn default_session_base() -> String {
    "https://sessionserver.mojang.com".into()
}

impl Default for WorldBorderConfig {
    fn default() -> Self {
        Self {
            size: default_border_size(),
            center: [0.0, 0.0],
            warning_time: default_border_warning_time(),
            warning_blocks: default_border_warning_blocks(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            profile_base: default_profile_base(),
            session_base: default_session_base(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            max_players: default_max_players(),
            motd: default_motd(),
            online_mode: default_online_mode(),
            enable_compression: default_compression_enabled(),
            compression_threshold: default_compression_threshold(),
            view_distance: default_view_distance(),
            ticks_per_second: default_ticks_per_second(),
            world_dir: default_world_dir(),
            world_type: default_world_type(),
            flat_world_preset: default_flat_preset(),
            registry_file: default_registry_file(),
            favicon: None,
            enable_secure_chat: false,
            world_border: WorldBorderConfig::default(),
            resource_packs: Vec::new(),
            server_links: Vec::new(),
            auth: AuthConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let config: ServerConfig = toml::from_str(&contents)?;
            Ok(config)
        } else {
            tracing::info!("no config file found at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 25565);
        assert!(config.online_mode);
        assert!(config.enable_compression);
        assert_eq!(config.compression_threshold, 256);
        assert_eq!(config.flat_world_preset, "classic_flat");
        assert_eq!(config.world_border.size, 59_999_968.0);
    }

    #[test]
    fn test_partial_toml_overrides() {
        let config: ServerConfig = toml::from_str(
            r#"
            port = 25570
            online_mode = false
            motd = "testing"

            [world_border]
            size = 128.0
            "#,
        )
        .unwrap();
        assert_eq!(config.port, 25570);
        assert!(!config.online_mode);
        assert_eq!(config.motd, "testing");
        assert_eq!(config.world_border.size, 128.0);
        assert_eq!(config.world_border.warning_time, 15);
        assert_eq!(config.max_players, 20);
    }
}
