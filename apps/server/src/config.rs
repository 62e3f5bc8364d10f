use std::path::PathBuf;

use serde::Deserialize;

// ---------------------------------------------------------------------------
// Sub-struct: media transport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct MediaConfig {
    /// IP the media transports bind to.
    #[serde(default = "default_listen_ip")]
    pub listen_ip: String,
    /// Public IP advertised in ICE candidates when the node is NATed.
    #[serde(default)]
    pub announced_ip: Option<String>,
    #[serde(default = "default_min_port")]
    pub min_port: i64,
    #[serde(default = "default_max_port")]
    pub max_port: i64,
}

fn default_listen_ip() -> String {
    "0.0.0.0".to_string()
}
fn default_min_port() -> i64 {
    40000
}
fn default_max_port() -> i64 {
    49999
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            listen_ip: default_listen_ip(),
            announced_ip: None,
            min_port: default_min_port(),
            max_port: default_max_port(),
        }
    }
}

// ---------------------------------------------------------------------------
// Main ServerConfig
// ---------------------------------------------------------------------------

/// Node configuration. An optional `config.toml` provides the base; every
/// recognized environment variable overrides its field.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Port to listen on. Kept wide so validation can report out-of-range
    /// values instead of failing at parse time.
    #[serde(default = "default_port")]
    pub port: i64,
    /// Base URL of the external authentication authority.
    #[serde(default = "default_backend_url")]
    pub main_backend_url: String,
    #[serde(default = "default_server_name")]
    pub server_name: String,
    #[serde(default = "default_public_url")]
    pub public_url: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Path to an icon file served at /api/server/icon.
    #[serde(default)]
    pub server_icon: Option<String>,
    /// Allowed CORS origins. Loopback origins are always allowed.
    #[serde(default)]
    pub client_origins: Vec<String>,
    #[serde(default)]
    pub allow_file_origin: bool,
    #[serde(default)]
    pub allow_null_origin: bool,
    /// Upload size cap in megabytes.
    #[serde(default = "default_file_limit_mb")]
    pub file_limit_mb: i64,
    /// Overrides `<runtime_dir>/uploads`.
    #[serde(default)]
    pub uploads_dir: Option<String>,
    #[serde(default)]
    pub media: MediaConfig,
    /// ICE server list handed to clients, as raw JSON.
    #[serde(default = "default_ice_servers")]
    pub ice_servers: String,
    /// Overrides `<runtime_dir>/data/remus.db`.
    #[serde(default)]
    pub db_path: Option<String>,
    #[serde(default = "default_runtime_dir")]
    pub runtime_dir: String,
    /// Enables the admin surface when non-empty.
    #[serde(default)]
    pub admin_key: Option<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub debug: bool,
}

fn default_port() -> i64 {
    3001
}
fn default_backend_url() -> String {
    "http://127.0.0.1:8000".to_string()
}
fn default_server_name() -> String {
    "Remus Community".to_string()
}
fn default_public_url() -> String {
    "http://localhost:3001".to_string()
}
fn default_region() -> String {
    "local".to_string()
}
fn default_file_limit_mb() -> i64 {
    25
}
fn default_ice_servers() -> String {
    "[]".to_string()
}
fn default_runtime_dir() -> String {
    "./runtime".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            main_backend_url: default_backend_url(),
            server_name: default_server_name(),
            public_url: default_public_url(),
            region: default_region(),
            server_icon: None,
            client_origins: Vec::new(),
            allow_file_origin: false,
            allow_null_origin: false,
            file_limit_mb: default_file_limit_mb(),
            uploads_dir: None,
            media: MediaConfig::default(),
            ice_servers: default_ice_servers(),
            db_path: None,
            runtime_dir: default_runtime_dir(),
            admin_key: None,
            log_level: default_log_level(),
            debug: false,
        }
    }
}

fn env_bool(val: &str) -> bool {
    matches!(val, "1" | "true" | "TRUE" | "yes")
}

impl ServerConfig {
    /// Load configuration: `config.toml` (or `CONFIG_PATH`) if present,
    /// defaults otherwise, then environment variable overrides.
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
        let mut config = match std::fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(_) => ServerConfig::default(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load configuration from a TOML string, then apply env var overrides.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let mut config: ServerConfig = toml::from_str(toml_str)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply environment variable overrides. Values that need validation
    /// (port range, URLs, ICE JSON) are taken verbatim and checked by
    /// [`ServerConfig::validate`] so every problem is reported at once.
    pub fn apply_env_overrides(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        if let Ok(val) = std::env::var("PORT") {
            self.port = val.parse().unwrap_or(-1);
        }
        if let Ok(val) = std::env::var("REMUS_MAIN_BACKEND_URL") {
            self.main_backend_url = val;
        }
        if let Ok(val) = std::env::var("REMUS_SERVER_NAME") {
            self.server_name = val;
        }
        if let Ok(val) = std::env::var("REMUS_PUBLIC_URL") {
            self.public_url = val;
        }
        if let Ok(val) = std::env::var("REMUS_REGION") {
            self.region = val;
        }
        if let Ok(val) = std::env::var("REMUS_SERVER_ICON") {
            self.server_icon = (!val.is_empty()).then_some(val);
        }
        if let Ok(val) = std::env::var("REMUS_CLIENT_ORIGIN") {
            self.client_origins = val
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(val) = std::env::var("REMUS_ALLOW_FILE_ORIGIN") {
            self.allow_file_origin = env_bool(&val);
        }
        if let Ok(val) = std::env::var("REMUS_ALLOW_NULL_ORIGIN") {
            self.allow_null_origin = env_bool(&val);
        }
        if let Ok(val) = std::env::var("REMUS_FILE_LIMIT_MB") {
            self.file_limit_mb = val.parse().unwrap_or(0);
        }
        if let Ok(val) = std::env::var("REMUS_UPLOADS_DIR") {
            self.uploads_dir = (!val.is_empty()).then_some(val);
        }
        if let Ok(val) = std::env::var("REMUS_MEDIA_LISTEN_IP") {
            self.media.listen_ip = val;
        }
        if let Ok(val) = std::env::var("REMUS_MEDIA_ANNOUNCED_IP") {
            self.media.announced_ip = (!val.is_empty()).then_some(val);
        }
        if let Ok(val) = std::env::var("REMUS_MEDIA_MIN_PORT") {
            self.media.min_port = val.parse().unwrap_or(-1);
        }
        if let Ok(val) = std::env::var("REMUS_MEDIA_MAX_PORT") {
            self.media.max_port = val.parse().unwrap_or(-1);
        }
        if let Ok(val) = std::env::var("REMUS_ICE_SERVERS") {
            self.ice_servers = val;
        }
        if let Ok(val) = std::env::var("REMUS_DB_PATH") {
            self.db_path = (!val.is_empty()).then_some(val);
        }
        if let Ok(val) = std::env::var("REMUS_RUNTIME_DIR") {
            self.runtime_dir = val;
        }
        if let Ok(val) = std::env::var("REMUS_ADMIN_KEY") {
            self.admin_key = (!val.is_empty()).then_some(val);
        }
        if let Ok(val) = std::env::var("DEBUG") {
            self.debug = env_bool(&val);
        }
        if let Ok(val) = std::env::var("NODE_ENV") {
            if val == "development" {
                self.debug = true;
            }
        }
        Ok(())
    }

    /// Startup validation. Returns every problem so the operator can fix
    /// them in one pass; any entry means the node must exit non-zero.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if !(1..=65535).contains(&self.port) {
            errors.push(format!("port out of range: {}", self.port));
        }
        match serde_json::from_str::<serde_json::Value>(&self.ice_servers) {
            Ok(value) if value.is_array() => {}
            _ => errors.push("REMUS_ICE_SERVERS is not a JSON array".to_string()),
        }
        if reqwest::Url::parse(&self.main_backend_url).is_err() {
            errors.push(format!(
                "REMUS_MAIN_BACKEND_URL is not a URL: {}",
                self.main_backend_url
            ));
        }
        if reqwest::Url::parse(&self.public_url).is_err() {
            errors.push(format!("REMUS_PUBLIC_URL is not a URL: {}", self.public_url));
        }
        if self.media.max_port <= self.media.min_port
            || !(1..=65535).contains(&self.media.min_port)
            || !(1..=65535).contains(&self.media.max_port)
        {
            errors.push(format!(
                "media port window is invalid: {}..{}",
                self.media.min_port, self.media.max_port
            ));
        }
        if self.file_limit_mb <= 0 {
            errors.push(format!("file limit must be positive: {}", self.file_limit_mb));
        }
        for origin in &self.client_origins {
            if reqwest::Url::parse(origin).is_err() {
                errors.push(format!("invalid client origin: {origin}"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn listen_port(&self) -> u16 {
        self.port as u16
    }

    pub fn ice_servers_json(&self) -> serde_json::Value {
        serde_json::from_str(&self.ice_servers).unwrap_or_else(|_| serde_json::json!([]))
    }

    pub fn file_limit_bytes(&self) -> u64 {
        self.file_limit_mb as u64 * 1024 * 1024
    }

    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.runtime_dir).join("data")
    }

    pub fn db_file(&self) -> PathBuf {
        match &self.db_path {
            Some(path) => PathBuf::from(path),
            None => self.data_dir().join("remus.db"),
        }
    }

    pub fn uploads_path(&self) -> PathBuf {
        match &self.uploads_dir {
            Some(dir) => PathBuf::from(dir),
            None => PathBuf::from(&self.runtime_dir).join("uploads"),
        }
    }

    pub fn role_icons_path(&self) -> PathBuf {
        PathBuf::from(&self.runtime_dir).join("role-icons")
    }

    /// Loopback authorities get the short verification deadline.
    pub fn backend_is_loopback(&self) -> bool {
        reqwest::Url::parse(&self.main_backend_url)
            .ok()
            .and_then(|url| url.host_str().map(is_loopback_host))
            .unwrap_or(false)
    }
}

pub fn is_loopback_host(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "::1" | "[::1]")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn defaults_validate_cleanly() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn config_loads_from_toml_string() {
        let toml = r#"
            port = 8080
            server_name = "The Den"
            client_origins = ["https://app.example.com"]
            [media]
            min_port = 50000
            max_port = 50100
        "#;
        let config = ServerConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.server_name, "The Den");
        assert_eq!(config.media.min_port, 50000);
    }

    #[test]
    #[serial]
    fn env_overrides_take_precedence() {
        std::env::set_var("REMUS_SERVER_NAME", "Overridden");
        std::env::set_var("REMUS_CLIENT_ORIGIN", "https://a.example, https://b.example");
        let config = ServerConfig::from_toml_str(r#"server_name = "Original""#).unwrap();
        assert_eq!(config.server_name, "Overridden");
        assert_eq!(
            config.client_origins,
            vec!["https://a.example", "https://b.example"]
        );
        std::env::remove_var("REMUS_SERVER_NAME");
        std::env::remove_var("REMUS_CLIENT_ORIGIN");
    }

    #[test]
    #[serial]
    fn invalid_port_is_reported_not_panicked() {
        std::env::set_var("PORT", "not-a-number");
        let config = ServerConfig::from_toml_str("").unwrap();
        std::env::remove_var("PORT");
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("port out of range")));
    }

    #[test]
    fn port_zero_is_out_of_range() {
        let config = ServerConfig {
            port: 0,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_ice_servers_json_is_rejected() {
        let config = ServerConfig {
            ice_servers: "{not json".to_string(),
            ..ServerConfig::default()
        };
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("ICE_SERVERS")));
    }

    #[test]
    fn ice_servers_object_is_rejected_array_required() {
        let config = ServerConfig {
            ice_servers: r#"{"urls":"stun:stun.example"}"#.to_string(),
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn inverted_media_port_window_is_rejected() {
        let config = ServerConfig {
            media: MediaConfig {
                min_port: 50000,
                max_port: 40000,
                ..MediaConfig::default()
            },
            ..ServerConfig::default()
        };
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("media port window")));
    }

    #[test]
    fn zero_file_limit_is_rejected() {
        let config = ServerConfig {
            file_limit_mb: 0,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_origin_is_rejected() {
        let config = ServerConfig {
            client_origins: vec!["not a url".to_string()],
            ..ServerConfig::default()
        };
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("invalid client origin")));
    }

    #[test]
    fn multiple_problems_are_all_reported() {
        let config = ServerConfig {
            port: 0,
            file_limit_mb: -3,
            ice_servers: "nope".to_string(),
            ..ServerConfig::default()
        };
        let errors = config.validate().unwrap_err();
        assert!(errors.len() >= 3);
    }

    #[test]
    fn db_file_defaults_under_runtime_data() {
        let config = ServerConfig {
            runtime_dir: "/tmp/remus-test".to_string(),
            ..ServerConfig::default()
        };
        assert_eq!(config.db_file(), PathBuf::from("/tmp/remus-test/data/remus.db"));
        assert_eq!(config.uploads_path(), PathBuf::from("/tmp/remus-test/uploads"));
    }

    #[test]
    fn loopback_backend_detection() {
        let mut config = ServerConfig::default();
        config.main_backend_url = "http://127.0.0.1:9000".to_string();
        assert!(config.backend_is_loopback());
        config.main_backend_url = "https://auth.example.com".to_string();
        assert!(!config.backend_is_loopback());
    }

    #[test]
    fn file_limit_bytes_scales_megabytes() {
        let config = ServerConfig {
            file_limit_mb: 2,
            ..ServerConfig::default()
        };
        assert_eq!(config.file_limit_bytes(), 2 * 1024 * 1024);
    }
}
