use extmux_provision::ServiceDefinition;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid TOML config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub extension: ExtensionConfig,

    #[serde(default)]
    pub reference: ReferenceConfig,

    #[serde(default)]
    pub directory: DirectoryConfig,

    #[serde(default)]
    pub provisioner: ProvisionerConfig,

    #[serde(default)]
    pub forwarding: ForwardingConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Identity of the multiplexed extension towards its callers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtensionConfig {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub secret: String,
}

/// Instance queried at startup for the schema to advertise
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReferenceConfig {
    #[serde(default)]
    pub url: String,

    #[serde(default)]
    pub secret: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectoryBackend {
    #[default]
    Memory,
    File,
    Postgres,
}

impl std::str::FromStr for DirectoryBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(DirectoryBackend::Memory),
            "file" => Ok(DirectoryBackend::File),
            "postgres" => Ok(DirectoryBackend::Postgres),
            other => Err(ConfigError::Invalid(format!(
                "unknown directory backend '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    #[serde(default)]
    pub backend: DirectoryBackend,

    /// JSON file for the `file` backend
    #[serde(default = "default_directory_path")]
    pub path: String,

    /// Connection string for the `postgres` backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,

    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvisionerConfig {
    #[serde(default)]
    pub base_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_definition: Option<ServiceDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardingConfig {
    #[serde(default = "default_forward_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            extension: ExtensionConfig::default(),
            reference: ReferenceConfig::default(),
            directory: DirectoryConfig::default(),
            provisioner: ProvisionerConfig::default(),
            forwarding: ForwardingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            backend: DirectoryBackend::default(),
            path: default_directory_path(),
            database_url: None,
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_forward_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl ServerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;

        let config = if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            toml::from_str(&contents)?
        } else {
            // Default to YAML
            serde_yaml::from_str(&contents)?
        };

        Ok(config)
    }

    /// Merge environment variables into config (env vars take precedence)
    pub fn merge_env(&mut self) -> Result<(), ConfigError> {
        self.merge_vars(|name| std::env::var(name).ok())
    }

    /// Merge variables from `lookup`. For settings with both an `EXTMUX_`
    /// name and a legacy name, the `EXTMUX_` one wins.
    pub fn merge_vars(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        let var = |names: &[&str]| names.iter().find_map(|name| lookup(*name));

        if let Some(val) = var(&["EXTMUX_HOST"]) {
            self.host = val;
        }
        if let Some(val) = var(&["EXTMUX_PORT", "PORT"]) {
            self.port = parse("port", &val)?;
        }

        if let Some(val) = var(&["EXTMUX_EXTENSION_NAME", "LC_EXTENSION_NAME"]) {
            self.extension.name = val;
        }
        if let Some(val) = var(&["EXTMUX_SHARED_SECRET", "LC_SHARED_SECRET"]) {
            self.extension.secret = val;
        }

        if let Some(val) = var(&["EXTMUX_REFERENCE_URL", "LC_REFERENCE_SERVICE_URL"]) {
            self.reference.url = val;
        }
        if let Some(val) = var(&["EXTMUX_REFERENCE_SECRET", "LC_REFERENCE_SHARED_SECRET"]) {
            self.reference.secret = val;
        }

        if let Some(val) = var(&["EXTMUX_DIRECTORY_BACKEND"]) {
            self.directory.backend = val.parse()?;
        }
        if let Some(val) = var(&["EXTMUX_DIRECTORY_PATH"]) {
            self.directory.path = val;
        }
        if let Some(val) = var(&["EXTMUX_DATABASE_URL"]) {
            self.directory.database_url = Some(val);
        }
        if let Some(val) = var(&["EXTMUX_CACHE_TTL_SECS"]) {
            self.directory.cache_ttl_secs = parse("cache TTL", &val)?;
        }

        if let Some(val) = var(&["EXTMUX_PROVISIONER_URL"]) {
            self.provisioner.base_url = val;
        }
        if let Some(val) = var(&["EXTMUX_PROVISIONER_TOKEN"]) {
            self.provisioner.token = Some(val);
        }
        if let Some(val) = var(&["EXTMUX_SERVICE_DEFINITION", "SERVICE_DEFINITION"]) {
            let definition = ServiceDefinition::from_json(&val)
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
            self.provisioner.service_definition = Some(definition);
        }

        if let Some(val) = var(&["EXTMUX_FORWARD_TIMEOUT_SECS"]) {
            self.forwarding.timeout_secs = parse("forward timeout", &val)?;
        }

        if let Some(val) = var(&["EXTMUX_LOG_LEVEL"]) {
            self.logging.level = val;
        }
        if let Some(val) = var(&["EXTMUX_LOG_JSON"]) {
            self.logging.json = parse("log format flag", &val)?;
        }

        Ok(())
    }

    /// Check everything needed to start serving is present.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            (self.extension.name.as_str(), "extension.name"),
            (self.extension.secret.as_str(), "extension.secret"),
            (self.reference.url.as_str(), "reference.url"),
            (self.reference.secret.as_str(), "reference.secret"),
            (self.provisioner.base_url.as_str(), "provisioner.base_url"),
        ];
        for (value, name) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{} is not set", name)));
            }
        }

        match &self.provisioner.service_definition {
            Some(definition) => definition
                .validate()
                .map_err(|e| ConfigError::Invalid(e.to_string()))?,
            None => {
                return Err(ConfigError::Invalid(
                    "provisioner.service_definition is not set".to_string(),
                ));
            }
        }

        if self.directory.backend == DirectoryBackend::Postgres
            && self.directory.database_url.is_none()
        {
            return Err(ConfigError::Invalid(
                "directory.database_url is required for the postgres backend".to_string(),
            ));
        }
        if self.directory.cache_ttl_secs == 0 {
            return Err(ConfigError::Invalid(
                "directory.cache_ttl_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse<T: std::str::FromStr>(what: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("invalid {}: '{}'", what, value)))
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_directory_path() -> String {
    "~/.extmux/directory.json".to_string()
}

fn default_cache_ttl_secs() -> u64 {
    10
}

fn default_forward_timeout_secs() -> u64 {
    600
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    const DEFINITION: &str = r#"{"image": "registry.example.com/scanner:1", "env": ["MODE=prod"]}"#;

    fn complete() -> ServerConfig {
        let mut config = ServerConfig::default();
        let vars = HashMap::from([
            ("LC_EXTENSION_NAME", "scanner"),
            ("LC_SHARED_SECRET", "mux-secret"),
            ("LC_REFERENCE_SERVICE_URL", "https://reference.example.com"),
            ("LC_REFERENCE_SHARED_SECRET", "ref-secret"),
            ("EXTMUX_PROVISIONER_URL", "https://cp.example.com"),
            ("SERVICE_DEFINITION", DEFINITION),
        ]);
        config
            .merge_vars(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();
        config
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.directory.backend, DirectoryBackend::Memory);
        assert_eq!(config.directory.cache_ttl_secs, 10);
        assert_eq!(config.forwarding.timeout_secs, 600);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_legacy_variable_names() {
        let config = complete();
        assert_eq!(config.extension.name, "scanner");
        assert_eq!(config.reference.secret, "ref-secret");
        assert_eq!(
            config.provisioner.service_definition.as_ref().unwrap().image,
            "registry.example.com/scanner:1"
        );
        config.validate().unwrap();
    }

    #[test]
    fn test_prefixed_variable_wins() {
        let mut config = ServerConfig::default();
        let vars = HashMap::from([("PORT", "9000"), ("EXTMUX_PORT", "9100")]);
        config
            .merge_vars(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.port, 9100);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let mut config = ServerConfig::default();
        assert!(config
            .merge_vars(|name| (name == "PORT").then(|| "eighty".to_string()))
            .is_err());
        assert!(config
            .merge_vars(|name| (name == "SERVICE_DEFINITION").then(|| "{".to_string()))
            .is_err());
        assert!(config
            .merge_vars(|name| (name == "EXTMUX_DIRECTORY_BACKEND").then(|| "redis".to_string()))
            .is_err());
    }

    #[test]
    fn test_postgres_requires_url() {
        let mut config = complete();
        config.directory.backend = DirectoryBackend::Postgres;
        assert!(config.validate().is_err());
        config.directory.database_url = Some("postgres://localhost/extmux".to_string());
        config.validate().unwrap();
    }

    #[test]
    fn test_yaml_and_toml_files() {
        let dir = tempfile::tempdir().unwrap();

        let yaml_path = dir.path().join("config.yaml");
        let mut yaml = std::fs::File::create(&yaml_path).unwrap();
        writeln!(
            yaml,
            "port: 9001\nextension:\n  name: scanner\ndirectory:\n  backend: file\n  path: /tmp/dir.json\nlogging:\n  json: true"
        )
        .unwrap();
        let config = ServerConfig::from_file(&yaml_path).unwrap();
        assert_eq!(config.port, 9001);
        assert_eq!(config.extension.name, "scanner");
        assert_eq!(config.directory.backend, DirectoryBackend::File);
        assert!(config.logging.json);
        assert_eq!(config.forwarding.timeout_secs, 600);

        let toml_path = dir.path().join("config.toml");
        std::fs::write(
            &toml_path,
            "port = 9002\n[provisioner]\nbase_url = \"https://cp.example.com\"\n[provisioner.service_definition]\nimage = \"img\"\n",
        )
        .unwrap();
        let config = ServerConfig::from_file(&toml_path).unwrap();
        assert_eq!(config.port, 9002);
        assert_eq!(config.provisioner.service_definition.unwrap().image, "img");
    }

    #[test]
    #[serial_test::serial]
    fn test_merge_env_reads_process_environment() {
        // Serialized test prevents races with other env-reading tests
        unsafe {
            std::env::set_var("EXTMUX_CACHE_TTL_SECS", "30");
            std::env::set_var("EXTMUX_LOG_LEVEL", "debug");
        }

        let mut config = ServerConfig::default();
        let result = config.merge_env();

        unsafe {
            std::env::remove_var("EXTMUX_CACHE_TTL_SECS");
            std::env::remove_var("EXTMUX_LOG_LEVEL");
        }

        result.unwrap();
        assert_eq!(config.directory.cache_ttl_secs, 30);
        assert_eq!(config.logging.level, "debug");
    }
}
