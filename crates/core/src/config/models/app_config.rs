use std::path::Path;

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    dispatcher::{DispatcherConfig, LivenessConfig, ResultStoreConfig},
    observability::ObservabilityConfig,
};

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub dispatcher: DispatcherConfig,
    pub liveness: LivenessConfig,
    pub results: ResultStoreConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Default configuration
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (prefix: WORKLOG_, nested keys joined by `__`)
    ///
    /// An explicit `config_path` must exist; without one the default locations are
    /// probed and built-in defaults are used when none is found.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = [
                "config/dispatch.toml",
                "dispatch.toml",
                "/etc/worklog/dispatch.toml",
            ];

            match default_paths.iter().find(|path| Path::new(path).exists()) {
                Some(path) => {
                    debug!("使用默认配置文件: {path}");
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                }
                None => debug!("未找到配置文件，使用内置默认配置"),
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("WORKLOG")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn validate(&self) -> Result<()> {
        self.dispatcher.validate().context("分发配置验证失败")?;
        self.liveness.validate().context("存活检测配置验证失败")?;
        self.results.validate().context("结果存储配置验证失败")?;
        self.observability
            .validate()
            .context("可观测性配置验证失败")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_is_valid() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn test_from_toml_partial_sections_use_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [liveness]
            heartbeat_interval_seconds = 5
            liveness_window_seconds = 15
            eviction_window_seconds = 60

            [results]
            retention_seconds = 120
            "#,
        )
        .unwrap();

        assert_eq!(config.liveness.heartbeat_interval_seconds, 5);
        assert_eq!(config.liveness.sweep_interval_seconds, 5);
        assert_eq!(config.results.retention_seconds, 120);
        assert_eq!(config.results.max_entries, 10_000);
        assert_eq!(config.dispatcher, DispatcherConfig::default());
    }

    #[test]
    fn test_from_toml_rejects_invalid_windows() {
        let result = AppConfig::from_toml(
            r#"
            [liveness]
            liveness_window_seconds = 60
            eviction_window_seconds = 30
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = AppConfig::default();
        let text = config.to_toml().unwrap();
        assert_eq!(AppConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn test_load_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
            [dispatcher]
            channel_capacity = 8

            [observability]
            log_format = "json"
            "#
        )
        .unwrap();

        let path = temp_file.path().to_str().unwrap().to_string();
        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.dispatcher.channel_capacity, 8);
        assert_eq!(config.observability.log_format, "json");
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(AppConfig::load(Some("/nonexistent/dispatch.toml")).is_err());
    }
}
