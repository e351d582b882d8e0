use crate::config::{
    default_output_formats, validate_goals, DEFAULT_BUNDLE_FILENAME, DEFAULT_OUTPUT_PATH,
    DEFAULT_TIMEOUT_SECONDS, SUPPORTED_FORMATS,
};
use crate::core::dose::{default_goals, DEFAULT_MIN_DELIVERED_FRACTIONS, DEFAULT_PROTOCOL_NAME, DEFAULT_ROI_NAME};
use crate::core::ConfigProvider;
use crate::domain::model::DoseVolumeGoal;
use crate::utils::error::{CheckError, Result};
use crate::utils::validation::{self, Validate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub output: OutputConfig,
    pub monitoring: Option<MonitoringConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    #[serde(default = "default_protocol_name")]
    pub name: String,
    #[serde(default = "default_roi_name")]
    pub roi_name: String,
    pub min_delivered_fractions: Option<usize>,
    pub air_fraction_marked_delivered: Option<bool>,
    pub delivered_override: Option<usize>,
    #[serde(default = "default_goals")]
    pub goals: Vec<DoseVolumeGoal>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub location: String,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_path")]
    pub output_path: String,
    pub output_formats: Option<Vec<String>>,
    pub compression: Option<CompressionConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    pub enabled: bool,
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub enabled: bool,
    pub log_level: Option<String>,
}

fn default_protocol_name() -> String {
    DEFAULT_PROTOCOL_NAME.to_string()
}

fn default_roi_name() -> String {
    DEFAULT_ROI_NAME.to_string()
}

fn default_output_path() -> String {
    DEFAULT_OUTPUT_PATH.to_string()
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            name: default_protocol_name(),
            roi_name: default_roi_name(),
            min_delivered_fractions: None,
            air_fraction_marked_delivered: None,
            delivered_override: None,
            goals: default_goals(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_path: default_output_path(),
            output_formats: None,
            compression: None,
        }
    }
}

impl TomlConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(CheckError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content);

        toml::from_str(&processed_content).map_err(|e| CheckError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${COURSE_EXPORT})，未定義的保留原樣
    fn substitute_env_vars(content: &str) -> String {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let re = PATTERN.get_or_init(|| {
            Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("env var pattern is valid")
        });

        re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        })
        .into_owned()
    }

    /// 套用命令列參數；只覆蓋有明確指定的值
    #[cfg(feature = "cli")]
    pub fn apply_cli_overrides(&mut self, cli: &crate::config::CliConfig) {
        if let Some(course) = &cli.course {
            self.source.location = course.clone();
        }
        if let Some(path) = &cli.output_path {
            self.output.output_path = path.clone();
        }
        if let Some(formats) = &cli.formats {
            self.output.output_formats = Some(formats.clone());
        }
        if cli.bundle {
            let filename = self
                .output
                .compression
                .as_ref()
                .and_then(|c| c.filename.clone());
            self.output.compression = Some(CompressionConfig {
                enabled: true,
                filename,
            });
        }
        if cli.delivered_override.is_some() {
            self.protocol.delivered_override = cli.delivered_override;
        }
        if cli.no_air_fraction_correction {
            self.protocol.air_fraction_marked_delivered = Some(false);
        }
        if cli.timeout.is_some() {
            self.source.timeout_seconds = cli.timeout;
        }
        if cli.monitor {
            let log_level = self.monitoring.as_ref().and_then(|m| m.log_level.clone());
            self.monitoring = Some(MonitoringConfig {
                enabled: true,
                log_level,
            });
        }
    }

    pub fn validate_config(&self) -> Result<()> {
        validation::validate_non_empty_string("protocol.name", &self.protocol.name)?;
        validation::validate_non_empty_string("protocol.roi_name", &self.protocol.roi_name)?;
        validation::validate_positive_number(
            "protocol.min_delivered_fractions",
            self.min_delivered_fractions(),
            1,
        )?;
        validate_goals("protocol.goals", &self.protocol.goals)?;

        if self.source.location.is_empty() {
            return Err(CheckError::MissingConfigError {
                field: "source.location".to_string(),
            });
        }
        validation::validate_course_location("source.location", &self.source.location)?;

        validation::validate_path("output.output_path", &self.output.output_path)?;
        validation::validate_output_formats(
            "output.output_formats",
            self.output_formats(),
            &SUPPORTED_FORMATS,
        )?;

        if let Some(timeout) = self.source.timeout_seconds {
            validation::validate_positive_number("source.timeout_seconds", timeout as usize, 1)?;
        }

        if let Some(level) = self.log_level() {
            if !LOG_LEVELS.contains(&level) {
                return Err(CheckError::InvalidConfigValueError {
                    field: "monitoring.log_level".to_string(),
                    value: level.to_string(),
                    reason: format!("expected one of {}", LOG_LEVELS.join(", ")),
                });
            }
        }

        Ok(())
    }

    pub fn monitoring_enabled(&self) -> bool {
        self.monitoring.as_ref().map(|m| m.enabled).unwrap_or(false)
    }

    /// 日誌等級，RUST_LOG 未設定時使用
    pub fn log_level(&self) -> Option<&str> {
        self.monitoring.as_ref().and_then(|m| m.log_level.as_deref())
    }
}

impl ConfigProvider for TomlConfig {
    fn course_location(&self) -> &str {
        &self.source.location
    }

    fn output_path(&self) -> &str {
        &self.output.output_path
    }

    fn output_formats(&self) -> &[String] {
        self.output
            .output_formats
            .as_deref()
            .unwrap_or(default_output_formats())
    }

    fn bundle_filename(&self) -> Option<&str> {
        match &self.output.compression {
            Some(c) if c.enabled => Some(c.filename.as_deref().unwrap_or(DEFAULT_BUNDLE_FILENAME)),
            _ => None,
        }
    }

    fn source_timeout_seconds(&self) -> u64 {
        self.source.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS)
    }

    fn protocol_name(&self) -> &str {
        &self.protocol.name
    }

    fn roi_name(&self) -> &str {
        &self.protocol.roi_name
    }

    fn min_delivered_fractions(&self) -> usize {
        self.protocol
            .min_delivered_fractions
            .unwrap_or(DEFAULT_MIN_DELIVERED_FRACTIONS)
    }

    fn air_fraction_marked_delivered(&self) -> bool {
        self.protocol.air_fraction_marked_delivered.unwrap_or(true)
    }

    fn delivered_override(&self) -> Option<usize> {
        self.protocol.delivered_override
    }

    fn goals(&self) -> &[DoseVolumeGoal] {
        &self.protocol.goals
    }
}

impl Validate for TomlConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}
