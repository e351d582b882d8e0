pub mod cli;
pub mod toml_config;

use crate::core::dose::{default_goals, DEFAULT_MIN_DELIVERED_FRACTIONS, DEFAULT_PROTOCOL_NAME, DEFAULT_ROI_NAME};
use crate::core::ConfigProvider;
use crate::domain::model::DoseVolumeGoal;
use crate::utils::error::{CheckError, Result};
use crate::utils::validation::{self, Validate};
#[cfg(feature = "cli")]
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

pub const DEFAULT_OUTPUT_PATH: &str = "./output";
pub const DEFAULT_BUNDLE_FILENAME: &str = "rectal_air_report.zip";
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
pub const SUPPORTED_FORMATS: [&str; 2] = ["csv", "json"];

pub fn default_output_formats() -> &'static [String] {
    static FORMATS: OnceLock<Vec<String>> = OnceLock::new();
    FORMATS.get_or_init(|| SUPPORTED_FORMATS.iter().map(|f| f.to_string()).collect())
}

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[command(name = "rectal-air-check")]
#[command(about = "Predict whether rectal air seen on CBCT pushes the rectum past its dose goals")]
pub struct CliConfig {
    /// Course export: JSON file path or http(s) URL
    #[arg(long)]
    pub course: Option<String>,

    /// Protocol TOML file; command line flags take precedence
    #[arg(short, long)]
    pub config: Option<String>,

    #[arg(long)]
    pub output_path: Option<String>,

    /// Output formats (csv, json)
    #[arg(long, value_delimiter = ',')]
    pub formats: Option<Vec<String>>,

    /// Bundle all outputs into a single zip file
    #[arg(long)]
    pub bundle: bool,

    /// Use this delivered fraction count instead of counting statuses
    #[arg(long)]
    pub delivered_override: Option<usize>,

    /// Do not subtract the air fraction from the delivered count
    #[arg(long)]
    pub no_air_fraction_correction: bool,

    /// Source timeout in seconds [default: 30]
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Only show the fraction summary
    #[arg(long)]
    pub dry_run: bool,

    #[arg(long, help = "Log CPU and memory usage per phase")]
    pub monitor: bool,

    /// Exit with status 4 when intervention is advised
    #[arg(long)]
    pub strict: bool,

    #[arg(long, help = "Emit logs as JSON")]
    pub log_json: bool,

    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(skip = default_goals())]
    #[serde(default = "default_goals")]
    pub goals: Vec<DoseVolumeGoal>,
}

#[cfg(feature = "cli")]
impl CliConfig {
    pub fn for_course(course: impl Into<String>) -> Self {
        Self {
            course: Some(course.into()),
            config: None,
            output_path: None,
            formats: None,
            bundle: false,
            delivered_override: None,
            no_air_fraction_correction: false,
            timeout: None,
            dry_run: false,
            monitor: false,
            strict: false,
            log_json: false,
            verbose: false,
            goals: default_goals(),
        }
    }
}

#[cfg(feature = "cli")]
impl ConfigProvider for CliConfig {
    fn course_location(&self) -> &str {
        self.course.as_deref().unwrap_or_default()
    }

    fn output_path(&self) -> &str {
        self.output_path.as_deref().unwrap_or(DEFAULT_OUTPUT_PATH)
    }

    fn output_formats(&self) -> &[String] {
        self.formats.as_deref().unwrap_or(default_output_formats())
    }

    fn bundle_filename(&self) -> Option<&str> {
        self.bundle.then_some(DEFAULT_BUNDLE_FILENAME)
    }

    fn source_timeout_seconds(&self) -> u64 {
        self.timeout.unwrap_or(DEFAULT_TIMEOUT_SECONDS)
    }

    fn protocol_name(&self) -> &str {
        DEFAULT_PROTOCOL_NAME
    }

    fn roi_name(&self) -> &str {
        DEFAULT_ROI_NAME
    }

    fn min_delivered_fractions(&self) -> usize {
        DEFAULT_MIN_DELIVERED_FRACTIONS
    }

    fn air_fraction_marked_delivered(&self) -> bool {
        !self.no_air_fraction_correction
    }

    fn delivered_override(&self) -> Option<usize> {
        self.delivered_override
    }

    fn goals(&self) -> &[DoseVolumeGoal] {
        &self.goals
    }
}

#[cfg(feature = "cli")]
impl Validate for CliConfig {
    fn validate(&self) -> Result<()> {
        let course = validation::validate_required_field("course", &self.course)?;
        validation::validate_course_location("course", course)?;
        validation::validate_path("output_path", self.output_path())?;
        validation::validate_output_formats("formats", self.output_formats(), &SUPPORTED_FORMATS)?;
        validation::validate_positive_number("timeout", self.source_timeout_seconds() as usize, 1)?;
        validate_goals("goals", &self.goals)?;
        Ok(())
    }
}

pub fn validate_goals(field_name: &str, goals: &[DoseVolumeGoal]) -> Result<()> {
    if goals.is_empty() {
        return Err(CheckError::ConfigValidationError {
            field: field_name.to_string(),
            message: "at least one clinical goal is required".to_string(),
        });
    }

    for goal in goals {
        validation::validate_non_empty_string(&format!("{}.label", field_name), &goal.label)?;
        validation::validate_range(&format!("{}.dose_cgy", field_name), goal.dose_cgy, 0.0, 100_000.0)?;
        validation::validate_range(&format!("{}.limit", field_name), goal.limit, 0.0, 100_000.0)?;
    }

    Ok(())
}
