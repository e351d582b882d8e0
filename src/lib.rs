pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

pub use crate::config::cli::LocalStorage;
pub use crate::config::toml_config::TomlConfig;
#[cfg(feature = "cli")]
pub use crate::config::CliConfig;

pub use crate::core::{
    dose::ProtocolSettings,
    engine::{CheckEngine, CheckOutcome},
    pipeline::RectalAirPipeline,
};
pub use crate::domain::model::{Advisory, Assessment, FractionSummary, TreatmentCourse};
pub use crate::utils::error::{CheckError, Result};
