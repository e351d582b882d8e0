pub mod advisory;
pub mod dose;
pub mod engine;
pub mod pipeline;

pub use crate::domain::model::{Assessment, FractionSummary, TreatmentCourse};
pub use crate::domain::ports::{ConfigProvider, Pipeline, Storage};
pub use crate::utils::error::Result;
