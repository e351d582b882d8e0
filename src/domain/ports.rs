use crate::domain::model::{Assessment, DoseVolumeGoal, FractionSummary, TreatmentCourse};
use crate::utils::error::Result;
use async_trait::async_trait;

pub trait Storage: Send + Sync {
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

pub trait ConfigProvider: Send + Sync {
    /// File path or http(s) URL of the course export.
    fn course_location(&self) -> &str;
    fn output_path(&self) -> &str;
    fn output_formats(&self) -> &[String];
    fn bundle_filename(&self) -> Option<&str>;
    fn source_timeout_seconds(&self) -> u64;

    fn protocol_name(&self) -> &str;
    fn roi_name(&self) -> &str;
    fn min_delivered_fractions(&self) -> usize;
    fn air_fraction_marked_delivered(&self) -> bool;
    fn delivered_override(&self) -> Option<usize>;
    fn goals(&self) -> &[DoseVolumeGoal];
}

#[async_trait]
pub trait Pipeline: Send + Sync {
    async fn extract(&self) -> Result<TreatmentCourse>;
    async fn evaluate(&self, course: TreatmentCourse) -> Result<Assessment>;
    async fn load(&self, assessment: &Assessment) -> Result<String>;

    /// Fraction panel without running the dose evaluation.
    fn summarize(&self, course: &TreatmentCourse) -> FractionSummary;
}
