use crate::core::dose::{self, ProtocolSettings};
use crate::core::{Assessment, ConfigProvider, FractionSummary, Pipeline, Storage, TreatmentCourse};
use crate::domain::model::GoalUnit;
use crate::utils::error::{CheckError, Result};
use crate::utils::validation::is_remote_location;
use reqwest::Client;
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use zip::write::{FileOptions, ZipWriter};

pub const REPORT_FILENAME: &str = "report.json";
pub const PREDICTION_FILENAME: &str = "prediction.csv";

/// Report document written as `report.json`.
#[derive(Debug, Serialize)]
struct ReportDocument<'a> {
    title: &'static str,
    message: String,
    requires_intervention: bool,
    #[serde(flatten)]
    assessment: &'a Assessment,
}

pub struct RectalAirPipeline<S: Storage, C: ConfigProvider> {
    storage: S,
    config: C,
    protocol: ProtocolSettings,
    client: Client,
}

impl<S: Storage, C: ConfigProvider> RectalAirPipeline<S, C> {
    pub fn new(storage: S, config: C) -> Self {
        let protocol = ProtocolSettings::from_config(&config);
        Self {
            storage,
            config,
            protocol,
            client: Client::new(),
        }
    }

    pub fn protocol(&self) -> &ProtocolSettings {
        &self.protocol
    }

    async fn fetch_remote(&self, location: &str) -> Result<Vec<u8>> {
        tracing::debug!("Fetching course export from: {}", location);
        let response = self
            .client
            .get(location)
            .timeout(Duration::from_secs(self.config.source_timeout_seconds()))
            .send()
            .await?;

        let status = response.status();
        tracing::debug!("Course source response status: {}", status);
        if !status.is_success() {
            return Err(CheckError::SourceStatusError {
                location: location.to_string(),
                status: status.as_u16(),
            });
        }

        Ok(response.bytes().await?.to_vec())
    }

    fn output_file(&self, name: &str) -> String {
        Path::new(self.config.output_path())
            .join(name)
            .to_string_lossy()
            .into_owned()
    }
}

/// CSV of the simulation series: one row per number of substituted air fractions.
pub fn prediction_csv(assessment: &Assessment) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    let labels: Vec<(String, GoalUnit)> = assessment
        .projected
        .as_ref()
        .map(|m| m.values.iter().map(|v| (v.label.clone(), v.unit)).collect())
        .unwrap_or_default();

    let mut header = vec![
        "fraction_number".to_string(),
        "air_fractions_substituted".to_string(),
    ];
    for (label, unit) in &labels {
        let unit = match unit {
            GoalUnit::Percent => "pct",
            GoalUnit::Cc => "cc",
        };
        header.push(format!("{}_{}", label, unit));
        header.push(format!("{}_limit", label));
    }
    writer.write_record(&header)?;

    for point in &assessment.simulation {
        let mut row = vec![
            point.fraction_number.to_string(),
            point.air_fractions.to_string(),
        ];
        for value in &point.metrics.values {
            row.push(format!("{:.4}", value.value));
            row.push(value.limit.to_string());
        }
        writer.write_record(&row)?;
    }

    writer.into_inner().map_err(|e| CheckError::ProcessingError {
        message: format!("failed to flush CSV writer: {}", e),
    })
}

pub fn report_json(assessment: &Assessment) -> Result<Vec<u8>> {
    let document = ReportDocument {
        title: assessment.advisory.title(),
        message: assessment.advisory.message(),
        requires_intervention: assessment.advisory.requires_intervention(),
        assessment,
    };
    Ok(serde_json::to_vec_pretty(&document)?)
}

fn bundle_zip(files: &[(&str, Vec<u8>)]) -> Result<Vec<u8>> {
    let mut zip = ZipWriter::new(std::io::Cursor::new(Vec::new()));

    for (name, data) in files {
        zip.start_file::<_, ()>(*name, FileOptions::default())?;
        zip.write_all(data)?;
    }

    let cursor = zip.finish()?;
    Ok(cursor.into_inner())
}

#[async_trait::async_trait]
impl<S: Storage, C: ConfigProvider> Pipeline for RectalAirPipeline<S, C> {
    async fn extract(&self) -> Result<TreatmentCourse> {
        let location = self.config.course_location();
        tracing::info!("📥 Loading course export from: {}", location);

        let data = if is_remote_location(location) {
            self.fetch_remote(location).await?
        } else {
            self.storage.read_file(location).await?
        };

        let course: TreatmentCourse = serde_json::from_slice(&data)?;
        tracing::debug!(
            "Course export: plan '{}', {} fractions exported, {} ROIs, grid {:?}",
            course.plan_name,
            course.fractions.len(),
            course.rois.len(),
            course.dose_grid.nr_voxels
        );
        Ok(course)
    }

    async fn evaluate(&self, course: TreatmentCourse) -> Result<Assessment> {
        tracing::info!(
            "🧮 Evaluating {} goals on ROI '{}' ({} protocol)",
            self.protocol.goals.len(),
            self.protocol.roi_name,
            self.protocol.name
        );
        dose::assess(&course, &self.protocol)
    }

    async fn load(&self, assessment: &Assessment) -> Result<String> {
        let formats = self.config.output_formats();
        let mut files: Vec<(&str, Vec<u8>)> = Vec::new();

        if formats.iter().any(|f| f == "json") {
            files.push((REPORT_FILENAME, report_json(assessment)?));
        }
        if formats.iter().any(|f| f == "csv") {
            // 需要介入時沒有模擬結果
            if !assessment.advisory.requires_intervention() {
                files.push((PREDICTION_FILENAME, prediction_csv(assessment)?));
            } else {
                tracing::debug!("No simulation series, skipping {}", PREDICTION_FILENAME);
            }
        }

        if files.is_empty() {
            return Err(CheckError::ProcessingError {
                message: "nothing to write for the configured output formats".to_string(),
            });
        }

        if let Some(bundle) = self.config.bundle_filename() {
            tracing::debug!("Creating ZIP bundle with {} files", files.len());
            let zip_data = bundle_zip(&files)?;
            let path = self.output_file(bundle);
            tracing::debug!("Writing ZIP bundle ({} bytes) to {}", zip_data.len(), path);
            self.storage.write_file(&path, &zip_data).await?;
            return Ok(path);
        }

        let mut written = Vec::with_capacity(files.len());
        for (name, data) in &files {
            let path = self.output_file(name);
            self.storage.write_file(&path, data).await?;
            tracing::debug!("Wrote {}", path);
            written.push(path);
        }

        // 第一個檔案為主要輸出 (report.json 優先)
        Ok(written.swap_remove(0))
    }

    fn summarize(&self, course: &TreatmentCourse) -> FractionSummary {
        dose::summarize(course, &self.protocol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dose::tests::{sample_course, REGULAR};
    use crate::domain::model::DoseVolumeGoal;
    use httpmock::prelude::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    #[derive(Clone)]
    struct MockStorage {
        files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    }

    impl MockStorage {
        fn new() -> Self {
            Self {
                files: Arc::new(Mutex::new(HashMap::new())),
            }
        }

        async fn put_file(&self, path: &str, data: Vec<u8>) {
            self.files.lock().await.insert(path.to_string(), data);
        }

        async fn get_file(&self, path: &str) -> Option<Vec<u8>> {
            let files = self.files.lock().await;
            files.get(path).cloned()
        }

        async fn file_names(&self) -> Vec<String> {
            let mut names: Vec<String> = self.files.lock().await.keys().cloned().collect();
            names.sort();
            names
        }
    }

    impl Storage for MockStorage {
        async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
            let files = self.files.lock().await;
            files.get(path).cloned().ok_or_else(|| {
                CheckError::IoError(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("File not found: {}", path),
                ))
            })
        }

        async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
            let mut files = self.files.lock().await;
            files.insert(path.to_string(), data.to_vec());
            Ok(())
        }
    }

    struct MockConfig {
        course_location: String,
        output_formats: Vec<String>,
        bundle: Option<String>,
        goals: Vec<DoseVolumeGoal>,
    }

    impl MockConfig {
        fn new(course_location: &str) -> Self {
            Self {
                course_location: course_location.to_string(),
                output_formats: vec!["csv".to_string(), "json".to_string()],
                bundle: None,
                goals: dose::default_goals(),
            }
        }
    }

    impl ConfigProvider for MockConfig {
        fn course_location(&self) -> &str {
            &self.course_location
        }

        fn output_path(&self) -> &str {
            "test_output"
        }

        fn output_formats(&self) -> &[String] {
            &self.output_formats
        }

        fn bundle_filename(&self) -> Option<&str> {
            self.bundle.as_deref()
        }

        fn source_timeout_seconds(&self) -> u64 {
            5
        }

        fn protocol_name(&self) -> &str {
            "PR66"
        }

        fn roi_name(&self) -> &str {
            "Rectum"
        }

        fn min_delivered_fractions(&self) -> usize {
            5
        }

        fn air_fraction_marked_delivered(&self) -> bool {
            true
        }

        fn delivered_override(&self) -> Option<usize> {
            None
        }

        fn goals(&self) -> &[DoseVolumeGoal] {
            &self.goals
        }
    }

    fn course_json(marked_delivered: usize) -> Vec<u8> {
        serde_json::to_vec(&sample_course(marked_delivered, REGULAR)).unwrap()
    }

    #[tokio::test]
    async fn test_extract_from_storage() {
        let storage = MockStorage::new();
        storage.put_file("exports/course.json", course_json(6)).await;
        let pipeline = RectalAirPipeline::new(storage, MockConfig::new("exports/course.json"));

        let course = pipeline.extract().await.unwrap();
        assert_eq!(course.plan_name, "PR66 VMAT");
        assert_eq!(course.fractions.len(), 20);

        let summary = pipeline.summarize(&course);
        assert_eq!(summary.patient_name, "Jan Jansen");
        assert_eq!(summary.delivered_fractions, 5);
    }

    #[tokio::test]
    async fn test_extract_missing_file() {
        let pipeline = RectalAirPipeline::new(MockStorage::new(), MockConfig::new("absent.json"));
        let err = pipeline.extract().await.unwrap_err();
        assert!(matches!(err, CheckError::IoError(_)));
    }

    #[tokio::test]
    async fn test_extract_malformed_json() {
        let storage = MockStorage::new();
        storage.put_file("course.json", b"{\"patient\": 1}".to_vec()).await;
        let pipeline = RectalAirPipeline::new(storage, MockConfig::new("course.json"));

        let err = pipeline.extract().await.unwrap_err();
        assert!(matches!(err, CheckError::SerializationError(_)));
    }

    #[tokio::test]
    async fn test_extract_from_http_source() {
        let server = MockServer::start();
        let body: serde_json::Value = serde_json::from_slice(&course_json(6)).unwrap();
        let api_mock = server.mock(|when, then| {
            when.method(GET).path("/courses/42");
            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(body);
        });

        let pipeline = RectalAirPipeline::new(
            MockStorage::new(),
            MockConfig::new(&server.url("/courses/42")),
        );
        let course = pipeline.extract().await.unwrap();

        api_mock.assert();
        assert_eq!(course.total_fractions, 20);
    }

    #[tokio::test]
    async fn test_extract_http_error_status() {
        let server = MockServer::start();
        let api_mock = server.mock(|when, then| {
            when.method(GET).path("/courses/missing");
            then.status(404);
        });

        let pipeline = RectalAirPipeline::new(
            MockStorage::new(),
            MockConfig::new(&server.url("/courses/missing")),
        );
        let err = pipeline.extract().await.unwrap_err();

        api_mock.assert();
        assert!(matches!(err, CheckError::SourceStatusError { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_load_writes_report_and_prediction() {
        let storage = MockStorage::new();
        let pipeline = RectalAirPipeline::new(storage.clone(), MockConfig::new("course.json"));

        let assessment = pipeline.evaluate(sample_course(6, REGULAR)).await.unwrap();
        let output_path = pipeline.load(&assessment).await.unwrap();

        assert_eq!(output_path, "test_output/report.json");
        assert_eq!(
            storage.file_names().await,
            vec!["test_output/prediction.csv", "test_output/report.json"]
        );

        let report: serde_json::Value =
            serde_json::from_slice(&storage.get_file("test_output/report.json").await.unwrap()).unwrap();
        assert_eq!(report["title"], "Physician Review Required");
        assert_eq!(report["requires_intervention"], false);
        assert_eq!(report["advisory"]["kind"], "physician_review");
        assert_eq!(report["summary"]["delivered_fractions"], 5);
        assert_eq!(report["simulation"].as_array().unwrap().len(), 15);

        let csv_text =
            String::from_utf8(storage.get_file("test_output/prediction.csv").await.unwrap()).unwrap();
        let mut lines = csv_text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "fraction_number,air_fractions_substituted,V6000cGy_pct,V6000cGy_limit,V6200cGy_cc,V6200cGy_limit"
        );
        assert_eq!(lines.next().unwrap(), "6,1,0.0000,3,0.0000,2");
        assert_eq!(csv_text.lines().count(), 16);
    }

    #[tokio::test]
    async fn test_load_intervention_skips_prediction() {
        let storage = MockStorage::new();
        let pipeline = RectalAirPipeline::new(storage.clone(), MockConfig::new("course.json"));

        let assessment = pipeline.evaluate(sample_course(4, REGULAR)).await.unwrap();
        assert!(assessment.advisory.requires_intervention());
        pipeline.load(&assessment).await.unwrap();

        assert_eq!(storage.file_names().await, vec!["test_output/report.json"]);
        let report: serde_json::Value =
            serde_json::from_slice(&storage.get_file("test_output/report.json").await.unwrap()).unwrap();
        assert_eq!(report["requires_intervention"], true);
        assert_eq!(report["advisory"]["kind"], "insufficient_fractions");
    }

    #[tokio::test]
    async fn test_load_bundle_zip_contents() {
        let storage = MockStorage::new();
        let mut config = MockConfig::new("course.json");
        config.bundle = Some("bundle.zip".to_string());
        let pipeline = RectalAirPipeline::new(storage.clone(), config);

        let assessment = pipeline.evaluate(sample_course(6, REGULAR)).await.unwrap();
        let output_path = pipeline.load(&assessment).await.unwrap();
        assert_eq!(output_path, "test_output/bundle.zip");

        let zip_bytes = storage.get_file("test_output/bundle.zip").await.unwrap();
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(zip_bytes)).unwrap();
        assert_eq!(archive.len(), 2);

        let mut names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["prediction.csv", "report.json"]);

        let mut content = String::new();
        std::io::Read::read_to_string(&mut archive.by_name("report.json").unwrap(), &mut content)
            .unwrap();
        assert!(content.contains("\"protocol_name\": \"PR66\""));
    }

    #[tokio::test]
    async fn test_load_csv_only() {
        let storage = MockStorage::new();
        let mut config = MockConfig::new("course.json");
        config.output_formats = vec!["csv".to_string()];
        let pipeline = RectalAirPipeline::new(storage.clone(), config);

        let assessment = pipeline.evaluate(sample_course(6, REGULAR)).await.unwrap();
        let output_path = pipeline.load(&assessment).await.unwrap();
        assert_eq!(output_path, "test_output/prediction.csv");
    }
}
