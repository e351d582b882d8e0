use httpmock::prelude::*;
use rectal_air_check::{Advisory, CheckEngine, CliConfig, LocalStorage, RectalAirPipeline};
use std::path::Path;
use tempfile::TempDir;

const REGULAR: [f64; 6] = [290.0, 280.0, 250.0, 200.0, 100.0, 50.0];
const AIR: [f64; 6] = [320.0, 300.0, 250.0, 200.0, 100.0, 50.0];

/// 20-fraction course, 6 fractions delivered plus the air fraction (marked Delivered).
fn course_export() -> serde_json::Value {
    let fractions: Vec<serde_json::Value> = (1..=20)
        .map(|n| {
            let (status, dose) = match n {
                1..=6 => ("Delivered", REGULAR),
                7 => ("Delivered", AIR),
                _ => ("Planned", REGULAR),
            };
            serde_json::json!({ "number": n, "status": status, "dose": dose })
        })
        .collect();

    serde_json::json!({
        "patient": { "first_name": "Piet", "last_name": "de Vries" },
        "plan_name": "PR66 Prostate",
        "total_fractions": 20,
        "dose_grid": {
            "nr_voxels": { "x": 3, "y": 2, "z": 1 },
            "voxel_size": { "x": 0.5, "y": 0.5, "z": 0.5 }
        },
        "rois": [
            { "roi_name": "Rectum", "voxel_indices": [0, 1, 2, 3], "relative_volumes": [0.25, 0.25, 0.25, 0.25] },
            { "roi_name": "Bladder", "voxel_indices": [4, 5], "relative_volumes": [0.5, 0.5] }
        ],
        "fractions": fractions
    })
}

fn write_course(dir: &Path) -> String {
    let path = dir.join("course.json");
    std::fs::write(&path, serde_json::to_vec(&course_export()).unwrap()).unwrap();
    path.to_str().unwrap().to_string()
}

#[tokio::test]
async fn test_end_to_end_physician_review() {
    let temp_dir = TempDir::new().unwrap();
    let course_path = write_course(temp_dir.path());
    let output_path = temp_dir.path().join("out");

    let mut config = CliConfig::for_course(course_path);
    config.output_path = Some(output_path.to_str().unwrap().to_string());

    let pipeline = RectalAirPipeline::new(LocalStorage::default(), config);
    let engine = CheckEngine::new_with_monitoring(pipeline, false);
    let outcome = engine.run().await.unwrap();

    assert!(matches!(
        outcome.assessment.advisory,
        Advisory::PhysicianReview { .. }
    ));
    assert_eq!(outcome.assessment.summary.patient_name, "Piet de Vries");
    assert_eq!(outcome.assessment.summary.delivered_fractions, 6);
    assert!(outcome.output_path.ends_with("report.json"));

    let simulation = &outcome.assessment.simulation;
    assert_eq!(simulation.len(), 14);
    assert_eq!(simulation[0].fraction_number, 7);
    // voxel 0 reaches 6000 cGy from the 7th substituted air fraction on
    assert_eq!(simulation[5].metrics.values[0].value, 0.0);
    assert_eq!(simulation[6].metrics.values[0].value, 25.0);
    assert_eq!(simulation[12].metrics.values[1].value, 0.0);
    assert_eq!(simulation[13].metrics.values[1].value, 0.125);

    assert!(output_path.join("report.json").exists());
    let csv_text = std::fs::read_to_string(output_path.join("prediction.csv")).unwrap();
    assert_eq!(csv_text.lines().count(), 15);
    assert!(csv_text.lines().last().unwrap().starts_with("20,14,25.0000,3,0.1250,2"));
}

#[tokio::test]
async fn test_end_to_end_insufficient_fractions() {
    let temp_dir = TempDir::new().unwrap();
    let course_path = write_course(temp_dir.path());
    let output_path = temp_dir.path().join("out");

    let mut config = CliConfig::for_course(course_path);
    config.output_path = Some(output_path.to_str().unwrap().to_string());
    config.delivered_override = Some(3);

    let engine = CheckEngine::new(RectalAirPipeline::new(LocalStorage::default(), config));
    let outcome = engine.run().await.unwrap();

    assert_eq!(
        outcome.assessment.advisory,
        Advisory::InsufficientFractions {
            delivered: 3,
            required: 5
        }
    );
    assert!(outcome.assessment.advisory.requires_intervention());
    assert!(output_path.join("report.json").exists());
    assert!(!output_path.join("prediction.csv").exists());
}

#[tokio::test]
async fn test_end_to_end_http_source_with_bundle() {
    let temp_dir = TempDir::new().unwrap();
    let output_path = temp_dir.path().to_str().unwrap().to_string();

    let server = MockServer::start();
    let api_mock = server.mock(|when, then| {
        when.method(GET).path("/export/course/77");
        then.status(200)
            .header("Content-Type", "application/json")
            .json_body(course_export());
    });

    let mut config = CliConfig::for_course(server.url("/export/course/77"));
    config.output_path = Some(output_path.clone());
    config.bundle = true;

    let engine = CheckEngine::new(RectalAirPipeline::new(LocalStorage::default(), config));
    let outcome = engine.run().await.unwrap();

    api_mock.assert();
    assert!(outcome.output_path.ends_with("rectal_air_report.zip"));

    let zip_data = std::fs::read(Path::new(&output_path).join("rectal_air_report.zip")).unwrap();
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(zip_data)).unwrap();
    let mut file_names: Vec<String> = (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect();
    file_names.sort();
    assert_eq!(file_names, vec!["prediction.csv", "report.json"]);

    let mut report = String::new();
    std::io::Read::read_to_string(&mut archive.by_name("report.json").unwrap(), &mut report).unwrap();
    let report: serde_json::Value = serde_json::from_str(&report).unwrap();
    assert_eq!(report["summary"]["plan_name"], "PR66 Prostate");
    assert_eq!(report["advisory"]["kind"], "physician_review");
}

#[tokio::test]
async fn test_end_to_end_with_source_failure() {
    let temp_dir = TempDir::new().unwrap();

    let server = MockServer::start();
    let api_mock = server.mock(|when, then| {
        when.method(GET).path("/export/broken");
        then.status(500);
    });

    let mut config = CliConfig::for_course(server.url("/export/broken"));
    config.output_path = Some(temp_dir.path().to_str().unwrap().to_string());

    let engine = CheckEngine::new(RectalAirPipeline::new(LocalStorage::default(), config));
    let err = engine.run().await.unwrap_err();

    api_mock.assert();
    assert_eq!(err.severity(), rectal_air_check::utils::error::ErrorSeverity::Medium);
    assert!(std::fs::read_dir(temp_dir.path()).unwrap().next().is_none());
}

#[tokio::test]
async fn test_dry_run_summary() {
    let temp_dir = TempDir::new().unwrap();
    let course_path = write_course(temp_dir.path());

    let mut config = CliConfig::for_course(course_path);
    config.no_air_fraction_correction = true;

    let engine = CheckEngine::new(RectalAirPipeline::new(LocalStorage::default(), config));
    let summary = engine.summary().await.unwrap();

    assert_eq!(summary.plan_name, "PR66 Prostate");
    assert_eq!(summary.total_fractions, 20);
    assert_eq!(summary.delivered_fractions, 7);
}
