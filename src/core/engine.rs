use crate::core::{Assessment, FractionSummary, Pipeline};
use crate::utils::error::{CheckError, ErrorSeverity, Result};
use crate::utils::monitor::SystemMonitor;

/// Exit status when intervention is advised and `--strict` is set.
pub const EXIT_INTERVENTION: i32 = 4;

#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub assessment: Assessment,
    pub output_path: String,
}

pub struct CheckEngine<P: Pipeline> {
    pipeline: P,
    monitor: SystemMonitor,
}

impl<P: Pipeline> CheckEngine<P> {
    pub fn new(pipeline: P) -> Self {
        Self::new_with_monitoring(pipeline, false)
    }

    pub fn new_with_monitoring(pipeline: P, monitor_enabled: bool) -> Self {
        Self {
            pipeline,
            monitor: SystemMonitor::new(monitor_enabled),
        }
    }

    /// 只讀取課程並回傳分次資訊，不做劑量評估
    pub async fn summary(&self) -> Result<FractionSummary> {
        let course = self.pipeline.extract().await?;
        Ok(self.pipeline.summarize(&course))
    }

    pub async fn run(&self) -> Result<CheckOutcome> {
        tracing::info!("Starting rectal air check");
        self.monitor.log_stats("Start");

        let course = self.pipeline.extract().await?;
        let summary = self.pipeline.summarize(&course);
        tracing::info!(
            "Loaded course for {}: {}/{} fractions delivered",
            summary.patient_name,
            summary.delivered_fractions,
            summary.total_fractions
        );
        self.monitor.log_stats("Extract");

        let assessment = self.pipeline.evaluate(course).await?;
        tracing::info!(
            advisory = assessment.advisory.kind(),
            "Advisory: {} ({} simulation points)",
            assessment.advisory.title(),
            assessment.simulation.len()
        );
        self.monitor.log_stats("Evaluate");

        let output_path = self.pipeline.load(&assessment).await?;
        tracing::info!("Output saved to: {}", output_path);
        self.monitor.log_stats("Load");
        self.monitor.log_final_stats();

        Ok(CheckOutcome {
            assessment,
            output_path,
        })
    }
}

/// 依錯誤嚴重程度決定退出碼
pub fn error_exit_code(error: &CheckError) -> i32 {
    match error.severity() {
        ErrorSeverity::Low => 0,
        ErrorSeverity::Medium => 2,
        ErrorSeverity::High => 1,
        ErrorSeverity::Critical => 3,
    }
}

pub fn exit_code(outcome: &Result<CheckOutcome>, strict: bool) -> i32 {
    match outcome {
        Ok(outcome) if strict && outcome.assessment.advisory.requires_intervention() => {
            EXIT_INTERVENTION
        }
        Ok(_) => 0,
        Err(e) => error_exit_code(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dose::tests::{sample_course, REGULAR};
    use crate::core::dose::{self, ProtocolSettings};
    use crate::core::TreatmentCourse;
    use crate::domain::model::Advisory;
    use crate::utils::error::CheckError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticPipeline {
        course: TreatmentCourse,
        loads: AtomicUsize,
        fail_extract: bool,
    }

    impl StaticPipeline {
        fn new(course: TreatmentCourse) -> Self {
            Self {
                course,
                loads: AtomicUsize::new(0),
                fail_extract: false,
            }
        }
    }

    #[async_trait::async_trait]
    impl Pipeline for StaticPipeline {
        async fn extract(&self) -> Result<TreatmentCourse> {
            if self.fail_extract {
                return Err(CheckError::course("export unavailable"));
            }
            Ok(self.course.clone())
        }

        async fn evaluate(&self, course: TreatmentCourse) -> Result<Assessment> {
            dose::assess(&course, &ProtocolSettings::default())
        }

        async fn load(&self, _assessment: &Assessment) -> Result<String> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok("memory://report".to_string())
        }

        fn summarize(&self, course: &TreatmentCourse) -> FractionSummary {
            dose::summarize(course, &ProtocolSettings::default())
        }
    }

    #[tokio::test]
    async fn test_run_executes_all_phases() {
        let engine = CheckEngine::new(StaticPipeline::new(sample_course(6, REGULAR)));
        let outcome = engine.run().await.unwrap();

        assert_eq!(outcome.output_path, "memory://report");
        assert!(matches!(
            outcome.assessment.advisory,
            Advisory::PhysicianReview { .. }
        ));
        assert_eq!(engine.pipeline.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_summary_skips_evaluation() {
        let engine = CheckEngine::new(StaticPipeline::new(sample_course(6, REGULAR)));
        let summary = engine.summary().await.unwrap();

        assert_eq!(summary.total_fractions, 20);
        assert_eq!(summary.delivered_fractions, 5);
        assert_eq!(engine.pipeline.loads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_extract_failure_stops_run() {
        let mut pipeline = StaticPipeline::new(sample_course(6, REGULAR));
        pipeline.fail_extract = true;
        let engine = CheckEngine::new_with_monitoring(pipeline, false);

        let result = tokio_test::block_on(engine.run());
        assert!(result.is_err());
        assert_eq!(engine.pipeline.loads.load(Ordering::SeqCst), 0);
    }

    fn outcome_for(marked_delivered: usize) -> Result<CheckOutcome> {
        let course = sample_course(marked_delivered, REGULAR);
        Ok(CheckOutcome {
            assessment: dose::assess(&course, &ProtocolSettings::default())?,
            output_path: "memory://report".to_string(),
        })
    }

    #[test]
    fn test_exit_code_for_advisories() {
        // 4 marked delivered -> 3 delivered -> intervention
        let intervention = outcome_for(4);
        assert_eq!(exit_code(&intervention, true), EXIT_INTERVENTION);
        assert_eq!(exit_code(&intervention, false), 0);

        let review = outcome_for(6);
        assert_eq!(exit_code(&review, true), 0);
        assert_eq!(exit_code(&review, false), 0);
    }

    #[test]
    fn test_exit_code_follows_error_severity() {
        let network: Result<CheckOutcome> = Err(CheckError::SourceStatusError {
            location: "http://gateway.local/course".to_string(),
            status: 503,
        });
        assert_eq!(exit_code(&network, false), 2);

        let input: Result<CheckOutcome> = Err(CheckError::course("no ROI named 'Rectum'"));
        assert_eq!(exit_code(&input, true), 1);

        let io: Result<CheckOutcome> = Err(CheckError::IoError(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "read-only output directory",
        )));
        assert_eq!(exit_code(&io, false), 3);
    }
}
