//! Dose-volume prediction for the rectum.
//!
//! The delivered fractions give a mean fraction dose. Scaling it by the total
//! number of fractions gives the projected total dose. Clinical goals are
//! checked on that projection. When they hold, the remaining fractions are
//! replaced one by one with the dose of the fraction that showed rectal air.
//! This shows how many air fractions the rectum can tolerate.

use crate::domain::model::{
    Advisory, Assessment, DoseMetrics, DoseVolumeGoal, FractionStatus, FractionSummary, GoalUnit,
    GoalValue, RoiVolumeDistribution, SimulationPoint, TreatmentCourse,
};
use crate::domain::ports::ConfigProvider;
use crate::utils::error::{CheckError, Result};

pub const DEFAULT_PROTOCOL_NAME: &str = "PR66";
pub const DEFAULT_ROI_NAME: &str = "Rectum";
pub const DEFAULT_MIN_DELIVERED_FRACTIONS: usize = 5;

/// Rectal goals of the PR66 protocol: V6000cGy < 3 % and V6200cGy < 2 cc.
pub fn default_goals() -> Vec<DoseVolumeGoal> {
    vec![
        DoseVolumeGoal {
            label: "V6000cGy".to_string(),
            dose_cgy: 6000.0,
            limit: 3.0,
            unit: GoalUnit::Percent,
        },
        DoseVolumeGoal {
            label: "V6200cGy".to_string(),
            dose_cgy: 6200.0,
            limit: 2.0,
            unit: GoalUnit::Cc,
        },
    ]
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolSettings {
    pub name: String,
    pub roi_name: String,
    pub min_delivered_fractions: usize,
    /// The planning system marks the not-yet-delivered air fraction as `Delivered`.
    pub air_fraction_marked_delivered: bool,
    pub delivered_override: Option<usize>,
    pub goals: Vec<DoseVolumeGoal>,
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            name: DEFAULT_PROTOCOL_NAME.to_string(),
            roi_name: DEFAULT_ROI_NAME.to_string(),
            min_delivered_fractions: DEFAULT_MIN_DELIVERED_FRACTIONS,
            air_fraction_marked_delivered: true,
            delivered_override: None,
            goals: default_goals(),
        }
    }
}

impl ProtocolSettings {
    pub fn from_config<C: ConfigProvider + ?Sized>(config: &C) -> Self {
        Self {
            name: config.protocol_name().to_string(),
            roi_name: config.roi_name().to_string(),
            min_delivered_fractions: config.min_delivered_fractions(),
            air_fraction_marked_delivered: config.air_fraction_marked_delivered(),
            delivered_override: config.delivered_override(),
            goals: config.goals().to_vec(),
        }
    }
}

/// Number of fractions actually delivered.
///
/// The fraction showing air is registered before treatment continues, so it
/// already carries the `Delivered` status and is subtracted here.
pub fn count_delivered(course: &TreatmentCourse, air_fraction_marked_delivered: bool) -> usize {
    let marked = course
        .fractions
        .iter()
        .filter(|f| f.status == FractionStatus::Delivered)
        .count();

    if air_fraction_marked_delivered {
        marked.saturating_sub(1)
    } else {
        marked
    }
}

pub fn summarize(course: &TreatmentCourse, protocol: &ProtocolSettings) -> FractionSummary {
    let counted = count_delivered(course, protocol.air_fraction_marked_delivered);
    let delivered_fractions = match protocol.delivered_override {
        Some(n) => {
            if n != counted {
                tracing::warn!(
                    "Delivered fraction count overridden: {} (counted {})",
                    n,
                    counted
                );
            }
            n
        }
        None => counted,
    };

    FractionSummary {
        patient_name: course.patient.full_name(),
        plan_name: course.plan_name.clone(),
        total_fractions: course.total_fractions,
        delivered_fractions,
    }
}

pub fn find_roi<'a>(course: &'a TreatmentCourse, roi_name: &str) -> Result<&'a RoiVolumeDistribution> {
    course
        .rois
        .iter()
        .find(|r| r.roi_name == roi_name)
        .ok_or_else(|| CheckError::course(format!("no ROI named '{}' in course export", roi_name)))
}

pub fn validate_roi(roi: &RoiVolumeDistribution, voxel_count: usize) -> Result<()> {
    if roi.voxel_indices.len() != roi.relative_volumes.len() {
        return Err(CheckError::course(format!(
            "ROI '{}' has {} voxel indices but {} relative volumes",
            roi.roi_name,
            roi.voxel_indices.len(),
            roi.relative_volumes.len()
        )));
    }

    if let Some(&index) = roi.voxel_indices.iter().find(|&&i| i >= voxel_count) {
        return Err(CheckError::course(format!(
            "ROI '{}' references voxel {} outside a grid of {} voxels",
            roi.roi_name, index, voxel_count
        )));
    }

    Ok(())
}

fn fraction_dose<'a>(course: &'a TreatmentCourse, position: usize) -> Result<&'a [f64]> {
    let fraction = course.fractions.get(position).ok_or_else(|| {
        CheckError::course(format!(
            "fraction at position {} is missing ({} fractions exported)",
            position + 1,
            course.fractions.len()
        ))
    })?;

    let expected = course.dose_grid.nr_voxels.voxel_count()?;
    if fraction.dose.len() != expected {
        return Err(CheckError::DoseGridMismatch {
            context: format!("fraction {}", fraction.number),
            expected,
            found: fraction.dose.len(),
        });
    }

    Ok(&fraction.dose)
}

/// Sum of the first `delivered` fraction doses, in treatment order.
///
/// Every dose array is checked against the grid before the sum is allocated,
/// so the accumulator never exceeds the exported data.
pub fn accumulate(course: &TreatmentCourse, delivered: usize) -> Result<Vec<f64>> {
    let doses = (0..delivered)
        .map(|position| fraction_dose(course, position))
        .collect::<Result<Vec<_>>>()?;

    let Some((first, rest)) = doses.split_first() else {
        return Err(CheckError::ProcessingError {
            message: "no delivered fractions to accumulate".to_string(),
        });
    };

    let mut total = first.to_vec();
    for dose in rest {
        for (acc, d) in total.iter_mut().zip(dose.iter()) {
            *acc += d;
        }
    }

    Ok(total)
}

pub fn mean_fraction_dose(accumulated: &[f64], delivered: usize) -> Result<Vec<f64>> {
    if delivered == 0 {
        return Err(CheckError::ProcessingError {
            message: "cannot average over zero delivered fractions".to_string(),
        });
    }
    let n = delivered as f64;
    Ok(accumulated.iter().map(|d| d / n).collect())
}

pub fn projected_total_dose(mean: &[f64], total_fractions: usize) -> Vec<f64> {
    let n = total_fractions as f64;
    mean.iter().map(|d| d * n).collect()
}

/// Evaluate every goal on `dose`, restricted to the ROI voxels.
pub fn evaluate_goals(
    dose: &[f64],
    roi: &RoiVolumeDistribution,
    voxel_volume_cc: f64,
    goals: &[DoseVolumeGoal],
) -> Result<DoseMetrics> {
    validate_roi(roi, dose.len())?;

    let values = goals
        .iter()
        .map(|goal| {
            let hits = roi
                .voxel_indices
                .iter()
                .zip(&roi.relative_volumes)
                .filter(|&(&index, _)| dose[index] >= goal.dose_cgy);

            let value = match goal.unit {
                GoalUnit::Percent => hits.map(|(_, rv)| rv).sum::<f64>() * 100.0,
                // 絕對體積只計算體素數量，不考慮部分體積
                GoalUnit::Cc => hits.count() as f64 * voxel_volume_cc,
            };

            GoalValue {
                label: goal.label.clone(),
                value,
                unit: goal.unit,
                limit: goal.limit,
                exceeded: value >= goal.limit,
            }
        })
        .collect();

    Ok(DoseMetrics { values })
}

/// Substitute 1..=remaining of the remaining fractions with the air fraction dose.
pub fn simulate_air_fractions(
    mean: &[f64],
    air_dose: &[f64],
    roi: &RoiVolumeDistribution,
    voxel_volume_cc: f64,
    total_fractions: usize,
    delivered: usize,
    goals: &[DoseVolumeGoal],
) -> Result<Vec<SimulationPoint>> {
    if mean.len() != air_dose.len() {
        return Err(CheckError::DoseGridMismatch {
            context: "air fraction".to_string(),
            expected: mean.len(),
            found: air_dose.len(),
        });
    }

    let remaining = total_fractions.saturating_sub(delivered);
    let mut points = Vec::new();

    for air_fractions in 1..=remaining {
        let regular = (total_fractions - air_fractions) as f64;
        let air = air_fractions as f64;
        let future: Vec<f64> = mean
            .iter()
            .zip(air_dose)
            .map(|(m, a)| regular * m + air * a)
            .collect();

        let metrics = evaluate_goals(&future, roi, voxel_volume_cc, goals)?;
        tracing::debug!(
            "Simulated {} air fraction(s): {:?}",
            air_fractions,
            metrics.values.iter().map(|v| v.value).collect::<Vec<_>>()
        );

        points.push(SimulationPoint {
            fraction_number: delivered + air_fractions,
            air_fractions,
            metrics,
        });
    }

    Ok(points)
}

pub fn assess(course: &TreatmentCourse, protocol: &ProtocolSettings) -> Result<Assessment> {
    let summary = summarize(course, protocol);
    let total = summary.total_fractions;
    let delivered = summary.delivered_fractions;

    if total == 0 {
        return Err(CheckError::course("plan has zero treatment fractions"));
    }

    let assessment = |projected: Option<DoseMetrics>,
                      advisory: Advisory,
                      simulation: Vec<SimulationPoint>| Assessment {
        summary: summary.clone(),
        protocol_name: protocol.name.clone(),
        projected,
        advisory,
        simulation,
        generated_at: chrono::Utc::now(),
    };

    if delivered < protocol.min_delivered_fractions {
        tracing::warn!(
            "Only {} delivered fractions, {} required",
            delivered,
            protocol.min_delivered_fractions
        );
        return Ok(assessment(
            None,
            Advisory::InsufficientFractions {
                delivered,
                required: protocol.min_delivered_fractions,
            },
            Vec::new(),
        ));
    }

    if delivered > total {
        return Err(CheckError::course(format!(
            "{} delivered fractions exceed the {} planned",
            delivered, total
        )));
    }

    let roi = find_roi(course, &protocol.roi_name)?;
    let voxel_count = course.dose_grid.nr_voxels.voxel_count()?;
    validate_roi(roi, voxel_count)?;
    let voxel_volume_cc = course.dose_grid.voxel_size.volume_cc();

    let accumulated = accumulate(course, delivered)?;
    let mean = mean_fraction_dose(&accumulated, delivered)?;
    let projected_dose = projected_total_dose(&mean, total);
    let projected = evaluate_goals(&projected_dose, roi, voxel_volume_cc, &protocol.goals)?;

    if projected.any_exceeded() {
        tracing::warn!("Projected total dose exceeds a clinical goal");
        return Ok(assessment(
            Some(projected.clone()),
            Advisory::GoalsExceeded { projected },
            Vec::new(),
        ));
    }

    let simulation = if delivered < total {
        let air_dose = fraction_dose(course, delivered)?;
        simulate_air_fractions(
            &mean,
            air_dose,
            roi,
            voxel_volume_cc,
            total,
            delivered,
            &protocol.goals,
        )?
    } else {
        Vec::new()
    };

    Ok(assessment(
        Some(projected),
        Advisory::PhysicianReview {
            goals: protocol.goals.clone(),
        },
        simulation,
    ))
}
