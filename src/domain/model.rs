use crate::utils::error::{CheckError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientName {
    pub first_name: String,
    pub last_name: String,
}

impl PatientName {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Fraction status as reported by the planning system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FractionStatus {
    Delivered,
    Planned,
    Other(String),
}

impl From<String> for FractionStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "Delivered" => FractionStatus::Delivered,
            "Planned" => FractionStatus::Planned,
            _ => FractionStatus::Other(value),
        }
    }
}

impl From<FractionStatus> for String {
    fn from(value: FractionStatus) -> Self {
        value.to_string()
    }
}

impl fmt::Display for FractionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FractionStatus::Delivered => f.write_str("Delivered"),
            FractionStatus::Planned => f.write_str("Planned"),
            FractionStatus::Other(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridSize {
    pub x: usize,
    pub y: usize,
    pub z: usize,
}

impl GridSize {
    pub fn voxel_count(&self) -> Result<usize> {
        self.x
            .checked_mul(self.y)
            .and_then(|xy| xy.checked_mul(self.z))
            .ok_or_else(|| {
                CheckError::course(format!(
                    "dose grid {}x{}x{} is too large",
                    self.x, self.y, self.z
                ))
            })
    }
}

/// Voxel dimensions in cm.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoxelSize {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl VoxelSize {
    /// 1 cm³ == 1 cc
    pub fn volume_cc(&self) -> f64 {
        self.x * self.y * self.z
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoseGrid {
    pub nr_voxels: GridSize,
    pub voxel_size: VoxelSize,
}

/// Estimated dose of one fraction on the planning examination, in cGy.
///
/// `dose` is flattened z-major: `index = z * ny * nx + y * nx + x`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FractionDose {
    pub number: u32,
    pub status: FractionStatus,
    pub dose: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoiVolumeDistribution {
    pub roi_name: String,
    pub voxel_indices: Vec<usize>,
    pub relative_volumes: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreatmentCourse {
    pub patient: PatientName,
    pub plan_name: String,
    pub total_fractions: usize,
    pub dose_grid: DoseGrid,
    pub rois: Vec<RoiVolumeDistribution>,
    pub fractions: Vec<FractionDose>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FractionSummary {
    pub patient_name: String,
    pub plan_name: String,
    pub total_fractions: usize,
    pub delivered_fractions: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoalUnit {
    /// Relative volume of the ROI, in %.
    Percent,
    /// Absolute volume, in cc.
    Cc,
}

impl GoalUnit {
    pub fn suffix(&self) -> &'static str {
        match self {
            GoalUnit::Percent => "%",
            GoalUnit::Cc => "cc",
        }
    }
}

/// Dose-volume clinical goal: V(dose_cgy) must stay below `limit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoseVolumeGoal {
    pub label: String,
    pub dose_cgy: f64,
    pub limit: f64,
    pub unit: GoalUnit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalValue {
    pub label: String,
    pub value: f64,
    pub unit: GoalUnit,
    pub limit: f64,
    pub exceeded: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DoseMetrics {
    pub values: Vec<GoalValue>,
}

impl DoseMetrics {
    pub fn any_exceeded(&self) -> bool {
        self.values.iter().any(|v| v.exceeded)
    }

    pub fn get(&self, label: &str) -> Option<&GoalValue> {
        self.values.iter().find(|v| v.label == label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationPoint {
    /// Treatment fraction number this point ends at.
    pub fraction_number: usize,
    /// Number of remaining fractions assumed to look like the air fraction.
    pub air_fractions: usize,
    pub metrics: DoseMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Advisory {
    InsufficientFractions { delivered: usize, required: usize },
    GoalsExceeded { projected: DoseMetrics },
    /// `goals` are the goals listed in the simulation table.
    PhysicianReview { goals: Vec<DoseVolumeGoal> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    pub summary: FractionSummary,
    pub protocol_name: String,
    pub projected: Option<DoseMetrics>,
    pub advisory: Advisory,
    pub simulation: Vec<SimulationPoint>,
    pub generated_at: DateTime<Utc>,
}
