use crate::domain::model::{Advisory, DoseMetrics, DoseVolumeGoal, GoalUnit};

const INTERVENTION_NOTICE: &str = "Intervention is necessary: the patient must be taken off the treatment table and \
an attempt should be made to remove rectal air before proceeding.";

const CONSULT_NOTICE: &str = "If there are further uncertainties, consult the responsible physician.";

impl Advisory {
    pub fn title(&self) -> &'static str {
        match self {
            Advisory::InsufficientFractions { .. } => "Insufficient Fractions – Intervention Required",
            Advisory::GoalsExceeded { .. } => "Rectal Dose Too High – Intervention Required",
            Advisory::PhysicianReview { .. } => "Physician Review Required",
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Advisory::InsufficientFractions { .. } => "insufficient_fractions",
            Advisory::GoalsExceeded { .. } => "goals_exceeded",
            Advisory::PhysicianReview { .. } => "physician_review",
        }
    }

    pub fn requires_intervention(&self) -> bool {
        !matches!(self, Advisory::PhysicianReview { .. })
    }

    pub fn message(&self) -> String {
        match self {
            Advisory::InsufficientFractions { delivered, required } => format!(
                "Only {} fractions are delivered.\n\n\
                 A minimum of {} delivered fractions is required for a reliable prediction.\n\
                 {}\n\n{}",
                delivered, required, INTERVENTION_NOTICE, CONSULT_NOTICE
            ),
            Advisory::GoalsExceeded { projected } => format!(
                "{}\n\nOne or both clinical goals are exceeded.\n{}\n\n{}",
                predicted_lines(projected),
                INTERVENTION_NOTICE,
                CONSULT_NOTICE
            ),
            Advisory::PhysicianReview { goals } => format!(
                "The predicted rectal dose levels per number of substituted rectal air fractions \
                 are listed below for:\n{}\n\n\
                 These results must be shown to the physician to determine appropriate clinical action.",
                goal_lines(goals)
            ),
        }
    }
}

/// 每個臨床目標一行，例如 `Predicted Rectal V6000cGy = 3.25%`
pub fn predicted_lines(metrics: &DoseMetrics) -> String {
    metrics
        .values
        .iter()
        .map(|v| {
            format!(
                "Predicted Rectal {} = {}",
                v.label,
                format_value(v.value, v.unit)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// `- V6000cGy (%)`
fn goal_lines(goals: &[DoseVolumeGoal]) -> String {
    goals
        .iter()
        .map(|g| format!("- {} ({})", g.label, g.unit.suffix()))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_value(value: f64, unit: GoalUnit) -> String {
    match unit {
        GoalUnit::Percent => format!("{:.2}%", value),
        GoalUnit::Cc => format!("{:.2} cc", value),
    }
}
