use std::collections::HashMap;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Component, NewSubject, Subject, SubjectStatus};

/// Hypothetical scores keyed by exact component name.
pub type ScoreOverrides = HashMap<String, f64>;

#[derive(Debug, Error, PartialEq)]
pub enum GradeError {
    #[error("invalid component '{name}': {reason}")]
    InvalidComponent { name: String, reason: String },

    #[error("subject {id} not found")]
    SubjectNotFound { id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GradeOutcome {
    pub current_marks: f64,
    pub compliance: f64,
    pub status: SubjectStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Simulation {
    pub predicted_grade: f64,
    pub compliance: f64,
    pub status: SubjectStatus,
}

/// Weighted percentage over graded components. Pending components are
/// skipped and the result is left unrounded.
pub fn compute_subject_grade(components: &[Component]) -> Result<GradeOutcome, GradeError> {
    for component in components {
        validate(component)?;
    }

    let mut totals = WeightedTotals::default();
    for component in components.iter().filter(|c| !c.pending) {
        totals.add(component, component.scored)?;
    }

    let grade = totals.percentage()?;

    Ok(GradeOutcome {
        current_marks: grade,
        compliance: grade,
        status: classify_status(grade),
    })
}

/// Builds a subject for `user_id` with its grade fields taken verbatim from
/// [`compute_subject_grade`].
pub fn new_subject(user_id: &str, input: NewSubject) -> Result<Subject, GradeError> {
    let outcome = compute_subject_grade(&input.components)?;
    Ok(Subject {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        name: input.name,
        code: input.code,
        current_marks: outcome.current_marks,
        total_marks: 100.0,
        compliance: outcome.compliance,
        status: outcome.status,
        components: input.components,
        created_at: Utc::now(),
    })
}

pub fn classify_status(percentage: f64) -> SubjectStatus {
    if percentage >= 90.0 {
        SubjectStatus::Excellent
    } else if percentage >= 85.0 {
        SubjectStatus::OnTrack
    } else if percentage >= 75.0 {
        SubjectStatus::AtRisk
    } else {
        SubjectStatus::Critical
    }
}

/// What-if grade over every component, pending or not. A component uses its
/// override when one is keyed by its exact name and its stored score
/// otherwise; override keys matching nothing are ignored.
pub fn simulate_grade(
    components: &[Component],
    overrides: &ScoreOverrides,
) -> Result<Simulation, GradeError> {
    let mut totals = WeightedTotals::default();

    for component in components {
        validate(component)?;
        let score = match overrides.get(&component.name) {
            Some(&value) if !value.is_finite() => {
                return Err(invalid(component, "override score is not a finite number"));
            }
            Some(&value) => value,
            None => component.scored,
        };
        totals.add(component, score)?;
    }

    // Status comes from the unrounded grade; only the reported figures are rounded.
    let grade = totals.percentage()?;
    let predicted = round_2dp(grade);

    Ok(Simulation {
        predicted_grade: predicted,
        compliance: predicted,
        status: classify_status(grade),
    })
}

/// Two-decimal rounding with exact halves going to the even neighbour.
pub fn round_2dp(value: f64) -> f64 {
    (value * 100.0).round_ties_even() / 100.0
}

#[derive(Default)]
struct WeightedTotals<'a> {
    weighted_sum: f64,
    weight_total: f64,
    last: Option<&'a Component>,
}

impl<'a> WeightedTotals<'a> {
    fn add(&mut self, component: &'a Component, score: f64) -> Result<(), GradeError> {
        self.weighted_sum += (score / component.total) * component.weight;
        self.weight_total += component.weight;
        self.last = Some(component);
        if !self.weighted_sum.is_finite() || !self.weight_total.is_finite() {
            return Err(invalid(component, "weighted total overflows"));
        }
        Ok(())
    }

    fn percentage(&self) -> Result<f64, GradeError> {
        if self.weight_total <= 0.0 {
            return Ok(0.0);
        }
        let grade = self.weighted_sum / self.weight_total * 100.0;
        match self.last {
            Some(component) if !grade.is_finite() => {
                Err(invalid(component, "grade is not a finite number"))
            }
            _ => Ok(grade),
        }
    }
}

fn validate(component: &Component) -> Result<(), GradeError> {
    if !component.total.is_finite() || component.total <= 0.0 {
        return Err(invalid(component, "total must be greater than zero"));
    }
    if !component.weight.is_finite() || component.weight < 0.0 {
        return Err(invalid(component, "weight must not be negative"));
    }
    if !component.scored.is_finite() {
        return Err(invalid(component, "scored is not a finite number"));
    }
    Ok(())
}

fn invalid(component: &Component, reason: &str) -> GradeError {
    GradeError::InvalidComponent {
        name: component.name.clone(),
        reason: reason.to_string(),
    }
}
