use std::fmt::Write;

use anyhow::Context;
use chrono::{DateTime, TimeDelta, Utc};

use crate::models::{Subject, SubjectStatus, Task};
use crate::standing;

#[derive(Debug, Clone, PartialEq)]
pub struct StatusCount {
    pub status: SubjectStatus,
    pub count: usize,
}

pub fn summarize_by_status(subjects: &[Subject]) -> Vec<StatusCount> {
    SubjectStatus::ALL
        .iter()
        .map(|&status| StatusCount {
            status,
            count: subjects.iter().filter(|s| s.status == status).count(),
        })
        .collect()
}

pub fn due_horizon(within_days: i64) -> anyhow::Result<DateTime<Utc>> {
    TimeDelta::try_days(within_days.max(1))
        .and_then(|window| Utc::now().checked_add_signed(window))
        .with_context(|| format!("a {within_days} day window is out of range"))
}

pub fn build_report(
    student: &str,
    subjects: &[Subject],
    tasks: &[Task],
    within_days: i64,
    horizon: DateTime<Utc>,
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Academic Standing Report");
    let _ = writeln!(
        output,
        "Generated for {} (tasks due within {} days, before {})",
        student,
        within_days.max(1),
        horizon.format("%Y-%m-%d")
    );
    let compliances: Vec<f64> = subjects.iter().map(|s| s.compliance).collect();
    let _ = writeln!(
        output,
        "Average compliance: {:.2}%",
        standing::average_compliance(&compliances)
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Status Mix");

    if subjects.is_empty() {
        let _ = writeln!(output, "No subjects recorded yet.");
    } else {
        for summary in summarize_by_status(subjects) {
            let _ = writeln!(output, "- {}: {} subjects", summary.status, summary.count);
        }
    }

    let mut standings: Vec<&Subject> = subjects.iter().collect();
    standings.sort_by(|a, b| a.compliance.total_cmp(&b.compliance));
    let _ = writeln!(output);
    let _ = writeln!(output, "## Subject Standings");

    if standings.is_empty() {
        let _ = writeln!(output, "No subjects recorded yet.");
    } else {
        for subject in standings {
            let pending: Vec<&str> = subject
                .pending_components()
                .map(|c| c.name.as_str())
                .collect();
            let _ = write!(
                output,
                "- {} ({}): {:.2}% {}",
                subject.name, subject.code, subject.compliance, subject.status
            );
            if pending.is_empty() {
                let _ = writeln!(output);
            } else {
                let _ = writeln!(output, ", pending: {}", pending.join(", "));
            }
        }
    }

    let mut upcoming: Vec<&Task> = tasks
        .iter()
        .filter(|t| !t.completed && t.due_date <= horizon)
        .collect();
    upcoming.sort_by_key(|t| t.due_date);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Upcoming Tasks");

    if upcoming.is_empty() {
        let _ = writeln!(output, "No open tasks due in this window.");
    } else {
        for task in upcoming.iter().take(10) {
            let _ = writeln!(
                output,
                "- {} [{}] {} ({} priority, urgency {})",
                task.due_date.format("%Y-%m-%d"),
                task.subject,
                task.title,
                task.priority,
                task.urgency
            );
        }
    }

    output
}
