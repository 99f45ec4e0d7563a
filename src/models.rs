use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One gradable item within a subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub name: String,
    pub scored: f64,
    pub total: f64,
    pub weight: f64,
    #[serde(default)]
    pub pending: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubjectStatus {
    Excellent,
    OnTrack,
    AtRisk,
    Critical,
}

impl SubjectStatus {
    pub const ALL: [SubjectStatus; 4] = [
        SubjectStatus::Excellent,
        SubjectStatus::OnTrack,
        SubjectStatus::AtRisk,
        SubjectStatus::Critical,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SubjectStatus::Excellent => "excellent",
            SubjectStatus::OnTrack => "on-track",
            SubjectStatus::AtRisk => "at-risk",
            SubjectStatus::Critical => "critical",
        }
    }
}

impl fmt::Display for SubjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubjectStatus {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "excellent" => Ok(SubjectStatus::Excellent),
            "on-track" => Ok(SubjectStatus::OnTrack),
            "at-risk" => Ok(SubjectStatus::AtRisk),
            "critical" => Ok(SubjectStatus::Critical),
            other => bail!("unknown status '{other}'"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "high" => Ok(Priority::High),
            "medium" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            other => bail!("unknown priority '{other}'"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            other => bail!("unknown difficulty '{other}'"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rarity {
    Common,
    Rare,
    Epic,
    Legendary,
}

impl Rarity {
    pub fn as_str(self) -> &'static str {
        match self {
            Rarity::Common => "common",
            Rarity::Rare => "rare",
            Rarity::Epic => "epic",
            Rarity::Legendary => "legendary",
        }
    }
}

impl fmt::Display for Rarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Rarity {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "common" => Ok(Rarity::Common),
            "rare" => Ok(Rarity::Rare),
            "epic" => Ok(Rarity::Epic),
            "legendary" => Ok(Rarity::Legendary),
            other => bail!("unknown rarity '{other}'"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub avatar: String,
    pub level: i32,
    pub points: i32,
    pub compliance: i32,
    pub streak: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserStats {
    pub total_subjects: i64,
    pub total_tasks: i64,
    pub completed_tasks: i64,
    pub badges_earned: i64,
    pub average_compliance: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Subject {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub code: String,
    pub current_marks: f64,
    pub total_marks: f64,
    pub compliance: f64,
    pub status: SubjectStatus,
    pub components: Vec<Component>,
    pub created_at: DateTime<Utc>,
}

impl Subject {
    pub fn pending_components(&self) -> impl Iterator<Item = &Component> {
        self.components.iter().filter(|c| c.pending)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewSubject {
    pub name: String,
    pub code: String,
    pub components: Vec<Component>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub subject: String,
    pub due_date: DateTime<Utc>,
    pub priority: Priority,
    pub urgency: i32,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTask {
    pub title: String,
    pub subject: String,
    pub due_date: DateTime<Utc>,
    pub priority: Priority,
    pub urgency: i32,
}

#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub subject: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub priority: Option<Priority>,
    pub urgency: Option<i32>,
    pub completed: Option<bool>,
}

impl TaskUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.subject.is_none()
            && self.due_date.is_none()
            && self.priority.is_none()
            && self.urgency.is_none()
            && self.completed.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Challenge {
    pub id: String,
    pub title: String,
    pub difficulty: Difficulty,
    pub points: i32,
    pub submissions: i32,
    pub success_rate: f64,
    pub tags: Vec<String>,
    pub description: String,
    pub test_cases: i32,
    pub starter_code: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub test_case: u32,
    pub passed: bool,
    pub expected: String,
    pub actual: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Submission {
    pub id: String,
    pub user_id: String,
    pub challenge_id: String,
    pub code: String,
    pub status: String,
    pub test_results: Vec<TestResult>,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Badge {
    pub id: String,
    pub name: String,
    pub icon: String,
    pub rarity: Rarity,
    pub description: String,
    pub criteria: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimelineEntry {
    pub id: String,
    pub user_id: String,
    pub semester: String,
    pub gpa: f64,
    pub milestone: Option<String>,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub name: String,
    pub points: i32,
    pub solved: i64,
    pub avatar: String,
    pub is_current_user: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TacticalInsight {
    #[serde(rename = "type")]
    pub kind: String,
    pub subject: String,
    pub message: String,
    pub priority: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScreenshotAnalysis {
    #[serde(default)]
    pub subjects: Vec<ExtractedSubject>,
    #[serde(default)]
    pub tactical_moves: Vec<String>,
}

/// A subject as read off a screenshot. Every field is optional because the
/// model's output is only loosely structured.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractedSubject {
    pub name: String,
    pub code: String,
    pub components: Vec<ExtractedComponent>,
    pub overall: Option<f64>,
    pub compliance: Option<f64>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractedComponent {
    pub name: String,
    pub score: Option<f64>,
    pub total: Option<f64>,
    pub percentage: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_text_round_trips() {
        for status in SubjectStatus::ALL {
            assert_eq!(status.as_str().parse::<SubjectStatus>().unwrap(), status);
        }
        assert_eq!(SubjectStatus::OnTrack.to_string(), "on-track");
        assert!("on_track".parse::<SubjectStatus>().is_err());
    }

    #[test]
    fn lowercase_enums_share_their_text_with_serde() {
        assert_eq!(serde_json::to_string(&Priority::Medium).unwrap(), "\"medium\"");
        assert_eq!(serde_json::from_str::<Difficulty>("\"hard\"").unwrap(), Difficulty::Hard);
        assert_eq!("legendary".parse::<Rarity>().unwrap(), Rarity::Legendary);
        assert_eq!(Rarity::Epic.to_string(), "epic");
        assert!("High".parse::<Priority>().is_err());
    }

    #[test]
    fn status_serializes_as_hyphenated_text() {
        let json = serde_json::to_string(&SubjectStatus::AtRisk).unwrap();
        assert_eq!(json, "\"at-risk\"");
    }

    #[test]
    fn component_pending_defaults_to_false() {
        let component: Component =
            serde_json::from_str(r#"{"name":"Quiz 1","scored":18,"total":20,"weight":0.3}"#)
                .unwrap();
        assert!(!component.pending);
        assert_eq!(component.scored, 18.0);
    }

    #[test]
    fn insight_reads_type_field() {
        let insight: TacticalInsight = serde_json::from_str(
            r#"{"type":"compliance-alert","subject":"CS401","message":"Push the final","priority":"high"}"#,
        )
        .unwrap();
        assert_eq!(insight.kind, "compliance-alert");
    }

    #[test]
    fn extracted_subject_tolerates_missing_fields() {
        let analysis: ScreenshotAnalysis =
            serde_json::from_str(r#"{"subjects":[{"name":"Physics"}]}"#).unwrap();
        assert_eq!(analysis.subjects[0].name, "Physics");
        assert!(analysis.subjects[0].components.is_empty());
        assert!(analysis.tactical_moves.is_empty());
    }

    #[test]
    fn empty_task_update_is_detected() {
        assert!(TaskUpdate::default().is_empty());
        let update = TaskUpdate {
            completed: Some(true),
            ..TaskUpdate::default()
        };
        assert!(!update.is_empty());
    }
}
