use crate::grade::round_2dp;
use crate::models::{LeaderboardEntry, TestResult};

/// Leaderboard row as read from the store, already ordered by points.
#[derive(Debug, Clone)]
pub struct PointsRow {
    pub user_id: String,
    pub name: String,
    pub points: i32,
    pub solved: i64,
    pub avatar: String,
}

pub fn average_compliance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    round_2dp(values.iter().sum::<f64>() / values.len() as f64)
}

pub fn rank_leaderboard(rows: Vec<PointsRow>, current_user: &str) -> Vec<LeaderboardEntry> {
    rows.into_iter()
        .enumerate()
        .map(|(index, row)| LeaderboardEntry {
            rank: index + 1,
            is_current_user: row.user_id == current_user,
            name: row.name,
            points: row.points,
            solved: row.solved,
            avatar: row.avatar,
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultSummary {
    pub passed: usize,
    pub total: usize,
}

impl ResultSummary {
    pub fn status(&self) -> &'static str {
        if self.total > 0 && self.passed == self.total {
            "passed"
        } else {
            "failed"
        }
    }
}

pub fn summarize_results(results: &[TestResult]) -> ResultSummary {
    ResultSummary {
        passed: results.iter().filter(|r| r.passed).count(),
        total: results.len(),
    }
}

/// Submissions are not executed; these fixed results stand in for a runner.
pub fn mock_test_results() -> Vec<TestResult> {
    let case = |test_case: u32, passed: bool, actual: &str| TestResult {
        test_case,
        passed,
        expected: format!("output{test_case}"),
        actual: actual.to_string(),
    };
    vec![
        case(1, true, "output1"),
        case(2, true, "output2"),
        case(3, false, "wrong_output"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(user_id: &str, points: i32) -> PointsRow {
        PointsRow {
            user_id: user_id.to_string(),
            name: format!("Student {user_id}"),
            points,
            solved: 2,
            avatar: String::new(),
        }
    }

    #[test]
    fn average_is_rounded_and_zero_when_empty() {
        assert_eq!(average_compliance(&[]), 0.0);
        assert_eq!(average_compliance(&[90.0, 80.0, 85.0]), 85.0);
        assert_eq!(average_compliance(&[100.0, 66.666666]), 83.33);
    }

    #[test]
    fn ranks_follow_input_order_and_flag_current_user() {
        let ranked = rank_leaderboard(
            vec![row("a", 9000), row("demo", 8450), row("c", 100)],
            "demo",
        );
        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[1].rank, 2);
        assert!(ranked[1].is_current_user);
        assert!(!ranked[0].is_current_user);
        assert_eq!(ranked[2].points, 100);
    }

    #[test]
    fn mock_results_fail_the_submission() {
        let summary = summarize_results(&mock_test_results());
        assert_eq!(summary, ResultSummary { passed: 2, total: 3 });
        assert_eq!(summary.status(), "failed");
    }

    #[test]
    fn all_passing_results_pass() {
        let results: Vec<TestResult> = mock_test_results()
            .into_iter()
            .map(|r| TestResult { passed: true, ..r })
            .collect();
        assert_eq!(summarize_results(&results).status(), "passed");
        assert_eq!(summarize_results(&[]).status(), "failed");
    }
}
