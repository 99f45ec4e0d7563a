use std::collections::HashMap;
use std::io::Read;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgExecutor, PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::grade;
use crate::models::{
    Badge, Challenge, Component, NewSubject, NewTask, Subject, Submission, Task, TaskUpdate,
    TestResult, TimelineEntry, User, UserStats,
};
use crate::standing::{self, PointsRow};

pub const DEFAULT_AVATAR: &str = "https://api.dicebear.com/7.x/avataaars/svg?seed=default";

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO tacticalgrade.users (id, name, email, avatar, level, points, compliance, streak)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind("demo-user-001")
    .bind("Alex Chen")
    .bind("alex.chen@university.edu")
    .bind("https://api.dicebear.com/7.x/avataaars/svg?seed=Alex")
    .bind(12)
    .bind(8450)
    .bind(87)
    .bind(23)
    .execute(pool)
    .await?;

    let challenges = vec![
        (
            "challenge-001",
            "Two Sum Problem",
            "easy",
            100,
            1247,
            0.73,
            vec!["arrays", "hash-table"],
            "Given an array of integers nums and an integer target, return indices of the two numbers such that they add up to target.",
            3,
            "def two_sum(nums, target):\n    # Your code here\n    pass",
        ),
        (
            "challenge-002",
            "Binary Tree Traversal",
            "medium",
            250,
            892,
            0.58,
            vec!["trees", "recursion"],
            "Implement inorder, preorder, and postorder traversal of a binary tree.",
            5,
            "class TreeNode:\n    def __init__(self, val=0, left=None, right=None):\n        self.val = val\n        self.left = left\n        self.right = right\n\ndef inorder_traversal(root):\n    # Your code here\n    pass",
        ),
        (
            "challenge-003",
            "Dynamic Programming: Fibonacci",
            "hard",
            500,
            456,
            0.34,
            vec!["dynamic-programming", "optimization"],
            "Implement an efficient solution to calculate the nth Fibonacci number using dynamic programming.",
            8,
            "def fibonacci(n):\n    # Implement efficient DP solution\n    pass",
        ),
    ];

    for (id, title, difficulty, points, submissions, success_rate, tags, description, test_cases, starter) in
        challenges
    {
        sqlx::query(
            r#"
            INSERT INTO tacticalgrade.challenges
            (id, title, difficulty, points, submissions, success_rate, tags, description, test_cases, starter_code)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(title)
        .bind(difficulty)
        .bind(points)
        .bind(submissions)
        .bind(success_rate)
        .bind(tags)
        .bind(description)
        .bind(test_cases)
        .bind(starter)
        .execute(pool)
        .await?;
    }

    let badges = vec![
        (
            "badge-001",
            "First Steps",
            "🎯",
            "common",
            "Complete your first challenge",
            json!({ "challenges_completed": 1 }),
        ),
        (
            "badge-002",
            "Problem Solver",
            "🧠",
            "rare",
            "Solve 10 challenges",
            json!({ "challenges_completed": 10 }),
        ),
        (
            "badge-003",
            "Academic Excellence",
            "🏆",
            "epic",
            "Maintain 90%+ compliance across all subjects",
            json!({ "min_compliance": 90 }),
        ),
    ];

    for (id, name, icon, rarity, description, criteria) in badges {
        sqlx::query(
            r#"
            INSERT INTO tacticalgrade.badges (id, name, icon, rarity, description, criteria)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(icon)
        .bind(rarity)
        .bind(description)
        .bind(Json(criteria))
        .execute(pool)
        .await?;
    }

    info!("seed data in place");
    Ok(())
}

fn user_from_row(row: &PgRow) -> User {
    User {
        id: row.get("id"),
        name: row.get("name"),
        email: row.get("email"),
        avatar: row.get("avatar"),
        level: row.get("level"),
        points: row.get("points"),
        compliance: row.get("compliance"),
        streak: row.get("streak"),
        created_at: row.get("created_at"),
    }
}

pub async fn fetch_user(pool: &PgPool, user_id: &str) -> anyhow::Result<Option<User>> {
    let row = sqlx::query("SELECT * FROM tacticalgrade.users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(user_from_row))
}

/// Returns the user, creating a fresh profile when none exists yet.
pub async fn ensure_user(
    pool: &PgPool,
    user_id: &str,
    name: &str,
    email: &str,
) -> anyhow::Result<User> {
    if let Some(user) = fetch_user(pool, user_id).await? {
        return Ok(user);
    }

    let row = sqlx::query(
        r#"
        INSERT INTO tacticalgrade.users (id, name, email, avatar)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(name)
    .bind(email)
    .bind(DEFAULT_AVATAR)
    .fetch_one(pool)
    .await
    .with_context(|| format!("failed to create user {user_id}"))?;

    info!(user_id, "created user profile");
    Ok(user_from_row(&row))
}

fn subject_from_row(row: &PgRow) -> anyhow::Result<Subject> {
    let status: String = row.get("status");
    let components: Json<Vec<Component>> = row.get("components");
    Ok(Subject {
        id: row.get("id"),
        user_id: row.get("user_id"),
        name: row.get("name"),
        code: row.get("code"),
        current_marks: row.get("current_marks"),
        total_marks: row.get("total_marks"),
        compliance: row.get("compliance"),
        status: status.parse()?,
        components: components.0,
        created_at: row.get("created_at"),
    })
}

pub async fn insert_subject<'e, E>(executor: E, subject: &Subject) -> anyhow::Result<()>
where
    E: PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO tacticalgrade.subjects
        (id, user_id, name, code, current_marks, total_marks, compliance, status, components, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(&subject.id)
    .bind(&subject.user_id)
    .bind(&subject.name)
    .bind(&subject.code)
    .bind(subject.current_marks)
    .bind(subject.total_marks)
    .bind(subject.compliance)
    .bind(subject.status.as_str())
    .bind(Json(&subject.components))
    .bind(subject.created_at)
    .execute(executor)
    .await?;

    debug!(subject_id = %subject.id, status = %subject.status, "stored subject");
    Ok(())
}

pub async fn fetch_subjects(pool: &PgPool, user_id: &str) -> anyhow::Result<Vec<Subject>> {
    let rows = sqlx::query(
        "SELECT * FROM tacticalgrade.subjects WHERE user_id = $1 ORDER BY created_at LIMIT 100",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(subject_from_row).collect()
}

pub async fn fetch_subject(pool: &PgPool, subject_id: &str) -> anyhow::Result<Option<Subject>> {
    let row = sqlx::query("SELECT * FROM tacticalgrade.subjects WHERE id = $1")
        .bind(subject_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(subject_from_row).transpose()
}

fn task_from_row(row: &PgRow) -> anyhow::Result<Task> {
    let priority: String = row.get("priority");
    Ok(Task {
        id: row.get("id"),
        user_id: row.get("user_id"),
        title: row.get("title"),
        subject: row.get("subject"),
        due_date: row.get("due_date"),
        priority: priority.parse()?,
        urgency: row.get("urgency"),
        completed: row.get("completed"),
        created_at: row.get("created_at"),
    })
}

pub async fn insert_task(pool: &PgPool, user_id: &str, task: NewTask) -> anyhow::Result<Task> {
    let row = sqlx::query(
        r#"
        INSERT INTO tacticalgrade.tasks (id, user_id, title, subject, due_date, priority, urgency)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(user_id)
    .bind(&task.title)
    .bind(&task.subject)
    .bind(task.due_date)
    .bind(task.priority.as_str())
    .bind(task.urgency)
    .fetch_one(pool)
    .await?;

    task_from_row(&row)
}

pub async fn fetch_tasks(pool: &PgPool, user_id: &str, only_open: bool) -> anyhow::Result<Vec<Task>> {
    let mut query = String::from("SELECT * FROM tacticalgrade.tasks WHERE user_id = $1");
    if only_open {
        query.push_str(" AND completed = FALSE");
    }
    query.push_str(" ORDER BY due_date LIMIT 100");

    let rows = sqlx::query(&query).bind(user_id).fetch_all(pool).await?;
    rows.iter().map(task_from_row).collect()
}

/// Applies only the fields present in `update`.
pub async fn update_task(pool: &PgPool, task_id: &str, update: &TaskUpdate) -> anyhow::Result<Task> {
    let row = sqlx::query(
        r#"
        UPDATE tacticalgrade.tasks SET
            title = COALESCE($2, title),
            subject = COALESCE($3, subject),
            due_date = COALESCE($4, due_date),
            priority = COALESCE($5, priority),
            urgency = COALESCE($6, urgency),
            completed = COALESCE($7, completed)
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(task_id)
    .bind(update.title.as_deref())
    .bind(update.subject.as_deref())
    .bind(update.due_date)
    .bind(update.priority.map(|p| p.as_str()))
    .bind(update.urgency)
    .bind(update.completed)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => task_from_row(&row),
        None => anyhow::bail!("task {task_id} not found"),
    }
}

/// Flips completion and returns the new state.
pub async fn toggle_task(pool: &PgPool, task_id: &str) -> anyhow::Result<bool> {
    let completed: Option<bool> = sqlx::query(
        "UPDATE tacticalgrade.tasks SET completed = NOT completed WHERE id = $1 RETURNING completed",
    )
    .bind(task_id)
    .fetch_optional(pool)
    .await?
    .map(|row| row.get("completed"));

    completed.with_context(|| format!("task {task_id} not found"))
}

pub async fn delete_task(pool: &PgPool, task_id: &str) -> anyhow::Result<()> {
    let result = sqlx::query("DELETE FROM tacticalgrade.tasks WHERE id = $1")
        .bind(task_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        anyhow::bail!("task {task_id} not found");
    }
    Ok(())
}

fn challenge_from_row(row: &PgRow) -> anyhow::Result<Challenge> {
    let difficulty: String = row.get("difficulty");
    Ok(Challenge {
        id: row.get("id"),
        title: row.get("title"),
        difficulty: difficulty.parse()?,
        points: row.get("points"),
        submissions: row.get("submissions"),
        success_rate: row.get("success_rate"),
        tags: row.get("tags"),
        description: row.get("description"),
        test_cases: row.get("test_cases"),
        starter_code: row.get("starter_code"),
        created_at: row.get("created_at"),
    })
}

pub async fn fetch_challenges(pool: &PgPool) -> anyhow::Result<Vec<Challenge>> {
    let rows = sqlx::query("SELECT * FROM tacticalgrade.challenges ORDER BY id LIMIT 100")
        .fetch_all(pool)
        .await?;
    rows.iter().map(challenge_from_row).collect()
}

pub async fn fetch_challenge(pool: &PgPool, challenge_id: &str) -> anyhow::Result<Option<Challenge>> {
    let row = sqlx::query("SELECT * FROM tacticalgrade.challenges WHERE id = $1")
        .bind(challenge_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(challenge_from_row).transpose()
}

pub async fn insert_submission(pool: &PgPool, submission: &Submission) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO tacticalgrade.submissions
        (id, user_id, challenge_id, code, status, test_results, submitted_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(&submission.id)
    .bind(&submission.user_id)
    .bind(&submission.challenge_id)
    .bind(&submission.code)
    .bind(&submission.status)
    .bind(Json(&submission.test_results))
    .bind(submission.submitted_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn fetch_submissions(pool: &PgPool, user_id: &str) -> anyhow::Result<Vec<Submission>> {
    let rows = sqlx::query(
        "SELECT * FROM tacticalgrade.submissions WHERE user_id = $1 ORDER BY submitted_at DESC LIMIT 100",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    let mut submissions = Vec::new();
    for row in rows {
        let test_results: Json<Vec<TestResult>> = row.get("test_results");
        submissions.push(Submission {
            id: row.get("id"),
            user_id: row.get("user_id"),
            challenge_id: row.get("challenge_id"),
            code: row.get("code"),
            status: row.get("status"),
            test_results: test_results.0,
            submitted_at: row.get("submitted_at"),
        });
    }
    Ok(submissions)
}

fn badge_from_row(row: &PgRow) -> anyhow::Result<Badge> {
    let rarity: String = row.get("rarity");
    let criteria: Json<serde_json::Value> = row.get("criteria");
    Ok(Badge {
        id: row.get("id"),
        name: row.get("name"),
        icon: row.get("icon"),
        rarity: rarity.parse()?,
        description: row.get("description"),
        criteria: criteria.0,
    })
}

pub async fn fetch_badges(pool: &PgPool) -> anyhow::Result<Vec<Badge>> {
    let rows = sqlx::query("SELECT * FROM tacticalgrade.badges ORDER BY id LIMIT 100")
        .fetch_all(pool)
        .await?;
    rows.iter().map(badge_from_row).collect()
}

pub async fn fetch_user_badges(pool: &PgPool, user_id: &str) -> anyhow::Result<Vec<Badge>> {
    let rows = sqlx::query(
        r#"
        SELECT b.* FROM tacticalgrade.badges b
        WHERE b.id IN (
            SELECT ub.badge_id FROM tacticalgrade.user_badges ub
            WHERE ub.user_id = $1 AND ub.earned
        )
        ORDER BY b.id
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(badge_from_row).collect()
}

pub async fn fetch_points_rows(pool: &PgPool, limit: i64) -> anyhow::Result<Vec<PointsRow>> {
    let rows = sqlx::query(
        r#"
        SELECT u.id, u.name, u.points, u.avatar,
               (SELECT COUNT(*) FROM tacticalgrade.submissions s
                WHERE s.user_id = u.id AND s.status = 'passed') AS solved
        FROM tacticalgrade.users u
        ORDER BY u.points DESC, u.id
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| PointsRow {
            user_id: row.get("id"),
            name: row.get("name"),
            points: row.get("points"),
            solved: row.get("solved"),
            avatar: row.get("avatar"),
        })
        .collect())
}

pub async fn fetch_timeline(pool: &PgPool, user_id: &str) -> anyhow::Result<Vec<TimelineEntry>> {
    let rows = sqlx::query(
        "SELECT * FROM tacticalgrade.timeline_entries WHERE user_id = $1 ORDER BY date DESC LIMIT 100",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| TimelineEntry {
            id: row.get("id"),
            user_id: row.get("user_id"),
            semester: row.get("semester"),
            gpa: row.get("gpa"),
            milestone: row.get("milestone"),
            date: row.get("date"),
        })
        .collect())
}

pub async fn insert_timeline_entry(
    pool: &PgPool,
    user_id: &str,
    semester: &str,
    gpa: f64,
    milestone: Option<&str>,
    date: DateTime<Utc>,
) -> anyhow::Result<TimelineEntry> {
    let entry = TimelineEntry {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        semester: semester.to_string(),
        gpa,
        milestone: milestone.map(str::to_string),
        date,
    };

    sqlx::query(
        r#"
        INSERT INTO tacticalgrade.timeline_entries (id, user_id, semester, gpa, milestone, date)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(&entry.id)
    .bind(&entry.user_id)
    .bind(&entry.semester)
    .bind(entry.gpa)
    .bind(entry.milestone.as_deref())
    .bind(entry.date)
    .execute(pool)
    .await?;

    Ok(entry)
}

pub async fn fetch_stats(pool: &PgPool, user_id: &str) -> anyhow::Result<UserStats> {
    let row = sqlx::query(
        r#"
        SELECT
            (SELECT COUNT(*) FROM tacticalgrade.subjects WHERE user_id = $1) AS total_subjects,
            (SELECT COUNT(*) FROM tacticalgrade.tasks WHERE user_id = $1) AS total_tasks,
            (SELECT COUNT(*) FROM tacticalgrade.tasks WHERE user_id = $1 AND completed) AS completed_tasks,
            (SELECT COUNT(*) FROM tacticalgrade.user_badges WHERE user_id = $1 AND earned) AS badges_earned
        "#,
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    let compliances: Vec<f64> = sqlx::query(
        "SELECT compliance FROM tacticalgrade.subjects WHERE user_id = $1 LIMIT 100",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?
    .iter()
    .map(|row| row.get("compliance"))
    .collect();

    Ok(UserStats {
        total_subjects: row.get("total_subjects"),
        total_tasks: row.get("total_tasks"),
        completed_tasks: row.get("completed_tasks"),
        badges_earned: row.get("badges_earned"),
        average_compliance: standing::average_compliance(&compliances),
    })
}

#[derive(Debug, serde::Deserialize)]
struct ComponentCsvRow {
    subject_name: String,
    code: String,
    component: String,
    scored: f64,
    total: f64,
    weight: f64,
    #[serde(default)]
    pending: Option<bool>,
}

/// Groups component rows into subjects by `code`, keeping first-seen order.
pub fn read_subject_rows<R: Read>(reader: R) -> anyhow::Result<Vec<NewSubject>> {
    let mut reader = csv::Reader::from_reader(reader);
    let mut subjects: Vec<NewSubject> = Vec::new();
    let mut index_by_code: HashMap<String, usize> = HashMap::new();

    for (line, result) in reader.deserialize::<ComponentCsvRow>().enumerate() {
        let row = result.with_context(|| format!("invalid component row {}", line + 1))?;
        let position = *index_by_code.entry(row.code.clone()).or_insert_with(|| {
            subjects.push(NewSubject {
                name: row.subject_name.clone(),
                code: row.code.clone(),
                components: Vec::new(),
            });
            subjects.len() - 1
        });

        subjects[position].components.push(Component {
            name: row.component,
            scored: row.scored,
            total: row.total,
            weight: row.weight,
            pending: row.pending.unwrap_or(false),
        });
    }

    Ok(subjects)
}

/// Grades every imported subject up front so a bad row stops the import
/// before anything is written.
pub fn grade_subjects(user_id: &str, inputs: Vec<NewSubject>) -> anyhow::Result<Vec<Subject>> {
    inputs
        .into_iter()
        .map(|input| {
            let code = input.code.clone();
            grade::new_subject(user_id, input)
                .with_context(|| format!("subject {code} could not be graded"))
        })
        .collect()
}

pub async fn import_csv(pool: &PgPool, user_id: &str, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    let file = std::fs::File::open(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let subjects = grade_subjects(user_id, read_subject_rows(file)?)?;

    let mut tx = pool.begin().await?;
    for subject in &subjects {
        insert_subject(&mut *tx, subject).await?;
    }
    tx.commit().await?;

    info!(count = subjects.len(), "imported subjects");
    Ok(subjects.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_rows_by_code_in_first_seen_order() {
        let data = "\
subject_name,code,component,scored,total,weight,pending
Advanced Algorithms,CS401,Assignment 1,18,20,0.3,false
Linear Algebra,MA210,Quiz 1,9,10,0.2,
Advanced Algorithms,CS401,Final Project,0,30,0.3,true
";
        let subjects = read_subject_rows(data.as_bytes()).unwrap();
        assert_eq!(subjects.len(), 2);
        assert_eq!(subjects[0].code, "CS401");
        assert_eq!(subjects[0].components.len(), 2);
        assert!(subjects[0].components[1].pending);
        assert_eq!(subjects[1].name, "Linear Algebra");
        assert!(!subjects[1].components[0].pending);
    }

    #[test]
    fn rejects_non_numeric_scores() {
        let data = "\
subject_name,code,component,scored,total,weight,pending
Physics,PH100,Lab,abc,20,0.5,false
";
        assert!(read_subject_rows(data.as_bytes()).is_err());
    }

    #[test]
    fn one_ungradable_subject_fails_the_whole_import() {
        let data = "\
subject_name,code,component,scored,total,weight,pending
Advanced Algorithms,CS401,Assignment 1,18,20,0.3,false
Linear Algebra,MA210,Quiz 1,9,10,0.2,false
Organic Chemistry,CH220,Lab,5,0,0.5,false
";
        let rows = read_subject_rows(data.as_bytes()).unwrap();
        assert_eq!(rows.len(), 3);
        let err = grade_subjects("student-1", rows).unwrap_err();
        assert!(format!("{err:#}").contains("CH220"));
    }

    #[test]
    fn gradable_import_keeps_row_order() {
        let data = "\
subject_name,code,component,scored,total,weight,pending
Advanced Algorithms,CS401,Assignment 1,18,20,0.3,false
Linear Algebra,MA210,Quiz 1,9,10,0.2,false
";
        let subjects = grade_subjects("student-1", read_subject_rows(data.as_bytes()).unwrap()).unwrap();
        assert_eq!(subjects.len(), 2);
        assert_eq!(subjects[0].code, "CS401");
        assert_eq!(subjects[1].user_id, "student-1");
        assert_eq!(subjects[1].current_marks, 90.0);
    }
}
