use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

mod config;
mod db;
mod grade;
mod llm;
mod logging;
mod models;
mod report;
mod standing;

use config::Config;
use grade::{GradeError, ScoreOverrides};
use llm::{Advisor, ChatClient};
use models::{Component, NewSubject, NewTask, Priority, Submission, TaskUpdate, TestResult};

#[derive(Parser)]
#[command(name = "tacticalgrade")]
#[command(about = "Academic standing tracker with grade simulation and tactical advice", long_about = None)]
struct Cli {
    /// Student the command acts for
    #[arg(long, global = true, env = "TACTICALGRADE_USER")]
    user: Option<String>,
    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load the demo student, challenges and badges
    Seed,
    /// Student profile and statistics
    #[command(subcommand)]
    User(UserCommand),
    /// Graded subjects
    #[command(subcommand)]
    Subject(SubjectCommand),
    /// Import subjects from a CSV of component rows
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Study tasks
    #[command(subcommand)]
    Task(TaskCommand),
    /// Coding challenges
    #[command(subcommand)]
    Challenge(ChallengeCommand),
    /// List the student's challenge submissions
    Submissions,
    /// Badges
    #[command(subcommand)]
    Badge(BadgeCommand),
    /// Points leaderboard
    Leaderboard {
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    /// Semester timeline
    #[command(subcommand)]
    Timeline(TimelineCommand),
    /// Ask the LLM for tactical insights on current standing
    Insights,
    /// Extract marks from a screenshot
    Analyze {
        #[arg(long)]
        image: PathBuf,
    },
    /// Generate a markdown standing report
    Report {
        #[arg(long, default_value_t = 14)]
        within_days: i64,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

#[derive(Subcommand)]
enum UserCommand {
    /// Show the profile, creating it when --name and --email are given
    Show {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },
    Stats,
}

#[derive(Subcommand)]
enum SubjectCommand {
    /// Grade and store a new subject
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        code: String,
        /// JSON file holding an array of components
        #[arg(long)]
        components: Option<PathBuf>,
        /// name:scored:total:weight[:pending], repeatable
        #[arg(long = "component", value_parser = parse_component_spec)]
        component: Vec<Component>,
    },
    List,
    /// What-if grade with hypothetical scores; nothing is stored
    Simulate {
        id: String,
        /// component=score, repeatable
        #[arg(long = "score", value_parser = parse_score_override)]
        scores: Vec<(String, f64)>,
    },
}

#[derive(Subcommand)]
enum TaskCommand {
    Add {
        #[arg(long)]
        title: String,
        #[arg(long)]
        subject: String,
        /// RFC 3339 timestamp or YYYY-MM-DD
        #[arg(long, value_parser = parse_due_date)]
        due: DateTime<Utc>,
        #[arg(long)]
        priority: Priority,
        #[arg(long, default_value_t = 50)]
        urgency: i32,
    },
    List {
        /// Hide completed tasks
        #[arg(long)]
        open: bool,
    },
    Update {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        subject: Option<String>,
        #[arg(long, value_parser = parse_due_date)]
        due: Option<DateTime<Utc>>,
        #[arg(long)]
        priority: Option<Priority>,
        #[arg(long)]
        urgency: Option<i32>,
        #[arg(long)]
        completed: Option<bool>,
    },
    Toggle {
        id: String,
    },
    Delete {
        id: String,
    },
}

#[derive(Subcommand)]
enum ChallengeCommand {
    List,
    Show {
        id: String,
    },
    /// Record a solution and get mentor feedback
    Submit {
        id: String,
        #[arg(long)]
        code: PathBuf,
    },
}

#[derive(Subcommand)]
enum BadgeCommand {
    List,
    Earned,
}

#[derive(Subcommand)]
enum TimelineCommand {
    List,
    Add {
        #[arg(long)]
        semester: String,
        #[arg(long)]
        gpa: f64,
        #[arg(long)]
        milestone: Option<String>,
        #[arg(long, value_parser = parse_due_date)]
        date: Option<DateTime<Utc>>,
    },
}

#[derive(Serialize)]
struct SubmissionOutcome {
    submission_id: String,
    status: String,
    passed_tests: usize,
    total_tests: usize,
    test_results: Vec<TestResult>,
    mentor_feedback: String,
}

fn parse_component_spec(raw: &str) -> Result<Component, String> {
    let parts: Vec<&str> = raw.split(':').collect();
    if !(4..=5).contains(&parts.len()) {
        return Err(format!(
            "expected name:scored:total:weight[:pending], got '{raw}'"
        ));
    }
    let number = |field: &str, value: &str| {
        value
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("{field} '{value}' is not a number"))
    };
    let pending = match parts.get(4) {
        Some(flag) => flag
            .trim()
            .parse::<bool>()
            .map_err(|_| format!("pending '{flag}' must be true or false"))?,
        None => false,
    };

    Ok(Component {
        name: parts[0].trim().to_string(),
        scored: number("scored", parts[1])?,
        total: number("total", parts[2])?,
        weight: number("weight", parts[3])?,
        pending,
    })
}

fn parse_score_override(raw: &str) -> Result<(String, f64), String> {
    let (name, value) = raw
        .rsplit_once('=')
        .ok_or_else(|| format!("expected component=score, got '{raw}'"))?;
    let score = value
        .trim()
        .parse::<f64>()
        .map_err(|_| format!("score '{value}' is not a number"))?;
    Ok((name.to_string(), score))
}

fn parse_due_date(raw: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(raw) {
        return Ok(timestamp.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(23, 59, 59))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| format!("'{raw}' is neither RFC 3339 nor YYYY-MM-DD"))
}

fn emit<T: Serialize>(json: bool, value: &T, text: impl FnOnce(&T)) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        text(value);
    }
    Ok(())
}

async fn connect(config: &Config) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(config.database_url()?)
        .await
        .context("failed to connect to Postgres")
}

fn acting_user(user: Option<&str>) -> anyhow::Result<&str> {
    user.filter(|u| !u.trim().is_empty())
        .context("--user or TACTICALGRADE_USER is required for this command")
}

async fn analyze(config: &Config, image: &Path, json: bool) -> anyhow::Result<()> {
    let bytes =
        std::fs::read(image).with_context(|| format!("failed to read {}", image.display()))?;
    let mime = mime_guess::from_path(image).first_or_octet_stream();
    if mime.type_() != mime_guess::mime::IMAGE {
        anyhow::bail!("{} is not an image ({mime})", image.display());
    }

    let advisor = Advisor::new(ChatClient::new(config.llm.clone())?);
    let analysis = advisor.analyze_screenshot(&bytes, mime.essence_str()).await;
    emit(json, &analysis, |analysis| {
        for subject in &analysis.subjects {
            println!(
                "- {} ({}) compliance {} status {}",
                subject.name,
                subject.code,
                subject
                    .compliance
                    .map_or_else(|| "?".to_string(), |c| format!("{c:.2}%")),
                subject.status.as_deref().unwrap_or("?")
            );
            for component in &subject.components {
                println!(
                    "    {}: {}/{}",
                    component.name,
                    component.score.map_or_else(|| "?".to_string(), |s| s.to_string()),
                    component.total.map_or_else(|| "?".to_string(), |t| t.to_string())
                );
            }
        }
        println!("Tactical moves:");
        for step in &analysis.tactical_moves {
            println!("- {step}");
        }
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level);
    let config = Config::from_env()?;
    let json = cli.json;
    let user = cli.user.as_deref();

    if let Commands::Analyze { image } = &cli.command {
        return analyze(&config, image, json).await;
    }

    let pool = connect(&config).await?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::User(UserCommand::Show { name, email }) => {
            let user_id = acting_user(user)?;
            let profile = match db::fetch_user(&pool, user_id).await? {
                Some(profile) => profile,
                None => {
                    let (Some(name), Some(email)) = (name, email) else {
                        anyhow::bail!(
                            "user {user_id} does not exist; pass --name and --email to create it"
                        );
                    };
                    db::ensure_user(&pool, user_id, &name, &email).await?
                }
            };
            emit(json, &profile, |p| {
                println!(
                    "{} <{}> level {}, {} points, {}% compliance, {}-day streak",
                    p.name, p.email, p.level, p.points, p.compliance, p.streak
                );
            })?;
        }
        Commands::User(UserCommand::Stats) => {
            let stats = db::fetch_stats(&pool, acting_user(user)?).await?;
            emit(json, &stats, |s| {
                println!("Subjects: {}", s.total_subjects);
                println!("Tasks: {} ({} completed)", s.total_tasks, s.completed_tasks);
                println!("Badges earned: {}", s.badges_earned);
                println!("Average compliance: {:.2}%", s.average_compliance);
            })?;
        }
        Commands::Subject(SubjectCommand::Add {
            name,
            code,
            components,
            component,
        }) => {
            let user_id = acting_user(user)?;
            let mut all = match components {
                Some(path) => {
                    let raw = std::fs::read_to_string(&path)
                        .with_context(|| format!("failed to read {}", path.display()))?;
                    serde_json::from_str::<Vec<Component>>(&raw)
                        .with_context(|| format!("{} is not a component array", path.display()))?
                }
                None => Vec::new(),
            };
            all.extend(component);

            let subject = grade::new_subject(
                user_id,
                NewSubject {
                    name,
                    code,
                    components: all,
                },
            )?;
            db::insert_subject(&pool, &subject).await?;
            info!(subject_id = %subject.id, "subject created");
            emit(json, &subject, |s| {
                println!(
                    "Created {} ({}) id {}: {:.2}% compliance, {}",
                    s.name, s.code, s.id, s.compliance, s.status
                );
            })?;
        }
        Commands::Subject(SubjectCommand::List) => {
            let subjects = db::fetch_subjects(&pool, acting_user(user)?).await?;
            emit(json, &subjects, |subjects| {
                if subjects.is_empty() {
                    println!("No subjects recorded.");
                }
                for s in subjects {
                    println!(
                        "- {} ({}) {:.2}% {} [{} components, {} pending] id {}",
                        s.name,
                        s.code,
                        s.compliance,
                        s.status,
                        s.components.len(),
                        s.pending_components().count(),
                        s.id
                    );
                }
            })?;
        }
        Commands::Subject(SubjectCommand::Simulate { id, scores }) => {
            let subject = db::fetch_subject(&pool, &id)
                .await?
                .ok_or_else(|| GradeError::SubjectNotFound { id: id.clone() })?;
            let overrides: ScoreOverrides = scores.into_iter().collect();
            let simulation = grade::simulate_grade(&subject.components, &overrides)?;
            emit(json, &simulation, |s| {
                println!(
                    "Predicted grade for {}: {:.2}% ({})",
                    subject.name, s.predicted_grade, s.status
                );
            })?;
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(&pool, acting_user(user)?, &csv).await?;
            println!("Inserted {inserted} subjects from {}.", csv.display());
        }
        Commands::Task(TaskCommand::Add {
            title,
            subject,
            due,
            priority,
            urgency,
        }) => {
            let task = db::insert_task(
                &pool,
                acting_user(user)?,
                NewTask {
                    title,
                    subject,
                    due_date: due,
                    priority,
                    urgency,
                },
            )
            .await?;
            emit(json, &task, |t| println!("Created task {} ({})", t.title, t.id))?;
        }
        Commands::Task(TaskCommand::List { open }) => {
            let tasks = db::fetch_tasks(&pool, acting_user(user)?, open).await?;
            emit(json, &tasks, |tasks| {
                if tasks.is_empty() {
                    println!("No tasks found.");
                }
                for t in tasks {
                    println!(
                        "- [{}] {} {} ({}, {} priority, urgency {}) id {}",
                        if t.completed { "x" } else { " " },
                        t.due_date.format("%Y-%m-%d"),
                        t.title,
                        t.subject,
                        t.priority,
                        t.urgency,
                        t.id
                    );
                }
            })?;
        }
        Commands::Task(TaskCommand::Update {
            id,
            title,
            subject,
            due,
            priority,
            urgency,
            completed,
        }) => {
            let update = TaskUpdate {
                title,
                subject,
                due_date: due,
                priority,
                urgency,
                completed,
            };
            if update.is_empty() {
                anyhow::bail!("nothing to update for task {id}");
            }
            let task = db::update_task(&pool, &id, &update).await?;
            emit(json, &task, |t| println!("Updated task {} ({})", t.title, t.id))?;
        }
        Commands::Task(TaskCommand::Toggle { id }) => {
            let completed = db::toggle_task(&pool, &id).await?;
            emit(
                json,
                &serde_json::json!({ "success": true, "completed": completed }),
                |_| println!("Task {id} is now {}.", if completed { "complete" } else { "open" }),
            )?;
        }
        Commands::Task(TaskCommand::Delete { id }) => {
            db::delete_task(&pool, &id).await?;
            println!("Deleted task {id}.");
        }
        Commands::Challenge(ChallengeCommand::List) => {
            let challenges = db::fetch_challenges(&pool).await?;
            emit(json, &challenges, |challenges| {
                for c in challenges {
                    println!(
                        "- {} {} ({}, {} points, {:.0}% success) [{}]",
                        c.id,
                        c.title,
                        c.difficulty,
                        c.points,
                        c.success_rate * 100.0,
                        c.tags.join(", ")
                    );
                }
            })?;
        }
        Commands::Challenge(ChallengeCommand::Show { id }) => {
            let challenge = db::fetch_challenge(&pool, &id)
                .await?
                .with_context(|| format!("challenge {id} not found"))?;
            emit(json, &challenge, |c| {
                println!("{} ({}, {} points)", c.title, c.difficulty, c.points);
                println!("{}", c.description);
                println!("Test cases: {}", c.test_cases);
                if let Some(starter) = &c.starter_code {
                    println!("\n{starter}");
                }
            })?;
        }
        Commands::Challenge(ChallengeCommand::Submit { id, code }) => {
            let user_id = acting_user(user)?;
            let challenge = db::fetch_challenge(&pool, &id)
                .await?
                .with_context(|| format!("challenge {id} not found"))?;
            let source = std::fs::read_to_string(&code)
                .with_context(|| format!("failed to read {}", code.display()))?;

            let test_results = standing::mock_test_results();
            let summary = standing::summarize_results(&test_results);
            let submission = Submission {
                id: Uuid::new_v4().to_string(),
                user_id: user_id.to_string(),
                challenge_id: challenge.id.clone(),
                code: source,
                status: summary.status().to_string(),
                test_results,
                submitted_at: Utc::now(),
            };
            db::insert_submission(&pool, &submission).await?;

            let advisor = Advisor::new(ChatClient::new(config.llm.clone())?);
            let mentor_feedback = advisor
                .mentor_feedback(&submission.code, &submission.test_results)
                .await;
            let outcome = SubmissionOutcome {
                submission_id: submission.id,
                status: submission.status,
                passed_tests: summary.passed,
                total_tests: summary.total,
                test_results: submission.test_results,
                mentor_feedback,
            };
            emit(json, &outcome, |o| {
                println!(
                    "{}: {} ({}/{} tests passed)",
                    challenge.title, o.status, o.passed_tests, o.total_tests
                );
                println!("\n{}", o.mentor_feedback);
            })?;
        }
        Commands::Submissions => {
            let submissions = db::fetch_submissions(&pool, acting_user(user)?).await?;
            emit(json, &submissions, |submissions| {
                for s in submissions {
                    let summary = standing::summarize_results(&s.test_results);
                    println!(
                        "- {} {} {} ({}/{})",
                        s.submitted_at.format("%Y-%m-%d %H:%M"),
                        s.challenge_id,
                        s.status,
                        summary.passed,
                        summary.total
                    );
                }
            })?;
        }
        Commands::Badge(command) => {
            let badges = match command {
                BadgeCommand::List => db::fetch_badges(&pool).await?,
                BadgeCommand::Earned => db::fetch_user_badges(&pool, acting_user(user)?).await?,
            };
            emit(json, &badges, |badges| {
                if badges.is_empty() {
                    println!("No badges.");
                }
                for b in badges {
                    println!("- {} {} ({}): {}", b.icon, b.name, b.rarity, b.description);
                }
            })?;
        }
        Commands::Leaderboard { limit } => {
            let current = user.unwrap_or_default();
            let rows = db::fetch_points_rows(&pool, limit.clamp(1, 50)).await?;
            let board = standing::rank_leaderboard(rows, current);
            emit(json, &board, |board| {
                for entry in board {
                    println!(
                        "{:>3}. {}{} {} points, {} solved",
                        entry.rank,
                        entry.name,
                        if entry.is_current_user { " (you)" } else { "" },
                        entry.points,
                        entry.solved
                    );
                }
            })?;
        }
        Commands::Timeline(TimelineCommand::List) => {
            let timeline = db::fetch_timeline(&pool, acting_user(user)?).await?;
            emit(json, &timeline, |timeline| {
                for entry in timeline {
                    println!(
                        "- {} {} GPA {:.2}{}",
                        entry.date.format("%Y-%m-%d"),
                        entry.semester,
                        entry.gpa,
                        entry
                            .milestone
                            .as_deref()
                            .map(|m| format!(": {m}"))
                            .unwrap_or_default()
                    );
                }
            })?;
        }
        Commands::Timeline(TimelineCommand::Add {
            semester,
            gpa,
            milestone,
            date,
        }) => {
            let entry = db::insert_timeline_entry(
                &pool,
                acting_user(user)?,
                &semester,
                gpa,
                milestone.as_deref(),
                date.unwrap_or_else(Utc::now),
            )
            .await?;
            emit(json, &entry, |e| println!("Added {} to the timeline ({}).", e.semester, e.id))?;
        }
        Commands::Insights => {
            let user_id = acting_user(user)?;
            let subjects = db::fetch_subjects(&pool, user_id).await?;
            let open_tasks = db::fetch_tasks(&pool, user_id, true).await?;
            let advisor = Advisor::new(ChatClient::new(config.llm.clone())?);
            let insights = advisor.tactical_insights(&subjects, &open_tasks).await;
            emit(json, &insights, |insights| {
                if insights.is_empty() {
                    println!("No insights available right now.");
                }
                for i in insights {
                    println!("- [{}] {} ({}): {}", i.priority, i.subject, i.kind, i.message);
                }
            })?;
        }
        Commands::Report { within_days, out } => {
            let user_id = acting_user(user)?;
            let subjects = db::fetch_subjects(&pool, user_id).await?;
            let tasks = db::fetch_tasks(&pool, user_id, true).await?;
            let horizon = report::due_horizon(within_days)?;
            let report = report::build_report(user_id, &subjects, &tasks, within_days, horizon);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        // Screenshot analysis runs without a database and returned above.
        Commands::Analyze { .. } => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn component_spec_parses_with_optional_pending() {
        let graded = parse_component_spec("Midterm Exam:42:50:0.4").unwrap();
        assert_eq!(graded.name, "Midterm Exam");
        assert_eq!(graded.scored, 42.0);
        assert_eq!(graded.total, 50.0);
        assert_eq!(graded.weight, 0.4);
        assert!(!graded.pending);

        let pending = parse_component_spec("Final Project:0:30:0.3:true").unwrap();
        assert!(pending.pending);
    }

    #[test]
    fn component_spec_rejects_bad_input() {
        assert!(parse_component_spec("Quiz:10:20").is_err());
        assert!(parse_component_spec("Quiz:ten:20:0.5").is_err());
        assert!(parse_component_spec("Quiz:10:20:0.5:maybe").is_err());
    }

    #[test]
    fn score_override_splits_on_last_equals() {
        assert_eq!(
            parse_score_override("Quiz=20").unwrap(),
            ("Quiz".to_string(), 20.0)
        );
        assert_eq!(
            parse_score_override("a=b=7.5").unwrap(),
            ("a=b".to_string(), 7.5)
        );
        assert!(parse_score_override("Quiz").is_err());
        assert!(parse_score_override("Quiz=high").is_err());
    }

    #[test]
    fn due_date_accepts_rfc3339_and_plain_dates() {
        let stamped = parse_due_date("2026-03-01T09:30:00+02:00").unwrap();
        assert_eq!(stamped.hour(), 7);

        let plain = parse_due_date("2026-03-01").unwrap();
        assert_eq!((plain.year(), plain.month(), plain.day()), (2026, 3, 1));
        assert_eq!(plain.hour(), 23);

        assert!(parse_due_date("next tuesday").is_err());
    }

    #[test]
    fn acting_user_must_be_present() {
        assert_eq!(acting_user(Some("student-7")).unwrap(), "student-7");
        assert!(acting_user(Some("  ")).is_err());
        assert!(acting_user(None).is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn simulate_collects_repeated_scores() {
        let cli = Cli::try_parse_from([
            "tacticalgrade",
            "subject",
            "simulate",
            "subject-1",
            "--score",
            "Quiz=20",
            "--score",
            "Exam=45",
        ])
        .unwrap();
        match cli.command {
            Commands::Subject(SubjectCommand::Simulate { id, scores }) => {
                assert_eq!(id, "subject-1");
                assert_eq!(scores.len(), 2);
            }
            _ => panic!("parsed the wrong command"),
        }
    }
}
