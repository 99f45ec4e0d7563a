use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::models::{Component, ScreenshotAnalysis, Subject, TacticalInsight, Task, TestResult};
use crate::standing::summarize_results;

const MAX_INSIGHTS: usize = 3;
const MENTOR_FALLBACK: &str = "Great effort! Keep practicing and reviewing test cases.";
const NO_JSON_IN_SCREENSHOT: &str =
    "Unable to parse screenshot. Please ensure the image is clear and contains visible marks.";
const BAD_JSON_IN_SCREENSHOT: &str =
    "Unable to parse screenshot data. Please try again with a clearer image.";

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("LLM API error: status={status}, body={body}")]
    Api { status: u16, body: String },

    #[error("LLM returned invalid response: {0}")]
    InvalidResponse(String),
}

/// Inline image attached to a user message.
pub struct ImageInput<'a> {
    pub bytes: &'a [u8],
    pub mime: &'a str,
}

/// Minimal client for an OpenAI-compatible chat completions endpoint.
#[derive(Clone)]
pub struct ChatClient {
    config: LlmConfig,
    client: Client,
}

impl ChatClient {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    pub async fn complete(
        &self,
        system: &str,
        prompt: &str,
        image: Option<ImageInput<'_>>,
    ) -> Result<String, LlmError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| LlmError::Config("LLM_API_KEY is not set".to_string()))?;

        let user_content = match image {
            Some(image) => json!([
                { "type": "text", "text": prompt },
                {
                    "type": "image_url",
                    "image_url": {
                        "url": format!("data:{};base64,{}", image.mime, STANDARD.encode(image.bytes))
                    }
                }
            ]),
            None => Value::String(prompt.to_string()),
        };

        let payload = json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user_content }
            ]
        });

        debug!(model = %self.config.model, "sending chat completion");
        let res = self
            .client
            .post(self.endpoint())
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(LlmError::Api { status, body });
        }

        let parsed: ChatCompletionResponse = res.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| LlmError::InvalidResponse("no message content in response".to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Prompt orchestration over [`ChatClient`]. Every call degrades to a
/// fallback instead of failing.
pub struct Advisor {
    client: ChatClient,
}

impl Advisor {
    pub fn new(client: ChatClient) -> Self {
        Self { client }
    }

    pub async fn analyze_screenshot(&self, bytes: &[u8], mime: &str) -> ScreenshotAnalysis {
        let reply = self
            .client
            .complete(
                "You are an expert academic advisor reading screenshots of student marks.",
                SCREENSHOT_PROMPT,
                Some(ImageInput { bytes, mime }),
            )
            .await;

        match reply {
            Ok(text) => parse_screenshot_reply(&text),
            Err(err) => {
                warn!(error = %err, "screenshot analysis failed");
                fallback_analysis(format!("Error analyzing screenshot: {err}"))
            }
        }
    }

    pub async fn tactical_insights(&self, subjects: &[Subject], open_tasks: &[Task]) -> Vec<TacticalInsight> {
        let prompt = match insights_prompt(subjects, open_tasks) {
            Ok(prompt) => prompt,
            Err(err) => {
                warn!(error = %err, "could not serialise insight context");
                return Vec::new();
            }
        };

        match self
            .client
            .complete(
                "You are a tactical academic advisor giving students actionable next steps.",
                &prompt,
                None,
            )
            .await
        {
            Ok(text) => parse_insights_reply(&text),
            Err(err) => {
                warn!(error = %err, "tactical insights failed");
                Vec::new()
            }
        }
    }

    pub async fn mentor_feedback(&self, code: &str, results: &[TestResult]) -> String {
        let summary = summarize_results(results);
        let prompt = format!(
            "Review this code submission:\n\nCode:\n```\n{code}\n```\n\n\
             Test results: {}/{} tests passed\n\n\
             Give brief mentor feedback (2-3 sentences) on code quality and \
             optimisation, edge cases worth considering, and good practice. \
             Keep it encouraging and actionable.",
            summary.passed, summary.total
        );

        match self
            .client
            .complete(
                "You are an experienced coding mentor giving constructive feedback.",
                &prompt,
                None,
            )
            .await
        {
            Ok(text) if !text.is_empty() => text,
            Ok(_) => MENTOR_FALLBACK.to_string(),
            Err(err) => {
                warn!(error = %err, "mentor feedback failed");
                MENTOR_FALLBACK.to_string()
            }
        }
    }
}

const SCREENSHOT_PROMPT: &str = r#"Read this screenshot of academic marks and extract:
1. Subject names and codes
2. Assessment components (quizzes, assignments, exams)
3. Scores obtained and total marks
4. The compliance percentage for each subject
5. Tactical opportunities to improve grades

Reply with JSON only, shaped exactly like:
{
  "subjects": [
    {
      "name": "Subject Name",
      "code": "SUBJ001",
      "components": [
        {"name": "Quiz 1", "score": 18, "total": 20, "percentage": 90}
      ],
      "overall": 85,
      "compliance": 85,
      "status": "on-track"
    }
  ],
  "tactical_moves": ["Focus on Assignment 2 to push compliance above 85%"]
}"#;

#[derive(Serialize)]
struct SubjectContext<'a> {
    name: &'a str,
    compliance: f64,
    pending_components: Vec<&'a Component>,
}

fn insights_prompt(subjects: &[Subject], open_tasks: &[Task]) -> Result<String, LlmError> {
    let context: Vec<SubjectContext<'_>> = subjects
        .iter()
        .map(|subject| SubjectContext {
            name: &subject.name,
            compliance: subject.compliance,
            pending_components: subject.pending_components().collect(),
        })
        .collect();

    Ok(format!(
        "Using this student's academic data, give {MAX_INSIGHTS} tactical insights.\n\n\
         Subjects: {}\nTasks: {}\n\n\
         For each insight give:\n\
         1. type: 'tactical-move', 'compliance-alert' or 'achievement'\n\
         2. subject: the subject name\n\
         3. message: a concise, specific action\n\
         4. priority: 'high', 'medium' or 'low'\n\n\
         Reply with a JSON array such as:\n\
         [{{\"type\": \"tactical-move\", \"subject\": \"Subject Name\", \"message\": \"Focus on X to reach Y\", \"priority\": \"high\"}}]",
        serde_json::to_string_pretty(&context)?,
        serde_json::to_string_pretty(open_tasks)?,
    ))
}

/// Slice from the first `open` to the last `close`, inclusive.
fn json_span(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

fn fallback_analysis(message: impl Into<String>) -> ScreenshotAnalysis {
    ScreenshotAnalysis {
        subjects: Vec::new(),
        tactical_moves: vec![message.into()],
    }
}

pub fn parse_screenshot_reply(text: &str) -> ScreenshotAnalysis {
    let Some(span) = json_span(text, '{', '}') else {
        return fallback_analysis(NO_JSON_IN_SCREENSHOT);
    };
    match serde_json::from_str(span) {
        Ok(analysis) => analysis,
        Err(err) => {
            debug!(error = %err, "screenshot reply was not valid JSON");
            fallback_analysis(BAD_JSON_IN_SCREENSHOT)
        }
    }
}

pub fn parse_insights_reply(text: &str) -> Vec<TacticalInsight> {
    let Some(span) = json_span(text, '[', ']') else {
        return Vec::new();
    };
    match serde_json::from_str::<Vec<TacticalInsight>>(span) {
        Ok(mut insights) => {
            insights.truncate(MAX_INSIGHTS);
            insights
        }
        Err(err) => {
            debug!(error = %err, "insight reply was not a valid insight array");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;

    use crate::models::SubjectStatus;

    #[test]
    fn screenshot_reply_is_read_from_surrounding_prose() {
        let reply = r#"Here is what I found:
{"subjects":[{"name":"Advanced Algorithms","code":"CS401","components":[{"name":"Quiz 1","score":18,"total":20,"percentage":90}],"overall":85,"compliance":85,"status":"on-track"}],"tactical_moves":["Finish the project early"]}
Good luck!"#;
        let analysis = parse_screenshot_reply(reply);
        assert_eq!(analysis.subjects.len(), 1);
        assert_eq!(analysis.subjects[0].code, "CS401");
        assert_eq!(analysis.subjects[0].components[0].score, Some(18.0));
        assert_eq!(analysis.tactical_moves, vec!["Finish the project early"]);
    }

    #[test]
    fn screenshot_reply_without_json_falls_back() {
        let analysis = parse_screenshot_reply("I cannot read this image.");
        assert!(analysis.subjects.is_empty());
        assert_eq!(analysis.tactical_moves, vec![NO_JSON_IN_SCREENSHOT]);
    }

    #[test]
    fn screenshot_reply_with_broken_json_falls_back() {
        let analysis = parse_screenshot_reply("{\"subjects\": [ oops }");
        assert!(analysis.subjects.is_empty());
        assert_eq!(analysis.tactical_moves, vec![BAD_JSON_IN_SCREENSHOT]);
    }

    #[test]
    fn insights_are_capped_at_three() {
        let item = r#"{"type":"tactical-move","subject":"Physics","message":"Do the lab","priority":"high"}"#;
        let reply = format!("```json\n[{item},{item},{item},{item}]\n```");
        let insights = parse_insights_reply(&reply);
        assert_eq!(insights.len(), 3);
        assert_eq!(insights[0].subject, "Physics");
    }

    #[test]
    fn malformed_insights_yield_nothing() {
        assert!(parse_insights_reply("no array here").is_empty());
        assert!(parse_insights_reply("] backwards [").is_empty());
        assert!(parse_insights_reply(r#"[{"type":"achievement"}]"#).is_empty());
    }

    #[test]
    fn insights_prompt_lists_only_pending_components() {
        let subject = Subject {
            id: "s1".to_string(),
            user_id: "u1".to_string(),
            name: "Advanced Algorithms".to_string(),
            code: "CS401".to_string(),
            current_marks: 85.71,
            total_marks: 100.0,
            compliance: 85.71,
            status: SubjectStatus::OnTrack,
            components: vec![
                Component {
                    name: "Midterm Exam".to_string(),
                    scored: 42.0,
                    total: 50.0,
                    weight: 0.4,
                    pending: false,
                },
                Component {
                    name: "Final Project".to_string(),
                    scored: 0.0,
                    total: 30.0,
                    weight: 0.3,
                    pending: true,
                },
            ],
            created_at: Utc::now(),
        };
        let prompt = insights_prompt(&[subject], &[]).unwrap();
        assert!(prompt.contains("Final Project"));
        assert!(!prompt.contains("Midterm Exam"));
    }

    #[tokio::test]
    async fn missing_api_key_is_a_config_error() {
        let client = ChatClient::new(LlmConfig {
            api_key: None,
            base_url: "http://127.0.0.1:9".to_string(),
            model: "gpt-4o".to_string(),
            timeout: Duration::from_secs(1),
        })
        .unwrap();
        let err = client.complete("system", "prompt", None).await.unwrap_err();
        assert!(matches!(err, LlmError::Config(_)));

        let feedback = Advisor::new(client).mentor_feedback("pass", &[]).await;
        assert_eq!(feedback, MENTOR_FALLBACK);
    }
}
