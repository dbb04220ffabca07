use crate::config::Config;
use crate::models::{AnswerValue, ArchiveItem, Brief, Card, NewCard, Pack, Question, ReviewRequest};
use crate::run::{decode_run_event, RunEvent};
use crate::sse::SseParser;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;
use url::Url;

pub type RunEventStream = Pin<Box<dyn Stream<Item = Result<RunEvent>> + Send>>;

// --- Wire types ---

/// Backend-reported onboarding session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Researching,
    Synthesizing,
    AwaitingUser,
    PayloadReady,
    Executing,
    Delivering,
    Done,
    Failed,
}

#[derive(Debug, Serialize, Clone, Default)]
pub struct OnboardingRequest {
    pub brand_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_context: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OnboardingResponse {
    pub session_id: String,
    pub research_summary: Option<String>,
    #[serde(default)]
    pub questions: Vec<Question>,
    pub state: SessionState,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SubmitAnswersResponse {
    pub cards_count: Option<u64>,
    pub context_id: Option<String>,
    #[serde(default)]
    pub card_ids: Vec<String>,
    pub cards_output: Option<serde_json::Value>,
    pub state: SessionState,
}

/// Best-effort snapshot of an onboarding session used to restore the wizard.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct SessionSnapshot {
    pub brand_name: Option<String>,
    pub website: Option<String>,
    pub email: Option<String>,
    pub goal: Option<String>,
    pub additional_context: Option<String>,
    pub research_summary: Option<String>,
    #[serde(default)]
    pub questions: Vec<Question>,
    #[serde(default)]
    pub answers: HashMap<String, AnswerValue>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionDetails {
    pub state: SessionState,
    pub snapshot: Option<SessionSnapshot>,
    pub cgs_response: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct StartExecutionResponse {
    run_id: String,
}

#[derive(Serialize)]
struct StartExecutionRequest<'a> {
    brief_id: &'a str,
    topic: &'a str,
}

#[derive(Serialize)]
struct SubmitAnswersRequest<'a> {
    session_id: &'a str,
    answers: &'a HashMap<String, AnswerValue>,
}

// --- Client trait ---

#[async_trait]
pub trait CgsApi: Send + Sync {
    async fn start_onboarding(&self, request: &OnboardingRequest) -> Result<OnboardingResponse>;
    async fn submit_answers(
        &self,
        session_id: &str,
        answers: &HashMap<String, AnswerValue>,
    ) -> Result<SubmitAnswersResponse>;
    async fn session_details(&self, session_id: &str) -> Result<SessionDetails>;
    async fn start_execution(&self, brief_id: &str, topic: &str) -> Result<String>;
    async fn stream_execution(&self, run_id: &str) -> Result<RunEventStream>;
    async fn review_output(&self, output_id: &str, review: &ReviewRequest) -> Result<()>;
    async fn list_cards(&self) -> Result<Vec<Card>>;
    async fn create_card(&self, card: &NewCard) -> Result<Card>;
    async fn update_card(&self, card_id: &str, card: &NewCard) -> Result<Card>;
    async fn delete_card(&self, card_id: &str) -> Result<()>;
    async fn list_briefs(&self) -> Result<Vec<Brief>>;
    async fn list_packs(&self) -> Result<Vec<Pack>>;
    async fn list_archive(&self) -> Result<Vec<ArchiveItem>>;
    async fn get_archive_item(&self, output_id: &str) -> Result<ArchiveItem>;
}

// --- HTTP implementation ---

#[derive(Debug)]
pub struct HttpCgsClient {
    base_url: String,
    api_key: Option<String>,
    request_timeout: Duration,
    client: reqwest::Client,
}

impl HttpCgsClient {
    pub fn new(config: &Config) -> Result<Self> {
        Url::parse(&config.base_url).context("Invalid base_url in config.yml")?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            request_timeout: Duration::from_secs(config.request_timeout_seconds),
            client: reqwest::Client::new(),
        })
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.authed(self.client.get(format!("{}{}", self.base_url, path)))
            .timeout(self.request_timeout)
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.authed(self.client.post(format!("{}{}", self.base_url, path)))
            .timeout(self.request_timeout)
    }

    fn put(&self, path: &str) -> reqwest::RequestBuilder {
        self.authed(self.client.put(format!("{}{}", self.base_url, path)))
            .timeout(self.request_timeout)
    }

    fn delete(&self, path: &str) -> reqwest::RequestBuilder {
        self.authed(self.client.delete(format!("{}{}", self.base_url, path)))
            .timeout(self.request_timeout)
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("Authorization", format!("Bearer {}", key)),
            None => builder,
        }
    }

    /// Turn a non-success response into an error carrying the server's own
    /// message where one was sent.
    async fn check(resp: reqwest::Response) -> Result<reqwest::Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        let message = extract_error_message(&body).unwrap_or(body);
        Err(anyhow!("CGS API error ({}): {}", status, message))
    }
}

/// Pull a human-readable message out of a structured error body, if the
/// backend sent one.
fn extract_error_message(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: Option<String>,
        message: Option<String>,
    }
    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    parsed.error.or(parsed.message)
}

#[async_trait]
impl CgsApi for HttpCgsClient {
    async fn start_onboarding(&self, request: &OnboardingRequest) -> Result<OnboardingResponse> {
        let resp = self.post("/onboarding/start").json(request).send().await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    async fn submit_answers(
        &self,
        session_id: &str,
        answers: &HashMap<String, AnswerValue>,
    ) -> Result<SubmitAnswersResponse> {
        let request = SubmitAnswersRequest {
            session_id,
            answers,
        };
        let resp = self
            .post(&format!("/onboarding/{}/answers", session_id))
            .json(&request)
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    async fn session_details(&self, session_id: &str) -> Result<SessionDetails> {
        let resp = self
            .get(&format!("/onboarding/{}", session_id))
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    async fn start_execution(&self, brief_id: &str, topic: &str) -> Result<String> {
        let request = StartExecutionRequest { brief_id, topic };
        let resp = self.post("/execution/start").json(&request).send().await?;
        let started: StartExecutionResponse = Self::check(resp).await?.json().await?;
        Ok(started.run_id)
    }

    async fn stream_execution(&self, run_id: &str) -> Result<RunEventStream> {
        // No timeout here: the stream stays open for the whole run.
        let resp = self
            .authed(
                self.client
                    .get(format!("{}/execution/{}/stream", self.base_url, run_id)),
            )
            .header("Accept", "text/event-stream")
            .send()
            .await?;
        let resp = Self::check(resp).await?;

        let mut parser = SseParser::new();
        let stream = resp
            .bytes_stream()
            .map(move |chunk| match chunk {
                Ok(bytes) => {
                    let mut events = Vec::new();
                    for frame in parser.push(&bytes) {
                        match decode_run_event(&frame) {
                            Ok(Some(event)) => events.push(Ok(event)),
                            Ok(None) => {}
                            Err(e) => events.push(Err(
                                e.context(format!("Unparsable '{}' event", frame.event))
                            )),
                        }
                    }
                    events
                }
                Err(e) => vec![Err(anyhow!("Execution stream read failed: {}", e))],
            })
            .flat_map(futures_util::stream::iter);

        Ok(Box::pin(stream))
    }

    async fn review_output(&self, output_id: &str, review: &ReviewRequest) -> Result<()> {
        let resp = self
            .post(&format!("/outputs/{}/review", output_id))
            .json(review)
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn list_cards(&self) -> Result<Vec<Card>> {
        let resp = self.get("/cards").send().await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    async fn create_card(&self, card: &NewCard) -> Result<Card> {
        let resp = self.post("/cards").json(card).send().await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    async fn update_card(&self, card_id: &str, card: &NewCard) -> Result<Card> {
        let resp = self
            .put(&format!("/cards/{}", card_id))
            .json(card)
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    async fn delete_card(&self, card_id: &str) -> Result<()> {
        let resp = self.delete(&format!("/cards/{}", card_id)).send().await?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn list_briefs(&self) -> Result<Vec<Brief>> {
        let resp = self.get("/briefs").send().await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    async fn list_packs(&self) -> Result<Vec<Pack>> {
        let resp = self.get("/packs").send().await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    async fn list_archive(&self) -> Result<Vec<ArchiveItem>> {
        let resp = self.get("/archive").send().await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    async fn get_archive_item(&self, output_id: &str) -> Result<ArchiveItem> {
        let resp = self
            .get(&format!("/archive/{}", output_id))
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }
}
