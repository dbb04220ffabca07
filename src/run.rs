use crate::api::CgsApi;
use crate::sse::SseFrame;
use anyhow::{bail, Result};
use futures_util::StreamExt;
use log::{debug, warn};
use serde::Deserialize;

// --- Stream events ---

#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    Status {
        message: Option<String>,
    },
    Progress {
        step: Option<String>,
        agent: Option<String>,
        progress: Option<u8>,
    },
    AgentComplete {
        agent: String,
        tokens: Option<u64>,
    },
    Completed {
        output_id: Option<String>,
        duration_seconds: Option<f64>,
        total_tokens: Option<u64>,
    },
    Error {
        error: Option<String>,
    },
}

#[derive(Deserialize)]
struct StatusData {
    message: Option<String>,
}

#[derive(Deserialize)]
struct ProgressData {
    step: Option<String>,
    agent: Option<String>,
    progress: Option<u8>,
}

#[derive(Deserialize)]
struct AgentCompleteData {
    agent: String,
    tokens: Option<u64>,
}

#[derive(Deserialize)]
struct CompletedData {
    output_id: Option<String>,
    duration_seconds: Option<f64>,
    total_tokens: Option<u64>,
}

#[derive(Deserialize)]
struct ErrorData {
    error: Option<String>,
}

/// Decode one SSE frame into a run event. Unknown event names are skipped
/// (`Ok(None)`); a known event with an unparsable payload is a transport
/// failure and surfaces as an error.
pub fn decode_run_event(frame: &SseFrame) -> Result<Option<RunEvent>> {
    let event = match frame.event.as_str() {
        "status" => {
            let data: StatusData = serde_json::from_str(&frame.data)?;
            RunEvent::Status {
                message: data.message,
            }
        }
        "progress" => {
            let data: ProgressData = serde_json::from_str(&frame.data)?;
            RunEvent::Progress {
                step: data.step,
                agent: data.agent,
                progress: data.progress,
            }
        }
        "agent_complete" => {
            let data: AgentCompleteData = serde_json::from_str(&frame.data)?;
            RunEvent::AgentComplete {
                agent: data.agent,
                tokens: data.tokens,
            }
        }
        "completed" => {
            let data: CompletedData = serde_json::from_str(&frame.data)?;
            RunEvent::Completed {
                output_id: data.output_id,
                duration_seconds: data.duration_seconds,
                total_tokens: data.total_tokens,
            }
        }
        "error" => {
            let data: ErrorData = serde_json::from_str(&frame.data)?;
            RunEvent::Error { error: data.error }
        }
        other => {
            debug!("Ignoring unknown stream event: {}", other);
            return Ok(None);
        }
    };
    Ok(Some(event))
}

// --- Run state ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunPhase {
    #[default]
    Input,
    Running,
    Completed,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    Pending,
    Running,
    Completed,
}

#[derive(Debug, Clone)]
pub struct AgentProgress {
    pub name: String,
    pub role: Option<String>,
    pub status: AgentStatus,
    pub tokens: Option<u64>,
}

/// State of one execution run, driven entirely by stream events. Agents are
/// append-only in first-seen order; exactly one terminal event is honored
/// per run.
#[derive(Debug, Default)]
pub struct RunTracker {
    pub run_id: Option<String>,
    pub phase: RunPhase,
    pub agents: Vec<AgentProgress>,
    pub total_tokens: u64,
    pub progress_percent: u8,
    pub output_id: Option<String>,
    pub duration_seconds: Option<f64>,
    pub error_message: Option<String>,
}

impl RunTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.phase, RunPhase::Completed | RunPhase::Error)
    }

    /// Enter the running phase for a fresh run, clearing anything left from
    /// the previous one. Rejected while a run is already in flight.
    pub fn begin(&mut self, run_id: String) -> Result<()> {
        if self.phase == RunPhase::Running {
            bail!("A run is already in progress");
        }
        *self = Self {
            run_id: Some(run_id),
            phase: RunPhase::Running,
            ..Self::default()
        };
        Ok(())
    }

    /// Return to the input phase. Only allowed once the current run has
    /// finished (or before one was started).
    pub fn reset(&mut self) -> Result<()> {
        if self.phase == RunPhase::Running {
            bail!("Cannot reset while a run is in progress");
        }
        *self = Self::default();
        Ok(())
    }

    /// Apply one stream event. Events received after a terminal event are
    /// ignored.
    pub fn apply(&mut self, event: RunEvent) {
        if self.is_terminal() {
            debug!("Ignoring event after terminal state: {:?}", event);
            return;
        }

        match event {
            RunEvent::Status { message } => {
                if let Some(message) = message {
                    debug!("Run status: {}", message);
                }
            }
            RunEvent::Progress {
                step,
                agent,
                progress,
            } => {
                if let Some(progress) = progress {
                    self.progress_percent = progress.min(100);
                }
                if let Some(name) = step.or(agent) {
                    let position = self.agents.iter().position(|a| a.name == name);
                    // The pipeline is linear: whichever agent was running is
                    // done once another one reports progress.
                    for (i, a) in self.agents.iter_mut().enumerate() {
                        if a.status == AgentStatus::Running && Some(i) != position {
                            a.status = AgentStatus::Completed;
                        }
                    }
                    match position {
                        Some(i) => self.agents[i].status = AgentStatus::Running,
                        None => self.agents.push(AgentProgress {
                            name,
                            role: None,
                            status: AgentStatus::Running,
                            tokens: None,
                        }),
                    }
                }
            }
            RunEvent::AgentComplete { agent, tokens } => {
                if let Some(entry) = self.agents.iter_mut().find(|a| a.name == agent) {
                    entry.status = AgentStatus::Completed;
                    entry.tokens = tokens;
                } else {
                    self.agents.push(AgentProgress {
                        name: agent,
                        role: None,
                        status: AgentStatus::Completed,
                        tokens,
                    });
                }
                self.total_tokens += tokens.unwrap_or(0);
            }
            RunEvent::Completed {
                output_id,
                duration_seconds,
                total_tokens,
            } => {
                self.progress_percent = 100;
                for agent in &mut self.agents {
                    agent.status = AgentStatus::Completed;
                }
                self.output_id = output_id;
                self.duration_seconds = duration_seconds;
                if let Some(total) = total_tokens {
                    // The server total is authoritative over interim sums.
                    self.total_tokens = total;
                }
                self.phase = RunPhase::Completed;
            }
            RunEvent::Error { error } => {
                self.error_message =
                    Some(error.unwrap_or_else(|| "Generation failed".to_string()));
                self.phase = RunPhase::Error;
            }
        }
    }

    /// Start an execution run and consume its event stream to completion,
    /// applying events in arrival order. `on_update` is invoked after every
    /// applied event so a front-end can re-render. A dropped or unparsable
    /// stream lands in the error phase; there is no automatic reconnect.
    pub async fn start(
        &mut self,
        api: &dyn CgsApi,
        brief_id: &str,
        topic: &str,
        mut on_update: impl FnMut(&RunTracker),
    ) -> Result<()> {
        if topic.trim().is_empty() {
            bail!("Topic must not be empty");
        }
        if self.phase == RunPhase::Running {
            bail!("A run is already in progress");
        }

        let run_id = api.start_execution(brief_id, topic).await?;
        self.begin(run_id.clone())?;
        on_update(self);

        let mut stream = match api.stream_execution(&run_id).await {
            Ok(stream) => stream,
            Err(e) => {
                self.apply(RunEvent::Error {
                    error: Some(format!("Could not open execution stream: {}", e)),
                });
                on_update(self);
                return Ok(());
            }
        };

        while let Some(item) = stream.next().await {
            match item {
                Ok(event) => {
                    self.apply(event);
                    on_update(self);
                    if self.is_terminal() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Execution stream failed: {}", e);
                    self.apply(RunEvent::Error {
                        error: Some("Connection to the generation stream was lost".to_string()),
                    });
                    on_update(self);
                    break;
                }
            }
        }

        if !self.is_terminal() {
            self.apply(RunEvent::Error {
                error: Some("Stream ended before the run finished".to_string()),
            });
            on_update(self);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{
        OnboardingRequest, OnboardingResponse, RunEventStream, SessionDetails,
        SubmitAnswersResponse,
    };
    use crate::models::{AnswerValue, ArchiveItem, Brief, Card, NewCard, Pack, ReviewRequest};
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::collections::HashMap;

    fn progress(step: &str, percent: u8) -> RunEvent {
        RunEvent::Progress {
            step: Some(step.to_string()),
            agent: None,
            progress: Some(percent),
        }
    }

    #[test]
    fn test_linear_pipeline_completes_previous_agent() {
        let mut tracker = RunTracker::new();
        tracker.begin("r1".to_string()).unwrap();

        tracker.apply(progress("Researcher", 10));
        tracker.apply(progress("Writer", 50));

        assert_eq!(tracker.agents.len(), 2);
        assert_eq!(tracker.agents[0].name, "Researcher");
        assert_eq!(tracker.agents[0].status, AgentStatus::Completed);
        assert_eq!(tracker.agents[1].status, AgentStatus::Running);
        assert_eq!(tracker.progress_percent, 50);
    }

    #[test]
    fn test_repeat_progress_for_same_agent_keeps_it_running() {
        let mut tracker = RunTracker::new();
        tracker.begin("r1".to_string()).unwrap();

        tracker.apply(progress("Researcher", 10));
        tracker.apply(progress("Researcher", 20));

        assert_eq!(tracker.agents.len(), 1);
        assert_eq!(tracker.agents[0].status, AgentStatus::Running);
        assert_eq!(tracker.progress_percent, 20);
    }

    #[test]
    fn test_completed_event_is_authoritative() {
        // Scenario: interim token tally disagrees with the final total.
        let mut tracker = RunTracker::new();
        tracker.begin("r1".to_string()).unwrap();

        tracker.apply(progress("Researcher", 20));
        tracker.apply(progress("Writer", 60));
        tracker.apply(RunEvent::AgentComplete {
            agent: "Researcher".to_string(),
            tokens: Some(120),
        });
        tracker.apply(RunEvent::Completed {
            output_id: Some("o1".to_string()),
            duration_seconds: Some(12.5),
            total_tokens: Some(500),
        });

        assert_eq!(tracker.phase, RunPhase::Completed);
        assert_eq!(tracker.progress_percent, 100);
        assert_eq!(tracker.total_tokens, 500);
        assert_eq!(tracker.output_id.as_deref(), Some("o1"));
        assert_eq!(tracker.agents.len(), 2);
        assert_eq!(tracker.agents[0].tokens, Some(120));
        assert!(tracker
            .agents
            .iter()
            .all(|a| a.status == AgentStatus::Completed));
    }

    #[test]
    fn test_error_event_keeps_prior_agents() {
        let mut tracker = RunTracker::new();
        tracker.begin("r1".to_string()).unwrap();

        tracker.apply(progress("Researcher", 20));
        tracker.apply(RunEvent::Error {
            error: Some("LLM timeout".to_string()),
        });

        assert_eq!(tracker.phase, RunPhase::Error);
        assert_eq!(tracker.error_message.as_deref(), Some("LLM timeout"));
        assert_eq!(tracker.agents.len(), 1);
        assert_eq!(tracker.agents[0].name, "Researcher");
    }

    #[test]
    fn test_terminal_state_ignores_further_events() {
        let mut tracker = RunTracker::new();
        tracker.begin("r1".to_string()).unwrap();
        tracker.apply(RunEvent::Completed {
            output_id: Some("o1".to_string()),
            duration_seconds: None,
            total_tokens: Some(10),
        });

        tracker.apply(progress("Straggler", 30));
        tracker.apply(RunEvent::AgentComplete {
            agent: "Straggler".to_string(),
            tokens: Some(99),
        });
        tracker.apply(RunEvent::Error {
            error: Some("late".to_string()),
        });

        assert_eq!(tracker.phase, RunPhase::Completed);
        assert!(tracker.agents.is_empty());
        assert_eq!(tracker.total_tokens, 10);
        assert_eq!(tracker.progress_percent, 100);
        assert!(tracker.error_message.is_none());
    }

    #[test]
    fn test_reset_rejected_while_running() {
        let mut tracker = RunTracker::new();
        tracker.begin("r1".to_string()).unwrap();
        assert!(tracker.reset().is_err());

        tracker.apply(RunEvent::Error { error: None });
        tracker.reset().unwrap();
        assert_eq!(tracker.phase, RunPhase::Input);
        assert!(tracker.run_id.is_none());
    }

    #[test]
    fn test_begin_rejected_while_running() {
        let mut tracker = RunTracker::new();
        tracker.begin("r1".to_string()).unwrap();
        assert!(tracker.begin("r2".to_string()).is_err());
    }

    #[test]
    fn test_decode_known_and_unknown_events() {
        let frame = SseFrame {
            event: "agent_complete".to_string(),
            data: r#"{"agent": "Writer", "tokens": 42}"#.to_string(),
        };
        assert_eq!(
            decode_run_event(&frame).unwrap(),
            Some(RunEvent::AgentComplete {
                agent: "Writer".to_string(),
                tokens: Some(42),
            })
        );

        let unknown = SseFrame {
            event: "heartbeat".to_string(),
            data: "{}".to_string(),
        };
        assert_eq!(decode_run_event(&unknown).unwrap(), None);

        let malformed = SseFrame {
            event: "completed".to_string(),
            data: "not json".to_string(),
        };
        assert!(decode_run_event(&malformed).is_err());
    }

    // --- Driver tests ---

    struct MockApi {
        events: std::sync::Mutex<Option<Vec<Result<RunEvent>>>>,
        fail_stream_open: bool,
    }

    impl MockApi {
        fn with_events(events: Vec<Result<RunEvent>>) -> Self {
            Self {
                events: std::sync::Mutex::new(Some(events)),
                fail_stream_open: false,
            }
        }
    }

    #[async_trait]
    impl CgsApi for MockApi {
        async fn start_onboarding(&self, _: &OnboardingRequest) -> Result<OnboardingResponse> {
            Err(anyhow!("not used"))
        }
        async fn submit_answers(
            &self,
            _: &str,
            _: &HashMap<String, AnswerValue>,
        ) -> Result<SubmitAnswersResponse> {
            Err(anyhow!("not used"))
        }
        async fn session_details(&self, _: &str) -> Result<SessionDetails> {
            Err(anyhow!("not used"))
        }
        async fn start_execution(&self, _: &str, _: &str) -> Result<String> {
            Ok("run-1".to_string())
        }
        async fn stream_execution(&self, _: &str) -> Result<RunEventStream> {
            if self.fail_stream_open {
                return Err(anyhow!("connection refused"));
            }
            let events = self.events.lock().unwrap().take().unwrap();
            Ok(Box::pin(futures_util::stream::iter(events)))
        }
        async fn review_output(&self, _: &str, _: &ReviewRequest) -> Result<()> {
            Err(anyhow!("not used"))
        }
        async fn list_cards(&self) -> Result<Vec<Card>> {
            Err(anyhow!("not used"))
        }
        async fn create_card(&self, _: &NewCard) -> Result<Card> {
            Err(anyhow!("not used"))
        }
        async fn update_card(&self, _: &str, _: &NewCard) -> Result<Card> {
            Err(anyhow!("not used"))
        }
        async fn delete_card(&self, _: &str) -> Result<()> {
            Err(anyhow!("not used"))
        }
        async fn list_briefs(&self) -> Result<Vec<Brief>> {
            Err(anyhow!("not used"))
        }
        async fn list_packs(&self) -> Result<Vec<Pack>> {
            Err(anyhow!("not used"))
        }
        async fn list_archive(&self) -> Result<Vec<ArchiveItem>> {
            Err(anyhow!("not used"))
        }
        async fn get_archive_item(&self, _: &str) -> Result<ArchiveItem> {
            Err(anyhow!("not used"))
        }
    }

    #[tokio::test]
    async fn test_start_rejects_empty_topic() {
        let api = MockApi::with_events(vec![]);
        let mut tracker = RunTracker::new();
        let result = tracker.start(&api, "b1", "   ", |_| {}).await;
        assert!(result.is_err());
        assert_eq!(tracker.phase, RunPhase::Input);
    }

    #[tokio::test]
    async fn test_start_runs_to_completion() {
        let api = MockApi::with_events(vec![
            Ok(RunEvent::Status { message: None }),
            Ok(progress("Researcher", 25)),
            Ok(progress("Writer", 70)),
            Ok(RunEvent::AgentComplete {
                agent: "Researcher".to_string(),
                tokens: Some(120),
            }),
            Ok(RunEvent::Completed {
                output_id: Some("o1".to_string()),
                duration_seconds: Some(3.0),
                total_tokens: Some(500),
            }),
        ]);

        let mut tracker = RunTracker::new();
        let mut updates = 0;
        tracker
            .start(&api, "b1", "Launch post", |_| updates += 1)
            .await
            .unwrap();

        assert_eq!(tracker.run_id.as_deref(), Some("run-1"));
        assert_eq!(tracker.phase, RunPhase::Completed);
        assert_eq!(tracker.total_tokens, 500);
        assert!(updates >= 5);
    }

    #[tokio::test]
    async fn test_stream_error_item_becomes_error_phase() {
        let api = MockApi::with_events(vec![
            Ok(progress("Researcher", 25)),
            Err(anyhow!("bad chunk")),
        ]);

        let mut tracker = RunTracker::new();
        tracker.start(&api, "b1", "Topic", |_| {}).await.unwrap();

        assert_eq!(tracker.phase, RunPhase::Error);
        assert!(tracker.error_message.is_some());
        assert_eq!(tracker.agents.len(), 1);
    }

    #[tokio::test]
    async fn test_stream_ending_without_terminal_event_is_an_error() {
        let api = MockApi::with_events(vec![Ok(progress("Researcher", 25))]);

        let mut tracker = RunTracker::new();
        tracker.start(&api, "b1", "Topic", |_| {}).await.unwrap();

        assert_eq!(tracker.phase, RunPhase::Error);
    }

    #[tokio::test]
    async fn test_failed_stream_open_is_an_error_phase() {
        let api = MockApi {
            events: std::sync::Mutex::new(Some(vec![])),
            fail_stream_open: true,
        };

        let mut tracker = RunTracker::new();
        tracker.start(&api, "b1", "Topic", |_| {}).await.unwrap();

        assert_eq!(tracker.phase, RunPhase::Error);
    }
}
