use crate::api::{CgsApi, OnboardingRequest, SessionState};
use crate::models::{AnswerValue, Question};
use crate::progress::{self, ProgressRamp};
use anyhow::{bail, Context, Result};
use log::{info, warn};
use std::collections::HashMap;
use std::time::Duration;

/// How long the one restore attempt may take before the stale session id is
/// discarded and the wizard starts fresh.
const RESTORE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WizardStep {
    Brand,
    Website,
    Email,
    Goal,
    Context,
    Researching,
    Quiz,
    Generating,
    Complete,
}

impl WizardStep {
    pub fn is_form(&self) -> bool {
        matches!(
            self,
            WizardStep::Brand
                | WizardStep::Website
                | WizardStep::Email
                | WizardStep::Goal
                | WizardStep::Context
        )
    }

    pub fn is_optional(&self) -> bool {
        matches!(self, WizardStep::Website | WizardStep::Context)
    }

    pub fn title(&self) -> &'static str {
        match self {
            WizardStep::Brand => "Brand name",
            WizardStep::Website => "Website",
            WizardStep::Email => "Email",
            WizardStep::Goal => "Goal",
            WizardStep::Context => "Additional context",
            WizardStep::Researching => "Researching your brand",
            WizardStep::Quiz => "A few questions",
            WizardStep::Generating => "Building your knowledge base",
            WizardStep::Complete => "Done",
        }
    }
}

/// Total mapping from the backend session state to the wizard step a
/// restored session should land on.
pub fn step_for_state(state: SessionState) -> WizardStep {
    match state {
        SessionState::Researching | SessionState::Synthesizing => WizardStep::Researching,
        SessionState::AwaitingUser => WizardStep::Quiz,
        SessionState::PayloadReady | SessionState::Executing | SessionState::Delivering => {
            WizardStep::Generating
        }
        SessionState::Done => WizardStep::Complete,
        SessionState::Failed => WizardStep::Brand,
    }
}

#[derive(Debug, Default, Clone)]
pub struct FormFields {
    pub brand_name: String,
    pub website: String,
    pub email: String,
    pub goal: String,
    pub additional_context: String,
}

/// Onboarding wizard state machine. Form steps move synchronously with
/// per-step validation; the research and generation steps are driven by
/// backend calls with a simulated progress ramp. A failed call reverts to
/// the last interactive step with no partial payload applied.
#[derive(Debug)]
pub struct WizardFlow {
    pub step: WizardStep,
    pub form: FormFields,
    pub session_id: Option<String>,
    pub research_summary: Option<String>,
    pub questions: Vec<Question>,
    pub answers: HashMap<String, AnswerValue>,
    pub current_question: usize,
    pub progress: ProgressRamp,
    pub context_id: Option<String>,
    pub card_ids: Vec<String>,
    pub cards_count: Option<u64>,
}

impl Default for WizardFlow {
    fn default() -> Self {
        Self::new()
    }
}

impl WizardFlow {
    pub fn new() -> Self {
        Self {
            step: WizardStep::Brand,
            form: FormFields::default(),
            session_id: None,
            research_summary: None,
            questions: Vec::new(),
            answers: HashMap::new(),
            current_question: 0,
            progress: ProgressRamp::new(),
            context_id: None,
            card_ids: Vec::new(),
            cards_count: None,
        }
    }

    /// Best-effort restore from a persisted session id. Runs at most one
    /// fetch, bounded by a hard timeout; any failure falls back to a fresh
    /// wizard rather than surfacing an error.
    pub async fn restore(api: &dyn CgsApi, session_id: &str) -> Self {
        let details =
            match tokio::time::timeout(RESTORE_TIMEOUT, api.session_details(session_id)).await {
                Ok(Ok(details)) => details,
                Ok(Err(e)) => {
                    warn!("Could not restore session {}: {}", session_id, e);
                    return Self::new();
                }
                Err(_) => {
                    warn!("Session restore timed out, starting fresh");
                    return Self::new();
                }
            };

        if details.state == SessionState::Failed {
            info!("Previous session {} failed, starting fresh", session_id);
            return Self::new();
        }

        let mut flow = Self::new();
        flow.session_id = Some(session_id.to_string());
        if let Some(snapshot) = details.snapshot {
            flow.form.brand_name = snapshot.brand_name.unwrap_or_default();
            flow.form.website = snapshot.website.unwrap_or_default();
            flow.form.email = snapshot.email.unwrap_or_default();
            flow.form.goal = snapshot.goal.unwrap_or_default();
            flow.form.additional_context = snapshot.additional_context.unwrap_or_default();
            flow.research_summary = snapshot.research_summary;
            flow.questions = snapshot.questions;
            flow.answers = snapshot.answers;
        }
        flow.step = step_for_state(details.state);
        flow.current_question = flow
            .questions
            .iter()
            .position(|q| !flow.answers.contains_key(&q.id))
            .unwrap_or(flow.questions.len());
        flow
    }

    /// Re-fetch the backend state and re-map the step. Used when a restored
    /// session landed on a step whose backend work is still in flight.
    pub async fn refresh(&mut self, api: &dyn CgsApi) -> Result<()> {
        let session_id = self.session_id.clone().context("No session to refresh")?;
        let details = api.session_details(&session_id).await?;
        if let Some(snapshot) = details.snapshot {
            if !snapshot.questions.is_empty() {
                self.questions = snapshot.questions;
            }
            if self.research_summary.is_none() {
                self.research_summary = snapshot.research_summary;
            }
        }
        self.step = step_for_state(details.state);
        Ok(())
    }

    // --- Form navigation ---

    /// Inline validation for the active form step.
    pub fn validate_current(&self) -> Result<(), String> {
        match self.step {
            WizardStep::Brand => {
                if self.form.brand_name.trim().chars().count() < 2 {
                    return Err("Brand name must be at least 2 characters".to_string());
                }
            }
            WizardStep::Website => {
                let site = self.form.website.trim();
                if !site.is_empty() && !site.contains('.') {
                    return Err("Enter a valid website address or leave it empty".to_string());
                }
            }
            WizardStep::Email => {
                if !is_valid_email(&self.form.email) {
                    return Err("Enter a valid email address".to_string());
                }
            }
            WizardStep::Goal => {
                if self.form.goal.trim().is_empty() {
                    return Err("Tell us what you want to achieve".to_string());
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Move to the next form step. No-op (returns false) when the active
    /// step's validation fails or the next transition is an async one.
    pub fn advance(&mut self) -> bool {
        if !self.step.is_form() || self.validate_current().is_err() {
            return false;
        }
        match self.step {
            WizardStep::Brand => self.step = WizardStep::Website,
            WizardStep::Website => self.step = WizardStep::Email,
            WizardStep::Email => self.step = WizardStep::Goal,
            WizardStep::Goal => self.step = WizardStep::Context,
            // Leaving Context is the research call; async steps and the
            // quiz have their own transitions.
            _ => return false,
        }
        true
    }

    /// Move back one step. Inside the quiz this walks the questions first
    /// and only then returns to the preceding top-level step.
    pub fn retreat(&mut self) -> bool {
        match self.step {
            WizardStep::Brand => false,
            WizardStep::Website => {
                self.step = WizardStep::Brand;
                true
            }
            WizardStep::Email => {
                self.step = WizardStep::Website;
                true
            }
            WizardStep::Goal => {
                self.step = WizardStep::Email;
                true
            }
            WizardStep::Context => {
                self.step = WizardStep::Goal;
                true
            }
            WizardStep::Quiz => {
                if self.current_question > 0 {
                    self.current_question -= 1;
                } else {
                    self.step = WizardStep::Context;
                }
                true
            }
            _ => false,
        }
    }

    /// Advance without validation. Only optional steps may be skipped.
    pub fn skip(&mut self) -> bool {
        if !self.step.is_optional() {
            return false;
        }
        match self.step {
            WizardStep::Website => {
                self.step = WizardStep::Email;
                true
            }
            // Skipping Context still goes through the research call.
            _ => false,
        }
    }

    // --- Quiz sub-loop ---

    pub fn current_question(&self) -> Option<&Question> {
        self.questions.get(self.current_question)
    }

    pub fn quiz_finished(&self) -> bool {
        self.current_question >= self.questions.len()
    }

    /// Record an answer for the active question and move to the next one.
    pub fn answer_current(&mut self, value: AnswerValue) -> Result<()> {
        let question = self
            .current_question()
            .context("No question to answer")?
            .clone();
        if question.required && value.is_empty() {
            bail!("This question is required");
        }
        if value.is_empty() {
            self.answers.remove(&question.id);
        } else {
            self.answers.insert(question.id, value);
        }
        self.current_question += 1;
        Ok(())
    }

    /// Skip the active question without answering. Required questions
    /// cannot be skipped.
    pub fn skip_current_question(&mut self) -> Result<()> {
        let question = self.current_question().context("No question to skip")?;
        if question.required {
            bail!("This question is required");
        }
        self.current_question += 1;
        Ok(())
    }

    /// True once every required question has a non-empty answer. Optional
    /// questions never block.
    pub fn answers_complete(&self) -> bool {
        self.questions
            .iter()
            .filter(|q| q.required)
            .all(|q| self.answers.get(&q.id).is_some_and(|a| !a.is_empty()))
    }

    // --- Async steps ---

    /// Run the brand research call. On success the wizard holds the session
    /// id and question list and sits on the quiz step; on failure it is back
    /// on the context step with the error propagated for display. No
    /// automatic retry.
    pub async fn run_research(
        &mut self,
        api: &dyn CgsApi,
        on_tick: impl FnMut(u8),
    ) -> Result<()> {
        let request = OnboardingRequest {
            brand_name: self.form.brand_name.trim().to_string(),
            website: non_empty(&self.form.website),
            email: self.form.email.trim().to_string(),
            goal: non_empty(&self.form.goal),
            additional_context: non_empty(&self.form.additional_context),
        };

        self.step = WizardStep::Researching;
        self.progress.reset();

        let result =
            progress::drive(api.start_onboarding(&request), &mut self.progress, on_tick).await;

        match result {
            Ok(response) => {
                self.progress.finish();
                self.session_id = Some(response.session_id);
                self.research_summary = response.research_summary;
                self.questions = response.questions;
                self.answers.clear();
                self.current_question = 0;
                self.step = WizardStep::Quiz;
                Ok(())
            }
            Err(e) => {
                self.progress.reset();
                self.step = WizardStep::Context;
                Err(e)
            }
        }
    }

    /// Submit the collected answers and wait for the knowledge base to be
    /// generated. Blocked until every required question is answered.
    pub async fn run_generation(
        &mut self,
        api: &dyn CgsApi,
        on_tick: impl FnMut(u8),
    ) -> Result<()> {
        if !self.answers_complete() {
            bail!("All required questions must be answered first");
        }
        let session_id = self
            .session_id
            .clone()
            .context("No active onboarding session")?;

        self.step = WizardStep::Generating;
        self.progress.reset();

        let result = progress::drive(
            api.submit_answers(&session_id, &self.answers),
            &mut self.progress,
            on_tick,
        )
        .await;

        match result {
            Ok(response) => {
                self.progress.finish();
                self.context_id = response.context_id;
                self.card_ids = response.card_ids;
                self.cards_count = response.cards_count;
                self.step = WizardStep::Complete;
                Ok(())
            }
            Err(e) => {
                self.progress.reset();
                self.step = WizardStep::Quiz;
                Err(e)
            }
        }
    }
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

fn is_valid_email(s: &str) -> bool {
    let s = s.trim();
    if s.contains(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    match domain.rsplit_once('.') {
        Some((host, tld)) => !host.is_empty() && tld.len() >= 2,
        None => false,
    }
}
