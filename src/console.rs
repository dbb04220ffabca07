use crate::api::CgsApi;
use crate::cache::SessionCache;
use crate::config::Config;
use crate::models::{AnswerValue, NewCard, ReviewRequest, ReviewStatus};
use crate::run::{AgentStatus, RunPhase, RunTracker};
use crate::wizard::{WizardFlow, WizardStep};
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::{Confirm, MultiSelect, Select, Text};
use std::sync::Arc;
use std::time::Duration;

const CARD_TYPES: &[&str] = &[
    "product",
    "target_audience",
    "brand_voice",
    "competitor",
    "topic",
];

const FEEDBACK_CATEGORIES: &[&str] = &["tone", "accuracy", "structure", "length", "other"];

/// Top-level interactive menu.
pub async fn run(config: &Config, api: Arc<dyn CgsApi>) -> Result<()> {
    let mut cache = SessionCache::load(&config.cache_file);

    loop {
        let choice = Select::new(
            "What would you like to do?",
            vec![
                "Onboarding wizard",
                "Generate content",
                "Review archive",
                "Manage cards",
                "Quit",
            ],
        )
        .prompt()?;

        let result = match choice {
            "Onboarding wizard" => {
                run_wizard(api.as_ref(), &mut cache, &config.cache_file).await
            }
            "Generate content" => run_generation_flow(api.as_ref()).await,
            "Review archive" => review_archive(api.as_ref()).await,
            "Manage cards" => manage_cards(api.as_ref()).await,
            _ => break,
        };

        if let Err(e) = result {
            eprintln!("Error: {:#}", e);
        }
    }

    Ok(())
}

// --- Onboarding wizard ---

async fn run_wizard(api: &dyn CgsApi, cache: &mut SessionCache, cache_path: &str) -> Result<()> {
    let mut flow = match &cache.session_id {
        Some(session_id) => {
            let resume = Confirm::new("Resume your previous onboarding session?")
                .with_default(true)
                .prompt()?;
            if resume {
                WizardFlow::restore(api, session_id).await
            } else {
                WizardFlow::new()
            }
        }
        None => WizardFlow::new(),
    };

    if flow.session_id.is_none() && cache.session_id.is_some() {
        // The stored id was stale or the user declined; forget it.
        cache.session_id = None;
        cache.save(cache_path)?;
    }

    loop {
        match flow.step {
            WizardStep::Brand => {
                let value = Text::new("Brand name:")
                    .with_initial_value(&flow.form.brand_name)
                    .prompt()?;
                flow.form.brand_name = value;
                advance_or_explain(&mut flow);
            }
            WizardStep::Website => {
                let value = Text::new("Website (optional, Enter to skip):")
                    .with_initial_value(&flow.form.website)
                    .prompt()?;
                flow.form.website = value;
                if flow.form.website.trim().is_empty() {
                    flow.skip();
                } else {
                    advance_or_explain(&mut flow);
                }
            }
            WizardStep::Email => {
                let value = Text::new("Email:")
                    .with_initial_value(&flow.form.email)
                    .prompt()?;
                flow.form.email = value;
                advance_or_explain(&mut flow);
            }
            WizardStep::Goal => {
                let value = Text::new("What do you want to achieve?")
                    .with_initial_value(&flow.form.goal)
                    .prompt()?;
                flow.form.goal = value;
                advance_or_explain(&mut flow);
            }
            WizardStep::Context => {
                let value = Text::new("Anything else we should know? (optional):")
                    .with_initial_value(&flow.form.additional_context)
                    .prompt()?;
                flow.form.additional_context = value;

                let pb = ramp_bar("Researching your brand")?;
                match flow.run_research(api, |v| pb.set_position(v as u64)).await {
                    Ok(()) => {
                        pb.finish_with_message("Research complete");
                        if let Some(summary) = &flow.research_summary {
                            println!("\n{}\n", summary);
                        }
                        cache.session_id = flow.session_id.clone();
                        cache.save(cache_path)?;
                    }
                    Err(e) => {
                        pb.abandon_with_message("Research failed");
                        eprintln!("Error: {:#}", e);
                        let retry = Confirm::new("Try again?").with_default(true).prompt()?;
                        if !retry {
                            return Ok(());
                        }
                    }
                }
            }
            WizardStep::Researching | WizardStep::Generating => {
                // Restored onto a step whose backend work is still running.
                println!("{}... waiting for the backend.", flow.step.title());
                tokio::time::sleep(Duration::from_secs(2)).await;
                flow.refresh(api).await?;
            }
            WizardStep::Quiz => {
                if flow.quiz_finished() {
                    if !flow.answers_complete() {
                        println!("Some required questions are still unanswered.");
                        flow.current_question = 0;
                        continue;
                    }
                    let go = Confirm::new("Generate your knowledge base now?")
                        .with_default(true)
                        .prompt()?;
                    if !go {
                        return Ok(());
                    }
                    let pb = ramp_bar("Generating knowledge base")?;
                    match flow.run_generation(api, |v| pb.set_position(v as u64)).await {
                        Ok(()) => pb.finish_with_message("Knowledge base ready"),
                        Err(e) => {
                            pb.abandon_with_message("Generation failed");
                            eprintln!("Error: {:#}", e);
                            let retry = Confirm::new("Try again?").with_default(true).prompt()?;
                            if !retry {
                                return Ok(());
                            }
                        }
                    }
                } else {
                    ask_current_question(&mut flow)?;
                }
            }
            WizardStep::Complete => {
                if let Some(count) = flow.cards_count {
                    println!("Created {} knowledge cards.", count);
                } else {
                    println!("Your knowledge base is ready.");
                }
                cache.session_id = None;
                cache.context_id = flow.context_id.clone();
                cache.save(cache_path)?;
                return Ok(());
            }
        }
    }
}

fn advance_or_explain(flow: &mut WizardFlow) {
    if !flow.advance() {
        if let Err(message) = flow.validate_current() {
            println!("{}", message);
        }
    }
}

fn ask_current_question(flow: &mut WizardFlow) -> Result<()> {
    let question = flow
        .current_question()
        .context("No question to ask")?
        .clone();
    let label = if question.required {
        question.question.clone()
    } else {
        format!("{} (optional, Enter to skip)", question.question)
    };

    let answer = match &question.options {
        Some(options) => {
            let picked = MultiSelect::new(&label, options.clone()).prompt()?;
            AnswerValue::Multi(picked)
        }
        None => AnswerValue::Text(Text::new(&label).prompt()?),
    };

    if answer.is_empty() && !question.required {
        flow.skip_current_question()?;
    } else if let Err(e) = flow.answer_current(answer) {
        println!("{}", e);
    }
    Ok(())
}

// --- Content generation ---

async fn run_generation_flow(api: &dyn CgsApi) -> Result<()> {
    let briefs = api.list_briefs().await?;
    if briefs.is_empty() {
        println!("No briefs configured yet. Create one in the Design Lab first.");
        return Ok(());
    }

    let options: Vec<String> = briefs
        .iter()
        .map(|b| format!("{}  {}", b.id, b.name))
        .collect();
    let selection = Select::new("Which brief?", options).prompt()?;
    let brief_id = selection
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_string();

    let topic = Text::new("Topic:").prompt()?;

    let pb = ramp_bar("Starting run")?;
    let mut tracker = RunTracker::new();
    tracker
        .start(api, &brief_id, &topic, |t| {
            pb.set_position(t.progress_percent as u64);
            if let Some(agent) = t.agents.iter().find(|a| a.status == AgentStatus::Running) {
                pb.set_message(agent.name.clone());
            }
        })
        .await?;

    match tracker.phase {
        RunPhase::Completed => {
            pb.finish_with_message("Run complete");
            println!(
                "Output: {}",
                tracker.output_id.as_deref().unwrap_or("(unknown)")
            );
            if let Some(duration) = tracker.duration_seconds {
                println!("Duration: {:.1}s", duration);
            }
            println!("Tokens used: {}", tracker.total_tokens);
            for agent in &tracker.agents {
                match agent.tokens {
                    Some(tokens) => println!("  {} ({} tokens)", agent.name, tokens),
                    None => println!("  {}", agent.name),
                }
            }
        }
        RunPhase::Error => {
            pb.abandon_with_message("Run failed");
            eprintln!(
                "Error: {}",
                tracker.error_message.as_deref().unwrap_or("unknown error")
            );
        }
        _ => {}
    }

    Ok(())
}

// --- Archive review ---

async fn review_archive(api: &dyn CgsApi) -> Result<()> {
    let items = api.list_archive().await?;
    if items.is_empty() {
        println!("The archive is empty.");
        return Ok(());
    }

    let options: Vec<String> = items
        .iter()
        .map(|i| {
            format!(
                "{}  {} [{}]",
                i.id,
                i.topic.as_deref().unwrap_or("(no topic)"),
                i.status
            )
        })
        .collect();
    let selection = Select::new("Which output?", options).prompt()?;
    let output_id = selection
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_string();

    let item = api.get_archive_item(&output_id).await?;
    if let Some(content) = &item.content {
        println!("\n{}\n", content);
    }

    let action = Select::new("Review:", vec!["Approve", "Reject", "Back"]).prompt()?;
    let status = match action {
        "Approve" => ReviewStatus::Approved,
        "Reject" => ReviewStatus::Rejected,
        _ => return Ok(()),
    };

    let feedback = Text::new("Feedback (optional):").prompt()?;
    let feedback_categories = if status == ReviewStatus::Rejected {
        let picked = MultiSelect::new(
            "What needs work?",
            FEEDBACK_CATEGORIES.iter().map(|s| s.to_string()).collect(),
        )
        .prompt()?;
        if picked.is_empty() {
            None
        } else {
            Some(picked)
        }
    } else {
        None
    };
    let is_reference = if status == ReviewStatus::Approved {
        Some(
            Confirm::new("Use this output as a reference for future runs?")
                .with_default(false)
                .prompt()?,
        )
    } else {
        None
    };

    let review = ReviewRequest {
        status,
        feedback: if feedback.trim().is_empty() {
            None
        } else {
            Some(feedback)
        },
        feedback_categories,
        is_reference,
    };
    api.review_output(&output_id, &review).await?;
    println!("Review recorded.");
    Ok(())
}

// --- Cards ---

async fn manage_cards(api: &dyn CgsApi) -> Result<()> {
    loop {
        let action = Select::new(
            "Cards:",
            vec!["List", "Create", "Delete", "Import from JSON", "Back"],
        )
        .prompt()?;

        match action {
            "List" => {
                let cards = api.list_cards().await?;
                if cards.is_empty() {
                    println!("No cards yet.");
                }
                for card in cards {
                    println!("{}  [{}] {}", card.id, card.card_type, card.title);
                }
            }
            "Create" => {
                let card_type = Select::new("Card type:", CARD_TYPES.to_vec()).prompt()?;
                let title = Text::new("Title:").prompt()?;
                let body = Text::new("Content:").prompt()?;
                let card = api
                    .create_card(&NewCard {
                        card_type: card_type.to_string(),
                        title,
                        content: serde_json::Value::String(body),
                    })
                    .await?;
                println!("Created card {}", card.id);
            }
            "Delete" => {
                let cards = api.list_cards().await?;
                if cards.is_empty() {
                    println!("No cards to delete.");
                    continue;
                }
                let options: Vec<String> = cards
                    .iter()
                    .map(|c| format!("{}  {}", c.id, c.title))
                    .collect();
                let selection = Select::new("Delete which card?", options).prompt()?;
                let card_id = selection
                    .split_whitespace()
                    .next()
                    .unwrap_or_default()
                    .to_string();
                if Confirm::new("Really delete this card?")
                    .with_default(false)
                    .prompt()?
                {
                    api.delete_card(&card_id).await?;
                    println!("Deleted.");
                }
            }
            "Import from JSON" => {
                let path = Text::new("Path to JSON file:").prompt()?;
                match import_cards(api, &path).await {
                    Ok(count) => println!("Imported {} cards.", count),
                    Err(e) => eprintln!("Import failed: {:#}", e),
                }
            }
            _ => return Ok(()),
        }
    }
}

/// Import cards from a local JSON file holding an array of card payloads.
async fn import_cards(api: &dyn CgsApi, path: &str) -> Result<usize> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path))?;
    let cards: Vec<NewCard> =
        serde_json::from_str(&content).context("Expected a JSON array of cards")?;

    let mut imported = 0;
    for card in &cards {
        api.create_card(card).await?;
        imported += 1;
    }
    Ok(imported)
}

fn ramp_bar(message: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} {msg} [{bar:40.cyan/blue}] {pos}%")?
            .progress_chars("#>-"),
    );
    pb.set_message(message.to_string());
    Ok(pb)
}
