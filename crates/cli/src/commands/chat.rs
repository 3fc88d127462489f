//! `atlas chat`: interactive or single-message chat mode.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use atlas_agent::{AgentLoop, AgentStreamEvent};
use atlas_config::AppConfig;
use atlas_core::event::EventBus;
use atlas_core::message::{Conversation, Message};
use atlas_core::provider::Provider;
use atlas_core::tool::ToolRegistry;
use atlas_jobs::{BlockingRunner, JobCoordinator, JobProgress, JobResult, blocking_runner};
use atlas_providers::OllamaProvider;
use serde_json::{Map, json};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::warn;

pub async fn run(message: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    let provider = Arc::new(OllamaProvider::from_config(&config.model)?);
    match provider.health_check().await {
        Ok(true) => {}
        Ok(false) | Err(_) => warn!(
            host = %config.model_host(),
            "Model endpoint is not responding; is Ollama running?"
        ),
    }

    let coordinator = Arc::new(JobCoordinator::new(
        Arc::new(dry_run_runner()),
        config.jobs.max_workers,
    ));
    let tools: Arc<ToolRegistry> = Arc::new(atlas_tools::default_registry(coordinator));
    let tool_names = tools.names().join(", ");

    let mut agent = AgentLoop::new(
        provider,
        &config.model.name,
        tools,
        Arc::new(()),
        Arc::new(EventBus::default()),
    )
    .with_system_prompt(&config.agent.system_prompt)
    .with_max_rounds(config.agent.max_tool_rounds);
    if let Some(temperature) = config.model.temperature {
        agent = agent.with_temperature(temperature);
    }

    let mut conversation = Conversation::new();

    if let Some(msg) = message {
        // Single message mode
        conversation.push(Message::user(msg));
        turn(&agent, &mut conversation).await?;
        return Ok(());
    }

    println!();
    println!("  Atlas: interactive mode");
    println!();
    println!("  Model:        {} @ {}", agent.model(), config.model_host());
    println!("  Environment:  {}", config.agent.environment.as_str());
    println!("  Tools:        {tool_names}");
    println!();
    println!("  Type your message and press Enter.");
    println!("  Type 'exit' or Ctrl+C to quit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt()?;

    while let Some(line) = lines.next_line().await? {
        let input = line.trim();
        if input.is_empty() {
            prompt()?;
            continue;
        }
        if matches!(input, "exit" | "quit") {
            break;
        }

        conversation.push(Message::user(input));
        if let Err(e) = turn(&agent, &mut conversation).await {
            eprintln!("  [Error] {e}");
            conversation.rollback_last_user();
        }
        println!();
        prompt()?;
    }

    println!();
    println!("  Goodbye!");
    Ok(())
}

fn prompt() -> std::io::Result<()> {
    print!("  You > ");
    std::io::stdout().flush()
}

/// Run one exchange, rendering events while the loop works.
async fn turn(agent: &AgentLoop, conversation: &mut Conversation) -> Result<String, atlas_core::Error> {
    let (tx, rx) = mpsc::channel(64);
    let renderer = tokio::spawn(render(rx));

    let outcome = agent.process(conversation, Some(&tx)).await;
    drop(tx);
    let _ = renderer.await;
    outcome
}

async fn render(mut rx: mpsc::Receiver<AgentStreamEvent>) {
    let mut stdout = std::io::stdout();
    let mut at_line_start = true;
    while let Some(event) = rx.recv().await {
        match event {
            AgentStreamEvent::Chunk { content } => {
                if at_line_start {
                    print!("  Atlas > ");
                }
                print!("{content}");
                let _ = stdout.flush();
                at_line_start = content.ends_with('\n');
            }
            AgentStreamEvent::ToolCall { name, .. } => {
                if !at_line_start {
                    println!();
                }
                println!("  invoking `{name}`");
                at_line_start = true;
            }
            AgentStreamEvent::ToolResult { success, message, .. } => {
                let mark = if success { "ok" } else { "failed" };
                println!("    [{mark}] {message}");
            }
            AgentStreamEvent::Done { .. } => {
                if !at_line_start {
                    println!();
                }
                at_line_start = true;
            }
            // Reported by the caller once the turn returns.
            AgentStreamEvent::Error { .. } => {}
        }
    }
}

/// Stand-in job runner: walks through the stages of a backtest without
/// touching market data, reporting progress as it goes.
fn dry_run_runner() -> BlockingRunner {
    const STAGES: [&str; 3] = ["loading bars", "simulating fills", "computing metrics"];

    blocking_runner(|request, progress| {
        let total = STAGES.len() as u32;
        for (i, stage) in STAGES.iter().enumerate() {
            std::thread::sleep(Duration::from_millis(250));
            progress.report(JobProgress::step(*stage, i as u32 + 1, total));
        }

        let mut metrics = Map::new();
        metrics.insert("dry_run".into(), json!(true));
        metrics.insert("parameters".into(), json!(request.parameters));
        Ok(JobResult {
            summary: format!("Dry run finished: {}", request.description),
            metrics,
            artifacts: Vec::new(),
        })
    })
}
