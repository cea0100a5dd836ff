use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use milton_core::config::SoulCfg;
use milton_core::io::output::{DispatchEvent, DispatchReceiver};
use milton_core::io::render::GridSize;
use milton_core::memory::{InMemoryScalarStore, PgScalarStore, ScalarStore};
use milton_core::runtime::{AgentHandle, SoulHost};
use milton_core::sensory::ImageArtifact;
use milton_core::types::{AgentId, Perception};
use milton_llm::provider::{LlmProvider, LlmRouter};
use rustyline::error::ReadlineError;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Tracing goes to a file so the prompt stays readable.
    if std::env::var("RUST_LOG").is_ok() {
        let file = std::fs::File::create("/tmp/milton.log")?;
        tracing_subscriber::registry()
            .with(EnvFilter::from_default_env())
            .with(fmt::layer().json().with_target(true).with_writer(file))
            .init();
    }

    // DATABASE_URL is optional; without it scalar memory is ephemeral.
    let connect_timeout = SoulCfg::default().db_connect_timeout_secs;
    let mut startup_notice: Option<String> = None;
    let pool = if let Ok(url) = std::env::var("DATABASE_URL") {
        let mut fallback = |reason: String| {
            startup_notice = Some(format!(
                "note: {reason}; running in ephemeral mode, nothing from this session is persisted."
            ));
        };
        match tokio::time::timeout(
            Duration::from_secs(connect_timeout),
            sqlx::postgres::PgPoolOptions::new()
                .max_connections(4)
                .connect(&url),
        )
        .await
        {
            Ok(Ok(pool)) => match sqlx::migrate!("../../migrations").run(&pool).await {
                Ok(()) => {
                    tracing::info!("database connected and migrations applied");
                    Some(pool)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "migrations failed");
                    fallback("database migrations failed".into());
                    None
                }
            },
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "database connect failed");
                fallback("could not connect to DATABASE_URL".into());
                None
            }
            Err(_) => {
                fallback(format!("database connect timed out after {connect_timeout}s"));
                None
            }
        }
    } else {
        None
    };

    let (cfg, store): (SoulCfg, Arc<dyn ScalarStore>) = match pool {
        Some(pool) => (SoulCfg::load(&pool).await?, Arc::new(PgScalarStore::new(pool))),
        None => (SoulCfg::default(), Arc::new(InMemoryScalarStore::new())),
    };
    let cfg = Arc::new(cfg);

    let (quality, vision) = providers_from_env()?;
    let (host, dispatch_rx) = SoulHost::new(cfg.clone(), quality, vision, store);
    host.spawn_signal_listener();
    let token = host.token();

    let agent = host.spawn_agent(AgentId::new(cfg.agent_id.clone()));
    let result = run_repl(&agent, &cfg.soul_name, dispatch_rx, token.clone(), startup_notice).await;

    token.cancel();
    if tokio::time::timeout(Duration::from_secs(cfg.shutdown_timeout_secs), agent.shutdown())
        .await
        .is_err()
    {
        tracing::warn!("agent did not stop before the shutdown timeout");
    }
    result
}

/// Quality model (with optional fallback) and vision model from the environment.
/// The vision role falls back to the quality model.
fn providers_from_env() -> anyhow::Result<(Arc<dyn LlmProvider>, Arc<dyn LlmProvider>)> {
    let primary = milton_llm::http::from_env().context("MILTON_LLM_MODEL and MILTON_LLM_API_KEY must be set")?;
    let quality: Arc<dyn LlmProvider> = match milton_llm::http::fallback_from_env() {
        Some(fallback) => Arc::new(LlmRouter::new(vec![Box::new(primary), Box::new(fallback)])),
        None => Arc::new(primary),
    };
    let vision: Arc<dyn LlmProvider> = match milton_llm::http::vision_from_env() {
        Some(vision) => Arc::new(vision),
        None => quality.clone(),
    };
    Ok((quality, vision))
}

async fn run_repl(
    agent: &AgentHandle,
    soul_name: &str,
    mut dispatch_rx: DispatchReceiver,
    token: CancellationToken,
    startup_notice: Option<String>,
) -> anyhow::Result<()> {
    if let Some(notice) = startup_notice {
        println!("{notice}");
    }
    println!("describe what appears in the room, `/add <x> <y> <file.png>` to place an image, `/q` to quit");

    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<InputEvent>();
    spawn_input_thread(line_tx);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            line = line_rx.recv() => {
                let Some(line) = line else { break };
                match line {
                    InputEvent::Line(line) => {
                        let text = line.trim();
                        if text.is_empty() {
                            continue;
                        }
                        if matches!(text, "/q" | "/exit" | "/quit") {
                            break;
                        }
                        match parse_command(text).await {
                            Ok(perception) => agent.perceive(perception),
                            Err(e) => println!("error: {e:#}"),
                        }
                    }
                    InputEvent::Interrupted | InputEvent::Eof => break,
                    InputEvent::Error(err) => {
                        eprintln!("input error: {err}");
                        break;
                    }
                }
            }
            event = dispatch_rx.recv() => {
                let Some(event) = event else { break };
                if let DispatchEvent::Says { text, .. } = event {
                    print!("\r\x1b[2K{soul_name}> {text}\n");
                    io::stdout().flush()?;
                }
            }
        }
    }
    println!();
    Ok(())
}

/// A line becomes a perception: `/add x y path` places an image, anything
/// else describes what appeared.
async fn parse_command(text: &str) -> anyhow::Result<Perception> {
    let Some(args) = text.strip_prefix("/add ") else {
        return Ok(Perception::describe_object(text));
    };
    let Some((x, y, path)) = split_add_args(args) else {
        anyhow::bail!("usage: /add <x> <y> <file.png>");
    };
    let tile = GridSize::REFERENCE
        .tile(x.parse()?, y.parse()?)
        .with_context(|| format!("tile ({x}, {y}) is outside the room"))?;
    let bytes = tokio::fs::read(path).await.with_context(|| format!("reading {path}"))?;
    let image = ImageArtifact::from_png_bytes(bytes)?;
    Ok(Perception::add_object_at(image.to_data_uri(), tile))
}

/// `<x> <y> <path>`, where the path is everything after the coordinates.
fn split_add_args(args: &str) -> Option<(&str, &str, &str)> {
    let (x, rest) = args.trim_start().split_once(char::is_whitespace)?;
    let (y, path) = rest.trim_start().split_once(char::is_whitespace)?;
    let path = path.trim();
    (!path.is_empty()).then_some((x, y, path))
}

fn spawn_input_thread(line_tx: mpsc::UnboundedSender<InputEvent>) {
    std::thread::spawn(move || {
        let mut editor = match rustyline::DefaultEditor::new() {
            Ok(editor) => editor,
            Err(e) => {
                let _ = line_tx.send(InputEvent::Error(e.to_string()));
                return;
            }
        };
        loop {
            let event = match editor.readline("You> ") {
                Ok(line) => {
                    let _ = editor.add_history_entry(line.as_str());
                    InputEvent::Line(line)
                }
                Err(ReadlineError::Interrupted) => InputEvent::Interrupted,
                Err(ReadlineError::Eof) => InputEvent::Eof,
                Err(e) => InputEvent::Error(e.to_string()),
            };
            let last = !matches!(event, InputEvent::Line(_));
            if line_tx.send(event).is_err() || last {
                break;
            }
        }
    });
}

enum InputEvent {
    Line(String),
    Interrupted,
    Eof,
    Error(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_keeps_spaces_in_the_path() {
        assert_eq!(split_add_args("1 2 /tmp/my file.png"), Some(("1", "2", "/tmp/my file.png")));
        assert_eq!(split_add_args("  3   4   art/red chair.png "), Some(("3", "4", "art/red chair.png")));
    }

    #[test]
    fn add_without_a_path_is_rejected() {
        assert_eq!(split_add_args("1 2"), None);
        assert_eq!(split_add_args("1 2   "), None);
        assert_eq!(split_add_args("1"), None);
    }

    #[tokio::test]
    async fn add_reads_the_whole_spaced_path() {
        let err = parse_command("/add 1 2 /nonexistent/my file.png").await.unwrap_err();
        assert_eq!(err.to_string(), "reading /nonexistent/my file.png");
    }

    #[tokio::test]
    async fn plain_text_describes_an_object() {
        let p = parse_command("a red chair").await.unwrap();
        assert_eq!(p.content, "a red chair");
    }
}
