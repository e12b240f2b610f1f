//! `lumen` command-line front end.
//!
//! Prints the chunk stream of each run to stdout, either human-readable or as
//! one JSON object per line (`--json`), which is the format a socket transport
//! would forward to its clients. Logs go to the data directory.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};

use lumen::agent_core::{ConversationManager, KeywordMemory, UserInput};
use lumen::inference::config::{load_config, load_or_default};
use lumen::inference::{AssistantConfig, InferenceClient, MediaRef};
use lumen::{AgentStatus, Orchestrator, StreamChunk, ToolRegistry};

#[derive(Parser, Debug)]
#[command(name = "lumen", version)]
#[command(about = "Lumen - streaming tool-using assistant")]
struct Cli {
    /// Configuration file (default: discovered config/lumen.yaml)
    #[arg(long, global = true, env = "LUMEN_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Interactive chat session
    Chat {
        #[command(flatten)]
        run: RunArgs,
    },
    /// Ask a single question
    Ask {
        /// The question
        prompt: String,
        /// Image to attach
        #[arg(long)]
        image: Option<PathBuf>,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Transcribe an audio file
    Transcribe {
        file: PathBuf,
        /// Spoken language (default from config)
        #[arg(long)]
        language: Option<String>,
    },
    /// Describe an image
    Describe {
        file: PathBuf,
        #[arg(long, default_value = "Describe this image.")]
        prompt: String,
    },
    /// List the available tools
    Tools,
}

#[derive(clap::Args, Debug, Clone)]
struct RunArgs {
    /// Routing hint (e.g. coding, quick, vision)
    #[arg(long)]
    hint: Option<String>,
    /// Use this model instead of the routed one
    #[arg(long)]
    model: Option<String>,
    /// Print each chunk as a JSON line
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Err(e) = lumen::init_tracing() {
        eprintln!("warning: file logging disabled: {e}");
    }

    let config = load(cli.config.as_deref())?;

    match cli.command {
        Commands::Chat { run } => chat(config, run).await,
        Commands::Ask { prompt, image, run } => {
            let attachments = match image {
                Some(path) => vec![read_image(&path).await?],
                None => Vec::new(),
            };
            let manager = build_manager(config)?;
            let input = UserInput {
                text: prompt,
                attachments,
                task_hint: run.hint.clone(),
                model_override: run.model.clone(),
            };
            respond(&manager, input, run.json).await
        }
        Commands::Transcribe { file, language } => {
            let client = InferenceClient::from_config(config)?;
            let audio = tokio::fs::read(&file)
                .await
                .with_context(|| format!("failed to read {}", file.display()))?;
            let file_name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "audio.wav".to_string());
            let text = client
                .transcribe(audio, &file_name, language.as_deref())
                .await
                .context("transcription failed")?;
            println!("{text}");
            Ok(())
        }
        Commands::Describe { file, prompt } => {
            let client = InferenceClient::from_config(config)?;
            let image = tokio::fs::read(&file)
                .await
                .with_context(|| format!("failed to read {}", file.display()))?;
            let description = client
                .analyze_image(&image, image_mime_type(&file), &prompt)
                .await
                .context("image analysis failed")?;
            println!("{description}");
            Ok(())
        }
        Commands::Tools => {
            println!("{}", registry().capability_summary());
            Ok(())
        }
    }
}

// ─── Setup ───────────────────────────────────────────────────────────────────

fn load(path: Option<&Path>) -> anyhow::Result<AssistantConfig> {
    let config = match path {
        Some(path) => load_config(path),
        None => load_or_default(&std::env::current_dir().context("no working directory")?),
    };
    config.context("failed to load configuration")
}

fn registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    lumen::tools::register_builtin_tools(&mut registry);
    tracing::debug!(tools = registry.len(), "tool registry ready");
    registry
}

fn build_manager(config: AssistantConfig) -> anyhow::Result<ConversationManager> {
    let client = InferenceClient::from_config(config.clone())?;
    let orchestrator = Orchestrator::new(
        Arc::new(client),
        Arc::new(registry()),
        config.orchestrator.clone(),
    );
    Ok(ConversationManager::new(
        orchestrator,
        Arc::new(KeywordMemory::new(config.memory.capacity)),
        config.system_prompt.clone(),
        config.memory.recall_limit,
    ))
}

fn image_mime_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/png",
    }
}

async fn read_image(path: &Path) -> anyhow::Result<MediaRef> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(MediaRef::inline(image_mime_type(path), &bytes))
}

// ─── Running ─────────────────────────────────────────────────────────────────

async fn chat(config: AssistantConfig, run: RunArgs) -> anyhow::Result<()> {
    let manager = build_manager(config)?;
    if run.json {
        print_json(&StreamChunk::status(AgentStatus::Ready, "ready"))?;
    } else {
        println!("Lumen ready. Type a message, or /quit to exit.");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        if !run.json {
            print!("> ");
            std::io::stdout().flush()?;
        }
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" || line == "/exit" {
            break;
        }

        let input = UserInput {
            text: line.to_string(),
            task_hint: run.hint.clone(),
            model_override: run.model.clone(),
            ..UserInput::default()
        };
        // A failed run ends that turn, not the session.
        if let Err(e) = respond(&manager, input, run.json).await {
            tracing::error!(error = %e, "run failed");
            eprintln!("error: {e:#}");
        }
    }

    Ok(())
}

async fn respond(manager: &ConversationManager, input: UserInput, json: bool) -> anyhow::Result<()> {
    let mut chunks = manager.respond(input);
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.context("orchestration failed")?;
        if json {
            print_json(&chunk)?;
        } else {
            print_human(&chunk)?;
        }
    }
    Ok(())
}

fn print_json(chunk: &StreamChunk) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(chunk)?);
    Ok(())
}

fn print_human(chunk: &StreamChunk) -> anyhow::Result<()> {
    let mut out = std::io::stdout();
    match chunk {
        StreamChunk::Content { content } => {
            write!(out, "{content}")?;
            out.flush()?;
        }
        StreamChunk::ToolStart { tool, .. } => writeln!(out, "\n[tool] {tool}")?,
        StreamChunk::ToolResult { tool, content } => writeln!(out, "[ok] {tool}: {content}")?,
        StreamChunk::ToolError { tool, content } => writeln!(out, "[error] {tool}: {content}")?,
        StreamChunk::Warning { content } => write!(out, "\n[warning] {content}")?,
        StreamChunk::Status { status: AgentStatus::Retrying, content } => {
            writeln!(out, "\n[{content}]")?
        }
        StreamChunk::Done { .. } | StreamChunk::Status { .. } | StreamChunk::ToolCall(_) => {}
    }
    if chunk.is_terminal() {
        writeln!(out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_ask_with_flags() {
        let cli = Cli::try_parse_from([
            "lumen", "ask", "what time is it", "--hint", "quick", "--model", "gpt-4o", "--json",
        ])
        .unwrap();
        match cli.command {
            Commands::Ask { prompt, image, run } => {
                assert_eq!(prompt, "what time is it");
                assert!(image.is_none());
                assert_eq!(run.hint.as_deref(), Some("quick"));
                assert_eq!(run.model.as_deref(), Some("gpt-4o"));
                assert!(run.json);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_config_flag_is_global() {
        let cli = Cli::try_parse_from(["lumen", "tools", "--config", "custom.yaml"]).unwrap();
        assert_eq!(cli.config.as_deref(), Some(Path::new("custom.yaml")));
        assert!(matches!(cli.command, Commands::Tools));
    }

    #[test]
    fn test_image_mime_type_from_extension() {
        assert_eq!(image_mime_type(Path::new("a.JPG")), "image/jpeg");
        assert_eq!(image_mime_type(Path::new("a.webp")), "image/webp");
        assert_eq!(image_mime_type(Path::new("a")), "image/png");
    }
}
