//! omnichat - chat, draw and speak through many LLM providers.
//!
//! This is the main entry point for the omnichat CLI.

mod config;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use config::AppConfig;
use omnichat_provider::dispatch::{self, Operation, Provider};
use omnichat_provider::{
    AnswerEvent, ChatMessage, ChatOptions, DrawingEvent, DrawingOptions, FileStore,
    LocalFileStore, SpeechOptions, DEFAULT_CONTEXT_SIZE,
};
use omnichat_sandbox::ScriptSandbox;
use omnichat_util::log::{LogConfig, LogLevel};
use omnichat_util::Identifier;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "omnichat")]
#[command(author, version, long_about = None)]
#[command(about = "Chat, draw and speak through many LLM providers")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file, merged over the global config
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a question and stream the answer
    Chat {
        /// Provider id (OpenAI, DeepSeek, ZhipuAI, Gemini, ...)
        #[arg(short, long)]
        provider: String,
        /// Model id
        #[arg(short, long)]
        model: Option<String>,
        /// System instruction
        #[arg(short, long)]
        instruction: Option<String>,
        /// Number of history messages to keep
        #[arg(long, default_value_t = DEFAULT_CONTEXT_SIZE)]
        context_size: usize,
        /// Token budget for the request history
        #[arg(long)]
        input_max_tokens: Option<usize>,
        /// Maximum tokens in the answer
        #[arg(long)]
        max_tokens: Option<u32>,
        /// Image to attach to the question
        #[arg(long)]
        image: Option<PathBuf>,
        /// Configured plugin to offer the model (repeatable, default: all)
        #[arg(long = "plugin", value_name = "ID")]
        plugins: Vec<String>,
        /// Offer no plugins
        #[arg(long, conflicts_with = "plugins")]
        no_plugins: bool,
        /// The question
        #[arg(num_args = 1.., required = true)]
        prompt: Vec<String>,
    },
    /// Generate images from a prompt
    Draw {
        #[arg(short, long)]
        provider: String,
        #[arg(short, long)]
        model: Option<String>,
        /// Image size, e.g. 1024x1024
        #[arg(long, default_value = "1024x1024")]
        size: String,
        #[arg(long)]
        style: Option<String>,
        /// What the image should not contain
        #[arg(long)]
        negative: Option<String>,
        #[arg(num_args = 1.., required = true)]
        prompt: Vec<String>,
    },
    /// Synthesize speech to an audio file
    Speak {
        #[arg(short, long, default_value = "OpenAI")]
        provider: String,
        #[arg(short, long)]
        model: Option<String>,
        #[arg(long)]
        voice: Option<String>,
        #[arg(long)]
        speed: Option<f32>,
        /// Output file
        #[arg(short, long)]
        out: PathBuf,
        #[arg(num_args = 1.., required = true)]
        text: Vec<String>,
    },
    /// List providers and the operations they support
    Providers,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (config, sources) = AppConfig::load(cli.config.as_deref()).await?;
    init_logging(cli.verbose, config.log_level.as_deref());
    debug!(?sources, "Configuration loaded");

    match cli.command {
        Commands::Chat {
            provider,
            model,
            instruction,
            context_size,
            input_max_tokens,
            max_tokens,
            image,
            plugins,
            no_plugins,
            prompt,
        } => {
            let provider: Provider = provider.parse()?;
            let section = config.provider(provider);
            let session_id = Identifier::session();

            let mut question = ChatMessage::user(prompt.join(" "));
            if let Some(path) = image {
                question = question.with_image(path.display().to_string());
            }

            let (tx, rx) = mpsc::unbounded_channel::<AnswerEvent>();
            let abort = cancel_on_ctrl_c();
            let mut options = ChatOptions::new(session_id.clone(), Arc::new(tx))
                .with_credentials(section.credentials())
                .with_context_size(context_size)
                .with_input_max_tokens(input_max_tokens)
                .with_max_tokens(max_tokens)
                .with_messages(vec![question])
                .with_files(file_store(&config)?)
                .with_abort(abort.clone())
                .with_span(omnichat_util::session_span!(provider, session_id));
            if let Some(model) = model.or(section.model) {
                options = options.with_model(model);
            }
            if let Some(instruction) = instruction {
                options = options.with_instruction(instruction);
            }
            if !no_plugins {
                let plugins = config.select_plugins(&plugins)?;
                if !plugins.is_empty() {
                    debug!(count = plugins.len(), "Offering plugins");
                    let sandbox = ScriptSandbox::new(config.sandbox.clone().unwrap_or_default());
                    options = options.with_plugins(plugins).with_scripts(Arc::new(sandbox));
                }
            }

            let task = tokio::spawn(dispatch::chat(provider.id(), options));
            let outcome = print_answer(rx).await;
            task.await??;
            if abort.is_cancelled() {
                eprintln!("\nCancelled");
                return Ok(());
            }
            outcome?;
        }
        Commands::Draw {
            provider,
            model,
            size,
            style,
            negative,
            prompt,
        } => {
            let provider: Provider = provider.parse()?;
            let section = config.provider(provider);
            let session_id = Identifier::session();

            let (tx, mut rx) = mpsc::unbounded_channel::<DrawingEvent>();
            let prompt = prompt.join(" ");
            let mut options = DrawingOptions::new(session_id.clone(), prompt, Arc::new(tx))
                .with_credentials(section.credentials())
                .with_size(size)
                .with_files(file_store(&config)?)
                .with_abort(cancel_on_ctrl_c())
                .with_span(omnichat_util::session_span!(provider, session_id));
            if let Some(model) = model.or(section.model) {
                options = options.with_model(model);
            }
            if let Some(style) = style {
                options = options.with_style(style);
            }
            if let Some(negative) = negative {
                options = options.with_negative_prompt(negative);
            }

            let task = tokio::spawn(dispatch::drawing(provider.id(), options));
            while let Some(event) = rx.recv().await {
                match event {
                    DrawingEvent::ImageGenerated { paths, .. } => {
                        for path in paths {
                            println!("{path}");
                        }
                    }
                    DrawingEvent::End { error: Some(error), .. } => bail!(error),
                    DrawingEvent::End { error: None, .. } => break,
                }
            }
            task.await??;
        }
        Commands::Speak {
            provider,
            model,
            voice,
            speed,
            out,
            text,
        } => {
            let provider: Provider = provider.parse()?;
            let section = config.provider(provider);

            let mut options = SpeechOptions::new(text.join(" "))
                .with_credentials(section.credentials())
                .with_abort(cancel_on_ctrl_c());
            if let Some(model) = model.or(section.model) {
                options = options.with_model(model);
            }
            if let Some(voice) = voice {
                options = options.with_voice(voice);
            }
            if let Some(speed) = speed {
                options = options.with_speed(speed);
            }

            let audio = dispatch::speech(provider.id(), options).await??;
            write_audio(&out, &audio).await?;
            info!(bytes = audio.len(), path = %out.display(), "Speech written");
            println!("{}", out.display());
        }
        Commands::Providers => print!("{}", support_matrix()),
    }

    Ok(())
}

/// Verbose runs log to stderr, everything else appends to the log file.
fn init_logging(verbose: bool, configured: Option<&str>) {
    let level = if verbose {
        LogLevel::Debug
    } else {
        configured.and_then(LogLevel::parse).unwrap_or(LogLevel::Warn)
    };
    let result = omnichat_util::log::init(LogConfig {
        print: verbose,
        level,
        include_location: false,
        file: (!verbose).then(omnichat_util::log::default_log_path).flatten(),
    });
    if let Err(e) = result {
        eprintln!("Warning: Could not initialise logging: {}", e);
    }
}

/// A token that fires on the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            child.cancel();
        }
    });
    token
}

fn file_store(config: &AppConfig) -> anyhow::Result<Arc<dyn FileStore>> {
    let store = match &config.cache_dir {
        Some(dir) => LocalFileStore::new(dir),
        None => LocalFileStore::with_default_dir()?,
    };
    Ok(Arc::new(store))
}

/// Stream answer deltas to stdout until the session ends.
async fn print_answer(mut rx: mpsc::UnboundedReceiver<AnswerEvent>) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout();
    while let Some(event) = rx.recv().await {
        match event {
            AnswerEvent::Start { .. } => {}
            AnswerEvent::Append { delta, .. } => {
                stdout.write_all(delta.as_bytes())?;
                stdout.flush()?;
            }
            AnswerEvent::ContextShrunk { new_len, .. } => {
                debug!(new_len, "History trimmed to fit the token budget");
            }
            AnswerEvent::End { error, .. } => {
                writeln!(stdout)?;
                if let Some(error) = error {
                    bail!(error);
                }
                break;
            }
        }
    }
    Ok(())
}

async fn write_audio(path: &Path, audio: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, audio)
        .await
        .with_context(|| format!("failed to write {}", path.display()))
}

fn support_matrix() -> String {
    let mark = |p: Provider, op: Operation| if p.supports(op) { "yes" } else { "-" };
    let mut out = format!("{:<12} {:<6} {:<8} {}\n", "PROVIDER", "CHAT", "DRAWING", "SPEECH");
    for provider in Provider::ALL {
        out.push_str(&format!(
            "{:<12} {:<6} {:<8} {}\n",
            provider.id(),
            mark(provider, Operation::Chat),
            mark(provider, Operation::Drawing),
            mark(provider, Operation::Speech),
        ));
    }
    out
}
