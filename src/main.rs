//! notebook-agent CLI
//!
//! Runs one query cycle against the configured providers, and inspects the
//! usage budget and the session archive.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use notebook_agent::agent::{AgentEvent, Session, SessionStore};
use notebook_agent::llm::{provider_for, ChatMessage};
use notebook_agent::metrics::gather_metrics;
use notebook_agent::quota::{FileQuotaStore, QuotaGate, MAX_AI_API_CALLS};
use notebook_agent::{
    AbortSignal, ActionState, AgentController, HttpExecutionBackend, Settings, Termination,
};

type CliResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Decide-and-execute loop for an AI data-analysis notebook
#[derive(Parser, Debug)]
#[command(name = "notebook-agent", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Answer one query, streaming generated output to stdout
    Run {
        /// The user's question
        #[arg(short, long)]
        query: String,

        /// Settings JSON file
        #[arg(long, default_value = notebook_agent::config::DEFAULT_SETTINGS_PATH)]
        settings: PathBuf,

        /// Prior conversation as a JSON array of {role, content}
        #[arg(long)]
        history: Option<PathBuf>,

        /// Usage counter file (defaults to ~/.notebook-agent/storage.json)
        #[arg(long)]
        quota_file: Option<PathBuf>,

        /// Export spans to this OTLP collector
        #[arg(long)]
        otlp_endpoint: Option<String>,

        /// Do not write the finished cycle to the session archive
        #[arg(long)]
        no_archive: bool,

        /// Print Prometheus metrics after the run
        #[arg(long)]
        print_metrics: bool,
    },

    /// Inspect or reset the anonymous usage budget
    Quota {
        #[command(subcommand)]
        action: QuotaCommand,

        /// Usage counter file (defaults to ~/.notebook-agent/storage.json)
        #[arg(long, global = true)]
        quota_file: Option<PathBuf>,
    },

    /// Browse archived query cycles
    Sessions {
        #[command(subcommand)]
        action: SessionsCommand,
    },
}

#[derive(Subcommand, Debug)]
enum QuotaCommand {
    Status,
    Reset,
}

#[derive(Subcommand, Debug)]
enum SessionsCommand {
    List,
    Show { id: String },
    Delete { id: String },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Run {
            query,
            settings,
            history,
            quota_file,
            otlp_endpoint,
            no_archive,
            print_metrics,
        } => {
            let otlp = otlp_endpoint.is_some();
            if let Some(endpoint) = otlp_endpoint.as_deref() {
                if let Err(e) = notebook_agent::tracing::init_tracing("notebook-agent", Some(endpoint)) {
                    notebook_agent::tracing::init_console_tracing();
                    warn!(error = %e, "OTLP export unavailable, logging to console only");
                }
            } else {
                notebook_agent::tracing::init_console_tracing();
            }

            let result = run_query(
                &query,
                &settings,
                history.as_deref(),
                quota_file,
                !no_archive,
            )
            .await;

            if print_metrics {
                println!("{}", gather_metrics());
            }
            if otlp {
                notebook_agent::tracing::shutdown_tracing();
            }
            result
        }
        Command::Quota { action, quota_file } => {
            notebook_agent::tracing::init_console_tracing();
            quota_command(action, quota_file)
        }
        Command::Sessions { action } => {
            notebook_agent::tracing::init_console_tracing();
            sessions_command(action)
        }
    };

    if let Err(e) = result {
        error!(error = %e, "notebook-agent failed");
        eprintln!("❌ {}", e);
        std::process::exit(1);
    }
}

fn open_quota(quota_file: Option<PathBuf>) -> QuotaGate {
    let store = match quota_file {
        Some(path) => FileQuotaStore::new(path),
        None => FileQuotaStore::default_store(),
    };
    QuotaGate::open(Box::new(store), MAX_AI_API_CALLS)
}

fn load_history(path: Option<&Path>) -> CliResult<Vec<ChatMessage>> {
    match path {
        Some(path) => {
            let json = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&json)?)
        }
        None => Ok(Vec::new()),
    }
}

async fn run_query(
    query: &str,
    settings_path: &Path,
    history: Option<&Path>,
    quota_file: Option<PathBuf>,
    archive: bool,
) -> CliResult<()> {
    let settings = Settings::load_or_default(settings_path)?.apply_env();
    let model_info = settings.model_information.clone();
    let history = load_history(history)?;

    let controller = AgentController::new(
        provider_for(&model_info),
        Arc::new(HttpExecutionBackend::new()),
        Arc::new(open_quota(quota_file)),
        settings.agent_config(),
    );

    let abort = AbortSignal::new();
    {
        let abort = abort.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\n⏹  Aborting after the current read...");
                abort.abort();
            }
        });
    }

    info!(model = %model_info.decision_model(), provider = model_info.model_type.as_str(), "Running query");
    let state = ActionState::new_query(history, query);

    let outcome = controller
        .run_with_events(state, &model_info, &abort, None, |event| match event {
            AgentEvent::Decision(record) => match record.reason {
                Some(reason) => eprintln!("🤖 {} ({})", record.action, reason),
                None => eprintln!("🤖 {}", record.action),
            },
            AgentEvent::Chunk(chunk) => {
                println!("{}", chunk.content);
                let _ = std::io::stdout().flush();
            }
            AgentEvent::ExecutionFinished { action, outcome } => {
                eprintln!("   {} {}", action, outcome.as_str());
            }
            AgentEvent::QuotaExceeded => {
                eprintln!(
                    "🔑 You've used all {} free calls. Add an OpenAI key or a server proxy URL to your settings to keep going.",
                    MAX_AI_API_CALLS
                );
            }
            AgentEvent::Finished(termination) => {
                eprintln!("✅ Finished: {}", termination.as_str());
            }
        })
        .await;

    let result = match outcome {
        Ok(result) => result,
        Err(e) => {
            eprintln!("⚠️  The decision model failed: {}", e);
            return Err(e.into());
        }
    };

    if archive && result.termination != Termination::QuotaExceeded {
        match SessionStore::default_store() {
            Ok(store) => {
                let session = Session::from_result(&result, model_info.decision_model());
                match store.save(&session) {
                    Ok(()) => eprintln!("💾 Saved session {}", session.id),
                    Err(e) => warn!(error = %e, "Failed to archive session"),
                }
            }
            Err(e) => warn!(error = %e, "Session archive unavailable"),
        }
    }

    Ok(())
}

fn quota_command(action: QuotaCommand, quota_file: Option<PathBuf>) -> CliResult<()> {
    let gate = open_quota(quota_file);
    match action {
        QuotaCommand::Status => {
            println!(
                "{} of {} free calls used, {} remaining",
                gate.count(),
                gate.max_calls(),
                gate.remaining()
            );
        }
        QuotaCommand::Reset => {
            gate.reset();
            println!("Quota reset");
        }
    }
    Ok(())
}

fn sessions_command(action: SessionsCommand) -> CliResult<()> {
    let store = SessionStore::default_store()?;
    match action {
        SessionsCommand::List => {
            let sessions = store.list()?;
            if sessions.is_empty() {
                println!("No sessions in {}", store.base_dir().display());
            }
            for s in sessions {
                println!(
                    "{}  {}  {:<14}  {:>2} actions  {}",
                    s.id,
                    s.created_at.format("%Y-%m-%d %H:%M:%S"),
                    s.termination.as_str(),
                    s.actions,
                    s.query
                );
            }
        }
        SessionsCommand::Show { id } => {
            let session = store.load(&id)?;
            println!("{}", serde_json::to_string_pretty(&session)?);
        }
        SessionsCommand::Delete { id } => {
            store.delete(&id)?;
            println!("Deleted {}", id);
        }
    }
    Ok(())
}
