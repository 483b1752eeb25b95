mod app;
mod functions;
mod render;
mod report;
mod storage;

use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use callflow::{Collaborators, Layout, MemoryPersistence, Scheduler, SchedulerConfig};
use clap::{Parser, Subcommand};

use crate::app::AppFile;
use crate::functions::BuiltinBackend;
use crate::storage::StateFile;

#[derive(Parser)]
#[command(name = "callflow")]
#[command(about = "Run callback apps without a browser")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the callback declarations of an app file
    Check {
        /// Path to the app JSON file
        file: PathBuf,
    },
    /// List callbacks with their inputs, state and outputs
    Graph {
        /// Path to the app JSON file
        file: PathBuf,
    },
    /// Start the app, apply scripted events and print the resulting layout
    Run {
        /// Path to the app JSON file
        file: PathBuf,
        /// JSON list of property changes to dispatch after start
        #[arg(long)]
        events: Option<PathBuf>,
        /// Scheduler config (default: nearest callflow.toml)
        #[arg(long)]
        config: Option<PathBuf>,
        /// State file for persisted edits (load on start, save on exit)
        #[arg(long)]
        state: Option<PathBuf>,
        /// Print the queue transition ledger
        #[arg(long)]
        trace: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Check { file } => check(&file),
        Commands::Graph { file } => graph(&file),
        Commands::Run {
            file,
            events,
            config,
            state,
            trace,
        } => run(&file, events.as_deref(), config.as_deref(), state, trace).await,
    }
}

fn load_graph(app: &AppFile) -> Result<callflow::DependencyGraph> {
    app.graph().map_err(|errors| match report::graph_errors(&errors) {
        Ok(text) => {
            eprint!("{text}");
            anyhow!("{} invalid declarations", errors.len())
        }
        Err(error) => error,
    })
}

fn check(file: &Path) -> Result<()> {
    eprintln!("Checking: {}", file.display());
    let app = AppFile::load(file)?;
    let graph = load_graph(&app)?;
    let server = app.bindings();
    let builtins = functions::names();
    for callback in graph.callbacks() {
        let function = match (callback.function_name(), server.get(&*callback.id)) {
            (Some(name), _) => name
                .strip_prefix(functions::NAMESPACE)
                .and_then(|rest| rest.strip_prefix('.'))
                .map(str::to_owned),
            (None, Some(binding)) => Some(binding.function.clone()),
            (None, None) => {
                eprintln!("Warning: server callback `{}` has no `server` binding", callback.id);
                None
            }
        };
        if let Some(function) = function.filter(|function| !builtins.contains(&function.as_str())) {
            eprintln!("Warning: `{}` uses unknown builtin `{function}`", callback.id);
        }
    }
    eprintln!("OK: {} callbacks", graph.len());
    Ok(())
}

fn graph(file: &Path) -> Result<()> {
    let app = AppFile::load(file)?;
    let graph = load_graph(&app)?;
    let server = app.bindings();
    for callback in graph.callbacks() {
        let join = |dependencies: &[callflow::Dependency]| {
            dependencies.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
        };
        let function = match (callback.function_name(), server.get(&*callback.id)) {
            (Some(name), _) => format!("clientside {name}"),
            (None, Some(binding)) => format!("server {} ({} ms)", binding.function, binding.delay_ms),
            (None, None) => "server (unbound)".to_owned(),
        };
        println!("#{} {}", callback.index, callback.id);
        println!("    inputs: {}", join(&callback.inputs));
        if !callback.state.is_empty() {
            println!("    state:  {}", join(&callback.state));
        }
        println!("    via:    {function}");
        if callback.prevent_initial_call {
            println!("    prevent_initial_call");
        }
    }
    Ok(())
}

async fn run(file: &Path, events: Option<&Path>, config: Option<&Path>, state: Option<PathBuf>, trace: bool) -> Result<()> {
    let app = AppFile::load(file)?;
    let graph = load_graph(&app)?;
    let events = match events {
        Some(path) => app::load_events(path)?,
        None => Vec::new(),
    };
    let mut config = match config {
        Some(path) => SchedulerConfig::load(path)?,
        None => SchedulerConfig::discover(file.parent().unwrap_or(Path::new(".")))?,
    };
    if trace {
        config.record_ledger = true;
    }

    let state = state.map(StateFile::new);
    let persistence = Rc::new(match &state {
        Some(state) => state.load()?,
        None => MemoryPersistence::new(),
    });
    let collaborators = Collaborators::default()
        .with_backend(Rc::new(BuiltinBackend::new(app.bindings())))
        .with_clientside(functions::registry())
        .with_persistence(persistence.clone());
    let mut scheduler = Scheduler::new(Arc::new(graph), Layout::new(app.layout), config, collaborators);

    scheduler.start();
    scheduler.run_until_idle().await?;
    for event in &events {
        if event.after_ms > 0 {
            tokio::time::sleep(Duration::from_millis(event.after_ms)).await;
        }
        scheduler.dispatch(event.change()?)?;
        scheduler.run_until_idle().await?;
    }

    print!("{}", render::outline(scheduler.layout(), &scheduler.loading_map()));
    eprintln!(
        "{} callbacks completed in {} ticks",
        scheduler.completed(),
        scheduler.current_tick()
    );
    if trace {
        for entry in scheduler.ledger().entries() {
            println!("{}", serde_json::to_string(entry)?);
        }
        println!("{}", serde_json::to_string_pretty(&scheduler.snapshot())?);
    }
    if let Some(state) = &state {
        state.save(&persistence)?;
    }
    Ok(())
}
