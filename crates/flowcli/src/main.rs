// crates/flowcli/src/main.rs

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use flowcore::{ElementSpec, EventBus, FlowDefinition, FlowEvent, Map, RunConfig};
use flowelements::{default_providers, standard_registry};
use flowruntime::{FlowRuntime, PortDefinition, RunOutcome, RunRequest, RuntimeConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flow")]
#[command(about = "Flow Engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a flow definition file
    Run {
        /// Path to flow definition JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Initial inputs as a JSON object
        #[arg(short, long)]
        input: Option<String>,

        /// Run config as a JSON object
        #[arg(short, long)]
        config: Option<String>,

        /// Print events as wire envelopes
        #[arg(long)]
        json: bool,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a flow definition file
    Validate {
        /// Path to flow definition JSON file
        file: PathBuf,
    },

    /// List available element types
    Elements,

    /// Create a new example flow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "flow.json")]
        output: PathBuf,
    },
}

fn runtime() -> FlowRuntime {
    let registry = standard_registry(Arc::new(default_providers()));
    FlowRuntime::with_config(Arc::new(registry), RuntimeConfig::from_env())
}

fn load_definition(file: &Path) -> Result<FlowDefinition> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid flow definition in {}", file.display()))
}

fn parse_object(raw: Option<&str>, what: &str) -> Result<Map> {
    match raw {
        None => Ok(Map::new()),
        Some(text) => match serde_json::from_str(text)? {
            serde_json::Value::Object(map) => Ok(map),
            _ => bail!("{} must be a JSON object", what),
        },
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            input,
            config,
            json,
            verbose,
        } => {
            let default_level = if verbose { "debug" } else { "info" };
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
                )
                .init();

            run_flow(&file, input.as_deref(), config.as_deref(), json).await?;
        }

        Commands::Validate { file } => {
            validate_flow(&file)?;
        }

        Commands::Elements => {
            list_elements();
        }

        Commands::Init { output } => {
            create_example_flow(&output)?;
        }
    }

    Ok(())
}

fn print_event(event: &FlowEvent) {
    match event {
        FlowEvent::FlowStarted { run_id, .. } => println!("▶️  Run {} started", run_id),
        FlowEvent::ElementStarted {
            element_id,
            element_type,
        } => println!("  ⚡ Starting element: {} ({})", element_id, element_type),
        FlowEvent::Processing {
            element_id,
            message,
        } => println!("     ℹ️  [{}] {}", element_id, message),
        FlowEvent::LlmWarning {
            element_id,
            warning,
            ..
        } => println!("     ⚠️  [{}] {}", element_id, warning),
        FlowEvent::ApiError { element_id, error } => {
            println!("     ⚠️  [{}] {}", element_id, error)
        }
        FlowEvent::BranchSelected {
            element_id,
            branches,
        } => println!("  🔀 {} selected {}", element_id, branches.join(", ")),
        FlowEvent::ElementCompleted { element_id, .. } => {
            println!("  ✅ Element {} completed", element_id)
        }
        FlowEvent::ElementFailed {
            element_id, error, ..
        } => println!("  ❌ Element {} failed: {}", element_id, error),
        FlowEvent::ElementSkipped { element_id, reason } => {
            println!("  ⏭️  Element {} skipped: {}", element_id, reason)
        }
        FlowEvent::FlowCompleted { duration_ms, .. } => {
            println!("✨ Flow completed successfully in {}ms", duration_ms)
        }
        FlowEvent::FlowError { error } => println!("💥 Flow failed: {}", error),
        _ => {}
    }
}

async fn run_flow(file: &Path, input: Option<&str>, config: Option<&str>, json: bool) -> Result<()> {
    let definition = load_definition(file)?;
    let inputs = parse_object(input, "Input")?;
    let config: RunConfig = match config {
        Some(text) => serde_json::from_str(text).context("Invalid run config")?,
        None => RunConfig::default(),
    };

    if !json {
        println!("🚀 Loading flow from: {}", file.display());
        println!(
            "📋 Flow: {}",
            definition.name.as_deref().unwrap_or("(unnamed)")
        );
        println!("   Elements: {}", definition.elements.len());
        println!("   Connections: {}", definition.connections.len());
        println!();
    }

    let flow_id = file
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "flow".to_string());
    let request = RunRequest::new(flow_id, definition)
        .with_inputs(inputs)
        .with_config(config);

    let (bus, mut events) = EventBus::channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if json {
                match event.to_json() {
                    Ok(line) => println!("{}", line),
                    Err(e) => tracing::warn!("Failed to serialize event: {}", e),
                }
            } else {
                print_event(&event);
            }
        }
    });

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let report = runtime().run(request, &bus, cancel).await;
    drop(bus);
    printer.await?;

    match report.outcome {
        RunOutcome::Completed { final_output } => {
            if !json {
                println!();
                println!("📤 Output:");
                println!("{}", final_output);
            }
            Ok(())
        }
        RunOutcome::Failed { error } => bail!("Run {} failed: {}", report.run_id, error),
        RunOutcome::Aborted => bail!("Run {} aborted", report.run_id),
    }
}

fn validate_flow(file: &Path) -> Result<()> {
    println!("🔍 Validating flow: {}", file.display());

    let definition = load_definition(file)?;
    let graph = runtime().validate(&definition)?;

    println!("✅ Flow is valid:");
    println!("   Elements: {}", graph.len());
    println!("   Connections: {}", graph.connections().len());
    println!("   Order: {}", graph.element_ids().join(" → "));
    if let Some(output) = graph.output_element() {
        println!("   Output element: {}", output);
    }

    Ok(())
}

fn list_elements() {
    println!("📦 Available Element Types:");
    println!();

    let registry = standard_registry(Arc::new(default_providers()));
    for element_type in registry.list_element_types() {
        match registry.get_metadata(&element_type) {
            Some(metadata) => {
                println!("  • {} ({})", element_type, metadata.category);
                println!("    {}", metadata.description);
                if !metadata.inputs.is_empty() {
                    println!("    in:  {}", port_list(&metadata.inputs));
                }
                println!("    out: {}", port_list(&metadata.outputs));
            }
            None => println!("  • {}", element_type),
        }
    }
}

fn port_list(ports: &[PortDefinition]) -> String {
    ports
        .iter()
        .map(|p| format!("{}: {}", p.name, p.port_type))
        .collect::<Vec<_>>()
        .join(", ")
}

fn example_flow() -> FlowDefinition {
    let mut flow = FlowDefinition::new("Example greeting flow");

    let profile = flow.add_element(
        ElementSpec::new("profile", "generator.datablock")
            .with_name("Customer profile")
            .with_parameter(
                "data",
                serde_json::json!({"customer": {"name": "Ada", "tier": "gold"}}),
            ),
    );
    let pick = flow.add_element(
        ElementSpec::new("pick_name", "selector")
            .with_name("Pick name")
            .with_parameter(
                "paths",
                serde_json::json!(["customer.nickname", "customer.name"]),
            )
            .with_parameter("default", "there"),
    );
    let greet = flow.add_element(
        ElementSpec::new("greet", "llm.generate")
            .with_name("Write greeting")
            .with_parameter("mode", "stream")
            .with_parameter("prompt", "Hello {{ context }}, thanks for writing in!"),
    );
    let render = flow.add_element(
        ElementSpec::new("render", "output.text").with_name("Final text"),
    );

    flow.connect(profile, "data", pick.clone(), "document");
    flow.connect(pick, "value", greet.clone(), "context");
    flow.connect(greet, "response", render.clone(), "text");
    flow.with_output_element(render)
}

fn create_example_flow(output: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(&example_flow())?;
    std::fs::write(output, json)?;

    println!("✨ Created example flow: {}", output.display());
    println!();
    println!("Run it with:");
    println!("  flow run --file {}", output.display());

    Ok(())
}
