mod response;

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{Parser, Subcommand, ValueEnum};
use prodshot_contracts::events::{Diagnostics, EventWriter, TracingSink};
use prodshot_contracts::models::{ModelRegistry, DEFAULT_MODEL_ID};
use prodshot_contracts::now_utc_iso;
use prodshot_contracts::products::{
    ProductSpec, DEFAULT_COUNT, DEFAULT_DIMENSION, DEFAULT_GUIDANCE, DEFAULT_STEPS, DEFAULT_STYLE,
};
use prodshot_contracts::prompts::Style;
use prodshot_engine::artifacts::OutputMode;
use prodshot_engine::device::{DevicePreference, DeviceSelector};
use prodshot_engine::interrupt::InterruptFlag;
use prodshot_engine::{EngineConfig, Orchestrator};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use crate::response::{batch_data, session_data, Response, INTERNAL_ERROR};

#[derive(Debug, Parser)]
#[command(
    name = "prodshot",
    version,
    about = "Generate promotional product images and report them as JSON"
)]
struct Cli {
    #[command(flatten)]
    engine: EngineArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate variations for one product.
    Generate(GenerateArgs),
    /// Generate every product listed in a JSON array.
    Batch(BatchArgs),
    /// List the supported styles.
    Styles,
    /// List the known models.
    Models,
    /// Report the compute device that would be used.
    Device,
}

#[derive(Debug, Clone, clap::Args)]
struct EngineArgs {
    #[arg(long, global = true, env = "PRODSHOT_MODEL", default_value = DEFAULT_MODEL_ID)]
    model: String,
    #[arg(long, global = true, env = "PRODSHOT_IMAGES_DIR", default_value = "images")]
    images_dir: PathBuf,
    #[arg(long, global = true, env = "PRODSHOT_METADATA_DIR", default_value = "metadata")]
    metadata_dir: PathBuf,
    #[arg(long, global = true, env = "PRODSHOT_CACHE_DIR", default_value = "models")]
    cache_dir: PathBuf,
    #[arg(long, global = true, env = "PRODSHOT_DEVICE", value_enum, default_value_t = DeviceArg::Auto)]
    device: DeviceArg,
    #[arg(long, global = true, value_enum, default_value_t = OutputArg::Inline)]
    output_mode: OutputArg,
    /// Append diagnostics as JSONL to this file.
    #[arg(long, global = true)]
    events: Option<PathBuf>,
    /// Compact JSON on stdout and no diagnostics on stderr.
    #[arg(long, global = true)]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DeviceArg {
    Auto,
    Cpu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputArg {
    Inline,
    File,
}

#[derive(Debug, Clone, clap::Args)]
struct GenerateArgs {
    #[arg(long, alias = "name")]
    product: String,
    #[arg(long)]
    description: String,
    #[arg(long, default_value = DEFAULT_STYLE)]
    style: String,
    #[arg(long, alias = "count", default_value_t = DEFAULT_COUNT)]
    variations: u32,
    #[arg(long, default_value_t = DEFAULT_DIMENSION)]
    width: u32,
    #[arg(long, default_value_t = DEFAULT_DIMENSION)]
    height: u32,
    #[arg(long, default_value_t = DEFAULT_STEPS)]
    steps: u32,
    #[arg(long, default_value_t = DEFAULT_GUIDANCE)]
    guidance: f32,
}

#[derive(Debug, Clone, clap::Args)]
struct BatchArgs {
    /// JSON array of products; `-` reads stdin.
    #[arg(long)]
    products: PathBuf,
}

impl EngineArgs {
    fn config(&self) -> EngineConfig {
        EngineConfig {
            model_id: self.model.clone(),
            images_dir: self.images_dir.clone(),
            metadata_dir: self.metadata_dir.clone(),
            cache_dir: self.cache_dir.clone(),
            output_mode: match self.output_mode {
                OutputArg::Inline => OutputMode::Inline,
                OutputArg::File => OutputMode::File,
            },
            device: self.device_preference(),
        }
    }

    fn device_preference(&self) -> DevicePreference {
        match self.device {
            DeviceArg::Auto => DevicePreference::Auto,
            DeviceArg::Cpu => DevicePreference::Cpu,
        }
    }

    fn diagnostics(&self) -> Diagnostics {
        let mut diagnostics = Diagnostics::new().with_sink(TracingSink);
        if let Some(path) = &self.events {
            let run_id = format!("run-{}", chrono::Utc::now().format("%Y%m%dT%H%M%S"));
            diagnostics = diagnostics.with_sink(EventWriter::new(path, run_id));
        }
        diagnostics
    }
}

impl GenerateArgs {
    /// Range checks come from `ProductSpec`; the style must name a catalogue
    /// entry and is stored under its canonical name.
    fn product_spec(&self) -> std::result::Result<ProductSpec, BTreeMap<String, String>> {
        let style = Style::from_name(&self.style);
        let product = ProductSpec {
            name: self.product.trim().to_string(),
            description: self.description.trim().to_string(),
            style: style
                .map(|style| style.name().to_string())
                .unwrap_or_else(|| self.style.trim().to_lowercase()),
            count: self.variations,
            width: self.width,
            height: self.height,
            steps: self.steps,
            guidance_scale: self.guidance,
        };
        let mut errors = match product.validate() {
            Ok(()) => BTreeMap::new(),
            Err(errors) => errors.fields().clone(),
        };
        if style.is_none() {
            let known: Vec<&str> = Style::ALL.iter().map(Style::name).collect();
            errors.insert(
                "style".to_string(),
                format!("unknown style '{}'; expected one of {}", self.style, known.join(", ")),
            );
        }
        if errors.is_empty() {
            Ok(product)
        } else {
            Err(errors)
        }
    }
}

fn main() {
    let code = match Cli::try_parse() {
        Ok(cli) => run(cli),
        Err(err) => match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                let _ = err.print();
                0
            }
            _ => {
                let quiet = std::env::args().any(|arg| arg == "--quiet");
                emit(&argument_error(&err), quiet)
            }
        },
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> i32 {
    let quiet = cli.engine.quiet;
    init_tracing(quiet);
    let interrupt = InterruptFlag::new();
    let handler_flag = interrupt.clone();
    if let Err(err) = ctrlc::set_handler(move || handler_flag.raise()) {
        tracing::warn!("failed to install interrupt handler: {err}");
    }

    let response = match execute(&cli, interrupt) {
        Ok(response) => response,
        Err(err) => Response::from_error(&err, quiet),
    };
    emit(&response, quiet)
}

fn execute(cli: &Cli, interrupt: InterruptFlag) -> Result<Response> {
    match &cli.command {
        Command::Styles => Ok(styles_response()),
        Command::Models => Ok(models_response(&ModelRegistry::default())),
        Command::Device => {
            let selector = DeviceSelector::for_preference(cli.engine.device_preference());
            let device = selector.select(&cli.engine.diagnostics());
            Ok(Response::ok(
                format!("using device {}", device.id()),
                json!({ "device": device }),
            ))
        }
        Command::Generate(args) => {
            let product = match args.product_spec() {
                Ok(product) => product,
                Err(errors) => return Ok(Response::validation(errors)),
            };
            let mut engine =
                Orchestrator::new(cli.engine.config(), cli.engine.diagnostics(), interrupt)?;
            let report = engine.generate_images(&product);
            let images_dir = absolute(engine.images_dir())?;
            engine.cleanup();
            let report = report?;
            let summary = &report.session.summary;
            Ok(Response::ok(
                format!(
                    "generated {} of {} requested images",
                    summary.succeeded, summary.requested
                ),
                session_data(&report.session, &images_dir, &report.metadata_path),
            ))
        }
        Command::Batch(args) => {
            let products = match read_products(&args.products) {
                Ok(products) => products,
                Err(err) => {
                    let mut errors = BTreeMap::new();
                    errors.insert("products".to_string(), format!("{err:#}"));
                    return Ok(Response::validation(errors));
                }
            };
            let mut engine =
                Orchestrator::new(cli.engine.config(), cli.engine.diagnostics(), interrupt)?;
            let report = engine.generate_batch(products);
            engine.cleanup();
            let report = report?;
            let stats = &report.batch.stats;
            Ok(Response::ok(
                format!(
                    "{} of {} products produced images ({} images, {} failed)",
                    stats.products_succeeded,
                    report.batch.total_products,
                    stats.images_succeeded,
                    stats.images_failed
                ),
                batch_data(&report.batch, &report.metadata_path)?,
            ))
        }
    }
}

fn styles_response() -> Response {
    let styles: Vec<Value> = Style::ALL
        .iter()
        .map(|style| json!({ "name": style.name(), "fragment": style.fragment() }))
        .collect();
    Response::ok(
        format!("{} styles available", styles.len()),
        json!({ "default": DEFAULT_STYLE, "styles": styles }),
    )
}

fn models_response(registry: &ModelRegistry) -> Response {
    let models: Vec<Value> = registry
        .list()
        .map(|model| {
            json!({
                "name": model.name,
                "class": model.class,
                "label": model.class.label(),
                "recommended_for": model.recommended_for,
            })
        })
        .collect();
    Response::ok(
        format!("{} models available", models.len()),
        json!({ "default": DEFAULT_MODEL_ID, "models": models }),
    )
}

fn read_products(path: &Path) -> Result<Vec<Value>> {
    let raw = if path == Path::new("-") {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("failed to read products from stdin")?;
        buffer
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?
    };
    parse_products(&raw)
}

fn parse_products(raw: &str) -> Result<Vec<Value>> {
    let value: Value = serde_json::from_str(raw).context("products file is not valid JSON")?;
    match value {
        Value::Array(items) if !items.is_empty() => Ok(items),
        Value::Array(_) => anyhow::bail!("products list is empty"),
        _ => anyhow::bail!("products file must contain a JSON array"),
    }
}

fn argument_error(err: &clap::Error) -> Response {
    let mut errors = BTreeMap::new();
    let text = err.to_string();
    let message = text
        .lines()
        .next()
        .unwrap_or_default()
        .trim_start_matches("error: ")
        .to_string();
    errors.insert("arguments".to_string(), message);
    Response::validation(errors)
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(std::env::current_dir()
        .context("failed to resolve working directory")?
        .join(path))
}

fn init_tracing(quiet: bool) {
    if quiet {
        return;
    }
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Writes exactly one JSON document to stdout and returns the exit code.
fn emit(response: &Response, quiet: bool) -> i32 {
    match response.render(quiet) {
        Ok(text) => {
            println!("{text}");
            response.exit_code()
        }
        Err(err) => {
            println!("{}", render_failure(&err));
            1
        }
    }
}

/// Minimal envelope for when the real one cannot be serialized.
fn render_failure(err: &anyhow::Error) -> Value {
    json!({
        "success": false,
        "message": format!("failed to render response: {err}"),
        "timestamp": now_utc_iso(),
        "error": INTERNAL_ERROR,
    })
}
