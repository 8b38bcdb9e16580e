use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use xml_report_pipeline::cli::{Cli, Command, ConvertArgs, ValidateArgs};
use xml_report_pipeline::config::{Config, ConfigManager};
use xml_report_pipeline::{
    ArtifactCache, ConversionService, DiagnosticsExt, FormatRegistry, Output, ReportPipeline,
    ValidationService, Verdict, XmlSource,
};

const EXIT_OK: u8 = 0;
const EXIT_REJECTED: u8 = 1;
const EXIT_FAILURE: u8 = 2;

fn main() -> ExitCode {
    let cli = Cli::parse_args();

    if let Err(message) = cli.validate() {
        eprintln!("Error: {}", message);
        return ExitCode::from(EXIT_FAILURE);
    }

    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

fn run(cli: Cli) -> Result<u8> {
    let config = ConfigManager::load_config(&cli).context("Failed to load configuration")?;
    init_logging(&config.logging.level);
    debug!(?config, "Configuration loaded");

    let registry = config.registry()?;
    let cache = config
        .cache
        .enabled
        .then(|| Arc::new(ArtifactCache::new(config.cache.max_entries)));
    let output = Output::new(config.output.format, config.output.verbosity);

    let code = match &cli.command {
        Command::Validate(args) => validate(args, &config, &registry, cache.clone(), &output)?,
        Command::Convert(args) => convert(args, registry, cache.clone(), &output)?,
        Command::Formats => {
            print!("{}", output.format_registry(&registry));
            EXIT_OK
        }
    };

    if let Some(cache) = cache {
        debug!(stats = ?cache.stats(), "Artifact cache usage");
    }
    Ok(code)
}

/// Log to stderr; `RUST_LOG` wins over the configured level
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn validate(
    args: &ValidateArgs,
    config: &Config,
    registry: &FormatRegistry,
    cache: Option<Arc<ArtifactCache>>,
    output: &Output,
) -> Result<u8> {
    let schemas: Vec<PathBuf> = match &args.format {
        Some(key) => registry.require(key)?.schema_locations().to_vec(),
        None => args.schemas.clone(),
    };

    let service = match cache {
        Some(cache) => ValidationService::with_cache(cache),
        None => ValidationService::new(),
    };

    let threads = ConfigManager::get_thread_count(config);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .context("Failed to build validation thread pool")?;
    info!(files = args.files.len(), schemas = schemas.len(), threads, "Validating");

    let results = pool.install(|| service.validate_files(&schemas, &args.files));
    print!("{}", output.format_results(&results));

    Ok(if results.error_files > 0 {
        EXIT_FAILURE
    } else if results.invalid_files > 0 {
        EXIT_REJECTED
    } else {
        EXIT_OK
    })
}

fn convert(
    args: &ConvertArgs,
    registry: FormatRegistry,
    cache: Option<Arc<ArtifactCache>>,
    output: &Output,
) -> Result<u8> {
    let params = args.parameters();
    let params = (!params.is_empty()).then_some(&params);

    match (&args.format, &args.stylesheet) {
        (Some(key), _) => {
            let pipeline = match cache {
                Some(cache) => ReportPipeline::with_cache(registry, cache),
                None => ReportPipeline::new(registry),
            };

            if let Some(target) = &args.output {
                let outcome = pipeline.process(key, &args.input, target, params)?;
                print!(
                    "{}",
                    output.format_outcome(&args.input.display().to_string(), &outcome)
                );
                return Ok(if outcome.is_converted() {
                    EXIT_OK
                } else {
                    EXIT_REJECTED
                });
            }

            // Standard output carries the converted document, so diagnostics go to stderr.
            let format = pipeline.registry().require(key)?;
            let Some(stylesheet) = format.stylesheet() else {
                bail!("Report format '{}' has no style-sheet", key);
            };
            let diagnostics = format.validate(pipeline.validation(), &args.input)?;
            for diagnostic in &diagnostics {
                eprintln!("{}", output.format_diagnostic(diagnostic));
            }
            if diagnostics.verdict() == Verdict::Invalid {
                return Ok(EXIT_REJECTED);
            }

            let mut stdout = io::stdout().lock();
            pipeline.conversion().convert_to_writer(
                XmlSource::file(stylesheet),
                XmlSource::file(&args.input),
                &mut stdout,
                params,
            )?;
            stdout.flush()?;
            Ok(EXIT_OK)
        }
        (None, Some(stylesheet)) => {
            let service = match cache {
                Some(cache) => ConversionService::with_cache(cache),
                None => ConversionService::new(),
            };

            match &args.output {
                Some(target) => {
                    service.convert_files(stylesheet, &args.input, target, params)?;
                    info!(output = %target.display(), "Report converted");
                }
                None => {
                    let mut stdout = io::stdout().lock();
                    service.convert_to_writer(
                        XmlSource::file(stylesheet),
                        XmlSource::file(&args.input),
                        &mut stdout,
                        params,
                    )?;
                }
            }
            Ok(EXIT_OK)
        }
        (None, None) => bail!("Either --format or --stylesheet is required"),
    }
}
