//! CLI command handler: settings → logging → pool → jobs, one after another.

use anyhow::{Context, Result};
use colored::Colorize;
use log::{debug, info, warn};
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::connector::sqlite::{insert_records, open_store};
use crate::connector::{ConnectionPool, SqliteConnector};
use crate::engine::arg_parser::{Cli, Commands, ImportArgs, RunArgs};
use crate::engine::runner::JobRunner;
use crate::error::SetupError;
use crate::jobs::{ExecutionMode, JobRegistry};
use crate::logging::{JobLogger, StdLogger};
use crate::pipeline::process_properties;
use crate::types::Record;
use crate::utils::{JobSettings, resolve_secret, setup_logging};

/// CLI values override file values.
fn apply_run_args(settings: &mut JobSettings, args: &RunArgs) {
    if let Some(e) = &args.common.endpoint {
        settings.endpoint = Some(e.clone());
    }
    if !args.job.is_empty() {
        settings.job_names = args.job.clone();
    }
    if let Some(t) = args.threads {
        settings.threads = t;
    }
    if let Some(p) = args.page_size {
        settings.page_size = p;
    }
    if let Some(h) = args.max_hours {
        settings.max_run_hours = h;
    }
    if let Some(l) = args.log_level {
        settings.log_level = l;
    }
    if let Some(d) = &args.checkpoint_dir {
        settings.checkpoint_dir = d.clone();
    }
    if let Some(p) = &args.principal {
        settings.principal = Some(p.clone());
    }
    if let Some(c) = &args.caller_id {
        settings.caller_id = Some(c.clone());
    }
    if let Some(p) = args.progress {
        settings.progress = p;
    }
    if let Some(f) = &args.input_file {
        settings.input_file = Some(f.clone());
    }
}

/// Dispatch the subcommand. `Ok(false)` means a job ran but did not complete.
pub fn handle_run(cli: &Cli) -> Result<bool> {
    let cwd = std::env::current_dir().context("resolve current directory")?;
    let mut settings = JobSettings::load(&cwd, cli.config.as_deref())?;
    if let Some(v) = cli.verbose {
        settings.verbose = v;
    }
    match &cli.command {
        Commands::Run(args) => {
            apply_run_args(&mut settings, args);
            setup_logging(settings.log_level, settings.verbose);
            run_jobs(&cwd, settings)
        }
        Commands::List => {
            setup_logging(settings.log_level, settings.verbose);
            list_jobs(&JobRegistry::with_builtin());
            Ok(true)
        }
        Commands::Import(args) => {
            setup_logging(settings.log_level, settings.verbose);
            if let Some(e) = &args.common.endpoint {
                settings.endpoint = Some(e.clone());
            }
            import_records(&settings.endpoint_or_default(&cwd), args)?;
            Ok(true)
        }
    }
}

fn output_context(logger: &dyn JobLogger, settings: &JobSettings) {
    logger.log_message(
        &format!("{} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
        None,
    );
    logger.log_message(&format!("Run id: {}", settings.run_id), None);
    logger.log_event("Settings", &settings.properties(), None);
    debug!("{} CONFIG:{:#?}", env!("CARGO_PKG_NAME").to_uppercase(), settings.properties());
}

fn run_jobs(cwd: &Path, mut settings: JobSettings) -> Result<bool> {
    settings.validate()?;
    if settings.job_names.is_empty() {
        return Err(SetupError::MissingSetting("jobs.names").into());
    }
    settings.secret = resolve_secret(
        cwd,
        settings.auth_mode,
        settings.principal.as_deref(),
        settings.secret.as_deref(),
    )?;

    let registry = JobRegistry::with_builtin();
    let jobs = registry.resolve_all(&settings.job_names)?;

    let logger: Arc<dyn JobLogger> = Arc::new(
        StdLogger::new(settings.log_level).with_context(process_properties(&settings.run_id)),
    );
    output_context(logger.as_ref(), &settings);

    let endpoint = settings.endpoint_or_default(cwd);
    let connector = Arc::new(
        SqliteConnector::new(&endpoint, settings.auth_mode)
            .with_credentials(settings.principal.clone(), settings.secret.clone()),
    );
    let pool = ConnectionPool::connect(connector, settings.pool_options(), Arc::clone(&logger))?;

    let interrupt = Arc::new(AtomicBool::new(false));
    {
        let flag = Arc::clone(&interrupt);
        ctrlc::set_handler(move || {
            flag.store(true, Ordering::SeqCst);
            eprintln!("Interrupt received; stopping after the current round");
        })
        .context("install Ctrl+C handler")?;
    }

    let runner = JobRunner::new(&pool, settings.engine_options(), Arc::clone(&logger))
        .with_interrupt(Arc::clone(&interrupt));
    let mut all_completed = true;
    for job in &jobs {
        if interrupt.load(Ordering::SeqCst) {
            warn!("Interrupted; not starting {}", job.name());
            all_completed = false;
            continue;
        }
        let summary = runner.run(job.as_ref())?;
        info!(
            "{}: {} rounds, {} retrieved, {} succeeded, {} failed, {} skipped, {} transient retries",
            job.name(),
            summary.rounds,
            summary.retrieved,
            summary.succeeded,
            summary.failed,
            summary.skipped,
            summary.transient_retries
        );
        all_completed &= summary.completed;
    }
    Ok(all_completed)
}

fn list_jobs(registry: &JobRegistry) {
    for (name, job) in registry.instances() {
        let mode = match job.mode() {
            ExecutionMode::BoundedScan => "scan",
            ExecutionMode::IterativeDrain => "drain",
            ExecutionMode::InputFile => "input",
        };
        let state = if job.is_enabled() {
            "enabled".green()
        } else {
            "disabled".yellow()
        };
        println!("{:<28} {:<24} {:<6} {}  {}", name.cyan(), job.type_name(), mode, state, job.name());
    }
}

fn import_records(endpoint: &Path, args: &ImportArgs) -> Result<()> {
    let file = std::fs::File::open(&args.file)
        .with_context(|| format!("open {}", args.file.display()))?;
    let mut records = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("read {}", args.file.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let record: Record = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid record", args.file.display(), i + 1))?;
        records.push(record);
    }
    let mut conn = open_store(endpoint)?;
    let n = insert_records(&mut conn, &records)?;
    info!("Imported {} records into {}", n, endpoint.display());
    Ok(())
}
