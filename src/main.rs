mod cli;

use reelcast::maintenance::{AccountSnapshot, MemoryAccountStore, PurgeJob};
use rc_sched::DelayedOperationQueue;
use reelcast::transcode::{self, TranscodeOptions};

use anyhow::{bail, Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use rc_av::{Codec, ToolRegistry, TranscodePlan};
use rc_core::config::Config;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, BufWriter};
use tokio_util::sync::CancellationToken;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "reelcast=trace,rc_av=trace,rc_sched=debug,rc_core=debug".to_string()
        } else {
            "reelcast=info,rc_av=info,rc_sched=info".to_string()
        }
    });

    // Logs go to stderr; stdout may carry media bytes.
    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Transcode { source, output } => {
            let config = Config::load_or_default(cli.config.as_deref());
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_transcode(source.into(), &output, &config))
        }
        Commands::Plan { source, json } => {
            let config = Config::load_or_default(cli.config.as_deref());
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(show_plan(source.into(), &config, json))
        }
        Commands::Codecs { json } => list_codecs(json),
        Commands::CheckTools => {
            let config = Config::load_or_default(cli.config.as_deref());
            check_tools(&config)
        }
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Purge { accounts, dry_run } => {
            let config = Config::load_or_default(cli.config.as_deref());
            purge_accounts(&accounts, &config, dry_run)
        }
        Commands::Maintain { accounts, run_for } => {
            let config = Config::load_or_default(cli.config.as_deref());
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_maintenance(
                &accounts,
                &config,
                run_for.map(Duration::from_secs),
            ))
        }
        Commands::Version => {
            println!("reelcast {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn run_transcode(options: TranscodeOptions, output: &str, config: &Config) -> Result<()> {
    let prepared = transcode::prepare(&options, config).await?;
    let plan = prepared.plan()?;

    tracing::info!(
        input = %options.input.display(),
        mime = plan.mime_type(),
        direct = plan.is_direct(),
        "Starting transcode"
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, stopping encoder");
            on_signal.cancel();
        }
    });

    let writer: Box<dyn AsyncWrite + Unpin + Send> = if output == "-" {
        Box::new(tokio::io::stdout())
    } else {
        let file = tokio::fs::File::create(output)
            .await
            .with_context(|| format!("Failed to create output file {output}"))?;
        Box::new(BufWriter::new(file))
    };

    let bytes = transcode::run_to_writer(&prepared, &plan, writer, &cancel).await?;
    if output != "-" {
        println!("Wrote {bytes} bytes to {output}");
    }

    Ok(())
}

async fn show_plan(options: TranscodeOptions, config: &Config, json: bool) -> Result<()> {
    let prepared = transcode::prepare(&options, config).await?;
    let plan = prepared.plan()?;

    if json {
        let value = serde_json::json!({
            "mime_type": plan.mime_type(),
            "extension": plan.extension(),
            "plan": plan,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    match &plan {
        TranscodePlan::Direct { path, mime_type } => {
            println!("Mode: direct");
            println!("Source: {}", path.display());
            println!("MIME type: {mime_type}");
        }
        TranscodePlan::Encode {
            codec,
            invocation,
            params,
        } => {
            println!("Mode: encode");
            println!("Codec: {} ({})", codec.profile().name, codec.id());
            println!("MIME type: {}", codec.mime_type());
            println!("Extension: {}", codec.extension());
            println!("Audio bitrate: {} kbit/s", params.audio_bitrate);
            if let Some(dims) = params.dimensions {
                println!("Video bitrate: {} kbit/s", params.video_bitrate);
                println!("Dimensions: {dims}");
            }
            println!("\nCommand:\n  {}", invocation.display());
        }
    }

    Ok(())
}

fn list_codecs(json: bool) -> Result<()> {
    if json {
        let profiles: Vec<_> = Codec::ALL.iter().map(|c| c.profile()).collect();
        println!("{}", serde_json::to_string_pretty(&profiles)?);
        return Ok(());
    }

    println!(
        "{:<8} {:<12} {:<6} {:<5} {:<12} {}",
        "ID", "NAME", "KIND", "EXT", "MIME", "ENCODER"
    );
    for codec in Codec::ALL {
        let p = codec.profile();
        println!(
            "{:<8} {:<12} {:<6} {:<5} {:<12} {}",
            p.id,
            p.name,
            p.kind.to_string(),
            p.extension,
            p.mime_type,
            p.encoder_codec
        );
    }

    Ok(())
}

fn check_tools(config: &Config) -> Result<()> {
    println!("Checking external tools...\n");

    let registry = ToolRegistry::discover(&config.tools);
    let tools = registry.check_all();
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version);
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Only direct streaming will work.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = Config::load(p)?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };

    println!("  Default codec: {}", config.transcode.default_codec);
    println!("  Max encode time: {}s", config.transcode.max_encode_secs);
    println!("  Maintenance enabled: {}", config.maintenance.enabled);
    println!(
        "  Session timeout: {} minutes",
        config.maintenance.session_timeout_minutes
    );
    println!("  Folders: {}", config.folders.len());

    let warnings = config.validate();
    if !warnings.is_empty() {
        println!("\nWarnings:");
        for warning in &warnings {
            println!("  - {warning}");
        }
    }

    Ok(())
}

fn read_accounts(accounts: &Path) -> Result<MemoryAccountStore> {
    let contents = std::fs::read_to_string(accounts)
        .with_context(|| format!("Failed to read accounts file {}", accounts.display()))?;
    let snapshot: AccountSnapshot = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse accounts file {}", accounts.display()))?;
    Ok(MemoryAccountStore::from_snapshot(snapshot))
}

fn write_accounts(accounts: &Path, store: &MemoryAccountStore) -> Result<()> {
    let json = serde_json::to_string_pretty(&store.snapshot())?;
    std::fs::write(accounts, json)
        .with_context(|| format!("Failed to write accounts file {}", accounts.display()))
}

fn purge_accounts(accounts: &Path, config: &Config, dry_run: bool) -> Result<()> {
    let store = Arc::new(read_accounts(accounts)?);
    let job = PurgeJob::from_config(store.clone(), &config.maintenance);
    let report = job.run_once(chrono::Utc::now())?;

    let verb = if dry_run { "Would purge" } else { "Purged" };
    println!("{verb} {} expired users", report.users_purged);
    println!("{verb} {} idle sessions", report.sessions_purged);
    if report.failures > 0 {
        println!("{} deletes failed", report.failures);
    }

    if !dry_run {
        write_accounts(accounts, &store)?;
    }

    Ok(())
}

async fn run_maintenance(accounts: &Path, config: &Config, run_for: Option<Duration>) -> Result<()> {
    let settings = &config.maintenance;
    if !settings.enabled {
        println!("Maintenance is disabled in the configuration; nothing to run");
        return Ok(());
    }
    if settings.purge_interval_secs == 0 {
        bail!("maintenance.purge_interval_secs must be greater than 0");
    }

    let store = Arc::new(read_accounts(accounts)?);
    let interval = Duration::from_secs(settings.purge_interval_secs);

    let queue = DelayedOperationQueue::start("maintenance")?;
    let first = Arc::new(PurgeJob::from_config(store.clone(), settings)).schedule(&queue.handle(), interval);
    tracing::info!(op = %first, interval_secs = settings.purge_interval_secs, "Purge job scheduled");
    println!(
        "Purging {} every {}s; press Ctrl-C to stop",
        accounts.display(),
        settings.purge_interval_secs
    );

    match run_for {
        Some(limit) => {
            tokio::select! {
                r = tokio::signal::ctrl_c() => r?,
                _ = tokio::time::sleep(limit) => {}
            }
        }
        None => tokio::signal::ctrl_c().await?,
    }

    tracing::info!("Stopping maintenance");
    tokio::task::spawn_blocking(move || queue.shutdown()).await?;

    write_accounts(accounts, &store)?;
    let remaining = store.snapshot();
    println!(
        "Maintenance stopped; {} users and {} sessions remain",
        remaining.users.len(),
        remaining.sessions.len()
    );

    Ok(())
}
