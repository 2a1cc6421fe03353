use clap::Parser;
use dropsync::config::{ClientArgs, Commands, ServerArgs, VerifyArgs};
use dropsync::core::snapshot::wait_until_in_sync;
use dropsync::utils::error::{ErrorSeverity, SyncError};
use dropsync::utils::{logger, validation::Validate};
use dropsync::{CliConfig, FtpRemote, FtpServer, SyncEngine, TomlConfig};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = CliConfig::parse();

    let file = match &cli.config {
        Some(path) => match TomlConfig::from_file(path) {
            Ok(config) => Some(config),
            Err(e) => {
                eprintln!("❌ Failed to load config file '{}': {}", path, e);
                eprintln!("💡 Make sure the file exists and is valid TOML format");
                std::process::exit(1);
            }
        },
        None => None,
    };

    // 初始化日誌
    let format = cli
        .log_format
        .or_else(|| file.as_ref().and_then(|f| f.log_format()?.parse().ok()))
        .unwrap_or_default();
    logger::init_logger(
        cli.verbose,
        file.as_ref().and_then(|f| f.log_level()),
        format,
    );

    if let Some(config) = &file {
        if let Err(e) = config.validate() {
            fail("Configuration validation failed", &e);
        }
    }

    let outcome = match &cli.command {
        Commands::Server(args) => run_server(args, file.as_ref()).await,
        Commands::Client(args) => run_client(args, file.as_ref()).await,
        Commands::Verify(args) => run_verify(args).await,
    };

    if let Err(e) = outcome {
        fail("dropsync failed", &e);
    }
    Ok(())
}

async fn run_server(args: &ServerArgs, file: Option<&TomlConfig>) -> Result<(), SyncError> {
    let settings = args.resolve(file);
    settings.validate()?;
    let authorizer = settings.build_authorizer()?;

    tracing::info!("📁 Serving {}", settings.root.display());
    let server = FtpServer::bind(settings.options, authorizer).await?;
    server.serve_until(shutdown_signal()).await
}

async fn run_client(args: &ClientArgs, file: Option<&TomlConfig>) -> Result<(), SyncError> {
    let settings = args.resolve(file)?;
    settings.validate()?;

    tracing::info!(
        "🚀 Mirroring {} to {}:{}",
        settings.root.display(),
        settings.endpoint.host,
        settings.endpoint.port
    );

    let remote = connect_with_retry(&settings).await?;
    let engine = SyncEngine::new(remote, settings)?;
    let stats = engine.run(shutdown_signal()).await?;
    tracing::info!(
        "✅ Stopped: {} uploaded, {} unchanged, {} dirs created, {} removed, {} renamed",
        stats.files_uploaded,
        stats.files_unchanged,
        stats.dirs_created,
        stats.entries_removed,
        stats.renames
    );
    Ok(())
}

/// The server may still be starting when the client comes up.
async fn connect_with_retry(
    settings: &dropsync::ClientSettings,
) -> Result<FtpRemote, SyncError> {
    let delay = Duration::from_millis(settings.reconnect_delay_ms);
    let mut attempt = 1;
    loop {
        match FtpRemote::connect(settings.endpoint.clone()).await {
            Ok(remote) => return Ok(remote),
            Err(e) if e.is_transport() && attempt < settings.reconnect_attempts => {
                tracing::warn!(
                    "Connection attempt {}/{} failed: {}",
                    attempt,
                    settings.reconnect_attempts,
                    e
                );
                attempt += 1;
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn run_verify(args: &VerifyArgs) -> Result<(), SyncError> {
    let timeout = seconds("timeout", args.timeout)?;
    let step = seconds("step", args.step)?;

    let diff = wait_until_in_sync(&args.left, &args.right, timeout, step).await?;
    if diff.is_empty() {
        println!("✅ {} and {} are in sync", args.left.display(), args.right.display());
        return Ok(());
    }

    for line in &diff.only_left {
        println!("< {}", line);
    }
    for line in &diff.only_right {
        println!("> {}", line);
    }
    Err(SyncError::SyncFailed {
        message: format!(
            "trees still differ after {:.1}s ({} lines only in {}, {} only in {})",
            args.timeout,
            diff.only_left.len(),
            args.left.display(),
            diff.only_right.len(),
            args.right.display()
        ),
    })
}

fn seconds(field: &str, value: f64) -> Result<Duration, SyncError> {
    Duration::try_from_secs_f64(value).map_err(|e| SyncError::InvalidConfigValueError {
        field: field.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Unable to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Received Ctrl-C");
}

fn fail(context: &str, e: &SyncError) -> ! {
    // 記錄詳細錯誤信息
    tracing::error!(
        "❌ {}: {} (Category: {:?}, Severity: {:?})",
        context,
        e,
        e.category(),
        e.severity()
    );
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 {}", e.recovery_suggestion());

    // 根據錯誤嚴重程度決定退出碼
    let exit_code = match e.severity() {
        ErrorSeverity::Low | ErrorSeverity::High => 1,
        ErrorSeverity::Medium => 2,
        ErrorSeverity::Critical => 3,
    };
    std::process::exit(exit_code);
}
