use clap::{Arg, ArgMatches, Command};
use log::{error, info};
use std::fs;
use std::process::ExitCode;
use std::sync::Arc;

use proxy_config_sync::config::Config;
use proxy_config_sync::error::Result;
use proxy_config_sync::host::{FileHost, HostStorage};
use proxy_config_sync::logging::{init_logging, AuditLogger};
use proxy_config_sync::metrics;
use proxy_config_sync::reconcile::ConfigSession;
use proxy_config_sync::types::ConfigList;
use proxy_config_sync::validate::validate_for_save;
use proxy_config_sync::SyncError;

fn cli() -> Command {
    let input = Arg::new("input")
        .short('i')
        .long("input")
        .value_name("FILE")
        .help("JSON array of rows: url, method, header, data")
        .required(true);

    Command::new("proxy-config-sync")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Keeps plugin proxy settings and the host proxy store in sync")
        .arg(Arg::new("test")
            .short('t')
            .long("test")
            .help("Test configuration and exit")
            .action(clap::ArgAction::SetTrue))
        .arg(Arg::new("config")
            .short('c')
            .long("config")
            .value_name("FILE")
            .help("Configuration file path")
            .default_value("proxy-config.yaml"))
        .subcommand(Command::new("show").about("Print the stored table as JSON"))
        .subcommand(Command::new("validate")
            .about("Validate a table without saving it")
            .arg(input.clone()))
        .subcommand(Command::new("save")
            .about("Validate a table and write it to the store")
            .arg(input))
}

fn main() -> ExitCode {
    let matches = cli().get_matches();
    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or("proxy-config.yaml");

    // Если запрошена проверка конфигурации
    if matches.get_flag("test") {
        env_logger::init();
        return test_configuration(config_path);
    }

    let config = Config::load_from_file(config_path).unwrap_or_else(|e| {
        eprintln!("Failed to load config from {}: {}", config_path, e);
        eprintln!("Using default configuration");
        Config::default()
    });

    if let Err(e) = init_logging(&config.logging) {
        eprintln!("Failed to initialize logging: {}, falling back to env_logger", e);
        env_logger::init();
    }

    if config.metrics.enabled {
        metrics::init_metrics();
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(run(&config, &matches));

    if config.metrics.enabled {
        log::debug!("Metrics:\n{}", metrics::render());
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(SyncError::Validation(errors)) => {
            eprintln!("{}", errors.notification());
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: &Config, matches: &ArgMatches) -> Result<()> {
    let file_host = Arc::new(FileHost::new(&config.sync.store_path));
    let host: Arc<dyn HostStorage> = file_host.clone();

    match matches.subcommand() {
        Some(("validate", sub)) => {
            let rows = read_rows(sub)?;
            validate_for_save(&rows)?;
            println!("{} rows OK", rows.len());
            Ok(())
        }
        Some(("save", sub)) => {
            let rows = read_rows(sub)?;
            // В битый файл записи не попадут, а save отчитается об успехе
            file_host.ensure_readable()?;
            let mut session = ConfigSession::load(host, config.plugin.id.clone())
                .await
                .with_write_interval(config.sync.write_interval())
                .with_audit(AuditLogger::new(config.logging.clone()));

            session.replace(rows);
            let report = session.save().await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "save_id": report.save_id.to_string(),
                    "upserts": report.upserts,
                    "clears": report.clears,
                    "committed": report.committed,
                }))?
            );
            Ok(())
        }
        _ => {
            let session = ConfigSession::load(host, config.plugin.id.clone()).await;
            println!("{}", serde_json::to_string_pretty(session.current())?);
            Ok(())
        }
    }
}

fn read_rows(matches: &ArgMatches) -> Result<ConfigList> {
    let path = matches
        .get_one::<String>("input")
        .ok_or_else(|| SyncError::Config("--input is required".to_string()))?;
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Проверка конфигурации и файла хранилища (как nginx -t)
fn test_configuration(config_path: &str) -> ExitCode {
    println!("proxy-config-sync: testing configuration file...");
    info!("Testing configuration file: {}", config_path);

    let mut errors = 0;
    let mut warnings = 0;

    match Config::load_from_file(config_path) {
        Ok(config) => {
            println!("proxy-config-sync: configuration file {} syntax is ok", config_path);
            println!("proxy-config-sync: plugin id '{}'", config.plugin.id);

            if config.sync.write_interval_ms == 0 {
                println!("proxy-config-sync: [warn] write_interval_ms is 0, the host may reject writes while locked");
                warnings += 1;
            }

            // Проверяем файл хранилища
            let host = FileHost::new(&config.sync.store_path);
            if !host.path().exists() {
                println!("proxy-config-sync: [warn] store {} does not exist yet", config.sync.store_path);
                warnings += 1;
            } else {
                match host.load_document() {
                    Ok(document) => println!(
                        "proxy-config-sync: store has {} plugin config(s) and {} proxy entr(ies)",
                        document.plugins.len(),
                        document.proxies.len()
                    ),
                    Err(e) => {
                        println!("proxy-config-sync: [error] store {} is unreadable: {}", config.sync.store_path, e);
                        errors += 1;
                    }
                }
            }

            // Проверяем директорию журнала
            if config.logging.audit_log.enabled {
                let dir = std::path::Path::new(&config.logging.audit_log.path)
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty());
                if let Some(dir) = dir {
                    if !dir.exists() {
                        println!("proxy-config-sync: [warn] audit log directory {} not found", dir.display());
                        warnings += 1;
                    }
                }
            }
        }
        Err(e) => {
            println!("proxy-config-sync: [error] configuration file {} test failed: {}", config_path, e);
            errors += 1;
        }
    }

    if errors > 0 {
        println!("proxy-config-sync: configuration file {} test failed", config_path);
        ExitCode::FAILURE
    } else if warnings > 0 {
        println!("proxy-config-sync: configuration file {} test is successful (with {} warning(s))", config_path, warnings);
        ExitCode::SUCCESS
    } else {
        println!("proxy-config-sync: configuration file {} test is successful", config_path);
        ExitCode::SUCCESS
    }
}
