//! `migrate-agent` command-line entry point

use anyhow::{Context, Result};
use clap::ArgMatches;
use migrate_core::cli::{self, LogFormat, EXIT_CONFIG, EXIT_OK, EXIT_RUN_FAILED};
use migrate_core::config::AppConfig;
use migrate_core::model::{ModelError, OpenAiCompatibleModel};
use migrate_core::pipeline::{MigrationPipeline, PipelineCollaborators};
use migrate_core::report::EncryptionPreference;
use migrate_core::strategy::StrategySelector;
use migrate_core::{ConfigError, PipelineError};
use migrate_kernel::protocol::ToolDispatcher;
use migrate_tools::prelude::*;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() {
    let matches = cli::command().get_matches();
    let log_format = matches
        .get_one::<String>("log-format")
        .and_then(|f| f.parse().ok())
        .unwrap_or_default();
    init_logging(log_format);

    let code = match dispatch(&matches).await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "migrate-agent failed");
            eprintln!("error: {err:#}");
            exit_code_for(&err)
        }
    };
    process::exit(code);
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("migrate=info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    let config_error = err.downcast_ref::<ConfigError>().is_some()
        || matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::Config(_)))
        || matches!(err.downcast_ref::<ModelError>(), Some(ModelError::Configuration(_)));
    if config_error {
        EXIT_CONFIG
    } else {
        EXIT_RUN_FAILED
    }
}

async fn dispatch(matches: &ArgMatches) -> Result<i32> {
    match matches.subcommand() {
        Some(("run", args)) => run(args).await,
        Some(("strategy", args)) => strategy(args),
        Some(("tools", args)) => tools(args).await,
        _ => Ok(EXIT_OK),
    }
}

fn load_config(args: &ArgMatches) -> Result<AppConfig> {
    let path = args
        .get_one::<String>("config")
        .map_or("config.yaml", String::as_str);
    AppConfig::load(path).with_context(|| format!("loading configuration from {path}"))
}

const STATEMENT_TIMEOUT: Duration = Duration::from_secs(300);

fn tool_server(config: &AppConfig, secrets: EnvSecrets) -> ToolServer {
    let database = MysqlCliDatabase::new(config.export.client_binary.as_str(), STATEMENT_TIMEOUT);
    ToolServer::builder(Arc::new(database), Arc::new(secrets))
        .with_export(config.export.clone())
        .build()
}

async fn run(args: &ArgMatches) -> Result<i32> {
    let config = load_config(args)?;
    let task = args
        .get_one::<String>("task")
        .context("--task is required")?;
    let encryption: EncryptionPreference = args
        .get_one::<String>("encryption-method")
        .map_or(Ok(EncryptionPreference::Default), |m| m.parse())
        .map_err(anyhow::Error::msg)?;

    let model = OpenAiCompatibleModel::from_config(&config.llm_config)?;
    let executor = LocalCodeExecutor::new(
        config.pipeline.code_work_dir.clone(),
        Duration::from_secs(config.pipeline.code_timeout_secs),
    );

    let collaborators = PipelineCollaborators {
        model: Arc::new(model),
        source_tools: Arc::new(tool_server(&config, EnvSecrets::source())),
        target_tools: Arc::new(tool_server(
            &config,
            EnvSecrets::new(config.target.env_prefix.as_str()),
        )),
        executor: Some(Arc::new(executor)),
    };
    let pipeline = MigrationPipeline::build(&config, encryption, collaborators)?;

    let cancel = pipeline.cancel_signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping at the next stage boundary");
            cancel.cancel();
        }
    });

    let report = pipeline.run(task).await;
    if args.get_flag("json") {
        println!("{}", report.to_json()?);
    } else {
        println!("{}", report.render_text());
    }
    Ok(report.exit_code())
}

fn strategy(args: &ArgMatches) -> Result<i32> {
    let config = load_config(args)?;
    let size_gb = *args
        .get_one::<f64>("size-gb")
        .context("--size-gb is required")?;
    let selector = StrategySelector::new(config.migration_strategies)?;
    let strategy = selector.choose(size_gb);
    println!("{strategy} ({})", strategy.label());
    Ok(EXIT_OK)
}

async fn tools(args: &ArgMatches) -> Result<i32> {
    let config = load_config(args)?;
    let server = tool_server(&config, EnvSecrets::source());
    match args.subcommand() {
        Some(("list", _)) => {
            for tool in server.describe() {
                println!("{}({}): {}", tool.name, tool.parameters.join(", "), tool.description);
            }
            Ok(EXIT_OK)
        }
        Some(("call", call_args)) => {
            let name = call_args
                .get_one::<String>("name")
                .context("tool name is required")?;
            let params = call_args
                .get_many::<String>("params")
                .into_iter()
                .flatten()
                .map(String::as_str);
            let call = cli::tool_call(name, params).map_err(anyhow::Error::msg)?;
            let result = server.dispatch(&call).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(if result.is_ok() { EXIT_OK } else { EXIT_RUN_FAILED })
        }
        _ => Ok(EXIT_OK),
    }
}
