use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use layercfg_config::{LayeredConfig, Options};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "layercfg", about = "layercfg: layered, schema-validated configuration")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct LoadArgs {
    /// Loader options file (YAML or JSON).
    #[arg(short, long, value_name = "FILE")]
    options: Option<PathBuf>,
    /// Directory holding the layer files (overrides `path`).
    #[arg(short, long, value_name = "DIR")]
    dir: Option<PathBuf>,
    /// Environment file (overrides `env.path`).
    #[arg(short, long, value_name = "FILE")]
    env_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the assembled configuration as JSON.
    Show {
        #[command(flatten)]
        load: LoadArgs,
        /// Print only the value at this dotted path.
        #[arg(short, long, value_name = "PATH")]
        pointer: Option<String>,
    },
    /// Load the configuration and report whether it is valid.
    Check {
        #[command(flatten)]
        load: LoadArgs,
    },
    /// Load the configuration and log every reload until interrupted.
    Watch {
        #[command(flatten)]
        load: LoadArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Show { load, pointer } => cmd_show(&load, pointer.as_deref()),
        Commands::Check { load } => cmd_check(&load),
        Commands::Watch { load } => cmd_watch(&load).await,
    }
}

fn options(load: &LoadArgs) -> Result<Options> {
    let mut options = match &load.options {
        Some(path) => Options::from_file(path)?,
        None => Options::default(),
    };
    if let Some(dir) = &load.dir {
        options.path.clone_from(dir);
    }
    if let Some(env_file) = &load.env_file {
        options.env.path = Some(env_file.clone());
    }
    Ok(options)
}

fn load(options: Options) -> Result<LayeredConfig> {
    Ok(LayeredConfig::builder().options(options).build()?)
}

fn cmd_show(args: &LoadArgs, pointer: Option<&str>) -> Result<()> {
    let config = load(options(args)?)?;
    let tree = config.value();
    let shown = match pointer {
        Some(path) => tree
            .pointer(path)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no value at `{path}`"))?,
        None => tree,
    };
    println!("{}", serde_json::to_string_pretty(&shown.to_json())?);
    Ok(())
}

fn cmd_check(args: &LoadArgs) -> Result<()> {
    match load(options(args)?) {
        Ok(config) => {
            println!("ok: environment `{}`", config.environment());
            Ok(())
        }
        Err(e) => {
            eprintln!("invalid configuration:\n{e}");
            std::process::exit(1);
        }
    }
}

async fn cmd_watch(args: &LoadArgs) -> Result<()> {
    let mut options = options(args)?;
    options.env.watch = true;
    let config = load(options)?;

    let _changes = config.watch_changes(|changes| {
        for change in changes {
            tracing::info!(
                path = %change.path,
                new = %change.new_value,
                old = %change.old_value.as_ref().map_or_else(|| "<none>".to_string(), layercfg_types::Value::to_string),
                "configuration changed"
            );
        }
    });
    let _errors = config.watch_error(|error| {
        tracing::error!(%error, "reload rejected");
    });

    tracing::info!(environment = %config.environment(), "watching for changes (Ctrl-C to stop)");
    tokio::signal::ctrl_c().await?;
    config.unwatch_file();
    Ok(())
}
