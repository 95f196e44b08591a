use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

#[derive(Parser)]
#[command(name = "sandpool")]
#[command(
    author,
    version,
    about = "Multi-tenant sandbox manager - pooled, session-mapped tool containers"
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to ./sandpool.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Remote manager URL; overrides manager.base_url
    #[arg(long, global = true, env = "SANDPOOL_BASE_URL")]
    base_url: Option<String>,

    /// Bearer token for the remote manager or the server
    #[arg(long, global = true, env = "SANDPOOL_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Also write daily-rotated logs into this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve a local manager over HTTP
    Serve {
        /// Address to listen on (overrides server.bind)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Create a sandbox and print its id
    Create {
        /// Sandbox type (defaults to manager.default_type)
        #[arg(short = 't', long = "type")]
        sandbox_type: Option<String>,

        /// Environment variable, KEY=VALUE or KEY to pass through from this shell
        #[arg(short, long = "env")]
        env: Vec<String>,

        /// Take a warm container from the pool when possible
        #[arg(long)]
        pool: bool,

        /// Host workspace directory
        #[arg(long)]
        mount_dir: Option<String>,

        /// Storage location to restore the workspace from and persist it to
        #[arg(long)]
        storage_path: Option<String>,
    },

    /// Release a sandbox
    Release {
        /// Session id or container name
        id: String,
    },

    /// Start a stopped sandbox
    Start {
        /// Session id or container name
        id: String,
    },

    /// Stop a sandbox without releasing it
    Stop {
        /// Session id or container name
        id: String,
    },

    /// Show a sandbox's record
    Info {
        /// Session id or container name
        id: String,
    },

    /// Show a sandbox's container status
    Status {
        /// Session id or container name
        id: String,
    },

    /// Print a sandbox's container logs
    Logs {
        /// Session id or container name
        id: String,

        /// Number of trailing lines
        #[arg(short = 'n', long)]
        tail: Option<usize>,
    },

    /// Bind sandboxes to a session and print their ids
    Connect {
        /// Session id
        session_id: String,

        /// User id
        user_id: String,

        /// Sandbox types for a new session (repeatable)
        #[arg(short = 't', long = "type")]
        sandbox_types: Vec<String>,
    },

    /// Release every sandbox bound to a session
    ReleaseSession {
        /// Session id
        session_id: String,

        /// User id
        user_id: String,
    },

    /// Invoke a tool inside a sandbox
    CallTool {
        /// Session id or container name
        id: String,

        /// Tool name
        tool: String,

        /// Tool arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,
    },

    /// List a sandbox's tools
    ListTools {
        /// Session id or container name
        id: String,

        /// Tool type filter
        #[arg(long)]
        tool_type: Option<String>,
    },

    /// Release every sandbox the manager knows about
    Cleanup,

    /// List registered sandbox types
    Types,
}

fn init_logging(cli: &Cli) -> Result<Option<WorkerGuard>> {
    let filter = if cli.verbose {
        EnvFilter::new("sandpool=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sandpool=info"))
    };

    let (file_layer, guard) = match &cli.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "sandpool.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let (json_layer, text_layer) = if cli.log_json {
        (Some(fmt::layer().json().with_writer(std::io::stderr)), None)
    } else {
        (None, Some(fmt::layer().with_writer(std::io::stderr)))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_logging(&cli)?;

    let config = commands::load_config(
        cli.config.as_deref(),
        cli.base_url.clone(),
        cli.token.clone(),
    )?;

    match cli.command {
        Commands::Serve { bind } => {
            commands::serve::run(config, bind).await?;
        }
        Commands::Create {
            sandbox_type,
            env,
            pool,
            mount_dir,
            storage_path,
        } => {
            let options = commands::sandbox::CreateOptions {
                sandbox_type,
                env,
                pool,
                mount_dir,
                storage_path,
            };
            commands::sandbox::create(&config, options).await?;
        }
        Commands::Release { id } => {
            commands::sandbox::release(&config, &id).await?;
        }
        Commands::Start { id } => {
            commands::sandbox::start(&config, &id).await?;
        }
        Commands::Stop { id } => {
            commands::sandbox::stop(&config, &id).await?;
        }
        Commands::Info { id } => {
            commands::sandbox::info(&config, &id).await?;
        }
        Commands::Status { id } => {
            commands::sandbox::status(&config, &id).await?;
        }
        Commands::Logs { id, tail } => {
            commands::sandbox::logs(&config, &id, tail).await?;
        }
        Commands::Connect {
            session_id,
            user_id,
            sandbox_types,
        } => {
            commands::session::connect(&config, &session_id, &user_id, &sandbox_types).await?;
        }
        Commands::ReleaseSession {
            session_id,
            user_id,
        } => {
            commands::session::release(&config, &session_id, &user_id).await?;
        }
        Commands::CallTool { id, tool, args } => {
            commands::tools::call(&config, &id, &tool, &args).await?;
        }
        Commands::ListTools { id, tool_type } => {
            commands::tools::list(&config, &id, tool_type.as_deref()).await?;
        }
        Commands::Cleanup => {
            commands::sandbox::cleanup(&config).await?;
        }
        Commands::Types => {
            commands::types::run(&config)?;
        }
    }

    Ok(())
}
