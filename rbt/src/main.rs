//! Remote Build Trigger - client CLI.
//!
//! Thin glue over the library: argument parsing, colored output, and the
//! registry/descriptor operations. `rbt` with no subcommand triggers a
//! build for the current directory.

#![forbid(unsafe_code)]

mod client;
mod output;
mod remote;

use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use rbt_common::DEFAULT_PORT;
use rbt_common::config::{ConfigStore, Remote};
use rbt_common::protocol::{Request, result};

use client::RequestOptions;

#[derive(Parser)]
#[command(name = "rbt")]
#[command(author, version, about = "Trigger builds on a remote machine")]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    /// Directory containing rbt.toml (defaults to the current directory)
    directory: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Trigger a remote build for a project directory
    Build {
        /// Directory containing rbt.toml (defaults to the current directory)
        directory: Option<PathBuf>,
    },
    /// Manage projects registered on this machine
    #[command(subcommand)]
    Projects(ProjectsCommand),
    /// Manage remote daemons this machine can reach
    #[command(subcommand)]
    Remotes(RemotesCommand),
    /// Manage the local daemon
    #[command(subcommand)]
    Server(ServerCommand),
}

#[derive(Subcommand)]
enum ProjectsCommand {
    /// Register a project for remote builds
    Add {
        name: String,
        /// Working directory builds run in (defaults to the current directory)
        #[arg(short, long)]
        directory: Option<PathBuf>,
    },
    /// Reprint the steps for linking a registered project
    PrintInstallSteps { name: String },
    /// List registered projects
    List,
    /// Fetch a project's key from a remote and write rbt.toml here
    CreateConfig { remote: String, project: String },
    /// Print what rbt.toml should look like for a project
    DumpConfig { remote: String, project: String },
}

#[derive(Subcommand)]
enum RemotesCommand {
    /// Register a remote daemon under an alias
    Add {
        alias: String,
        host: String,
        port: u16,
        key: String,
    },
    /// List registered remotes
    List,
    /// Remove a remote
    Remove { alias: String },
}

#[derive(Subcommand)]
enum ServerCommand {
    /// Start the daemon in the background
    Start {
        /// Port the daemon should bind to
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Stop the daemon
    Stop {
        /// Port the daemon is bound to
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Check whether the daemon is up
    Healthcheck,
    /// Show this installation's app key
    Info,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    if let Err(e) = run(cli).await {
        output::failure(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let store = ConfigStore::open_default()?;

    match cli.command {
        None => build(&store, cli.directory).await,
        Some(Commands::Build { directory }) => build(&store, directory).await,
        Some(Commands::Projects(cmd)) => projects(&store, cmd).await,
        Some(Commands::Remotes(cmd)) => remotes(&store, cmd),
        Some(Commands::Server(cmd)) => server(&store, cmd).await,
    }
}

async fn build(store: &ConfigStore, directory: Option<PathBuf>) -> Result<()> {
    let directory = match directory {
        Some(dir) => {
            if !dir.exists() {
                bail!("directory {} doesn't exist", dir.display());
            }
            dir
        }
        None => std::env::current_dir()?,
    };

    remote::execute_remote(store, &directory)
        .await
        .context("could not build")?;
    output::success("Build done!");
    Ok(())
}

async fn projects(store: &ConfigStore, cmd: ProjectsCommand) -> Result<()> {
    match cmd {
        ProjectsCommand::Add { name, directory } => {
            let directory = match directory {
                Some(dir) => dir,
                None => std::env::current_dir()?,
            };
            store.add_project(&name, &directory)?;
            let config = store.ensure_initialized()?;
            output::success("Your project has been registered!");
            println!("You can now bind it on your local machine. Here's how:");
            println!();
            output::print_install_steps(&name, &config.key);
        }
        ProjectsCommand::PrintInstallSteps { name } => {
            store.project(&name)?;
            let config = store.ensure_initialized()?;
            output::print_install_steps(&name, &config.key);
        }
        ProjectsCommand::List => {
            for (name, project) in store.projects()? {
                println!("{}", format!("[{name}]").green());
                println!("Key : {}", project.key.bold());
                println!("Path : {}", project.path.display().to_string().bold());
            }
        }
        ProjectsCommand::CreateConfig { remote, project } => {
            let cwd = std::env::current_dir()?;
            let path = remote::create_descriptor_file(store, &remote, &project, &cwd)
                .await
                .context("could not create the descriptor")?;
            output::success(&format!("Wrote {}", path.display()));
        }
        ProjectsCommand::DumpConfig { remote, project } => {
            let content = remote::generate_descriptor_content(store, &remote, &project)
                .await
                .context("could not generate the descriptor")?;
            output::success(&content);
        }
    }
    Ok(())
}

fn remotes(store: &ConfigStore, cmd: RemotesCommand) -> Result<()> {
    match cmd {
        RemotesCommand::Add {
            alias,
            host,
            port,
            key,
        } => {
            store.add_remote(&alias, Remote { host, port, key })?;
            output::success(&format!("Remote {alias} added."));
        }
        RemotesCommand::List => {
            for (alias, remote) in store.remotes()? {
                println!("{}", format!("[{alias}]").green());
                println!("Key : {}", remote.key.bold());
                println!("Host : {}", remote.host.bold());
                println!("Port : {}", remote.port.to_string().bold());
            }
        }
        RemotesCommand::Remove { alias } => {
            store.remove_remote(&alias)?;
            output::success(&format!("Remote {alias} removed."));
        }
    }
    Ok(())
}

async fn server(store: &ConfigStore, cmd: ServerCommand) -> Result<()> {
    let config = store.ensure_initialized()?;

    match cmd {
        ServerCommand::Start { port } => {
            let port = port.unwrap_or(DEFAULT_PORT);
            let probe = client::send_command(
                &Request::healthcheck(&config.key),
                "127.0.0.1",
                port,
                &RequestOptions::probe(),
            )
            .await;
            if probe.is_ok() {
                bail!("could not start the server: server is already running");
            }

            spawn_daemon_detached(port).context("could not start the server")?;
            output::success("Server started.");
        }
        ServerCommand::Stop { port } => {
            let port = port.unwrap_or(DEFAULT_PORT);
            let response = client::send_command(
                &Request::stop(&config.key),
                "127.0.0.1",
                port,
                &RequestOptions::probe(),
            )
            .await;
            match response {
                Ok(resp) if resp.result == result::OK => {
                    output::success("Server has been shut down.");
                }
                Ok(resp) => bail!("could not shut down the server: {}", resp.result),
                Err(e) if e.is_server_not_running() => {
                    bail!("the server is not running");
                }
                Err(e) => return Err(e).context("could not shut down the server"),
            }
        }
        ServerCommand::Healthcheck => {
            let response = client::send_command(
                &Request::healthcheck(&config.key),
                "127.0.0.1",
                DEFAULT_PORT,
                &RequestOptions::probe(),
            )
            .await;
            match response {
                Ok(resp) if resp.result == result::HEALTHY => {
                    output::success("Server is healthy.");
                }
                Ok(_) => bail!("server is unhealthy"),
                Err(e) if e.is_server_not_running() => bail!("the server is not running"),
                Err(e) => return Err(e).context("could not get healthcheck information"),
            }
        }
        ServerCommand::Info => {
            println!("{}", "[Server]".bright_green());
            println!("Key : {}", config.key.bold());
            println!("Port : {}", DEFAULT_PORT.to_string().bold());
        }
    }
    Ok(())
}

/// Spawn `rbtd` detached from this process. Prefers the daemon binary
/// sitting next to the current executable, falling back to `PATH`.
fn spawn_daemon_detached(port: u16) -> Result<()> {
    let sibling = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("rbtd")))
        .filter(|path| path.exists());
    let program = sibling.unwrap_or_else(|| PathBuf::from("rbtd"));

    std::process::Command::new(program)
        .arg("--port")
        .arg(port.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    Ok(())
}
