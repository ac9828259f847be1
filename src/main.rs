//! nodewire - run a node, or talk to one from the command line.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use nodewire::lua::{content_hash, ScriptRuntime};
use nodewire::protocol::encode_command;
use nodewire::{send_command, CommandBuffer, Config, Node, RemoteAddr, Server};

/// Global allocator configured per M-MIMALLOC-APPS guideline.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "nodewire")]
#[command(version)]
#[command(about = "Cross-node command messaging for key/value nodes")]
struct Cli {
    /// Path to a JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a node
    Serve {
        /// Address to listen on (overrides config and NODEWIRE_BIND)
        #[arg(long)]
        bind: Option<String>,
        /// Port to listen on (overrides config and NODEWIRE_PORT)
        #[arg(long)]
        port: Option<u16>,
        /// Lua script directory; init.lua there runs at startup
        #[arg(long)]
        script_dir: Option<PathBuf>,
    },
    /// Send one command to a node without waiting for a reply
    Send {
        host: String,
        port: u16,
        /// Command name and arguments
        #[arg(required = true)]
        args: Vec<String>,
    },
    /// Check that a node answers PING within the liveness timeout
    Ping { host: String, port: u16 },
    /// Print the wire encoding of a command
    Encode {
        #[arg(required = true)]
        args: Vec<String>,
    },
    /// Print the SHA-1 of the concatenated arguments
    Hash {
        #[arg(required = true)]
        args: Vec<String>,
    },
    /// Run a Lua script with the node primitives available
    Run { script: PathBuf },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            bind,
            port,
            script_dir,
        } => {
            let mut config = Config::load(cli.config.as_deref())?;
            if let Some(bind) = bind {
                config.bind = bind;
            }
            if let Some(port) = port {
                config.port = port;
            }
            if script_dir.is_some() {
                config.script_dir = script_dir;
            }
            serve(&config)
        }
        Commands::Send { host, port, args } => {
            let addr = RemoteAddr::new(host, port);
            send_command(&addr, CommandBuffer::from_args(&args), false)
                .with_context(|| format!("Failed to send to {addr}"))?;
            Ok(())
        }
        Commands::Ping { host, port } => {
            let addr = RemoteAddr::new(host, port);
            match send_command(&addr, CommandBuffer::probe(), true) {
                Ok(_) => {
                    println!("{addr} is alive");
                    Ok(())
                }
                Err(e) => {
                    eprintln!("{addr}: {e}");
                    std::process::exit(1);
                }
            }
        }
        Commands::Encode { args } => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&encode_command(&args))?;
            stdout.flush()?;
            Ok(())
        }
        Commands::Hash { args } => {
            println!("{}", content_hash(&args));
            Ok(())
        }
        Commands::Run { script } => {
            let dir = script
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = script.file_name().context("Script path has no file name")?;
            let runtime = ScriptRuntime::with_script_dir(dir)?;
            runtime.exec_file(Path::new(name))
        }
    }
}

/// Run a node on a single-threaded runtime until Ctrl-C.
fn serve(config: &Config) -> Result<()> {
    let scripts = match &config.script_dir {
        Some(dir) => {
            let scripts = ScriptRuntime::with_script_dir(dir)?;
            if dir.join("init.lua").exists() {
                scripts.exec_file(Path::new("init.lua"))?;
                log::info!("Ran init.lua from {}", dir.display());
            }
            scripts
        }
        None => ScriptRuntime::new()?,
    };
    let node = Node::with_scripts(scripts);
    let addr = config.listen_addr()?;

    let runtime = nodewire::server::build_runtime()?;
    let local = tokio::task::LocalSet::new();
    local.block_on(&runtime, async move {
        let server = Server::bind(addr, node).await?;
        tokio::select! {
            () = server.run() => {}
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl-C")?;
                log::info!("Shutting down");
            }
        }
        Ok(())
    })
}
