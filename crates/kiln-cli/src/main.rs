mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{EXIT_CONFIG_ERROR, EXIT_FAILURE, EXIT_STORE_ERROR};
use kiln_core::AddressAllocator;
use kiln_store::StoreLayout;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "kiln",
    version,
    about = "Build bootable VM disk images and launch them under a chosen hypervisor"
)]
struct Cli {
    /// Path to the Kiln store directory.
    #[arg(long, default_value = "~/.local/share/kiln")]
    store: String,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run diagnostic checks on the host and store.
    Doctor,
    /// List supported hypervisor backends and whether they can run here.
    Backends,
    /// Inspect or manage the virtual network address pool.
    Network {
        #[command(subcommand)]
        action: NetworkAction,
    },
    /// Work with build configuration files.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[derive(Debug, Subcommand)]
enum NetworkAction {
    /// Show remaining addresses and the next one to be leased.
    Status,
    /// Refill the pool with every address. Leases already handed out are forgotten.
    Reset,
    /// Lease one address.
    Take,
}

#[derive(Debug, Subcommand)]
enum ConfigAction {
    /// Parse, apply defaults, and validate a build configuration.
    Check {
        /// Path to the configuration TOML file.
        #[arg(default_value = "kiln.toml")]
        file: PathBuf,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("KILN_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .init();

    let store_path = expand_tilde(&cli.store);
    let allocator = AddressAllocator::new(StoreLayout::new(&store_path));
    let json_output = cli.json;

    let result = match cli.command {
        Commands::Doctor => commands::doctor::run(&store_path, &allocator, json_output),
        Commands::Backends => commands::backends::run(json_output),
        Commands::Network { action } => match action {
            NetworkAction::Status => commands::network::status(&allocator, json_output),
            NetworkAction::Reset => commands::network::reset(&allocator, json_output),
            NetworkAction::Take => commands::network::take(&allocator, json_output),
        },
        Commands::Config {
            action: ConfigAction::Check { file },
        } => commands::config::check(&file, json_output),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
    };

    allocator.shutdown();

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("configuration error:") {
                EXIT_CONFIG_ERROR
            } else if msg.starts_with("store error:") {
                EXIT_STORE_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    PathBuf::from(path)
}
