//! heapspec CLI

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use heapspec::protocol::{decode_contract, ContractMessage};
use heapspec::{ConnectOptions, Contract};

#[derive(Parser)]
#[command(name = "heapspec", version, about = "Check function contracts with a remote verification engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a contract file and print it
    Check {
        /// Contract file (JSON)
        file: PathBuf,
    },
    /// Print the request message a contract file produces (debug)
    Render {
        /// Contract file (JSON)
        file: PathBuf,
    },
    /// Verify a contract against a function in a module
    Verify {
        /// Contract file (JSON)
        file: PathBuf,
        /// Module to load on the server
        #[arg(long)]
        module: PathBuf,
        /// Function to verify (defaults to the contract's execution entry)
        #[arg(long)]
        function: Option<String>,
        /// Connection options (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Server URL, overriding the configuration
        #[arg(long)]
        url: Option<String>,
        /// Ask the server to discard its state first
        #[arg(long)]
        reset: bool,
    },
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Command::Check { file } => check_file(&file),
        Command::Render { file } => render_file(&file),
        Command::Verify {
            file,
            module,
            function,
            config,
            url,
            reset,
        } => verify_file(&file, &module, function, config, url, reset),
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(2);
        }
    }
}

fn load_contract(path: &Path) -> Result<(ContractMessage, Contract), Box<dyn std::error::Error>> {
    let source = std::fs::read_to_string(path)?;
    let message: ContractMessage = serde_json::from_str(&source)?;
    let contract = decode_contract(&message)?;
    Ok((message, contract))
}

fn check_file(path: &Path) -> Result<bool, Box<dyn std::error::Error>> {
    let (message, contract) = load_contract(path)?;

    println!("{contract}");
    println!("✓ contract for `{}` is well-formed", message.execution.function);
    Ok(true)
}

fn render_file(path: &Path) -> Result<bool, Box<dyn std::error::Error>> {
    let (message, contract) = load_contract(path)?;

    let normalized = ContractMessage::encode(&message.execution.function, &contract);
    println!("{}", serde_json::to_string_pretty(&normalized)?);
    Ok(true)
}

fn verify_file(
    path: &Path,
    module: &Path,
    function: Option<String>,
    config: Option<PathBuf>,
    url: Option<String>,
    reset: bool,
) -> Result<bool, Box<dyn std::error::Error>> {
    let (message, contract) = load_contract(path)?;
    let function = function.unwrap_or(message.execution.function);

    let mut options = match config {
        Some(config) => ConnectOptions::from_file(&config)?,
        None => ConnectOptions::default(),
    };
    if let Some(url) = url {
        options.server.url = Some(url);
        options.server.command = None;
    }
    if reset {
        options.reset_server = true;
    }

    let mut session = heapspec::connect(&options)?;
    let handle = session.load_module(module)?;
    let result = session.verify(&handle, &function, &contract)?;
    // the verdict stands even if the goodbye is lost
    if let Err(e) = heapspec::disconnect(session) {
        warn!(error = %e, "disconnect failed");
    }

    if result.is_success() {
        println!("✓ {function}: {result}");
    } else {
        println!("✗ {function}: {result}");
        if let Some(diagnostic) = result.diagnostic() {
            println!("{}", serde_json::to_string_pretty(diagnostic.raw())?);
        }
    }
    Ok(result.is_success())
}
