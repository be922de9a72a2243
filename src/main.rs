//! CLI entry point.
//!
//! Parses the handful of flags the binary supports (`-c`, `-V`/
//! `--version`, `-?`/`-h`/`--help`), reads and parses the config file,
//! logs the resolved configuration, then hands off to the server.

use std::process::ExitCode;

use zaver::config::AppConfig;
use zaver::master;

enum Cli {
    Run { config_path: String },
    Help,
    Version,
}

fn parse_args(args: &[String]) -> Result<Cli, String> {
    let mut config_path: Option<String> = None;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-V" | "--version" => return Ok(Cli::Version),
            "-?" | "-h" | "--help" => return Ok(Cli::Help),
            "-c" => {
                let value = args.get(i + 1).ok_or_else(|| "-c requires a path argument".to_string())?;
                config_path = Some(value.clone());
                i += 2;
            }
            other => return Err(format!("unrecognized argument '{other}'")),
        }
    }
    match config_path {
        Some(path) => Ok(Cli::Run { config_path: path }),
        None => Err("missing required -c <config> argument".to_string()),
    }
}

fn print_help() {
    println!("usage: zaver [-c <config>] [-V|--version] [-?|-h|--help]");
    println!();
    println!("  -c <config>      path to a zaver config file (required)");
    println!("  -V, --version    print the version and exit");
    println!("  -?, -h, --help   print this message and exit");
}

fn print_version() {
    println!("zaver {}", env!("CARGO_PKG_VERSION"));
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = match parse_args(&args) {
        Ok(cli) => cli,
        Err(message) => {
            eprintln!("zaver: {message}");
            print_help();
            return ExitCode::FAILURE;
        }
    };

    match cli {
        Cli::Help => {
            print_help();
            ExitCode::SUCCESS
        }
        Cli::Version => {
            print_version();
            ExitCode::SUCCESS
        }
        Cli::Run { config_path } => run(&config_path),
    }
}

fn run(config_path: &str) -> ExitCode {
    let config = match AppConfig::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, path = config_path, "failed to load config");
            return ExitCode::FAILURE;
        }
    };

    println!("{config}");

    match master::run(config) {
        Ok(0) => ExitCode::SUCCESS,
        Ok(code) => {
            tracing::error!(code, "zaver exited with non-zero status");
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!(error = %e, "zaver failed");
            ExitCode::FAILURE
        }
    }
}
