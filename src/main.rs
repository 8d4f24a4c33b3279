//! YaoXiang Playground - CLI

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use yaoxiang_playground::service::Service;
use yaoxiang_playground::util::config::PlaygroundConfig;
use yaoxiang_playground::util::diagnostic::{DiagnosticRenderer, Diagnostics, EmitterConfig};
use yaoxiang_playground::util::logger::{self, LogLevel};
use yaoxiang_playground::{check, dump, CodeRequest, Runner, NAME, VERSION};

/// Compile and run YX source in a sandboxed VM
#[derive(Parser, Debug)]
#[command(name = "yxplay")]
#[command(author = "YaoXiang Team")]
#[command(version = VERSION)]
#[command(about = NAME, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to ./yxplay.toml when present)
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a YX source file through the full pipeline
    Run {
        /// Source file to run
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Evaluate YX code from the command line
    Eval {
        /// Code to evaluate
        #[arg(value_name = "CODE")]
        code: String,
    },

    /// Compile a source file and report diagnostics
    Check {
        /// Source file to check
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Print the compiled image layout
    Dump {
        /// Source file to compile
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Serve JSON-lines requests over TCP
    Serve {
        /// Listen address (overrides config and YXPLAY_ADDR)
        #[arg(long, value_name = "ADDR")]
        addr: Option<String>,
    },

    /// Print version information
    Version,
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let mut config =
        PlaygroundConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    config
        .apply_env()
        .context("Invalid environment override")?;

    let level = if args.verbose {
        LogLevel::Debug
    } else {
        config.log.level
    };
    logger::init_with_level(level);

    match args.command {
        Commands::Run { file } => {
            let source = read_source(&file)?;
            Ok(run_pipeline(&config, source))
        }
        Commands::Eval { code } => Ok(run_pipeline(&config, code)),
        Commands::Check { file } => {
            let source = read_source(&file)?;
            let name = file.display().to_string();
            match check(&source) {
                Ok(warnings) => {
                    print_diagnostics(&warnings, &name, &source);
                    eprintln!("Check passed!");
                    Ok(ExitCode::SUCCESS)
                }
                Err(diagnostics) => {
                    print_diagnostics(&diagnostics, &name, &source);
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Commands::Dump { file } => {
            let source = read_source(&file)?;
            println!("=== Image Dump for {} ===\n", file.display());
            match dump(&source) {
                Ok(layout) => {
                    print!("{}", layout);
                    Ok(ExitCode::SUCCESS)
                }
                Err(diagnostics) => {
                    print_diagnostics(&diagnostics, &file.display().to_string(), &source);
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Commands::Serve { addr } => {
            if let Some(addr) = addr {
                config.service.addr = addr;
            }
            serve(config)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Version => {
            println!("{} {}", NAME, VERSION);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn read_source(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read file: {}", path.display()))
}

fn run_pipeline(
    config: &PlaygroundConfig,
    code: String,
) -> ExitCode {
    let response = Runner::from_config(config).compile_and_run(&CodeRequest { code });
    println!("{}", response);
    if response.is_fault() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn print_diagnostics(
    diagnostics: &Diagnostics,
    name: &str,
    source: &str,
) {
    if diagnostics.is_empty() {
        return;
    }
    let renderer = DiagnosticRenderer::with_config(EmitterConfig {
        use_colors: std::io::IsTerminal::is_terminal(&std::io::stderr()),
        ..EmitterConfig::default()
    });
    eprintln!("{}", renderer.render_all(diagnostics, name, source));
}

fn serve(config: PlaygroundConfig) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;
    runtime.block_on(async move {
        let listener = Service::bind(&config.service.addr).await?;
        let service = Service::from_config(&config);
        let shutdown = async {
            let _ = tokio::signal::ctrl_c().await;
        };
        service.serve(listener, shutdown).await?;
        Ok::<(), anyhow::Error>(())
    })
}
