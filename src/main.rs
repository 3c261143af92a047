// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! quill - compile JavaScript to SpiderMonkey-style bytecode
//!
//! This is the main entry point for the quill CLI/REPL.
//!
//! ## Features
//!
//! - Compile files and print their disassembly or binding report
//! - Syntax-only checking
//! - Interactive REPL that shows the bytecode of each input

mod repl;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use quill_compiler::parser::parse_script;
use quill_compiler::{check_syntax, compile_scripts, disassemble, CompileError, CompileOptions, CompiledScript};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Compile JavaScript to SpiderMonkey-style bytecode
#[derive(Parser, Debug)]
#[command(name = "quill")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Compile options file (TOML); defaults to the user config file when present
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Compile as strict code
    #[arg(long, global = true)]
    strict: bool,

    /// Defer nested functions as lazy stubs
    #[arg(long, global = true)]
    lazy: bool,

    /// Keep the value of the last expression statement
    #[arg(long, global = true)]
    keep_value: bool,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile files and report errors
    #[command(alias = "c")]
    Compile {
        /// JavaScript files
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Print the bytecode listing of each file
        #[arg(short, long)]
        disasm: bool,

        /// Print how every name reference was resolved
        #[arg(short, long)]
        bindings: bool,
    },

    /// Check files with the syntax-only parser
    Check {
        /// JavaScript files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Compile a snippet, keeping its completion value
    #[command(alias = "e")]
    Eval {
        /// Source text
        #[arg(short = 'e', long = "expr")]
        code: String,
    },

    /// Start the interactive REPL
    Repl,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let options = match load_options(&cli).await {
        Ok(options) => options,
        Err(e) => {
            eprintln!("{}: {e:#}", "Error".red().bold());
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Some(Command::Compile { files, disasm, bindings }) => run_compile(&files, &options, disasm, bindings).await,
        Some(Command::Check { files }) => run_check(&files, &options).await,
        Some(Command::Eval { code }) => run_eval(&code, &options),
        Some(Command::Repl) | None => run_repl(options),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{}: {e:#}", "Error".red().bold());
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "quill=debug,quill_compiler=debug",
        _ => "quill=trace,quill_compiler=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Options from the config file, then the command line flags on top.
async fn load_options(cli: &Cli) -> anyhow::Result<CompileOptions> {
    let path = match &cli.config {
        Some(path) => Some(path.clone()),
        None => dirs::config_dir()
            .map(|dir| dir.join("quill").join("config.toml"))
            .filter(|path| path.is_file()),
    };

    let mut options = match path {
        Some(path) => {
            let text = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            tracing::debug!(path = %path.display(), "loaded compile options");
            CompileOptions::from_toml_str(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => CompileOptions::default(),
    };
    if cli.strict {
        options.strict = true;
    }
    if cli.lazy {
        options.lazy_functions = true;
    }
    if cli.keep_value {
        options.keep_last_value = true;
    }
    Ok(options)
}

/// Reads every file, in order.
async fn read_sources(files: &[PathBuf]) -> anyhow::Result<Vec<(String, String)>> {
    let mut units = Vec::with_capacity(files.len());
    for path in files {
        let source = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        units.push((path.display().to_string(), source));
    }
    Ok(units)
}

async fn run_compile(files: &[PathBuf], options: &CompileOptions, disasm: bool, bindings: bool) -> anyhow::Result<bool> {
    let units = read_sources(files).await?;
    let names: Vec<String> = units.iter().map(|(name, _)| name.clone()).collect();
    let compile_options = options.clone();
    let results = tokio::task::spawn_blocking(move || compile_scripts(&units, &compile_options))
        .await
        .context("compiler thread panicked")?;

    let mut ok = true;
    for (name, result) in names.iter().zip(results) {
        match result {
            Ok(script) => report_script(name, &script, disasm, bindings),
            Err(e) => {
                print_compile_error(name, &e);
                ok = false;
            }
        }
    }
    Ok(ok)
}

fn report_script(name: &str, script: &CompiledScript, disasm: bool, bindings: bool) {
    for warning in &script.warnings {
        eprintln!("{}: {warning}", name.cyan());
    }
    if disasm {
        println!("{}", format!("== {name}").white().bold());
        println!("{}", disassemble(&script.main));
    }
    if bindings {
        println!("{}", format!("== {name} bindings").white().bold());
        for binding in &script.bindings {
            let decl = binding
                .decl
                .map_or_else(|| "-".to_string(), |pos| pos.to_string());
            println!("  {:<20} {:<16} {:<24} {}", binding.name, binding.kind, binding.pos.to_string(), decl);
        }
    }
    println!(
        "{} {} ({} functions, {} bytes of main code)",
        "compiled".green().bold(),
        name,
        script.main.function_count(),
        script.main.code.len()
    );
}

async fn run_check(files: &[PathBuf], options: &CompileOptions) -> anyhow::Result<bool> {
    let mut ok = true;
    for (name, source) in read_sources(files).await? {
        let options = options.clone().with_filename(name.as_str());
        match check_syntax(&source, &options) {
            Ok(Some(_)) => println!("{} {name}", "ok".green().bold()),
            Ok(None) => {
                tracing::debug!(file = %name, "syntax-only parse gave up, reparsing fully");
                match parse_script(&source, &options) {
                    Ok(_) => println!("{} {name} {}", "ok".green().bold(), "(full parse)".dimmed()),
                    Err(e) => {
                        print_compile_error(&name, &e);
                        ok = false;
                    }
                }
            }
            Err(e) => {
                print_compile_error(&name, &e);
                ok = false;
            }
        }
    }
    Ok(ok)
}

fn run_eval(code: &str, options: &CompileOptions) -> anyhow::Result<bool> {
    let options = options.clone().with_keep_last_value(true).with_filename("<eval>");
    match quill_compiler::compile_script(code, &options) {
        Ok(script) => {
            report_script("<eval>", &script, true, false);
            Ok(true)
        }
        Err(e) => {
            print_compile_error("<eval>", &e);
            Ok(false)
        }
    }
}

fn run_repl(options: CompileOptions) -> anyhow::Result<bool> {
    let mut repl = repl::Repl::new(options).context("failed to initialize REPL")?;
    repl.run().context("REPL error")?;
    Ok(true)
}

pub(crate) fn print_compile_error(name: &str, error: &CompileError) {
    eprintln!("{}: {} {}", name.cyan(), format!("{}:", error.kind).red().bold(), error.message);
    eprintln!("    {} {}", "at".dimmed(), error.pos);
}
