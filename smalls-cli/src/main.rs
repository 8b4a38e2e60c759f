//! Smalls CLI - Command line interface
//!
//! `smalls run | check | disasm <file>`

use std::path::{Path, PathBuf};
use std::process;

use clap::{Args, Parser, Subcommand};
use tracing::{debug, level_filters::LevelFilter};

mod config;
mod logging;
mod platform;

use crate::config::LogConfig;
use crate::logging::LogFormat;
use crate::platform::{print_diagnostic, print_error_with_source};
use smalls_api::smalls_core::compiler::lexer::decode_source;
use smalls_api::{
    compile_with_config, init_config, new_runtime, run, Phase, RunConfig, Severity, SmallsError,
};

#[derive(Parser)]
#[command(name = "smalls", about = "Smalls scripting language", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Run configuration file (JSON)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Global log level: off, error, warn, info, debug, trace
    #[arg(long, global = true, default_value = "warn")]
    log_level: LevelFilter,

    #[arg(long, global = true, value_enum, default_value = "compact")]
    log_format: LogFormat,

    #[command(flatten)]
    phases: PhaseLevels,

    /// Print errors as JSON reports
    #[arg(long, global = true)]
    json_errors: bool,
}

/// 各阶段的日志级别覆盖
#[derive(Args)]
struct PhaseLevels {
    #[arg(long, global = true, value_name = "LEVEL")]
    lexer_log: Option<LevelFilter>,
    #[arg(long, global = true, value_name = "LEVEL")]
    parser_log: Option<LevelFilter>,
    #[arg(long, global = true, value_name = "LEVEL")]
    resolver_log: Option<LevelFilter>,
    #[arg(long, global = true, value_name = "LEVEL")]
    compiler_log: Option<LevelFilter>,
    #[arg(long, global = true, value_name = "LEVEL")]
    vm_log: Option<LevelFilter>,
    #[arg(long, global = true, value_name = "LEVEL")]
    gc_log: Option<LevelFilter>,
    #[arg(long, global = true, value_name = "LEVEL")]
    runtime_log: Option<LevelFilter>,
}

#[derive(Subcommand)]
enum Command {
    /// Compile and run a script
    Run {
        #[command(flatten)]
        input: Input,
        /// Entry function
        #[arg(long, default_value = "main")]
        entry: String,
        /// Instruction budget (0 = unlimited)
        #[arg(long)]
        gas: Option<u64>,
        /// Module whose exports are visible in every script
        #[arg(long, value_name = "MODULE")]
        prelude: Option<String>,
        /// Log the bytecode before running
        #[arg(long)]
        dump_bytecode: bool,
    },
    /// Report diagnostics without running
    Check {
        #[command(flatten)]
        input: Input,
    },
    /// Print the compiled bytecode
    Disasm {
        #[command(flatten)]
        input: Input,
    },
}

#[derive(Args)]
struct Input {
    /// Script file
    file: PathBuf,
    /// Extra directory searched for imports
    #[arg(long = "module-path", value_name = "DIR")]
    module_paths: Vec<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    logging::init(&log_config(&cli), cli.log_format);

    let base = match read_run_config(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => fail(&e, cli.json_errors),
    };

    let code = match cli.command {
        Command::Run {
            input,
            entry,
            gas,
            prelude,
            dump_bytecode,
        } => {
            let (mut config, source) = prepare(base, &input, cli.json_errors);
            config.entry = entry;
            if let Some(gas) = gas {
                config.runtime.limits.gas_limit = gas;
            }
            if prelude.is_some() {
                config.user_prelude = prelude;
            }
            config.dump_bytecode |= dump_bytecode;
            handle_run(&source, config, cli.json_errors)
        }
        Command::Check { input } => {
            let (config, source) = prepare(base, &input, cli.json_errors);
            handle_check(&input.file, &source, &config, cli.json_errors)
        }
        Command::Disasm { input } => {
            let (config, source) = prepare(base, &input, cli.json_errors);
            handle_disasm(&source, &config, cli.json_errors)
        }
    };
    process::exit(code);
}

fn log_config(cli: &Cli) -> LogConfig {
    let p = &cli.phases;
    LogConfig {
        global: cli.log_level,
        ..LogConfig::default()
    }
    .with_phase(Phase::Lexer, p.lexer_log)
    .with_phase(Phase::Parser, p.parser_log)
    .with_phase(Phase::Resolver, p.resolver_log)
    .with_phase(Phase::Compiler, p.compiler_log)
    .with_phase(Phase::Vm, p.vm_log)
    .with_phase(Phase::Gc, p.gc_log)
    .with_phase(Phase::Runtime, p.runtime_log)
}

fn read_run_config(path: Option<&Path>) -> Result<RunConfig, SmallsError> {
    let Some(path) = path else {
        return Ok(RunConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .map_err(|e| SmallsError::Config(format!("cannot read '{}': {}", path.display(), e)))?;
    RunConfig::from_json(&text)
}

/// 读取源码字节；模块名取文件名，文件所在目录加入搜索路径
fn prepare(mut config: RunConfig, input: &Input, json: bool) -> (RunConfig, Vec<u8>) {
    let source = match std::fs::read(&input.file) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: cannot read '{}': {}", input.file.display(), e);
            process::exit(1);
        }
    };
    if let Some(stem) = input.file.file_stem().and_then(|s| s.to_str()) {
        config.module = stem.to_string();
    }
    let dir = input
        .file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    config
        .runtime
        .module_paths
        .push(dir.to_string_lossy().into_owned());
    for p in &input.module_paths {
        config.runtime.module_paths.push(p.to_string_lossy().into_owned());
    }
    debug!(target: "smalls::cli", module = %config.module, paths = ?config.runtime.module_paths, json, "configured");
    (config, source)
}

fn handle_run(source: &[u8], config: RunConfig, json: bool) -> i32 {
    if let Err(e) = init_config(config.clone()) {
        debug!(target: "smalls::cli", error = %e, "global config already set");
    }
    match run(source, &config) {
        Ok(output) => {
            if !output.value.is_void() {
                println!("{}", output.display);
            }
            0
        }
        Err(e) => report(&e, &config.module, source, json),
    }
}

fn handle_check(file: &Path, source: &[u8], config: &RunConfig, json: bool) -> i32 {
    let result = new_runtime(config).and_then(|mut rt| compile_with_config(&mut rt, source, config));
    match result {
        Ok(output) => {
            let (text, _) = decode_source(source);
            for w in output.warnings.iter().filter(|d| d.severity != Severity::Error) {
                print_diagnostic(w, &text);
            }
            println!("{}: ok ({} warning(s))", file.display(), output.warnings.len());
            0
        }
        Err(e) => report(&e, &config.module, source, json),
    }
}

fn handle_disasm(source: &[u8], config: &RunConfig, json: bool) -> i32 {
    let result = new_runtime(config).and_then(|mut rt| compile_with_config(&mut rt, source, config));
    match result {
        Ok(output) => {
            print!("{}", output.bytecode.disassemble());
            0
        }
        Err(e) => report(&e, &config.module, source, json),
    }
}

fn report(e: &SmallsError, module: &str, source: &[u8], json: bool) -> i32 {
    if json {
        eprintln!("{}", e.to_report().to_json());
    } else {
        let (text, _) = decode_source(source);
        print_error_with_source(e, module, &text);
    }
    1
}

fn fail(e: &SmallsError, json: bool) -> ! {
    if json {
        eprintln!("{}", e.to_report().to_json());
    } else {
        eprintln!("error: {}", e);
    }
    process::exit(1);
}
