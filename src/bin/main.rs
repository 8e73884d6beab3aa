use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::LevelFilter;
use simple_logger::SimpleLogger;

use casm::cpu::Word;
use casm::{run, RunOptions};

#[derive(Parser)]
#[command(name = "casm", about = "Run a Cambridge assembly program")]
struct Cli {
  /// Program source file.
  program: PathBuf,

  /// Input buffer consumed by IN instructions.
  #[arg(short, long, default_value = "")]
  input: String,

  /// Memory size in words.
  #[arg(long, default_value_t = 256)]
  memory_size: usize,

  /// Address given to the first instruction when none is written.
  #[arg(long, default_value_t = 200)]
  start_address: usize,

  /// Maximum number of executed instructions before the run is aborted.
  #[arg(long, default_value_t = 10_000)]
  max_steps: usize,

  /// Word width in bits (8-64).
  #[arg(long, default_value_t = 16)]
  word_bits: u32,

  /// Treat words as unsigned instead of two's-complement.
  #[arg(long)]
  unsigned: bool,

  /// Disable the execution trace.
  #[arg(long)]
  no_trace: bool,

  /// Memory address to include in every trace row (repeatable).
  #[arg(long = "watch", value_name = "ADDR")]
  watch: Vec<usize>,

  /// Seed a memory word before the program's own data lines (repeatable).
  #[arg(long = "mem", value_name = "ADDR=VALUE", value_parser = parse_seed)]
  mem: Vec<(usize, Word)>,

  /// Include the index register in trace rows.
  #[arg(long)]
  trace_ix: bool,

  /// Include the comparison flag in trace rows.
  #[arg(long)]
  trace_flag: bool,

  /// Print the full run result as JSON instead of the program output.
  #[arg(long)]
  json: bool,
}

/// Parse an "ADDR=VALUE" memory seed.
fn parse_seed(s: &str) -> Result<(usize, Word), String> {
  let (addr, value) = s
    .split_once('=')
    .ok_or_else(|| format!("expected ADDR=VALUE, got `{s}`"))?;
  let addr = addr
    .trim()
    .parse()
    .map_err(|err| format!("bad address in `{s}`: {err}"))?;
  let value = value
    .trim()
    .parse()
    .map_err(|err| format!("bad value in `{s}`: {err}"))?;
  Ok((addr, value))
}

fn main() -> ExitCode {
  SimpleLogger::new()
    .with_level(LevelFilter::Warn)
    .env()
    .init()
    .unwrap();

  let cli = Cli::parse();

  let source = match fs::read_to_string(&cli.program) {
    Ok(source) => source,
    Err(err) => {
      eprintln!("error: cannot read {}: {err}", cli.program.display());
      return ExitCode::FAILURE;
    }
  };

  let options = RunOptions {
    memory_size: cli.memory_size,
    start_address: cli.start_address,
    max_steps: cli.max_steps,
    word_bits: cli.word_bits,
    signed: !cli.unsigned,
    trace: !cli.no_trace,
    trace_watch: cli.watch,
    trace_include_ix: cli.trace_ix,
    trace_include_flag: cli.trace_flag,
    trace_include_io: true,
    initial_memory: cli.mem.into_iter().collect::<BTreeMap<_, _>>(),
  };

  let result = run(&source, &cli.input, &options);

  if cli.json {
    match serde_json::to_string_pretty(&result) {
      Ok(json) => println!("{json}"),
      Err(err) => {
        eprintln!("error: cannot serialize result: {err}");
        return ExitCode::FAILURE;
      }
    }
  } else {
    print!("{}", result.output_text);
  }

  if let Some(error) = &result.error {
    if !cli.json {
      eprintln!("error: {} ({})", error.message, error.kind);
      if let (Some(line), Some(text)) = (error.source_line_no, &error.source_text) {
        eprintln!("  at line {line}: {text}");
      }
    }
    return ExitCode::FAILURE;
  }
  ExitCode::SUCCESS
}
