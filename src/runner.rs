use std::collections::BTreeMap;

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::cpu::{Cpu, Word, WordFormat};
use crate::error::{ErrorInfo, RuntimeError};
use crate::exec::{execute, ExecContext};
use crate::io::IoBuffer;
use crate::memory::Memory;
use crate::parser::parse;

/// Execution options. Every field has a default and can be set
/// independently; a transport can deserialize a partial JSON object.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOptions {
  pub memory_size: usize,
  pub start_address: usize,
  pub max_steps: usize,
  pub word_bits: u32,
  pub signed: bool,
  pub trace: bool,
  pub trace_watch: Vec<usize>,
  pub trace_include_ix: bool,
  pub trace_include_flag: bool,
  pub trace_include_io: bool,
  /// Seed memory applied before the program's own data initializers;
  /// the program's initializers win at the same address.
  pub initial_memory: BTreeMap<usize, Word>,
}

impl Default for RunOptions {
  fn default() -> Self {
    Self {
      memory_size: 256,
      start_address: 200,
      max_steps: 10_000,
      word_bits: 16,
      signed: true,
      trace: true,
      trace_watch: Vec::new(),
      trace_include_ix: false,
      trace_include_flag: false,
      trace_include_io: true,
      initial_memory: BTreeMap::new(),
    }
  }
}

/// One row of the execution trace. Row 0 is the pre-execution snapshot;
/// each later row is the state after that step's instruction ran.
///
/// For the optional columns the outer `None` means the column is disabled
/// by the run options; `Some(inner)` serializes even when `inner` is null.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceRow {
  pub step: usize,
  pub addr: usize,
  pub acc: Word,
  pub mem: BTreeMap<usize, Word>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub ix: Option<Word>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub flag: Option<Option<bool>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub in_code: Option<Option<u32>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub out_code: Option<Option<u32>>,
  pub instr_text: String,
}

/// Register state at the end of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinalState {
  pub acc: Word,
  pub ix: Word,
  pub pc: Word,
  pub flag: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
  Ok,
  Error,
}

/// The serializable outcome of one program run. On error the output and
/// trace accumulated up to the fault are retained.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
  pub status: Status,
  pub output_text: String,
  pub steps_executed: usize,
  pub final_state: FinalState,
  pub trace_watch: Vec<usize>,
  pub trace: Vec<TraceRow>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<ErrorInfo>,
}

/// Runs a program to completion: parse, seed memory, then fetch-execute
/// until `END`, a fault, or the step budget.
pub fn run(program_text: &str, input_text: &str, options: &RunOptions) -> RunResult {
  let word = WordFormat::new(options.word_bits, options.signed);
  let mut cpu = Cpu::new(word);
  let mut mem = Memory::new(options.memory_size, word);
  let mut io = IoBuffer::new(input_text);

  for (&addr, &value) in &options.initial_memory {
    mem.seed(addr, value);
  }

  let program = match parse(program_text, options.start_address) {
    Ok(program) => program,
    Err(err) => {
      debug!("parse failed: {err}");
      let mut watch = options.trace_watch.clone();
      watch.sort_unstable();
      watch.dedup();
      return RunResult {
        status: Status::Error,
        output_text: String::new(),
        steps_executed: 0,
        final_state: final_state(&cpu),
        trace_watch: watch,
        trace: Vec::new(),
        error: Some(ErrorInfo::from_parse(&err)),
      };
    }
  };
  debug!(
    "parsed {} instructions and {} data words, start address {}",
    program.instructions.len(),
    program.initial_memory.len(),
    program.start_address
  );

  let mut watch = options.trace_watch.clone();
  watch.extend(program.initial_memory.keys().copied());
  watch.sort_unstable();
  watch.dedup();

  let mut steps_executed = 0usize;
  let mut trace_rows: Vec<TraceRow> = Vec::new();
  let mut error: Option<ErrorInfo> = None;

  for (&addr, &value) in &program.initial_memory {
    if let Err(err) = mem.write(addr as Word, value) {
      error = Some(ErrorInfo::from_runtime(&err, 0, addr as Word, None, None));
      break;
    }
  }

  cpu.set_pc(program.start_address as Word);

  if error.is_none() && options.trace {
    trace_rows.push(snapshot_row(
      0,
      program.start_address,
      String::new(),
      &cpu,
      &mem,
      &io,
      &watch,
      options,
    ));
  }

  while error.is_none() && !cpu.halted() && steps_executed < options.max_steps {
    let pc = cpu.pc();
    let instr = match usize::try_from(pc)
      .ok()
      .and_then(|addr| program.instructions.get(&addr))
    {
      Some(instr) => instr,
      None => {
        let err = RuntimeError::NoInstruction(pc);
        error = Some(ErrorInfo::from_runtime(&err, steps_executed, pc, None, None));
        break;
      }
    };

    io.reset_codes();
    let mut ctx = ExecContext {
      cpu: &mut cpu,
      mem: &mut mem,
      io: &mut io,
    };
    match execute(instr, &mut ctx) {
      Ok(next_pc) => {
        cpu.set_pc(match next_pc {
          Some(target) => target,
          None => instr.addr as Word + 1,
        });
        steps_executed += 1;
        trace!("step {steps_executed}: {} @ {}", instr.text, instr.addr);
        if options.trace {
          trace_rows.push(snapshot_row(
            steps_executed,
            instr.addr,
            instr.text.clone(),
            &cpu,
            &mem,
            &io,
            &watch,
            options,
          ));
        }
      }
      Err(err) => {
        error = Some(ErrorInfo::from_runtime(
          &err,
          steps_executed,
          instr.addr as Word,
          Some(instr.line_no),
          Some(instr.source.clone()),
        ));
      }
    }
  }

  if error.is_none() && !cpu.halted() && steps_executed >= options.max_steps {
    let err = RuntimeError::StepLimitExceeded(options.max_steps);
    error = Some(ErrorInfo::from_runtime(
      &err,
      steps_executed,
      cpu.pc(),
      None,
      None,
    ));
  }

  let status = if error.is_none() {
    Status::Ok
  } else {
    Status::Error
  };
  debug!("run finished: {status:?} after {steps_executed} steps");

  RunResult {
    status,
    output_text: io.output().to_string(),
    steps_executed,
    final_state: final_state(&cpu),
    trace_watch: watch,
    trace: trace_rows,
    error,
  }
}

fn final_state(cpu: &Cpu) -> FinalState {
  FinalState {
    acc: cpu.acc(),
    ix: cpu.ix(),
    pc: cpu.pc(),
    flag: cpu.flag().as_option(),
  }
}

#[allow(clippy::too_many_arguments)]
fn snapshot_row(
  step: usize,
  addr: usize,
  instr_text: String,
  cpu: &Cpu,
  mem: &Memory,
  io: &IoBuffer,
  watch: &[usize],
  options: &RunOptions,
) -> TraceRow {
  TraceRow {
    step,
    addr,
    acc: cpu.acc(),
    mem: mem.watched(watch),
    ix: options.trace_include_ix.then_some(cpu.ix()),
    flag: options.trace_include_flag.then_some(cpu.flag().as_option()),
    in_code: options.trace_include_io.then_some(io.last_in()),
    out_code: options.trace_include_io.then_some(io.last_out()),
    instr_text,
  }
}
