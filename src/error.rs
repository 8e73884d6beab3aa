use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::cpu::Word;

/// Everything the parser can reject, one variant per failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseErrorKind {
  #[error("unknown opcode: {0}")]
  UnknownOpcode(String),

  #[error("{0} requires an operand")]
  MissingOperand(&'static str),

  #[error("{0} does not take an operand")]
  UnexpectedOperand(&'static str),

  #[error("invalid immediate value: {0}")]
  InvalidImmediate(String),

  #[error("{opcode} requires {expected}")]
  OperandType {
    opcode: &'static str,
    expected: &'static str,
  },

  #[error("{0} requires a non-negative immediate shift amount")]
  InvalidShiftAmount(&'static str),

  #[error("invalid binary literal: {0}")]
  InvalidBinaryLiteral(String),

  #[error("duplicate label: {0}")]
  DuplicateLabel(String),

  #[error("duplicate instruction at address {0}")]
  AddressConflict(usize),

  #[error("unknown label: {0}")]
  UnresolvedLabel(String),

  #[error("program contains no instructions")]
  EmptyProgram,
}

impl ParseErrorKind {
  /// Stable kind string reported in [`ErrorInfo`].
  pub fn name(&self) -> &'static str {
    match self {
      ParseErrorKind::UnknownOpcode(_) => "UnknownOpcode",
      ParseErrorKind::MissingOperand(_)
      | ParseErrorKind::UnexpectedOperand(_)
      | ParseErrorKind::InvalidImmediate(_)
      | ParseErrorKind::UnresolvedLabel(_) => "InvalidOperand",
      ParseErrorKind::OperandType { .. } => "OperandTypeError",
      ParseErrorKind::InvalidShiftAmount(_) => "InvalidShiftAmount",
      ParseErrorKind::InvalidBinaryLiteral(_) => "InvalidBinaryLiteral",
      ParseErrorKind::DuplicateLabel(_) | ParseErrorKind::AddressConflict(_) => "AddressConflict",
      ParseErrorKind::EmptyProgram => "ParseError",
    }
  }
}

/// A parse failure with the source line it came from, when one exists
/// (whole-program failures like an empty program carry no line).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
  pub kind: ParseErrorKind,
  pub line: Option<usize>,
  pub text: Option<String>,
}

impl ParseError {
  pub fn at(kind: ParseErrorKind, line: usize, text: &str) -> Self {
    Self {
      kind,
      line: Some(line),
      text: Some(text.to_string()),
    }
  }

  pub fn bare(kind: ParseErrorKind) -> Self {
    Self {
      kind,
      line: None,
      text: None,
    }
  }
}

impl fmt::Display for ParseError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.line {
      Some(line) => write!(f, "line {line}: {}", self.kind),
      None => write!(f, "{}", self.kind),
    }
  }
}

impl std::error::Error for ParseError {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    Some(&self.kind)
  }
}

/// A fault raised while the program is running. The runner attaches the
/// step count and instruction context when converting to [`ErrorInfo`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
  #[error("memory address out of range: {0}")]
  MemoryOutOfRange(Word),

  #[error("no instruction at address {0}")]
  NoInstruction(Word),

  #[error("{0} executed without prior comparison")]
  JumpWithoutCompare(&'static str),

  #[error("input buffer is empty")]
  InputUnderflow,

  #[error("step limit exceeded: {0}")]
  StepLimitExceeded(usize),
}

impl RuntimeError {
  /// Stable kind string reported in [`ErrorInfo`].
  pub fn name(&self) -> &'static str {
    match self {
      RuntimeError::MemoryOutOfRange(_) => "MemoryAccessError",
      RuntimeError::NoInstruction(_) => "RuntimeError",
      RuntimeError::JumpWithoutCompare(_) => "JumpWithoutCompare",
      RuntimeError::InputUnderflow => "InputUnderflow",
      RuntimeError::StepLimitExceeded(_) => "StepLimitExceeded",
    }
  }
}

/// Serializable error record included in a failed run's result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorInfo {
  #[serde(rename = "type")]
  pub kind: &'static str,
  pub message: String,
  pub step: usize,
  pub addr: Word,
  pub source_line_no: Option<usize>,
  pub source_text: Option<String>,
}

impl ErrorInfo {
  pub fn from_parse(err: &ParseError) -> Self {
    Self {
      kind: err.kind.name(),
      message: err.kind.to_string(),
      step: 0,
      addr: 0,
      source_line_no: err.line,
      source_text: err.text.clone(),
    }
  }

  pub fn from_runtime(
    err: &RuntimeError,
    step: usize,
    addr: Word,
    source_line_no: Option<usize>,
    source_text: Option<String>,
  ) -> Self {
    Self {
      kind: err.name(),
      message: err.to_string(),
      step,
      addr,
      source_line_no,
      source_text,
    }
  }
}
