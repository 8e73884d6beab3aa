use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use crate::cpu::Word;
use crate::error::{ParseError, ParseErrorKind};
use crate::opcode::{Opcode, OperandSpec};

/// A named register usable as an operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reg {
  Acc,
  Ix,
}

/// A fully classified instruction operand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
  None,
  Immediate(Word),
  Direct(Word),
  Register(Reg),
  /// A direct-address reference by label name, as written. These exist
  /// only between the collection pass and the resolution pass; a program
  /// returned by [`parse`] contains none.
  Label(String),
}

/// One parsed instruction, with enough source context for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
  pub addr: usize,
  pub opcode: Opcode,
  pub operand: Operand,
  /// The operand exactly as written, when one was.
  pub operand_text: Option<String>,
  /// 1-based source line number.
  pub line_no: usize,
  /// The whole source line, trimmed.
  pub source: String,
  /// The instruction text with address and label prefixes stripped.
  pub text: String,
}

/// The output of [`parse`]: an addressed instruction table with resolved
/// labels plus the inline data initializers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedProgram {
  pub instructions: BTreeMap<usize, Instruction>,
  pub labels: HashMap<String, usize>,
  pub initial_memory: BTreeMap<usize, Word>,
  pub start_address: usize,
  pub end_address: usize,
}

/// Parses source text into an instruction table.
///
/// Lines may carry an explicit numeric address (`200 LDD 81`, `200: ...`);
/// otherwise addresses run sequentially, continuing after the last used
/// address when the two styles are mixed. A line whose remainder is a bare
/// numeric literal is a data initializer rather than an instruction.
pub fn parse(source: &str, start_address: usize) -> Result<ParsedProgram, ParseError> {
  let mut instructions: BTreeMap<usize, Instruction> = BTreeMap::new();
  let mut labels: HashMap<String, usize> = HashMap::new();
  let mut initial_memory: BTreeMap<usize, Word> = BTreeMap::new();
  let mut next_addr = start_address;

  for (idx, raw_line) in source.lines().enumerate() {
    let line_no = idx + 1;
    let stripped = strip_comment(raw_line).trim();
    if stripped.is_empty() {
      continue;
    }
    let source_text = raw_line.trim();

    let (addr, rest) = match split_address(stripped) {
      Some((addr, rest)) => (addr, rest),
      None => (next_addr, stripped),
    };

    let (rest, label) = split_label(rest);
    if let Some(name) = label {
      let name = name.to_ascii_uppercase();
      if labels.contains_key(&name) {
        return Err(ParseError::at(
          ParseErrorKind::DuplicateLabel(name),
          line_no,
          source_text,
        ));
      }
      labels.insert(name, addr);
    }

    // Every non-blank line consumes its address slot, including
    // address-only and label-only lines.
    next_addr = addr + 1;

    if rest.is_empty() {
      continue;
    }

    match parse_literal(rest, true) {
      Literal::Value(value) => {
        initial_memory.insert(addr, value);
        continue;
      }
      Literal::BadBinary => {
        return Err(ParseError::at(
          ParseErrorKind::InvalidBinaryLiteral(rest.to_string()),
          line_no,
          source_text,
        ));
      }
      Literal::NotNumeric => {}
    }

    let instruction = parse_instruction(rest, addr, line_no, source_text, &labels)?;
    if instructions.contains_key(&addr) {
      return Err(ParseError::at(
        ParseErrorKind::AddressConflict(addr),
        line_no,
        source_text,
      ));
    }
    instructions.insert(addr, instruction);
  }

  if instructions.is_empty() {
    return Err(ParseError::bare(ParseErrorKind::EmptyProgram));
  }

  resolve_labels(&mut instructions, &labels)?;

  let start_address = instructions.keys().next().copied().unwrap_or(0);
  let end_address = instructions.keys().next_back().copied().unwrap_or(0);

  Ok(ParsedProgram {
    instructions,
    labels,
    initial_memory,
    start_address,
    end_address,
  })
}

fn strip_comment(line: &str) -> &str {
  match line.find(';') {
    Some(idx) => &line[..idx],
    None => line,
  }
}

/// Splits a leading explicit address: decimal digits followed by `:` or
/// whitespace. A line that is only digits is a data word, not an address.
fn split_address(line: &str) -> Option<(usize, &str)> {
  let digits_end = line
    .find(|c: char| !c.is_ascii_digit())
    .unwrap_or(line.len());
  if digits_end == 0 || digits_end == line.len() {
    return None;
  }
  let addr: usize = line[..digits_end].parse().ok()?;
  let rest = &line[digits_end..];
  let trimmed = rest.trim_start();
  if let Some(after) = trimmed.strip_prefix(':') {
    Some((addr, after.trim_start()))
  } else if rest.starts_with(char::is_whitespace) {
    Some((addr, trimmed))
  } else {
    None
  }
}

/// Splits a leading label definition: an identifier immediately followed
/// by `:`. Identifiers are letters, digits and underscores, not starting
/// with a digit.
fn split_label(line: &str) -> (&str, Option<&str>) {
  match line.chars().next() {
    Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
    _ => return (line, None),
  }
  let end = line
    .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
    .unwrap_or(line.len());
  match line[end..].strip_prefix(':') {
    Some(rest) => (rest.trim_start(), Some(&line[..end])),
    None => (line, None),
  }
}

enum Literal {
  Value(Word),
  /// Shaped like a binary literal (`B`/`b` prefix) but malformed; always
  /// an error, never reinterpreted as something else.
  BadBinary,
  NotNumeric,
}

/// Parses `[#][+|-](B<bits> | <digits>)`. Binary is only recognized when
/// `allow_binary` is set; direct-address operands treat `B...` tokens as
/// label references instead.
fn parse_literal(token: &str, allow_binary: bool) -> Literal {
  let mut literal = token.trim();
  if let Some(rest) = literal.strip_prefix('#') {
    literal = rest.trim_start();
  }
  let mut negative = false;
  if let Some(rest) = literal.strip_prefix('-') {
    negative = true;
    literal = rest;
  } else if let Some(rest) = literal.strip_prefix('+') {
    literal = rest;
  }
  if literal.is_empty() {
    return Literal::NotNumeric;
  }

  let magnitude = if allow_binary && (literal.starts_with('B') || literal.starts_with('b')) {
    let bits = &literal[1..];
    if bits.is_empty() || !bits.bytes().all(|b| b == b'0' || b == b'1') {
      return Literal::BadBinary;
    }
    match Word::from_str_radix(bits, 2) {
      Ok(value) => value,
      Err(_) => return Literal::BadBinary,
    }
  } else {
    if !literal.bytes().all(|b| b.is_ascii_digit()) {
      return Literal::NotNumeric;
    }
    match literal.parse::<Word>() {
      Ok(value) => value,
      Err(_) => return Literal::NotNumeric,
    }
  };

  Literal::Value(if negative { -magnitude } else { magnitude })
}

fn parse_instruction(
  text: &str,
  addr: usize,
  line_no: usize,
  source_text: &str,
  labels: &HashMap<String, usize>,
) -> Result<Instruction, ParseError> {
  let err = |kind| ParseError::at(kind, line_no, source_text);

  let (mnemonic, operand_text) = match text.split_once(char::is_whitespace) {
    Some((mnemonic, rest)) => (mnemonic, Some(rest.trim())),
    None => (text, None),
  };
  let operand_text = operand_text.filter(|t| !t.is_empty());

  let opcode = Opcode::from_str(mnemonic)
    .map_err(|()| err(ParseErrorKind::UnknownOpcode(mnemonic.to_ascii_uppercase())))?;
  let spec = opcode.operand_spec();

  let operand = match operand_text {
    None => Operand::None,
    Some(token) if token.starts_with('#') => match parse_literal(token, true) {
      Literal::Value(value) => Operand::Immediate(value),
      Literal::BadBinary => {
        return Err(err(ParseErrorKind::InvalidBinaryLiteral(token.to_string())));
      }
      Literal::NotNumeric if spec == OperandSpec::Shift => {
        return Err(err(ParseErrorKind::InvalidShiftAmount(opcode.mnemonic())));
      }
      Literal::NotNumeric => {
        return Err(err(ParseErrorKind::InvalidImmediate(token.to_string())));
      }
    },
    Some(token) if token.eq_ignore_ascii_case("ACC") => Operand::Register(Reg::Acc),
    Some(token) if token.eq_ignore_ascii_case("IX") => Operand::Register(Reg::Ix),
    Some(token) => match parse_literal(token, false) {
      Literal::Value(value) => Operand::Direct(value),
      // Any other bare token is a label reference, resolved later.
      _ => match labels.get(&token.to_ascii_uppercase()) {
        Some(&label_addr) => Operand::Direct(label_addr as Word),
        None => Operand::Label(token.to_string()),
      },
    },
  };

  validate_operand(opcode, &operand).map_err(err)?;

  Ok(Instruction {
    addr,
    opcode,
    operand,
    operand_text: operand_text.map(str::to_string),
    line_no,
    source: source_text.to_string(),
    text: text.to_string(),
  })
}

/// Enforces the per-opcode operand table. Missing operands are a distinct
/// error from operands of the wrong kind.
fn validate_operand(opcode: Opcode, operand: &Operand) -> Result<(), ParseErrorKind> {
  let mnemonic = opcode.mnemonic();
  let type_err = |expected| ParseErrorKind::OperandType {
    opcode: mnemonic,
    expected,
  };
  let missing = ParseErrorKind::MissingOperand(mnemonic);

  match opcode.operand_spec() {
    OperandSpec::None => match operand {
      Operand::None => Ok(()),
      _ => Err(ParseErrorKind::UnexpectedOperand(mnemonic)),
    },
    OperandSpec::Immediate => match operand {
      Operand::None => Err(missing),
      Operand::Immediate(_) => Ok(()),
      _ => Err(type_err("an immediate operand")),
    },
    OperandSpec::Value | OperandSpec::Bitwise => match operand {
      Operand::None => Err(missing),
      Operand::Immediate(_) | Operand::Direct(_) | Operand::Label(_) => Ok(()),
      Operand::Register(_) => Err(type_err("an immediate or direct operand")),
    },
    OperandSpec::Direct => match operand {
      Operand::None => Err(missing),
      Operand::Direct(_) | Operand::Label(_) => Ok(()),
      _ => Err(type_err("a direct address")),
    },
    OperandSpec::Shift => match operand {
      Operand::None => Err(missing),
      Operand::Immediate(amount) if *amount >= 0 => Ok(()),
      Operand::Immediate(_) => Err(ParseErrorKind::InvalidShiftAmount(mnemonic)),
      _ => Err(type_err("an immediate shift amount")),
    },
    OperandSpec::IndexSource => match operand {
      Operand::None => Err(missing),
      Operand::Immediate(_) | Operand::Register(Reg::Acc) => Ok(()),
      _ => Err(type_err("an immediate or ACC")),
    },
    OperandSpec::IndexTarget => match operand {
      Operand::None => Err(missing),
      Operand::Register(Reg::Ix) => Ok(()),
      _ => Err(type_err("IX")),
    },
    OperandSpec::Counter => match operand {
      Operand::None | Operand::Register(_) => Ok(()),
      _ => Err(type_err("ACC or IX")),
    },
  }
}

/// Rewrites every deferred label reference to its resolved address.
fn resolve_labels(
  instructions: &mut BTreeMap<usize, Instruction>,
  labels: &HashMap<String, usize>,
) -> Result<(), ParseError> {
  for instr in instructions.values_mut() {
    if let Operand::Label(name) = &instr.operand {
      match labels.get(&name.to_ascii_uppercase()) {
        Some(&addr) => instr.operand = Operand::Direct(addr as Word),
        None => {
          return Err(ParseError::at(
            ParseErrorKind::UnresolvedLabel(name.clone()),
            instr.line_no,
            &instr.source,
          ));
        }
      }
    }
  }
  Ok(())
}
