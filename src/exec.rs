use crate::cpu::{Cpu, Flag, Word};
use crate::error::RuntimeError;
use crate::io::IoBuffer;
use crate::memory::Memory;
use crate::opcode::Opcode;
use crate::parser::{Instruction, Operand, Reg};

/// The machine state a single instruction executes against.
pub struct ExecContext<'a> {
  pub cpu: &'a mut Cpu,
  pub mem: &'a mut Memory,
  pub io: &'a mut IoBuffer,
}

/// Executes one instruction, returning the next program counter for
/// jumps; `None` means fall through to the following address.
pub fn execute(
  instr: &Instruction,
  ctx: &mut ExecContext<'_>,
) -> Result<Option<Word>, RuntimeError> {
  match instr.opcode {
    Opcode::Ldm => {
      ctx.cpu.set_acc(immediate(instr));
      Ok(None)
    }
    Opcode::Ldd => {
      let value = ctx.mem.read(direct(instr))?;
      ctx.cpu.set_acc(value);
      Ok(None)
    }
    Opcode::Ldi => {
      let pointer = ctx.mem.read(direct(instr))?;
      let value = ctx.mem.read(pointer)?;
      ctx.cpu.set_acc(value);
      Ok(None)
    }
    Opcode::Ldx => {
      let value = ctx.mem.read(direct(instr) + ctx.cpu.ix())?;
      ctx.cpu.set_acc(value);
      Ok(None)
    }
    Opcode::Ldr => {
      match instr.operand {
        Operand::Immediate(value) => ctx.cpu.set_ix(value),
        _ => ctx.cpu.set_ix(ctx.cpu.acc()),
      }
      Ok(None)
    }
    Opcode::Mov => {
      ctx.cpu.set_ix(ctx.cpu.acc());
      Ok(None)
    }
    Opcode::Sto => {
      ctx.mem.write(direct(instr), ctx.cpu.acc())?;
      Ok(None)
    }
    Opcode::End => {
      ctx.cpu.halt();
      Ok(None)
    }
    Opcode::In => {
      let code = ctx.io.read_char()?;
      ctx.cpu.set_acc(code as Word);
      Ok(None)
    }
    Opcode::Out => {
      ctx.io.write_char(ctx.cpu.acc());
      Ok(None)
    }
    Opcode::Add => {
      let value = value(instr, ctx)?;
      ctx.cpu.set_acc(ctx.cpu.acc() + value);
      Ok(None)
    }
    Opcode::Sub => {
      let value = value(instr, ctx)?;
      ctx.cpu.set_acc(ctx.cpu.acc() - value);
      Ok(None)
    }
    Opcode::Inc => {
      match instr.operand {
        Operand::Register(Reg::Ix) => ctx.cpu.set_ix(ctx.cpu.ix() + 1),
        _ => ctx.cpu.set_acc(ctx.cpu.acc() + 1),
      }
      Ok(None)
    }
    Opcode::Dec => {
      match instr.operand {
        Operand::Register(Reg::Ix) => ctx.cpu.set_ix(ctx.cpu.ix() - 1),
        _ => ctx.cpu.set_acc(ctx.cpu.acc() - 1),
      }
      Ok(None)
    }
    Opcode::Cmp => {
      let value = value(instr, ctx)?;
      ctx.cpu.set_flag(Flag::from_bool(ctx.cpu.acc() == value));
      Ok(None)
    }
    Opcode::Cmi => {
      let pointer = ctx.mem.read(direct(instr))?;
      let value = ctx.mem.read(pointer)?;
      ctx.cpu.set_flag(Flag::from_bool(ctx.cpu.acc() == value));
      Ok(None)
    }
    Opcode::Jmp => Ok(Some(direct(instr))),
    Opcode::Jpe => match ctx.cpu.flag() {
      Flag::Unset => Err(RuntimeError::JumpWithoutCompare("JPE")),
      Flag::True => Ok(Some(direct(instr))),
      Flag::False => Ok(None),
    },
    Opcode::Jpn => match ctx.cpu.flag() {
      Flag::Unset => Err(RuntimeError::JumpWithoutCompare("JPN")),
      Flag::False => Ok(Some(direct(instr))),
      Flag::True => Ok(None),
    },
    Opcode::Lsl | Opcode::Lsr => {
      let word = ctx.cpu.word();
      let amount = immediate(instr);
      let acc = word.to_unsigned(ctx.cpu.acc());
      let shifted = if amount >= word.bits() as Word {
        0
      } else if instr.opcode == Opcode::Lsl {
        acc << amount
      } else {
        acc >> amount
      };
      ctx.cpu.set_acc(shifted);
      Ok(None)
    }
    Opcode::And | Opcode::Or | Opcode::Xor => {
      let word = ctx.cpu.word();
      let lhs = word.to_unsigned(ctx.cpu.acc());
      let rhs = word.to_unsigned(value(instr, ctx)?);
      let combined = match instr.opcode {
        Opcode::And => lhs & rhs,
        Opcode::Or => lhs | rhs,
        _ => lhs ^ rhs,
      };
      ctx.cpu.set_acc(combined);
      Ok(None)
    }
  }
}

// Operand accessors below rely on the shapes `validate_operand` accepted
// at parse time.

fn immediate(instr: &Instruction) -> Word {
  match instr.operand {
    Operand::Immediate(value) => value,
    _ => unreachable!("{} operand is validated at parse time", instr.opcode.mnemonic()),
  }
}

fn direct(instr: &Instruction) -> Word {
  match instr.operand {
    Operand::Direct(addr) => addr,
    _ => unreachable!("{} operand is validated at parse time", instr.opcode.mnemonic()),
  }
}

/// The immediate value, or the memory word at the direct address.
fn value(instr: &Instruction, ctx: &ExecContext<'_>) -> Result<Word, RuntimeError> {
  match instr.operand {
    Operand::Immediate(value) => Ok(value),
    Operand::Direct(addr) => ctx.mem.read(addr),
    _ => unreachable!("{} operand is validated at parse time", instr.opcode.mnemonic()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cpu::WordFormat;

  fn machine() -> (Cpu, Memory, IoBuffer) {
    let word = WordFormat::new(16, true);
    (Cpu::new(word), Memory::new(256, word), IoBuffer::new(""))
  }

  fn instr(opcode: Opcode, operand: Operand) -> Instruction {
    Instruction {
      addr: 200,
      opcode,
      operand,
      operand_text: None,
      line_no: 1,
      source: String::new(),
      text: String::new(),
    }
  }

  fn step(
    opcode: Opcode,
    operand: Operand,
    cpu: &mut Cpu,
    mem: &mut Memory,
    io: &mut IoBuffer,
  ) -> Result<Option<Word>, RuntimeError> {
    let mut ctx = ExecContext { cpu, mem, io };
    execute(&instr(opcode, operand), &mut ctx)
  }

  #[test]
  fn ldm_loads_and_normalizes() {
    let (mut cpu, mut mem, mut io) = machine();
    step(Opcode::Ldm, Operand::Immediate(70000), &mut cpu, &mut mem, &mut io).unwrap();
    assert_eq!(cpu.acc(), 4464);
  }

  #[test]
  fn ldi_follows_pointer() {
    let (mut cpu, mut mem, mut io) = machine();
    mem.write(80, 81).unwrap();
    mem.write(81, 42).unwrap();
    step(Opcode::Ldi, Operand::Direct(80), &mut cpu, &mut mem, &mut io).unwrap();
    assert_eq!(cpu.acc(), 42);
  }

  #[test]
  fn ldx_offsets_by_index_register() {
    let (mut cpu, mut mem, mut io) = machine();
    mem.write(85, 99).unwrap();
    cpu.set_ix(5);
    step(Opcode::Ldx, Operand::Direct(80), &mut cpu, &mut mem, &mut io).unwrap();
    assert_eq!(cpu.acc(), 99);
  }

  #[test]
  fn sto_out_of_bounds_reports_address() {
    let (mut cpu, mut mem, mut io) = machine();
    let err = step(Opcode::Sto, Operand::Direct(300), &mut cpu, &mut mem, &mut io).unwrap_err();
    assert_eq!(err, RuntimeError::MemoryOutOfRange(300));
  }

  #[test]
  fn conditional_jump_without_compare_fails() {
    let (mut cpu, mut mem, mut io) = machine();
    let err = step(Opcode::Jpe, Operand::Direct(205), &mut cpu, &mut mem, &mut io).unwrap_err();
    assert_eq!(err, RuntimeError::JumpWithoutCompare("JPE"));
    let err = step(Opcode::Jpn, Operand::Direct(205), &mut cpu, &mut mem, &mut io).unwrap_err();
    assert_eq!(err, RuntimeError::JumpWithoutCompare("JPN"));
  }

  #[test]
  fn conditional_jumps_follow_the_flag() {
    let (mut cpu, mut mem, mut io) = machine();
    cpu.set_flag(Flag::True);
    let next = step(Opcode::Jpe, Operand::Direct(205), &mut cpu, &mut mem, &mut io).unwrap();
    assert_eq!(next, Some(205));
    let next = step(Opcode::Jpn, Operand::Direct(205), &mut cpu, &mut mem, &mut io).unwrap();
    assert_eq!(next, None);
    cpu.set_flag(Flag::False);
    let next = step(Opcode::Jpn, Operand::Direct(205), &mut cpu, &mut mem, &mut io).unwrap();
    assert_eq!(next, Some(205));
  }

  #[test]
  fn bitwise_masks_negative_accumulator() {
    let (mut cpu, mut mem, mut io) = machine();
    cpu.set_acc(-1);
    step(Opcode::And, Operand::Immediate(0b1111), &mut cpu, &mut mem, &mut io).unwrap();
    assert_eq!(cpu.acc(), 15);
  }

  #[test]
  fn bitwise_result_is_renormalized() {
    let (mut cpu, mut mem, mut io) = machine();
    cpu.set_acc(-2);
    // 0xFFFE OR 1 = 0xFFFF, which reads back as -1 in signed 16-bit.
    step(Opcode::Or, Operand::Immediate(1), &mut cpu, &mut mem, &mut io).unwrap();
    assert_eq!(cpu.acc(), -1);
  }

  #[test]
  fn shift_right_is_logical() {
    let (mut cpu, mut mem, mut io) = machine();
    cpu.set_acc(-2);
    // 0xFFFE >> 1 = 0x7FFF: the sign bit is not propagated.
    step(Opcode::Lsr, Operand::Immediate(1), &mut cpu, &mut mem, &mut io).unwrap();
    assert_eq!(cpu.acc(), 32767);
  }

  #[test]
  fn shift_by_word_width_clears() {
    let (mut cpu, mut mem, mut io) = machine();
    cpu.set_acc(123);
    step(Opcode::Lsl, Operand::Immediate(16), &mut cpu, &mut mem, &mut io).unwrap();
    assert_eq!(cpu.acc(), 0);
    cpu.set_acc(123);
    step(Opcode::Lsr, Operand::Immediate(99), &mut cpu, &mut mem, &mut io).unwrap();
    assert_eq!(cpu.acc(), 0);
  }

  #[test]
  fn cmp_compares_raw_immediate() {
    let (mut cpu, mut mem, mut io) = machine();
    // 70000 normalizes to 4464 in ACC, but the immediate stays raw.
    cpu.set_acc(70000);
    step(Opcode::Cmp, Operand::Immediate(70000), &mut cpu, &mut mem, &mut io).unwrap();
    assert_eq!(cpu.flag(), Flag::False);
    step(Opcode::Cmp, Operand::Immediate(4464), &mut cpu, &mut mem, &mut io).unwrap();
    assert_eq!(cpu.flag(), Flag::True);
  }

  #[test]
  fn out_emits_low_byte() {
    let (mut cpu, mut mem, mut io) = machine();
    cpu.set_acc(0x141);
    step(Opcode::Out, Operand::None, &mut cpu, &mut mem, &mut io).unwrap();
    assert_eq!(io.output(), "A");
  }

  #[test]
  fn in_reads_next_code() {
    let (mut cpu, mut mem, _) = machine();
    let mut io = IoBuffer::new("Z");
    step(Opcode::In, Operand::None, &mut cpu, &mut mem, &mut io).unwrap();
    assert_eq!(cpu.acc(), 90);
    let err = step(Opcode::In, Operand::None, &mut cpu, &mut mem, &mut io).unwrap_err();
    assert_eq!(err, RuntimeError::InputUnderflow);
  }

  #[test]
  fn end_halts() {
    let (mut cpu, mut mem, mut io) = machine();
    step(Opcode::End, Operand::None, &mut cpu, &mut mem, &mut io).unwrap();
    assert!(cpu.halted());
  }

  #[test]
  fn inc_defaults_to_acc() {
    let (mut cpu, mut mem, mut io) = machine();
    step(Opcode::Inc, Operand::None, &mut cpu, &mut mem, &mut io).unwrap();
    assert_eq!(cpu.acc(), 1);
    step(Opcode::Inc, Operand::Register(Reg::Ix), &mut cpu, &mut mem, &mut io).unwrap();
    assert_eq!(cpu.ix(), 1);
    step(Opcode::Dec, Operand::Register(Reg::Acc), &mut cpu, &mut mem, &mut io).unwrap();
    assert_eq!(cpu.acc(), 0);
  }
}
