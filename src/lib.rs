//! Emulator for the assembly language taught in the Cambridge
//! International AS & A Level Computer Science syllabus (9618)
//!
//! <https://www.cambridgeinternational.org/programmes-and-qualifications/cambridge-international-as-and-a-levels/>
//!
//! Source text is assembled into an addressed instruction table and run by
//! a fetch-execute loop that records a per-step trace, so a front end can
//! replay a program one instruction at a time. [`run`] is the single entry
//! point; everything it returns is serializable.

pub mod cpu;
pub mod error;
pub mod exec;
pub mod io;
pub mod memory;
pub mod opcode;
pub mod parser;
pub mod runner;

pub use error::{ErrorInfo, ParseError, ParseErrorKind, RuntimeError};
pub use runner::{run, RunOptions, RunResult, Status};
