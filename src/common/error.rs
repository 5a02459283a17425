//! Error and diagnostic types shared across the compiler.

use crate::ast::loc::Loc;
use crate::ast::BinOp;
use crate::backend::x86::register::Reg;
use thiserror::Error;

/// Fatal internal errors raised during code generation.
///
/// These indicate a malformed tree handed to the backend, not a user error.
/// The first one aborts code generation for the whole unit; there is no
/// partial-output recovery.
#[derive(Debug, Error)]
pub enum CodegenError {
    #[error("invalid binary operator opcode {0:?}")]
    BadBinaryOp(BinOp),

    #[error("register pool exhausted with {0} live allocations")]
    PoolExhausted(usize),

    #[error("released register {0} is not the most recent allocation")]
    NonLifoFree(Reg),

    #[error("cannot take the address of {0}")]
    AddressOfValue(Loc),

    #[error("malformed {0} node")]
    MalformedNode(&'static str),
}

/// Pipeline-level failure reported by the driver.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("code generation failed: {0}")]
    Codegen(#[from] CodegenError),

    #[error("failed to write output: {0}")]
    Io(#[from] std::io::Error),
}

/// Warnings collected by the validation pass.
///
/// Warnings never abort compilation; the driver prints them to stderr and
/// carries on.
#[derive(Debug, Default)]
pub struct Diagnostics {
    warnings: Vec<String>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn warning_count(&self) -> usize {
        self.warnings.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.warnings.iter().map(String::as_str)
    }

    pub fn print_all(&self) {
        for message in &self.warnings {
            eprintln!("warning: {}", message);
        }
    }
}
