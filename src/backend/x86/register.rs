//! x86-64 register names and the expression register pool.

use crate::ast::loc::Loc;
use crate::common::error::CodegenError;
use std::fmt;

/// x86-64 general-purpose registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reg {
    Rax,
    Rbx,
    Rcx,
    Rdx,
    Rsi,
    Rdi,
    Rbp,
    Rsp,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
}

impl Reg {
    /// AT&T operand spelling.
    pub fn name(self) -> &'static str {
        match self {
            Reg::Rax => "%rax",
            Reg::Rbx => "%rbx",
            Reg::Rcx => "%rcx",
            Reg::Rdx => "%rdx",
            Reg::Rsi => "%rsi",
            Reg::Rdi => "%rdi",
            Reg::Rbp => "%rbp",
            Reg::Rsp => "%rsp",
            Reg::R8 => "%r8",
            Reg::R9 => "%r9",
            Reg::R10 => "%r10",
            Reg::R11 => "%r11",
            Reg::R12 => "%r12",
            Reg::R13 => "%r13",
            Reg::R14 => "%r14",
            Reg::R15 => "%r15",
        }
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Registers that carry the first six integer arguments (System V AMD64).
pub const ARG_REGS: [Reg; 6] = [Reg::Rdi, Reg::Rsi, Reg::Rdx, Reg::Rcx, Reg::R8, Reg::R9];

/// Registers handed out for expression evaluation, in allocation order.
///
/// rax and rdx are reserved for multiply/divide and rcx for shift counts, so
/// none of them appear here. The tail of the list reuses argument registers;
/// a function call in the middle of a deep expression can therefore clobber
/// live values, which is a known limitation of the calling-sequence code.
pub const EXPR_POOL: [Reg; 11] = [
    Reg::Rbx,
    Reg::R10,
    Reg::R11,
    Reg::R12,
    Reg::R13,
    Reg::R14,
    Reg::R15,
    Reg::R9,
    Reg::R8,
    Reg::Rsi,
    Reg::Rdi,
];

/// Position of a register in the expression pool, if it is pooled at all.
pub fn pool_position(reg: Reg) -> Option<usize> {
    EXPR_POOL.iter().position(|&r| r == reg)
}

/// Stack-discipline allocator over [`EXPR_POOL`].
///
/// Expressions are evaluated strictly post-order, so operand lifetimes nest:
/// the most recently allocated register is always the first one freed.
/// Allocation bumps a counter; release checks that the register really is
/// the top of the stack rather than assuming it.
#[derive(Debug, Default)]
pub struct RegPool {
    live: usize,
}

impl RegPool {
    pub fn new() -> Self {
        Self { live: 0 }
    }

    /// Number of registers currently handed out.
    pub fn live(&self) -> usize {
        self.live
    }

    /// The most recently allocated register, if any.
    pub fn top(&self) -> Option<Reg> {
        self.live.checked_sub(1).map(|i| EXPR_POOL[i])
    }

    /// Take the next free register off the pool.
    pub fn allocate(&mut self) -> Result<Reg, CodegenError> {
        if self.live == EXPR_POOL.len() {
            return Err(CodegenError::PoolExhausted(self.live));
        }
        let reg = EXPR_POOL[self.live];
        self.live += 1;
        Ok(reg)
    }

    /// Free a single register, if it came from the pool.
    ///
    /// Reserved registers (rax, rcx, rdx, rbp, rsp) are never pooled and
    /// releasing them is a no-op. Releasing a pool register that is not the
    /// current top is a fatal internal error.
    pub fn release_reg(&mut self, reg: Reg) -> Result<(), CodegenError> {
        if !EXPR_POOL.contains(&reg) {
            return Ok(());
        }
        if self.top() == Some(reg) {
            self.live -= 1;
            Ok(())
        } else {
            Err(CodegenError::NonLifoFree(reg))
        }
    }

    /// Release whatever registers a Location holds.
    ///
    /// A memory Location keeps its base and index registers alive; freeing
    /// it must release them too. Whichever of the two sits on top of the
    /// stack is freed first so the LIFO check holds no matter which operand
    /// was coerced last.
    pub fn release(&mut self, loc: &Loc) -> Result<(), CodegenError> {
        match loc {
            Loc::Reg(reg) => self.release_reg(*reg),
            Loc::Mem { base, index, .. } => {
                if let Some(index) = index {
                    if self.top() == Some(*base) {
                        self.release_reg(*base)?;
                        self.release_reg(*index)
                    } else {
                        self.release_reg(*index)?;
                        self.release_reg(*base)
                    }
                } else {
                    self.release_reg(*base)
                }
            }
            Loc::Imm(_) | Loc::Sym(_) => Ok(()),
        }
    }

    /// Return every register to the pool.
    ///
    /// Statement boundaries are hard synchronization points: no register
    /// liveness crosses them, so the count drops straight to zero.
    pub fn reset(&mut self) {
        self.live = 0;
    }
}
