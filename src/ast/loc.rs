//! Resolved storage locations.
//!
//! Every expression node ends up with a `Loc` describing where its value
//! lives: an immediate, a register, a memory operand, or a bare symbol.
//! Locations are annotated onto nodes by the dealias pass and the code
//! generator, and render directly as AT&T operands.

use crate::backend::x86::register::Reg;
use std::fmt;

/// An immediate operand: a literal integer or the address of a symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Imm {
    Int(i64),
    Sym(String),
}

/// Where a value lives.
///
/// Locations are deliberately cheap to duplicate: a later pass may mutate
/// one copy's fields without affecting the logically-same value elsewhere
/// in the expression tree, so they are cloned rather than shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Loc {
    /// `$n` or `$sym`.
    Imm(Imm),
    /// A general-purpose register.
    Reg(Reg),
    /// `offset(base)` or `offset(base,index,scale)`.
    Mem { base: Reg, offset: i64, index: Option<Reg>, scale: i64 },
    /// A bare symbol: a label or an external-linkage name.
    Sym(String),
}

impl Loc {
    /// A literal integer immediate.
    pub fn int(value: i64) -> Self {
        Loc::Imm(Imm::Int(value))
    }

    /// A frame-pointer-relative stack slot.
    pub fn stack(offset: i64) -> Self {
        Loc::Mem { base: Reg::Rbp, offset, index: None, scale: 8 }
    }

    pub fn is_reg(&self) -> bool {
        matches!(self, Loc::Reg(_))
    }

    pub fn is_imm(&self) -> bool {
        matches!(self, Loc::Imm(_))
    }

    pub fn is_mem(&self) -> bool {
        matches!(self, Loc::Mem { .. })
    }
}

impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Loc::Imm(Imm::Int(value)) => write!(f, "${}", value),
            Loc::Imm(Imm::Sym(name)) => write!(f, "${}", name),
            Loc::Reg(reg) => write!(f, "{}", reg),
            Loc::Mem { base, offset, index, scale } => {
                if *offset != 0 {
                    write!(f, "{}", offset)?;
                }
                write!(f, "({}", base)?;
                if let Some(index) = index {
                    write!(f, ",{},{}", index, scale)?;
                }
                write!(f, ")")
            }
            Loc::Sym(name) => write!(f, "{}", name),
        }
    }
}
