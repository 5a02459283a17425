pub mod asm;
pub mod x86;
