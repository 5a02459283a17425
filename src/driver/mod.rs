//! Compilation pipeline.
//!
//! Runs the fixed pass sequence over an already-parsed tree and writes the
//! resulting assembly. Passes run unconditionally and in order; the first
//! failure aborts the run and nothing is written.

use crate::ast::Ast;
use crate::backend::x86::codegen::X86Codegen;
use crate::common::error::{CompileError, Diagnostics};
use crate::passes::{dealias, optimizer, semantic, transform};
use std::io::Write;

/// Knobs for one compilation.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// 0 disables constant folding; structural cleanups always run.
    pub opt_level: u32,
    /// Echo assembly to stderr as it is emitted.
    pub debug: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self { opt_level: 1, debug: false }
    }
}

/// Compile one unit to assembly text on `out`.
///
/// Diagnostics from validation are printed to stderr; only internal errors
/// and output failures abort.
pub fn compile(
    ast: &mut Ast,
    options: &CompileOptions,
    out: &mut impl Write,
) -> Result<(), CompileError> {
    let mut diags = Diagnostics::new();
    semantic::run(ast, &mut diags)?;
    diags.print_all();

    dealias::run(ast)?;
    transform::run(ast)?;
    optimizer::run(ast, options.opt_level)?;

    let asm = X86Codegen::new(options.debug).generate(&mut ast.arena, ast.head)?;
    out.write_all(asm.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinOp, UnOp};

    #[test]
    fn pipeline_produces_assembly() {
        let mut ast = Ast::new();
        let v = ast.arena.int(0);
        let ret = ast.arena.ret(Some(v));
        let f = ast.arena.function("main", None, Some(ret));
        ast.head = Some(f);

        let mut out = Vec::new();
        compile(&mut ast, &CompileOptions::default(), &mut out).unwrap();
        let asm = String::from_utf8(out).unwrap();
        assert!(asm.starts_with("    .text\n"));
        assert!(asm.contains("main:"));
    }

    #[test]
    fn failure_writes_nothing() {
        let mut ast = Ast::new();
        let v = ast.arena.int(5);
        let addr = ast.arena.unary(UnOp::AddrOf, v);
        let f = ast.arena.function("main", None, Some(addr));
        ast.head = Some(f);

        let mut out = Vec::new();
        let result = compile(&mut ast, &CompileOptions::default(), &mut out);
        assert!(result.is_err());
        assert!(out.is_empty());
    }

    #[test]
    fn folding_follows_the_optimization_level() {
        let build = |target: &mut Ast| {
            let d = target.arena.declaration("x");
            let two = target.arena.int(2);
            let three = target.arena.int(3);
            let sum = target.arena.binary(BinOp::Add, two, three);
            let x = target.arena.variable("x");
            let assign = target.arena.binary(BinOp::Assign, x, sum);
            target.arena.discard(assign);
            let body = target.arena.chain(&[d, assign]);
            let f = target.arena.function("main", None, body);
            target.head = Some(f);
        };

        let mut folded = Ast::new();
        build(&mut folded);
        let mut out = Vec::new();
        compile(&mut folded, &CompileOptions { opt_level: 1, debug: false }, &mut out).unwrap();
        assert!(String::from_utf8(out).unwrap().contains("movq $5, -8(%rbp)"));

        let mut unfolded = Ast::new();
        build(&mut unfolded);
        let mut out = Vec::new();
        compile(&mut unfolded, &CompileOptions { opt_level: 0, debug: false }, &mut out).unwrap();
        assert!(String::from_utf8(out).unwrap().contains("addq"));
    }
}
