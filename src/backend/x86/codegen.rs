//! x86-64 code generation.
//!
//! A single post-order walk over the finished tree. Every expression node
//! computes its value into a Location; parents combine child Locations into
//! instructions and release the registers they consumed. There is no
//! instruction selection beyond a direct mapping from node kinds to AT&T
//! mnemonics, and no scheduling: instructions appear in evaluation order.
//!
//! Register discipline: operand lifetimes nest because evaluation is
//! post-order, so the pool in [`super::register`] hands registers out LIFO.
//! When an operand has to be coerced into a register after its sibling
//! already holds one, the result can end up above registers that are now
//! dead; [`X86Codegen::consume`] copies the result down so every release
//! still hits the top of the pool.
//!
//! The data section (string literals) is collected on the side and emitted
//! after all text.

use crate::ast::loc::{Imm, Loc};
use crate::ast::{Arena, BinOp, NodeId, NodeKind, UnOp};
use crate::backend::asm::AsmOutput;
use crate::backend::x86::register::{pool_position, Reg, RegPool, ARG_REGS};
use crate::common::error::CodegenError;

pub struct X86Codegen {
    out: AsmOutput,
    data: Vec<String>,
    pool: RegPool,
    labels: u32,
    strings: u32,
}

impl X86Codegen {
    pub fn new(debug: bool) -> Self {
        Self {
            out: AsmOutput::new(debug),
            data: Vec::new(),
            pool: RegPool::new(),
            labels: 0,
            strings: 0,
        }
    }

    /// Emit assembly for the whole unit. The first error aborts generation;
    /// nothing of the buffer is salvaged.
    pub fn generate(mut self, arena: &mut Arena, head: Option<NodeId>) -> Result<String, CodegenError> {
        self.out.emit("    .text");
        self.gen_chain(arena, head)?;
        if !self.data.is_empty() {
            self.out.emit("    .data");
            for line in std::mem::take(&mut self.data) {
                self.out.emit(&line);
            }
        }
        Ok(self.out.buf)
    }

    fn inst(&mut self, text: &str) {
        self.out.emit(&format!("    {}", text));
    }

    fn gen_chain(&mut self, arena: &mut Arena, head: Option<NodeId>) -> Result<(), CodegenError> {
        let mut cursor = head;
        while let Some(id) = cursor {
            self.gen_node(arena, id)?;
            cursor = arena[id].next;
        }
        Ok(())
    }

    fn gen_node(&mut self, arena: &mut Arena, id: NodeId) -> Result<(), CodegenError> {
        let ops = arena[id].ops;
        let result = match arena[id].kind.clone() {
            NodeKind::Function { name } => {
                self.gen_function(arena, id, &name)?;
                None
            }
            NodeKind::Block => {
                self.gen_chain(arena, ops[0])?;
                None
            }
            NodeKind::Return => {
                if let Some(value) = ops[0] {
                    self.gen_node(arena, value)?;
                    let loc = self.loc(arena, value)?;
                    self.inst(&format!("movq {}, %rax", loc));
                }
                self.epilogue();
                self.pool.reset();
                None
            }
            NodeKind::Conditional => {
                self.gen_conditional(arena, id)?;
                None
            }
            NodeKind::CondMove => Some(self.gen_cond_move(arena, id)?),
            NodeKind::Label { .. } => {
                let Some(Loc::Sym(sym)) = arena[id].loc.clone() else {
                    return Err(CodegenError::MalformedNode("label"));
                };
                self.out.emit(&format!("{}:", sym));
                self.gen_chain(arena, ops[0])?;
                None
            }
            NodeKind::Jump { .. } => {
                let Some(Loc::Sym(sym)) = arena[id].loc.clone() else {
                    return Err(CodegenError::MalformedNode("jump"));
                };
                self.inst(&format!("jmp {}", sym));
                None
            }
            NodeKind::Int { value } => Some(Loc::int(value)),
            NodeKind::Variable { decl, alloc, .. } => {
                if decl && alloc > 0 {
                    self.inst(&format!("subq ${}, %rsp", alloc));
                }
                // The Location itself was assigned during scope resolution.
                if arena[id].loc.is_none() {
                    return Err(CodegenError::MalformedNode("variable"));
                }
                None
            }
            NodeKind::Str { value } => Some(self.gen_string(&value)),
            NodeKind::Binary { op } => Some(self.gen_binary(arena, id, op)?),
            NodeKind::Unary { op } => Some(self.gen_unary(arena, id, op)?),
            NodeKind::IncDec { increase } => Some(self.gen_incdec(arena, id, increase)?),
            NodeKind::Call => Some(self.gen_call(arena, id)?),
            NodeKind::StackAlloc => Some(self.gen_stack_alloc(arena, id)?),
        };
        if let Some(loc) = result {
            arena[id].loc = Some(loc);
        }
        // Statement boundary: nothing past this point may hold a register.
        if arena[id].flags.throw_away {
            self.pool.reset();
        }
        Ok(())
    }

    fn gen_function(&mut self, arena: &mut Arena, id: NodeId, name: &str) -> Result<(), CodegenError> {
        let ops = arena[id].ops;
        self.out.emit(&format!("    .globl {}", name));
        self.out.emit(&format!("{}:", name));
        self.inst("pushq %rbp");
        self.inst("movq %rsp, %rbp");

        // Spill incoming arguments into the slots scope resolution gave them.
        let mut cursor = ops[0];
        let mut index = 0;
        while let Some(arg) = cursor {
            if index >= ARG_REGS.len() {
                return Err(CodegenError::MalformedNode("argument list"));
            }
            let slot = self.loc(arena, arg)?;
            self.inst("subq $8, %rsp");
            self.inst(&format!("movq {}, {}", ARG_REGS[index], slot));
            index += 1;
            cursor = arena[arg].next;
        }

        self.gen_chain(arena, ops[1])?;

        // Falling off the end still unwinds the frame; a function whose last
        // statement was a return gets a second, unreachable epilogue.
        self.epilogue();
        self.pool.reset();
        Ok(())
    }

    fn epilogue(&mut self) {
        self.inst("movq %rbp, %rsp");
        self.inst("popq %rbp");
        self.inst("ret");
    }

    /// One compare, one jump: branch past the body when the condition fails.
    fn gen_conditional(&mut self, arena: &mut Arena, id: NodeId) -> Result<(), CodegenError> {
        let ops = arena[id].ops;
        let cond = ops[0].ok_or(CodegenError::MalformedNode("conditional"))?;
        self.gen_node(arena, cond)?;

        let label = format!(".LC{}", self.labels);
        self.labels += 1;

        let jump = match &arena[cond].kind {
            NodeKind::Binary { op } if op.is_comparison() => {
                // The comparison already set the flags.
                inverted_jump(*op, arena[cond].flags.boolean_not)?
            }
            _ => {
                // An arbitrary value: test it against zero.
                let mut loc = self.loc(arena, cond)?;
                let mut dead = Vec::new();
                if loc.is_imm() {
                    dead.push(loc.clone());
                    loc = self.give_register(&loc)?;
                }
                self.inst(&format!("cmpq $0, {}", loc));
                dead.push(loc);
                self.consume(Loc::int(0), &dead)?;
                "je"
            }
        };
        self.inst(&format!("{} {}", jump, label));
        self.gen_chain(arena, ops[1])?;
        self.out.emit(&format!("{}:", label));
        Ok(())
    }

    /// Materialize a comparison's truth value without a branch.
    ///
    /// The result register is preloaded with the complement, a scratch
    /// register holds the value itself, and a conditional move on the raw
    /// condition picks between them. Plain moves preserve the flags the
    /// comparison just set. A negated comparison carries 0 as its value, so
    /// negation costs nothing here.
    fn gen_cond_move(&mut self, arena: &mut Arena, id: NodeId) -> Result<Loc, CodegenError> {
        let ops = arena[id].ops;
        let cmp = ops[0].ok_or(CodegenError::MalformedNode("conditional move"))?;
        let lit = ops[1].ok_or(CodegenError::MalformedNode("conditional move"))?;
        self.gen_node(arena, cmp)?;

        let NodeKind::Binary { op } = arena[cmp].kind else {
            return Err(CodegenError::MalformedNode("conditional move"));
        };
        if !op.is_comparison() {
            return Err(CodegenError::BadBinaryOp(op));
        }
        let NodeKind::Int { value } = arena[lit].kind else {
            return Err(CodegenError::MalformedNode("conditional move"));
        };

        let res = self.pool.allocate()?;
        self.inst(&format!("movq ${}, {}", value ^ 1, res));
        let tmp = self.pool.allocate()?;
        self.inst(&format!("movq ${}, {}", value, tmp));
        self.inst(&format!("{} {}, {}", cond_move(op)?, tmp, res));
        self.pool.release_reg(tmp)?;
        Ok(Loc::Reg(res))
    }

    fn gen_string(&mut self, value: &str) -> Loc {
        let label = format!(".LS{}", self.strings);
        self.strings += 1;
        self.data.push(format!("{}:", label));
        self.data.push(format!("    .string \"{}\"", escape(value)));
        Loc::Imm(Imm::Sym(label))
    }

    fn gen_binary(&mut self, arena: &mut Arena, id: NodeId, op: BinOp) -> Result<Loc, CodegenError> {
        let left = arena[id].ops[0].ok_or(CodegenError::MalformedNode("binary"))?;
        let right = arena[id].ops[1].ok_or(CodegenError::MalformedNode("binary"))?;
        self.gen_node(arena, left)?;
        self.gen_node(arena, right)?;
        let mut loc = self.loc(arena, left)?;
        let mut from = self.loc(arena, right)?;
        let mut dead: Vec<Loc> = Vec::new();

        let result = match op {
            BinOp::Assign => {
                if !(from.is_reg() || from.is_imm()) {
                    dead.push(from.clone());
                    from = self.give_register(&from)?;
                }
                self.inst(&format!("movq {}, {}", from, loc));
                dead.push(from);
                loc
            }
            BinOp::Add | BinOp::And | BinOp::Or | BinOp::Xor => {
                let mnemonic = match op {
                    BinOp::Add => "addq",
                    BinOp::And => "andq",
                    BinOp::Or => "orq",
                    _ => "xorq",
                };
                // Commutative, so a right operand already in a register can
                // serve as the destination instead of coercing the left.
                if !loc.is_reg() {
                    if from.is_reg() {
                        std::mem::swap(&mut loc, &mut from);
                    } else {
                        dead.push(loc.clone());
                        loc = self.give_register(&loc)?;
                    }
                }
                self.inst(&format!("{} {}, {}", mnemonic, from, loc));
                dead.push(from);
                loc
            }
            BinOp::Sub => {
                // Not commutative: the left operand must be the destination.
                if !loc.is_reg() {
                    dead.push(loc.clone());
                    loc = self.give_register(&loc)?;
                }
                self.inst(&format!("subq {}, {}", from, loc));
                dead.push(from);
                loc
            }
            BinOp::Mul | BinOp::Div | BinOp::Mod => {
                self.inst(&format!("movq {}, %rax", loc));
                self.inst("movq $0, %rdx");
                if from.is_imm() {
                    dead.push(from.clone());
                    from = self.give_register(&from)?;
                }
                let mnemonic = if op == BinOp::Mul { "imulq" } else { "idivq" };
                self.inst(&format!("{} {}", mnemonic, from));
                dead.push(from);
                dead.push(loc);
                let reg = if op == BinOp::Mod { Reg::Rdx } else { Reg::Rax };
                Loc::Reg(reg)
            }
            BinOp::Shl | BinOp::Shr => {
                let mnemonic = if op == BinOp::Shl { "shlq" } else { "shrq" };
                // The count may only be an immediate or %cl.
                let count = if from.is_imm() {
                    from.to_string()
                } else {
                    self.inst(&format!("movq {}, %rcx", from));
                    "%cl".to_string()
                };
                dead.push(from);
                if loc.is_imm() {
                    dead.push(loc.clone());
                    loc = self.give_register(&loc)?;
                }
                self.inst(&format!("{} {}, {}", mnemonic, count, loc));
                loc
            }
            BinOp::Index => {
                if !loc.is_reg() {
                    dead.push(loc.clone());
                    loc = self.give_register(&loc)?;
                }
                if !from.is_reg() {
                    dead.push(from.clone());
                    from = self.give_register(&from)?;
                }
                match (loc, from) {
                    (Loc::Reg(base), Loc::Reg(index)) => {
                        // Both registers live on inside the result.
                        Loc::Mem { base, offset: 0, index: Some(index), scale: 8 }
                    }
                    _ => return Err(CodegenError::MalformedNode("index")),
                }
            }
            BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge | BinOp::Eq | BinOp::Ne => {
                // cmpq allows an immediate source only, and at most one
                // memory operand.
                if loc.is_imm() || (loc.is_mem() && from.is_mem()) {
                    dead.push(loc.clone());
                    loc = self.give_register(&loc)?;
                }
                self.inst(&format!("cmpq {}, {}", from, loc));
                dead.push(from);
                dead.push(loc);
                // The value lives in the flags; the parent picks a condition.
                Loc::int(0)
            }
        };
        self.consume(result, &dead)
    }

    fn gen_unary(&mut self, arena: &mut Arena, id: NodeId, op: UnOp) -> Result<Loc, CodegenError> {
        let operand = arena[id].ops[0].ok_or(CodegenError::MalformedNode("unary"))?;
        self.gen_node(arena, operand)?;
        let mut loc = self.loc(arena, operand)?;

        match op {
            UnOp::Neg | UnOp::Not => {
                let mut dead = Vec::new();
                // Operate on a copy; negating memory in place would mutate
                // the variable itself.
                if !loc.is_reg() {
                    dead.push(loc.clone());
                    loc = self.give_register(&loc)?;
                }
                let mnemonic = if op == UnOp::Neg { "negq" } else { "notq" };
                self.inst(&format!("{} {}", mnemonic, loc));
                self.consume(loc, &dead)
            }
            UnOp::Deref => {
                if !loc.is_reg() {
                    loc = self.give_register(&loc)?;
                }
                match loc {
                    Loc::Reg(base) => Ok(Loc::Mem { base, offset: 0, index: None, scale: 8 }),
                    _ => Err(CodegenError::MalformedNode("dereference")),
                }
            }
            UnOp::AddrOf => match loc {
                Loc::Mem { .. } => {
                    let reg = self.pool.allocate()?;
                    self.inst(&format!("leaq {}, {}", loc, reg));
                    Ok(Loc::Reg(reg))
                }
                Loc::Sym(name) => Ok(Loc::Imm(Imm::Sym(name))),
                other => Err(CodegenError::AddressOfValue(other)),
            },
        }
    }

    fn gen_incdec(&mut self, arena: &mut Arena, id: NodeId, increase: bool) -> Result<Loc, CodegenError> {
        let target = arena[id].ops[0].ok_or(CodegenError::MalformedNode("increment"))?;
        self.gen_node(arena, target)?;
        let loc = self.loc(arena, target)?;
        if loc.is_imm() {
            return Err(CodegenError::MalformedNode("increment"));
        }
        let mnemonic = if increase { "incq" } else { "decq" };
        if arena[id].flags.prefix {
            self.inst(&format!("{} {}", mnemonic, loc));
            Ok(loc)
        } else {
            // Snapshot the old value first; it is the expression's result.
            let old = self.give_register(&loc)?;
            self.inst(&format!("{} {}", mnemonic, loc));
            Ok(old)
        }
    }

    fn gen_call(&mut self, arena: &mut Arena, id: NodeId) -> Result<Loc, CodegenError> {
        let callee = arena[id].ops[0].ok_or(CodegenError::MalformedNode("call"))?;
        let NodeKind::Variable { name, .. } = arena[callee].kind.clone() else {
            return Err(CodegenError::MalformedNode("call"));
        };

        let mut args = Vec::new();
        let mut cursor = arena[id].ops[1];
        while let Some(arg) = cursor {
            args.push(arg);
            cursor = arena[arg].next;
        }
        if args.len() > ARG_REGS.len() {
            return Err(CodegenError::MalformedNode("argument list"));
        }

        // Evaluate every argument before moving any into its slot; a later
        // argument's evaluation could otherwise clobber an earlier slot. An
        // argument that is itself a call still tramples the slots already
        // filled, a known limitation of this calling sequence.
        for &arg in &args {
            self.gen_node(arena, arg)?;
        }
        for (index, &arg) in args.iter().enumerate() {
            let loc = self.loc(arena, arg)?;
            self.inst(&format!("movq {}, {}", loc, ARG_REGS[index]));
        }
        for &arg in args.iter().rev() {
            let loc = self.loc(arena, arg)?;
            self.pool.release(&loc)?;
        }

        // Variadic callees read %al as the vector-register count.
        self.inst("movq $0, %rax");
        self.inst(&format!("call {}", name));

        if arena[id].flags.throw_away {
            Ok(Loc::Reg(Reg::Rax))
        } else {
            // The next call would clobber %rax, so a consumed result moves
            // into a pool register right away.
            self.give_register(&Loc::Reg(Reg::Rax))
        }
    }

    fn gen_stack_alloc(&mut self, arena: &mut Arena, id: NodeId) -> Result<Loc, CodegenError> {
        if let Some(size) = arena[id].ops[0] {
            self.gen_node(arena, size)?;
            let loc = self.loc(arena, size)?;
            self.inst(&format!("subq {}, %rsp", loc));
            self.consume(Loc::int(0), &[loc])?;
        }
        Ok(Loc::Reg(Reg::Rsp))
    }

    fn loc(&self, arena: &Arena, id: NodeId) -> Result<Loc, CodegenError> {
        arena[id].loc.clone().ok_or(CodegenError::MalformedNode("operand"))
    }

    /// Copy a value into a fresh pool register.
    fn give_register(&mut self, loc: &Loc) -> Result<Loc, CodegenError> {
        let reg = self.pool.allocate()?;
        self.inst(&format!("movq {}, {}", loc, reg));
        Ok(Loc::Reg(reg))
    }

    /// Release the pool registers named by the dead Locations, keeping
    /// `result` live.
    ///
    /// Dead registers normally sit on top of the pool and free in descending
    /// order. When a coercion left the result above registers that are now
    /// dead, the result is first copied down into the lowest dead register;
    /// the copy is a plain move and never disturbs condition flags.
    fn consume(&mut self, mut result: Loc, dead: &[Loc]) -> Result<Loc, CodegenError> {
        let mut regs: Vec<Reg> = Vec::new();
        for loc in dead {
            collect_pool_regs(loc, &mut regs);
        }
        if let Loc::Reg(res) = result {
            if let Some(res_pos) = pool_position(res) {
                let lowest = regs
                    .iter()
                    .filter_map(|&r| pool_position(r).map(|p| (p, r)))
                    .min_by_key(|&(p, _)| p);
                if let Some((low_pos, low)) = lowest {
                    if low_pos < res_pos {
                        self.inst(&format!("movq {}, {}", res, low));
                        regs.retain(|&r| r != low);
                        regs.push(res);
                        result = Loc::Reg(low);
                    }
                }
            }
        }
        regs.sort_by_key(|&r| std::cmp::Reverse(pool_position(r)));
        for reg in regs {
            self.pool.release_reg(reg)?;
        }
        Ok(result)
    }
}

fn collect_pool_regs(loc: &Loc, out: &mut Vec<Reg>) {
    match loc {
        Loc::Reg(reg) if pool_position(*reg).is_some() => out.push(*reg),
        Loc::Mem { base, index, .. } => {
            if pool_position(*base).is_some() {
                out.push(*base);
            }
            if let Some(index) = index {
                if pool_position(*index).is_some() {
                    out.push(*index);
                }
            }
        }
        _ => {}
    }
}

/// Jump taken when the comparison's condition does not hold.
///
/// A negated comparison branches on the raw condition instead, so negation
/// is free at this point.
fn inverted_jump(op: BinOp, negated: bool) -> Result<&'static str, CodegenError> {
    let jump = match (op, negated) {
        (BinOp::Lt, false) => "jnl",
        (BinOp::Lt, true) => "jl",
        (BinOp::Le, false) => "jnle",
        (BinOp::Le, true) => "jle",
        (BinOp::Gt, false) => "jng",
        (BinOp::Gt, true) => "jg",
        (BinOp::Ge, false) => "jnge",
        (BinOp::Ge, true) => "jge",
        (BinOp::Eq, false) => "jne",
        (BinOp::Eq, true) => "je",
        (BinOp::Ne, false) => "je",
        (BinOp::Ne, true) => "jne",
        _ => return Err(CodegenError::BadBinaryOp(op)),
    };
    Ok(jump)
}

/// Conditional move on the raw condition; negation is baked into the value
/// being moved, never into the condition code.
fn cond_move(op: BinOp) -> Result<&'static str, CodegenError> {
    let mnemonic = match op {
        BinOp::Lt => "cmovl",
        BinOp::Le => "cmovle",
        BinOp::Gt => "cmovg",
        BinOp::Ge => "cmovge",
        BinOp::Eq => "cmove",
        BinOp::Ne => "cmovne",
        _ => return Err(CodegenError::BadBinaryOp(op)),
    };
    Ok(mnemonic)
}

fn escape(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            '\t' => escaped.push_str("\\t"),
            _ => escaped.push(c),
        }
    }
    escaped
}
