//! Constant folding and dead-branch removal.
//!
//! A single bottom-up walk: operands fold first, then each node looks at its
//! now-simplified operands. Arithmetic on two integer literals collapses to
//! a literal with wrapping 64-bit semantics, matching what the emitted code
//! would compute. Conditionals with a literal controlling expression either
//! splice their body into the surrounding chain (nonzero) or drop out of it
//! (zero); that structural simplification runs even at optimization level 0
//! because later stages rely on it. Adjacent constant stack allocations merge
//! into one.
//!
//! This pass cannot fail; anything it does not recognize it leaves alone.

use crate::ast::{Arena, Ast, BinOp, Flags, NodeId, NodeKind, UnOp};
use crate::common::error::CompileError;

struct Optimizer {
    opt_level: u32,
}

/// Simplify the tree. `opt_level` 0 keeps value folding off.
pub fn run(ast: &mut Ast, opt_level: u32) -> Result<(), CompileError> {
    let pass = Optimizer { opt_level };
    ast.head = pass.chain(&mut ast.arena, ast.head);
    Ok(())
}

impl Optimizer {
    /// Fold a chain, relinking around removed nodes. Returns the new head.
    fn chain(&self, arena: &mut Arena, head: Option<NodeId>) -> Option<NodeId> {
        let Some(id) = head else { return None };
        let rest = self.chain(arena, arena[id].next);
        match self.node(arena, id) {
            // The node survived in place (possibly with new content).
            Some(kept) if kept == id => {
                if let Some(merged) = self.merge_alloc(arena, id, rest) {
                    return Some(merged);
                }
                arena[id].next = rest;
                Some(id)
            }
            // The node was replaced by a subchain; splice it in.
            Some(spliced) => Some(arena.append(Some(spliced), rest).unwrap_or(spliced)),
            // The node vanished.
            None => rest,
        }
    }

    /// Fold one node after folding its operands.
    ///
    /// Returns the node that now stands in this chain position: the node
    /// itself, a replacement subchain head, or nothing at all.
    fn node(&self, arena: &mut Arena, id: NodeId) -> Option<NodeId> {
        let ops = arena[id].ops;
        for i in 0..ops.len() {
            arena[id].ops[i] = self.chain(arena, ops[i]);
        }

        match arena[id].kind.clone() {
            NodeKind::Binary { op } if self.opt_level > 0 => {
                if let (Some(l), Some(r)) = (lit(arena, arena[id].ops[0]), lit(arena, arena[id].ops[1])) {
                    if let Some(value) = fold_binary(op, l, r, arena[id].flags.boolean_not) {
                        replace_with_literal(arena, id, value);
                    }
                }
                Some(id)
            }
            NodeKind::Unary { op } if self.opt_level > 0 => {
                if let Some(v) = lit(arena, arena[id].ops[0]) {
                    match op {
                        UnOp::Neg => replace_with_literal(arena, id, v.wrapping_neg()),
                        UnOp::Not => replace_with_literal(arena, id, !v),
                        UnOp::Deref | UnOp::AddrOf => {}
                    }
                }
                Some(id)
            }
            NodeKind::CondMove if self.opt_level > 0 => {
                // The wrapped comparison may have folded to a literal; its
                // negation was already baked into the materialized value, so
                // the result is just the truth of the literal.
                if let Some(c) = lit(arena, arena[id].ops[0]) {
                    replace_with_literal(arena, id, (c != 0) as i64);
                }
                Some(id)
            }
            NodeKind::Conditional => {
                let Some(c) = lit(arena, arena[id].ops[0]) else { return Some(id) };
                if c != 0 {
                    // Always taken: the body chain stands in for the whole
                    // conditional.
                    arena[id].ops[1]
                } else {
                    None
                }
            }
            NodeKind::StackAlloc => {
                // A missing or literal-zero size adjusts nothing.
                match arena[id].ops[0] {
                    None => None,
                    Some(size) if matches!(arena[size].kind, NodeKind::Int { value: 0 }) => None,
                    Some(_) => Some(id),
                }
            }
            _ => Some(id),
        }
    }

    /// Merge a constant stack allocation into an immediately following one.
    ///
    /// Returns the successor node, now carrying both sizes, if the merge
    /// happened. One adjustment covers both requests; intervening statements
    /// block the merge because they may observe the stack pointer.
    fn merge_alloc(&self, arena: &mut Arena, id: NodeId, rest: Option<NodeId>) -> Option<NodeId> {
        if self.opt_level == 0 {
            return None;
        }
        if !matches!(arena[id].kind, NodeKind::StackAlloc) {
            return None;
        }
        let mine = lit(arena, arena[id].ops[0])?;
        let succ = rest?;
        if !matches!(arena[succ].kind, NodeKind::StackAlloc) {
            return None;
        }
        let size = arena[succ].ops[0]?;
        let theirs = lit(arena, Some(size))?;
        arena[size].kind = NodeKind::Int { value: mine.wrapping_add(theirs) };
        Some(succ)
    }
}

fn lit(arena: &Arena, id: Option<NodeId>) -> Option<i64> {
    match arena[id?].kind {
        NodeKind::Int { value } => Some(value),
        _ => None,
    }
}

/// Collapse a node to an integer literal in place, keeping only its
/// statement-boundary flag and its place in the chain.
fn replace_with_literal(arena: &mut Arena, id: NodeId, value: i64) {
    let node = &mut arena[id];
    node.kind = NodeKind::Int { value };
    node.ops = [None; 3];
    node.flags = Flags { throw_away: node.flags.throw_away, ..Flags::default() };
    node.loc = None;
}

fn fold_binary(op: BinOp, l: i64, r: i64, boolean_not: bool) -> Option<i64> {
    let value = match op {
        BinOp::Add => l.wrapping_add(r),
        BinOp::Sub => l.wrapping_sub(r),
        BinOp::Mul => l.wrapping_mul(r),
        // Division by a literal zero is left for the hardware to trap on.
        BinOp::Div if r != 0 => l.wrapping_div(r),
        BinOp::Mod if r != 0 => l.wrapping_rem(r),
        BinOp::And => l & r,
        BinOp::Or => l | r,
        BinOp::Xor => l ^ r,
        BinOp::Shl => l.wrapping_shl(r as u32),
        BinOp::Shr => l.wrapping_shr(r as u32),
        BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge | BinOp::Eq | BinOp::Ne => {
            let mut truth = match op {
                BinOp::Lt => l < r,
                BinOp::Gt => l > r,
                BinOp::Le => l <= r,
                BinOp::Ge => l >= r,
                BinOp::Eq => l == r,
                _ => l != r,
            };
            if boolean_not {
                truth = !truth;
            }
            truth as i64
        }
        _ => return None,
    };
    Some(value)
}
