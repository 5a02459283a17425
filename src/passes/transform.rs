//! Canonicalization pass.
//!
//! Rewrites the tree into the restricted shapes the code generator knows how
//! to emit:
//!
//! * `!=` becomes `==` with the `boolean_not` flag toggled, so the backend
//!   only ever sees five raw comparison conditions.
//! * A comparison whose value is actually consumed (not just branched on) is
//!   wrapped in a conditional-move node that materializes 0 or 1.
//! * The controlling expression of a conditional is marked `no_materialize`,
//!   keeping the one-compare-one-jump shape.
//! * Calls to the stack-allocation intrinsic become dedicated nodes carrying
//!   a duplicate of their size expression.
//!
//! Rewrites happen in place through [`Arena::replace`], so statement chains
//! stay linked. This pass cannot fail.

use crate::ast::{Arena, Ast, BinOp, Node, NodeId, NodeKind, BUILTIN_ALLOCA, MAX_OPS};
use crate::common::error::CompileError;

/// Canonicalize the tree for code generation.
pub fn run(ast: &mut Ast) -> Result<(), CompileError> {
    chain(&mut ast.arena, ast.head);
    Ok(())
}

fn chain(arena: &mut Arena, head: Option<NodeId>) {
    let mut cursor = head;
    while let Some(id) = cursor {
        node(arena, id);
        cursor = arena[id].next;
    }
}

fn node(arena: &mut Arena, id: NodeId) {
    match arena[id].kind.clone() {
        NodeKind::Binary { op } if op.is_comparison() => {
            if op == BinOp::Ne {
                arena[id].kind = NodeKind::Binary { op: BinOp::Eq };
                arena[id].flags.boolean_not = !arena[id].flags.boolean_not;
            }
            if !arena[id].flags.no_materialize {
                materialize(arena, id);
                return;
            }
        }
        NodeKind::Conditional => {
            if let Some(cond) = arena[id].ops[0] {
                arena[id].flags.no_materialize = true;
                arena[cond].flags.no_materialize = true;
            }
        }
        NodeKind::Call => {
            if is_alloca(arena, id) {
                rewrite_alloca(arena, id);
            }
        }
        _ => {}
    }
    let ops = arena[id].ops;
    for i in 0..MAX_OPS {
        chain(arena, ops[i]);
    }
}

/// Wrap a consumed comparison in a conditional move producing 0 or 1.
///
/// The comparison moves into the new node's first operand with its flags
/// intact; the second operand is the literal the move materializes when the
/// condition holds. A negated comparison materializes 0 on its raw condition,
/// so the negation costs nothing at runtime.
fn materialize(arena: &mut Arena, id: NodeId) {
    let throw_away = arena[id].flags.throw_away;
    let value = (!arena[id].flags.boolean_not) as i64;
    arena[id].flags.no_materialize = true;
    arena[id].flags.throw_away = false;
    let cmp = arena.replace(id, Node::new(NodeKind::CondMove));
    let lit = arena.int(value);
    arena[id].ops[0] = Some(cmp);
    arena[id].ops[1] = Some(lit);
    arena[id].flags.throw_away = throw_away;
    node(arena, cmp);
}

fn is_alloca(arena: &Arena, id: NodeId) -> bool {
    let Some(callee) = arena[id].ops[0] else { return false };
    matches!(&arena[callee].kind, NodeKind::Variable { name, .. } if name == BUILTIN_ALLOCA)
}

/// Turn an intrinsic call into a stack-allocation node in place.
///
/// The size expression is duplicated out of the argument chain rather than
/// unlinked from it, which sidesteps any bookkeeping on the abandoned call
/// subtree.
fn rewrite_alloca(arena: &mut Arena, id: NodeId) {
    let size = arena[id].ops[1].map(|s| arena.duplicate(s));
    let throw_away = arena[id].flags.throw_away;
    let mut alloc = Node::new(NodeKind::StackAlloc);
    alloc.ops[0] = size;
    let displaced = arena.replace(id, alloc);
    arena[displaced].flags.throw_away = false;
    arena[id].flags.throw_away = throw_away;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Flags;

    #[test]
    fn not_equal_becomes_negated_equal() {
        let mut ast = Ast::new();
        let l = ast.arena.int(1);
        let r = ast.arena.int(2);
        let ne = ast.arena.binary(BinOp::Ne, l, r);
        let cond = ast.arena.int(0);
        // Hang the comparison under a conditional so it is not materialized
        // and the operator rewrite is visible directly.
        let c = ast.arena.conditional(ne, cond);
        ast.head = Some(c);
        run(&mut ast).unwrap();

        assert!(matches!(ast.arena[ne].kind, NodeKind::Binary { op: BinOp::Eq }));
        assert!(ast.arena[ne].flags.boolean_not);
    }

    #[test]
    fn consumed_comparison_is_materialized() {
        let mut ast = Ast::new();
        let l = ast.arena.int(1);
        let r = ast.arena.int(2);
        let lt = ast.arena.binary(BinOp::Lt, l, r);
        let after = ast.arena.int(9);
        ast.head = ast.arena.chain(&[lt, after]);
        run(&mut ast).unwrap();

        // The original id now holds the conditional move, still chained.
        assert!(matches!(ast.arena[lt].kind, NodeKind::CondMove));
        assert_eq!(ast.arena[lt].next, Some(after));
        let cmp = ast.arena[lt].ops[0].unwrap();
        assert!(matches!(ast.arena[cmp].kind, NodeKind::Binary { op: BinOp::Lt }));
        assert!(ast.arena[cmp].flags.no_materialize);
        let lit = ast.arena[lt].ops[1].unwrap();
        assert!(matches!(ast.arena[lit].kind, NodeKind::Int { value: 1 }));
    }

    #[test]
    fn negated_comparison_materializes_zero() {
        let mut ast = Ast::new();
        let l = ast.arena.int(1);
        let r = ast.arena.int(2);
        let ne = ast.arena.binary(BinOp::Ne, l, r);
        ast.head = Some(ne);
        run(&mut ast).unwrap();

        assert!(matches!(ast.arena[ne].kind, NodeKind::CondMove));
        let cmp = ast.arena[ne].ops[0].unwrap();
        assert!(matches!(ast.arena[cmp].kind, NodeKind::Binary { op: BinOp::Eq }));
        assert!(ast.arena[cmp].flags.boolean_not);
        let lit = ast.arena[ne].ops[1].unwrap();
        assert!(matches!(ast.arena[lit].kind, NodeKind::Int { value: 0 }));
    }

    #[test]
    fn materialization_keeps_statement_flags() {
        let mut ast = Ast::new();
        let l = ast.arena.int(1);
        let r = ast.arena.int(2);
        let lt = ast.arena.binary(BinOp::Lt, l, r);
        ast.arena.discard(lt);
        ast.head = Some(lt);
        run(&mut ast).unwrap();

        assert!(ast.arena[lt].flags.throw_away);
        let cmp = ast.arena[lt].ops[0].unwrap();
        assert!(!ast.arena[cmp].flags.throw_away);
    }

    #[test]
    fn conditional_controlling_expression_is_not_materialized() {
        let mut ast = Ast::new();
        let l = ast.arena.int(1);
        let r = ast.arena.int(2);
        let lt = ast.arena.binary(BinOp::Lt, l, r);
        let body = ast.arena.int(0);
        let c = ast.arena.conditional(lt, body);
        ast.head = Some(c);
        run(&mut ast).unwrap();

        assert!(matches!(ast.arena[lt].kind, NodeKind::Binary { op: BinOp::Lt }));
        assert!(ast.arena[lt].flags.no_materialize);
        assert_eq!(ast.arena[c].ops[0], Some(lt));
    }

    #[test]
    fn alloca_call_becomes_stack_alloc() {
        let mut ast = Ast::new();
        let callee = ast.arena.variable(BUILTIN_ALLOCA);
        let size = ast.arena.int(32);
        let call = ast.arena.call(callee, Some(size));
        let after = ast.arena.int(0);
        ast.head = ast.arena.chain(&[call, after]);
        run(&mut ast).unwrap();

        assert!(matches!(ast.arena[call].kind, NodeKind::StackAlloc));
        assert_eq!(ast.arena[call].next, Some(after));
        let dup = ast.arena[call].ops[0].unwrap();
        assert_ne!(dup, size);
        assert!(matches!(ast.arena[dup].kind, NodeKind::Int { value: 32 }));
    }

    #[test]
    fn ordinary_calls_are_left_alone() {
        let mut ast = Ast::new();
        let callee = ast.arena.variable("malloc");
        let size = ast.arena.int(32);
        let call = ast.arena.call(callee, Some(size));
        ast.head = Some(call);
        run(&mut ast).unwrap();

        assert!(matches!(ast.arena[call].kind, NodeKind::Call));
    }

    #[test]
    fn rewrite_reaches_operands_and_chains() {
        let mut ast = Ast::new();
        let d = ast.arena.declaration("x");
        let x = ast.arena.variable("x");
        let l = ast.arena.int(1);
        let r = ast.arena.int(2);
        let ne = ast.arena.binary(BinOp::Ne, l, r);
        let assign = ast.arena.binary(BinOp::Assign, x, ne);
        let body = ast.arena.chain(&[d, assign]);
        let f = ast.arena.function("f", None, body);
        ast.head = Some(f);
        run(&mut ast).unwrap();

        let rhs = ast.arena[assign].ops[1].unwrap();
        assert!(matches!(ast.arena[rhs].kind, NodeKind::CondMove));
    }

    #[test]
    fn running_twice_changes_nothing_more() {
        let mut ast = Ast::new();
        let l = ast.arena.int(1);
        let r = ast.arena.int(2);
        let ne = ast.arena.binary(BinOp::Ne, l, r);
        let callee = ast.arena.variable(BUILTIN_ALLOCA);
        let size = ast.arena.int(8);
        let call = ast.arena.call(callee, Some(size));
        ast.head = ast.arena.chain(&[ne, call]);
        run(&mut ast).unwrap();
        let nodes_after_first = ast.arena.len();
        run(&mut ast).unwrap();

        // No second wrapping, no second duplication.
        assert_eq!(ast.arena.len(), nodes_after_first);
        assert!(matches!(ast.arena[ne].kind, NodeKind::CondMove));
        assert!(matches!(ast.arena[call].kind, NodeKind::StackAlloc));
    }

    #[test]
    fn flags_default_cleanly() {
        assert_eq!(Flags::default(), Flags {
            throw_away: false,
            boolean_not: false,
            no_materialize: false,
            prefix: false,
        });
    }
}
