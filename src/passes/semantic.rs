//! Assignable-target validation.
//!
//! Checks that the target of an assignment, increment or decrement is a
//! location the backend can actually store through: a variable, a pointer
//! dereference or an array element. Anything else gets a warning and the
//! check moves on; nothing here stops compilation, the backend will fault
//! loudly on truly malformed trees anyway.

use crate::ast::{Ast, BinOp, NodeId, NodeKind, UnOp, MAX_OPS};
use crate::common::error::{CompileError, Diagnostics};

/// Validate assignment targets, reporting problems as warnings.
pub fn run(ast: &Ast, diags: &mut Diagnostics) -> Result<(), CompileError> {
    chain(ast, ast.head, diags);
    Ok(())
}

fn chain(ast: &Ast, head: Option<NodeId>, diags: &mut Diagnostics) {
    let mut cursor = head;
    while let Some(id) = cursor {
        node(ast, id, diags);
        cursor = ast.arena[id].next;
    }
}

fn node(ast: &Ast, id: NodeId, diags: &mut Diagnostics) {
    match ast.arena[id].kind {
        NodeKind::Binary { op: BinOp::Assign } => check_target(ast, id, "assignment", diags),
        NodeKind::IncDec { increase } => {
            let what = if increase { "increment" } else { "decrement" };
            check_target(ast, id, what, diags);
        }
        _ => {}
    }
    for i in 0..MAX_OPS {
        chain(ast, ast.arena[id].ops[i], diags);
    }
}

fn check_target(ast: &Ast, id: NodeId, what: &str, diags: &mut Diagnostics) {
    let Some(target) = ast.arena[id].ops[0] else { return };
    let assignable = matches!(
        ast.arena[target].kind,
        NodeKind::Variable { .. }
            | NodeKind::Unary { op: UnOp::Deref }
            | NodeKind::Binary { op: BinOp::Index }
    );
    if !assignable {
        diags.warn(format!("target of {} is not an assignable location", what));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignment_to_variable_is_fine() {
        let mut ast = Ast::new();
        let x = ast.arena.variable("x");
        let v = ast.arena.int(5);
        let assign = ast.arena.binary(BinOp::Assign, x, v);
        ast.head = Some(assign);

        let mut diags = Diagnostics::new();
        run(&ast, &mut diags).unwrap();
        assert_eq!(diags.warning_count(), 0);
    }

    #[test]
    fn assignment_to_literal_warns() {
        let mut ast = Ast::new();
        let l = ast.arena.int(3);
        let v = ast.arena.int(5);
        let assign = ast.arena.binary(BinOp::Assign, l, v);
        ast.head = Some(assign);

        let mut diags = Diagnostics::new();
        run(&ast, &mut diags).unwrap();
        assert_eq!(diags.warning_count(), 1);
    }

    #[test]
    fn warning_messages_name_the_offending_construct() {
        let mut ast = Ast::new();
        let l = ast.arena.int(3);
        let v = ast.arena.int(5);
        let assign = ast.arena.binary(BinOp::Assign, l, v);
        let a = ast.arena.int(1);
        let b = ast.arena.int(2);
        let sum = ast.arena.binary(BinOp::Add, a, b);
        let dec = ast.arena.incdec(false, false, sum);
        ast.head = ast.arena.chain(&[assign, dec]);

        let mut diags = Diagnostics::new();
        run(&ast, &mut diags).unwrap();
        let messages: Vec<&str> = diags.iter().collect();
        assert_eq!(messages, [
            "target of assignment is not an assignable location",
            "target of decrement is not an assignable location",
        ]);
    }

    #[test]
    fn increment_of_expression_warns_but_does_not_fail() {
        let mut ast = Ast::new();
        let a = ast.arena.int(1);
        let b = ast.arena.int(2);
        let sum = ast.arena.binary(BinOp::Add, a, b);
        let inc = ast.arena.incdec(true, false, sum);
        ast.head = Some(inc);

        let mut diags = Diagnostics::new();
        assert!(run(&ast, &mut diags).is_ok());
        assert_eq!(diags.warning_count(), 1);
    }

    #[test]
    fn dereference_and_index_targets_are_assignable() {
        let mut ast = Ast::new();
        let p = ast.arena.variable("p");
        let star = ast.arena.unary(UnOp::Deref, p);
        let v1 = ast.arena.int(1);
        let through_ptr = ast.arena.binary(BinOp::Assign, star, v1);
        let a = ast.arena.variable("a");
        let i = ast.arena.variable("i");
        let elem = ast.arena.binary(BinOp::Index, a, i);
        let v2 = ast.arena.int(2);
        let through_index = ast.arena.binary(BinOp::Assign, elem, v2);
        ast.head = ast.arena.chain(&[through_ptr, through_index]);

        let mut diags = Diagnostics::new();
        run(&ast, &mut diags).unwrap();
        assert_eq!(diags.warning_count(), 0);
    }
}
