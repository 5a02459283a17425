//! Scope resolution pass.
//!
//! Walks the program chain and assigns every variable reference a concrete
//! storage Location and every label or jump a concrete symbol, honoring C
//! block scope. A stack of per-scope frames maps names to Locations; search
//! runs from the innermost frame outward, and a miss resolves to a bare
//! external-linkage symbol, since the language permits calling unresolved
//! external functions by name.
//!
//! This pass cannot fail.

use crate::ast::loc::Loc;
use crate::ast::{Arena, Ast, NodeId, NodeKind, MAX_OPS};
use crate::common::error::CompileError;

/// One lexical scope's name-to-Location mapping, ordered by insertion so
/// later declarations shadow earlier ones.
#[derive(Debug, Default)]
struct Frame {
    entries: Vec<(String, Loc)>,
}

/// Per-run pass state. Constructed fresh for every compilation unit.
#[derive(Debug)]
struct Dealias {
    /// Innermost frame last. `frames[0]` is the whole file.
    frames: Vec<Frame>,
    /// Index of the current function's frame. Labels are installed here so
    /// goto can cross block boundaries within the function.
    function_frame: usize,
    /// Running stack-allocation total for the current function.
    allocated: i64,
    next_label: u32,
}

/// Resolve every name in the program to a Location.
pub fn run(ast: &mut Ast) -> Result<(), CompileError> {
    let mut pass = Dealias {
        frames: vec![Frame::default()],
        function_frame: 0,
        allocated: 0,
        next_label: 1,
    };
    pass.chain(&mut ast.arena, ast.head);
    Ok(())
}

impl Dealias {
    fn chain(&mut self, arena: &mut Arena, head: Option<NodeId>) {
        let mut cursor = head;
        while let Some(id) = cursor {
            self.node(arena, id);
            cursor = arena[id].next;
        }
    }

    fn node(&mut self, arena: &mut Arena, id: NodeId) {
        let ops = arena[id].ops;
        match arena[id].kind.clone() {
            NodeKind::Function { .. } => {
                // A clean slate per function: frames and the allocation
                // counter never leak across function boundaries.
                self.allocated = 0;
                self.frames.push(Frame::default());
                self.function_frame = self.frames.len() - 1;
                self.chain(arena, ops[0]);
                self.chain(arena, ops[1]);
                self.frames.truncate(self.function_frame);
                self.function_frame = 0;
                self.allocated = 0;
            }
            NodeKind::Block => {
                self.frames.push(Frame::default());
                self.chain(arena, ops[0]);
                self.frames.pop();
            }
            NodeKind::Variable { name, decl, .. } => {
                if decl {
                    // Offsets grow downward from the frame base; the counter
                    // is monotonic within a function, so same-named variables
                    // in sibling blocks land in distinct slots.
                    self.allocated += 8;
                    let loc = Loc::stack(-self.allocated);
                    if let NodeKind::Variable { alloc, .. } = &mut arena[id].kind {
                        *alloc = 8;
                    }
                    self.innermost().entries.push((name.clone(), loc));
                }
                arena[id].loc = Some(self.lookup(&name));
            }
            NodeKind::Label { name } => {
                arena[id].loc = Some(self.label(&name));
                self.chain(arena, ops[0]);
            }
            NodeKind::Jump { name } => {
                arena[id].loc = Some(self.label(&name));
            }
            NodeKind::Int { .. } | NodeKind::Str { .. } => {}
            _ => {
                for i in 0..MAX_OPS {
                    self.chain(arena, ops[i]);
                }
            }
        }
    }

    fn innermost(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("the file scope always exists")
    }

    /// Innermost-out, newest-first search; misses are external symbols.
    fn lookup(&self, name: &str) -> Loc {
        for frame in self.frames.iter().rev() {
            for (entry, loc) in frame.entries.iter().rev() {
                if entry == name {
                    return loc.clone();
                }
            }
        }
        Loc::Sym(name.to_string())
    }

    /// Resolve a label name, synthesizing a fresh symbol on first use.
    ///
    /// The synthesized mapping lives in the function-level frame, not the
    /// innermost block, so labels stay visible across nested blocks.
    fn label(&mut self, name: &str) -> Loc {
        if let Loc::Sym(sym) = self.lookup(name) {
            if sym.starts_with('.') {
                return Loc::Sym(sym);
            }
        }
        let sym = format!(".LJ{}", self.next_label);
        self.next_label += 1;
        self.frames[self.function_frame].entries.push((name.to_string(), Loc::Sym(sym.clone())));
        Loc::Sym(sym)
    }
}
