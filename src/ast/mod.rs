//! The mutable program tree shared by every pass.
//!
//! Nodes live in an arena and are addressed by index, so the tree is never
//! touched through raw pointers. Each node is simultaneously part of a tree
//! (through its fixed operand slots) and of an intrusive forward list
//! (through `next`, which chains sibling statements in program order). Every
//! rewrite has to keep the two relations consistent: splicing a node out
//! means relinking `next`, and replacing a node in place goes through
//! [`Arena::replace`] so the successor chain stays where it was.

pub mod loc;

use loc::Loc;

/// Maximum number of operand slots on a node.
pub const MAX_OPS: usize = 3;

/// Name of the stack-allocation intrinsic. Calls to it are rewritten into
/// [`NodeKind::StackAlloc`] nodes before code generation.
pub const BUILTIN_ALLOCA: &str = "__builtin_alloca";

/// Index of a node in the [`Arena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    Index,
}

impl BinOp {
    /// True for the six relational operators.
    pub fn is_comparison(self) -> bool {
        matches!(self, BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge | BinOp::Eq | BinOp::Ne)
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
    Deref,
    AddrOf,
}

/// Transient per-node facts, written by one pass and read by a later one.
///
/// These are a deliberate inter-pass contract, not incidental state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags {
    /// The node's value is never consumed; codegen resets the register pool
    /// after it.
    pub throw_away: bool,
    /// Flip the logical sense of a comparison without changing its operator.
    pub boolean_not: bool,
    /// The comparison has already been canonicalized and must not be
    /// materialized (again).
    pub no_materialize: bool,
    /// Prefix rather than postfix increment/decrement.
    pub prefix: bool,
}

/// What a node is. Operand slot usage is listed per kind.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// ops: \[argument chain, body\]
    Function { name: String },
    /// ops: \[statement chain\]
    Block,
    /// ops: \[value?\]
    Return,
    /// ops: \[controlling expression, body chain\]
    Conditional,
    /// ops: \[comparison, value literal\]; materializes a 0/1 result.
    CondMove,
    /// ops: \[labeled statement?\]
    Label { name: String },
    Jump { name: String },
    Int { value: i64 },
    /// A declaration (`decl`) or a reference. `alloc` is the stack space the
    /// declaration reserves, filled in by the dealias pass.
    Variable { name: String, decl: bool, alloc: i64 },
    Str { value: String },
    /// ops: \[left, right\]
    Binary { op: BinOp },
    /// ops: \[operand\]
    Unary { op: UnOp },
    /// ops: \[target\]
    IncDec { increase: bool },
    /// ops: \[callee, first argument\]; further arguments chain via `next`.
    Call,
    /// ops: \[size expression\]
    StackAlloc,
}

/// One node of the program tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub ops: [Option<NodeId>; MAX_OPS],
    /// Successor statement in program order.
    pub next: Option<NodeId>,
    pub flags: Flags,
    /// Resolved storage, once a pass has assigned one.
    pub loc: Option<Loc>,
}

impl Node {
    pub fn new(kind: NodeKind) -> Self {
        Self { kind, ops: [None; MAX_OPS], next: None, flags: Flags::default(), loc: None }
    }

    fn with_ops(kind: NodeKind, ops: &[Option<NodeId>]) -> Self {
        let mut node = Node::new(kind);
        node.ops[..ops.len()].copy_from_slice(ops);
        node
    }
}

/// Owning store for every node of one compilation unit.
///
/// Exactly one chain or operand slot owns each node at a time; ids are never
/// shared between two `next` chains. Nodes structurally removed from a chain
/// simply become unreachable.
#[derive(Debug, Default)]
pub struct Arena {
    nodes: Vec<Node>,
}

impl Arena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn alloc(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    /// Install `node` at `id`, keeping `id`'s place in its statement chain.
    ///
    /// The displaced content moves to a fresh id with no successor, which is
    /// returned. This is the index-arena form of "swap two nodes while
    /// preserving successor linkage": the parent keeps pointing at `id`, the
    /// old content survives at the new id, and no chain is broken.
    pub fn replace(&mut self, id: NodeId, mut node: Node) -> NodeId {
        node.next = self.nodes[id.index()].next;
        let mut displaced = std::mem::replace(&mut self.nodes[id.index()], node);
        displaced.next = None;
        self.alloc(displaced)
    }

    /// Deep-copy the subtree rooted at `id`.
    ///
    /// Operand subtrees and their internal chains are copied; the root's own
    /// successor is not. The copy shares nothing with the original, so either
    /// side can be mutated freely afterwards.
    pub fn duplicate(&mut self, id: NodeId) -> NodeId {
        let copy = self.duplicate_linked(id);
        self.nodes[copy.index()].next = None;
        copy
    }

    fn duplicate_linked(&mut self, id: NodeId) -> NodeId {
        let mut node = self.nodes[id.index()].clone();
        for slot in node.ops.iter_mut() {
            if let Some(op) = *slot {
                *slot = Some(self.duplicate_linked(op));
            }
        }
        if let Some(next) = node.next {
            node.next = Some(self.duplicate_linked(next));
        }
        self.alloc(node)
    }

    /// Link `stmts` into a `next` chain and return its head.
    pub fn chain(&mut self, stmts: &[NodeId]) -> Option<NodeId> {
        for pair in stmts.windows(2) {
            self.nodes[pair[0].index()].next = Some(pair[1]);
        }
        stmts.first().copied()
    }

    /// Append chain `tail` to the end of chain `head`.
    pub fn append(&mut self, head: Option<NodeId>, tail: Option<NodeId>) -> Option<NodeId> {
        let head = match head {
            Some(head) => head,
            None => return tail,
        };
        let mut last = head;
        while let Some(next) = self.nodes[last.index()].next {
            last = next;
        }
        self.nodes[last.index()].next = tail;
        Some(head)
    }

    // Constructors for the node kinds the passes and tests synthesize.

    pub fn int(&mut self, value: i64) -> NodeId {
        self.alloc(Node::new(NodeKind::Int { value }))
    }

    pub fn variable(&mut self, name: &str) -> NodeId {
        self.alloc(Node::new(NodeKind::Variable { name: name.into(), decl: false, alloc: 0 }))
    }

    pub fn declaration(&mut self, name: &str) -> NodeId {
        self.alloc(Node::new(NodeKind::Variable { name: name.into(), decl: true, alloc: 0 }))
    }

    pub fn string(&mut self, value: &str) -> NodeId {
        self.alloc(Node::new(NodeKind::Str { value: value.into() }))
    }

    pub fn binary(&mut self, op: BinOp, left: NodeId, right: NodeId) -> NodeId {
        self.alloc(Node::with_ops(NodeKind::Binary { op }, &[Some(left), Some(right)]))
    }

    pub fn unary(&mut self, op: UnOp, operand: NodeId) -> NodeId {
        self.alloc(Node::with_ops(NodeKind::Unary { op }, &[Some(operand)]))
    }

    pub fn incdec(&mut self, increase: bool, prefix: bool, target: NodeId) -> NodeId {
        let mut node = Node::with_ops(NodeKind::IncDec { increase }, &[Some(target)]);
        node.flags.prefix = prefix;
        self.alloc(node)
    }

    pub fn call(&mut self, callee: NodeId, args: Option<NodeId>) -> NodeId {
        self.alloc(Node::with_ops(NodeKind::Call, &[Some(callee), args]))
    }

    pub fn jump(&mut self, name: &str) -> NodeId {
        self.alloc(Node::new(NodeKind::Jump { name: name.into() }))
    }

    pub fn label(&mut self, name: &str, stmt: Option<NodeId>) -> NodeId {
        self.alloc(Node::with_ops(NodeKind::Label { name: name.into() }, &[stmt]))
    }

    pub fn conditional(&mut self, cond: NodeId, body: NodeId) -> NodeId {
        self.alloc(Node::with_ops(NodeKind::Conditional, &[Some(cond), Some(body)]))
    }

    pub fn stack_alloc(&mut self, size: Option<NodeId>) -> NodeId {
        self.alloc(Node::with_ops(NodeKind::StackAlloc, &[size]))
    }

    pub fn block(&mut self, body: Option<NodeId>) -> NodeId {
        self.alloc(Node::with_ops(NodeKind::Block, &[body]))
    }

    pub fn ret(&mut self, value: Option<NodeId>) -> NodeId {
        self.alloc(Node::with_ops(NodeKind::Return, &[value]))
    }

    pub fn function(&mut self, name: &str, args: Option<NodeId>, body: Option<NodeId>) -> NodeId {
        self.alloc(Node::with_ops(NodeKind::Function { name: name.into() }, &[args, body]))
    }

    /// Mark a node as an expression statement whose value is discarded.
    pub fn discard(&mut self, id: NodeId) -> NodeId {
        self.nodes[id.index()].flags.throw_away = true;
        id
    }
}

impl std::ops::Index<NodeId> for Arena {
    type Output = Node;

    fn index(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }
}

impl std::ops::IndexMut<NodeId> for Arena {
    fn index_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }
}

/// A whole compilation unit: the arena plus the head of the top-level chain.
#[derive(Debug, Default)]
pub struct Ast {
    pub arena: Arena,
    pub head: Option<NodeId>,
}

impl Ast {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_preserves_successor_chain() {
        let mut arena = Arena::new();
        let a = arena.int(1);
        let b = arena.int(2);
        arena.chain(&[a, b]);

        let displaced = arena.replace(a, Node::new(NodeKind::Jump { name: "L".into() }));

        assert!(matches!(arena[a].kind, NodeKind::Jump { .. }));
        assert_eq!(arena[a].next, Some(b));
        assert!(matches!(arena[displaced].kind, NodeKind::Int { value: 1 }));
        assert_eq!(arena[displaced].next, None);
    }

    #[test]
    fn duplicate_copies_operands_but_not_successor() {
        let mut arena = Arena::new();
        let l = arena.int(1);
        let r = arena.int(2);
        let add = arena.binary(BinOp::Add, l, r);
        let after = arena.int(3);
        arena.chain(&[add, after]);

        let copy = arena.duplicate(add);
        assert_eq!(arena[copy].next, None);
        let cl = arena[copy].ops[0].unwrap();
        assert_ne!(cl, l);
        assert!(matches!(arena[cl].kind, NodeKind::Int { value: 1 }));

        // Mutating the copy leaves the original alone.
        arena[cl].kind = NodeKind::Int { value: 9 };
        assert!(matches!(arena[l].kind, NodeKind::Int { value: 1 }));
    }

    #[test]
    fn duplicate_keeps_internal_chains() {
        let mut arena = Arena::new();
        let callee = arena.variable("f");
        let a0 = arena.int(1);
        let a1 = arena.int(2);
        arena.chain(&[a0, a1]);
        let call = arena.call(callee, Some(a0));

        let copy = arena.duplicate(call);
        let arg = arena[copy].ops[1].unwrap();
        let second = arena[arg].next.unwrap();
        assert!(matches!(arena[second].kind, NodeKind::Int { value: 2 }));
        assert_ne!(second, a1);
    }

    #[test]
    fn append_relinks_chain_tails() {
        let mut arena = Arena::new();
        let a = arena.int(1);
        let b = arena.int(2);
        let c = arena.int(3);
        arena.chain(&[a, b]);
        let head = arena.append(Some(a), Some(c));
        assert_eq!(head, Some(a));
        assert_eq!(arena[b].next, Some(c));
        assert_eq!(arena.append(None, Some(c)), Some(c));
    }
}
