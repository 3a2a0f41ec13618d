use ahash::AHashMap;
use ndarray::ArrayD;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Dense `f64` tensor used for constants, inputs and results.
pub type Tensor = ArrayD<f64>;

/// Recorded coordinate expression.
///
/// Nodes are immutable and shared through `Arc`, so composing a tracer with itself (or reusing a
/// sub-expression in two places) never copies the subtree. Every `Input` leaf refers to the same
/// placeholder: evaluation binds all of them to one tensor.
///
/// Operands that are not a `Const` leaf are considered *traced*. The tracer API only creates
/// `Add`/`MatMul` nodes with at least one traced operand.
///
/// Chains can be arbitrarily deep, so nothing that walks an `Expr` (including `Drop` and
/// `Display`) recurses.
#[derive(Clone, Debug)]
pub enum Expr {
    Input,
    Const(Arc<Tensor>),
    Add(Arc<Expr>, Arc<Expr>),
    MatMul(Arc<Expr>, Arc<Expr>),
}

/// Identity of a node inside one expression DAG.
pub(crate) type NodeId = *const Expr;

#[inline]
pub(crate) fn node_id(expr: &Expr) -> NodeId {
    expr as NodeId
}

impl Expr {
    pub fn constant(value: Tensor) -> Self {
        Expr::Const(Arc::new(value))
    }

    #[inline]
    pub fn as_const(&self) -> Option<&Tensor> {
        match self {
            Expr::Const(t) => Some(t),
            _ => None,
        }
    }

    /// Number of `Add`/`MatMul` nodes, counting a shared subtree once per use (saturating).
    pub fn op_count(&self) -> usize {
        let mut counts: AHashMap<NodeId, usize> = AHashMap::new();
        let mut stack = vec![(self, false)];
        while let Some((node, ready)) = stack.pop() {
            match node {
                Expr::Input | Expr::Const(_) => {
                    counts.insert(node_id(node), 0);
                }
                Expr::Add(l, r) | Expr::MatMul(l, r) => {
                    if ready {
                        let l = counts.get(&Arc::as_ptr(l)).copied().unwrap_or(0);
                        let r = counts.get(&Arc::as_ptr(r)).copied().unwrap_or(0);
                        counts.insert(node_id(node), 1usize.saturating_add(l).saturating_add(r));
                    } else if !counts.contains_key(&node_id(node)) {
                        stack.push((node, true));
                        stack.push((r.as_ref(), false));
                        stack.push((l.as_ref(), false));
                    }
                }
            }
        }
        counts.get(&node_id(self)).copied().unwrap_or(0)
    }
}

fn shared_leaf() -> Arc<Expr> {
    static LEAF: OnceLock<Arc<Expr>> = OnceLock::new();
    Arc::clone(LEAF.get_or_init(|| Arc::new(Expr::Input)))
}

fn detach_children(node: &mut Expr, out: &mut Vec<Arc<Expr>>) {
    if let Expr::Add(l, r) | Expr::MatMul(l, r) = node {
        out.push(std::mem::replace(l, shared_leaf()));
        out.push(std::mem::replace(r, shared_leaf()));
    }
}

impl Drop for Expr {
    fn drop(&mut self) {
        let mut pending = Vec::new();
        detach_children(self, &mut pending);
        while let Some(child) = pending.pop() {
            // Still referenced elsewhere: the last owner tears it down.
            if let Ok(mut node) = Arc::try_unwrap(child) {
                detach_children(&mut node, &mut pending);
            }
        }
    }
}

fn fmt_shape(f: &mut fmt::Formatter<'_>, shape: &[usize]) -> fmt::Result {
    f.write_str("[")?;
    for (i, dim) in shape.iter().enumerate() {
        if i > 0 {
            f.write_str("x")?;
        }
        write!(f, "{dim}")?;
    }
    f.write_str("]")
}

enum Piece<'e> {
    Node(&'e Expr),
    Text(&'static str),
}

fn push_binary<'e>(pieces: &mut Vec<Piece<'e>>, l: &'e Arc<Expr>, op: &'static str, r: &'e Arc<Expr>) {
    pieces.push(Piece::Text(")"));
    pieces.push(Piece::Node(r.as_ref()));
    pieces.push(Piece::Text(op));
    pieces.push(Piece::Node(l.as_ref()));
    pieces.push(Piece::Text("("));
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut pieces = vec![Piece::Node(self)];
        while let Some(piece) = pieces.pop() {
            match piece {
                Piece::Text(text) => f.write_str(text)?,
                Piece::Node(Expr::Input) => f.write_str("x")?,
                Piece::Node(Expr::Const(t)) => match t.ndim() {
                    0 => write!(f, "{}", t.iter().next().copied().unwrap_or(0.0))?,
                    _ => fmt_shape(f, t.shape())?,
                },
                Piece::Node(Expr::Add(l, r)) => push_binary(&mut pieces, l, " + ", r),
                Piece::Node(Expr::MatMul(l, r)) => push_binary(&mut pieces, l, " @ ", r),
            }
        }
        Ok(())
    }
}
