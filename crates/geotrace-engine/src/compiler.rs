use crate::error::{TraceError, TraceResult};
use crate::expr::{node_id, Expr, NodeId, Tensor};
use crate::program::{OpCode, Program};
use crate::shape::{self, MatMulPlan, Shape};
use crate::transform::Homography;
use ahash::AHashMap;
use std::sync::Arc;

/// Compiles an [`Expr`] into a [`Program`] for a fixed input shape.
///
/// Shapes are inferred with the same rules the naive interpreter checks at run time, so a
/// program that compiles cannot fail on a shape error later. Chains of translations and
/// geometric products over one traced operand are fused into a single [`Homography`]; a fused
/// map is closed after its first projective step, so every perspective divide of the naive path
/// has exactly one counterpart here.
///
/// Each distinct node is lowered once. A node with several parents is computed into a slot that
/// all of them read, so the program grows with the number of distinct nodes, not with the size of
/// the unfolded tree.
#[derive(Default)]
pub struct Compiler;

impl Compiler {
    pub fn compile(expr: &Expr, input_shape: &[usize]) -> TraceResult<Program> {
        let mut lowering = Lowering {
            program: Program::new(input_shape.to_vec()),
            parents: count_parents(expr),
            lowered: AHashMap::new(),
            input_slot: None,
        };
        let root = lowering.lower(expr)?;

        let program = lowering.finish(root);
        log::debug!(
            "compiled expression for input {:?} ({} ops) into {} instructions, {} fused transforms",
            program.input_shape(),
            expr.op_count(),
            program.instrs().len(),
            program.transforms().len()
        );
        Ok(program)
    }
}

fn count_parents(root: &Expr) -> AHashMap<NodeId, u32> {
    let mut parents: AHashMap<NodeId, u32> = AHashMap::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if let Expr::Add(l, r) | Expr::MatMul(l, r) = node {
            for child in [l, r] {
                let count = parents.entry(Arc::as_ptr(child)).or_insert(0);
                *count += 1;
                if *count == 1 {
                    stack.push(child.as_ref());
                }
            }
        }
    }
    parents
}

/// Compile-time value of a node.
#[derive(Clone)]
enum Value {
    /// Computed by the instruction writing this slot.
    Slot(u32),
    /// Not emitted yet; only generic instructions need it materialized.
    Const(Arc<Tensor>),
    /// `homography` applied to `src`, still open for more fused steps.
    Pending { src: u32, homography: Homography },
}

#[derive(Clone)]
struct Lowered {
    value: Value,
    shape: Shape,
}

impl Lowered {
    fn as_const(&self) -> Option<&Tensor> {
        match &self.value {
            Value::Const(t) => Some(t),
            _ => None,
        }
    }
}

struct Lowering {
    program: Program,
    parents: AHashMap<NodeId, u32>,
    lowered: AHashMap<NodeId, Lowered>,
    input_slot: Option<u32>,
}

impl Lowering {
    /// Post-order walk with an explicit stack; operands are lowered left to right, the same order
    /// the naive interpreter reports errors in.
    fn lower(&mut self, root: &Expr) -> TraceResult<Lowered> {
        let mut stack = vec![(root, false)];
        while let Some((node, ready)) = stack.pop() {
            if self.lowered.contains_key(&node_id(node)) {
                continue;
            }
            let lowered = match node {
                Expr::Input => Lowered {
                    value: Value::Slot(self.input()),
                    shape: self.program.input_shape.clone(),
                },
                Expr::Const(t) => Lowered {
                    value: Value::Const(t.clone()),
                    shape: t.shape().to_vec(),
                },
                Expr::Add(l, r) | Expr::MatMul(l, r) if !ready => {
                    stack.push((node, true));
                    if let Expr::MatMul(..) = node {
                        if let MatMulPlan::Geometric { points, .. } = shape::matmul_plan(l, r) {
                            stack.push((points.as_ref(), false));
                            continue;
                        }
                    }
                    stack.push((r.as_ref(), false));
                    stack.push((l.as_ref(), false));
                    continue;
                }
                Expr::Add(l, r) => self.lower_add(l, r)?,
                Expr::MatMul(l, r) => self.lower_matmul(l, r)?,
            };
            let shared = self.parents.get(&node_id(node)).copied().unwrap_or(0) > 1;
            let lowered = if shared && matches!(lowered.value, Value::Pending { .. }) {
                let slot = self.materialize(lowered.value);
                Lowered {
                    value: Value::Slot(slot),
                    shape: lowered.shape,
                }
            } else {
                lowered
            };
            self.lowered.insert(node_id(node), lowered);
        }
        self.get(root)
    }

    fn get(&self, expr: &Expr) -> TraceResult<Lowered> {
        self.lowered.get(&node_id(expr)).cloned().ok_or_else(|| {
            TraceError::InvalidTensor("operand lowered out of order".to_string())
        })
    }

    fn input(&mut self) -> u32 {
        match self.input_slot {
            Some(slot) => slot,
            None => {
                let slot = self.program.push(OpCode::LoadInput, 0, 0);
                self.input_slot = Some(slot);
                slot
            }
        }
    }

    fn lower_add(&mut self, l: &Arc<Expr>, r: &Arc<Expr>) -> TraceResult<Lowered> {
        let a = self.get(l)?;
        let b = self.get(r)?;
        let shape = shape::broadcast(&a.shape, &b.shape)?;

        // (points_on_left, offset)
        let offset = match (a.as_const(), b.as_const()) {
            (None, Some(c)) => shape::translation(&a.shape, c).map(|t| (true, t)),
            (Some(c), None) => shape::translation(&b.shape, c).map(|t| (false, t)),
            _ => None,
        };
        Ok(match offset {
            Some((true, t)) => self.then(a, Homography::translation(&t)),
            Some((false, t)) => self.then(b, Homography::translation(&t)),
            None => self.generic(OpCode::Add, a, b, shape),
        })
    }

    fn lower_matmul(&mut self, l: &Arc<Expr>, r: &Arc<Expr>) -> TraceResult<Lowered> {
        match shape::matmul_plan(l, r) {
            MatMulPlan::Geometric {
                side,
                matrix,
                points,
            } => {
                let points = self.get(points)?;
                let kind = shape::geometric_kind(&points.shape, matrix.shape(), side)?;
                let dim = points.shape[points.shape.len() - 1];
                let step = Homography::from_product(matrix, dim, side, kind)?;
                Ok(self.then(points, step))
            }
            MatMulPlan::Generic => {
                let a = self.get(l)?;
                let b = self.get(r)?;
                let shape = shape::generic_matmul(&a.shape, &b.shape)?;
                Ok(self.generic(OpCode::MatMul, a, b, shape))
            }
        }
    }

    fn generic(&mut self, op: OpCode, a: Lowered, b: Lowered, shape: Shape) -> Lowered {
        let a = self.materialize(a.value);
        let b = self.materialize(b.value);
        Lowered {
            value: Value::Slot(self.program.push(op, a, b)),
            shape,
        }
    }

    /// Append `step` to `points`, extending an open fused transform when there is one.
    fn then(&mut self, points: Lowered, step: Homography) -> Lowered {
        let value = match points.value {
            Value::Pending { src, homography } if !homography.is_projective() => Value::Pending {
                src,
                homography: homography.then(&step),
            },
            other => Value::Pending {
                src: self.materialize(other),
                homography: step,
            },
        };
        Lowered {
            value,
            shape: points.shape,
        }
    }

    fn materialize(&mut self, value: Value) -> u32 {
        match value {
            Value::Slot(slot) => slot,
            Value::Const(t) => {
                let idx = self.program.consts.len() as u32;
                self.program.consts.push(t);
                self.program.push(OpCode::PushConst, idx, 0)
            }
            Value::Pending { src, homography } => {
                let idx = self.program.transforms.len() as u32;
                self.program.transforms.push(homography);
                self.program.push(OpCode::Transform, src, idx)
            }
        }
    }

    fn finish(mut self, root: Lowered) -> Program {
        self.program.output = self.materialize(root.value);
        self.program.output_shape = root.shape;
        self.program
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2, Array2};
    use pretty_assertions::assert_eq;

    fn konst(t: Tensor) -> Arc<Expr> {
        Arc::new(Expr::constant(t))
    }

    fn ops(program: &Program) -> Vec<OpCode> {
        program.instrs().iter().map(|i| i.op()).collect()
    }

    fn perspective() -> Tensor {
        arr2(&[[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.5, 0.0, 1.0]]).into_dyn()
    }

    #[test]
    fn chain_of_adds_and_products_fuses_into_one_transform() {
        let x = Arc::new(Expr::Input);
        let e = Arc::new(Expr::Add(x, konst(arr1(&[1.0, 2.0]).into_dyn())));
        let e = Arc::new(Expr::MatMul(e, konst(Array2::eye(2).into_dyn())));
        let e = Arc::new(Expr::MatMul(konst(Array2::eye(3).into_dyn()), e));
        let e = Expr::Add(konst(arr1(&[3.0, 4.0]).into_dyn()), e);

        let program = Compiler::compile(&e, &[2]).unwrap();
        assert_eq!(ops(&program), vec![OpCode::LoadInput, OpCode::Transform]);
        assert_eq!(program.transforms().len(), 1);
        assert!(!program.transforms()[0].is_projective());
        assert_eq!(program.output_shape(), &[2]);
        assert_eq!(program.output(), 1);
    }

    #[test]
    fn fused_transform_closes_after_a_projective_step() {
        let x = Arc::new(Expr::Input);
        let e = Arc::new(Expr::Add(x, konst(arr1(&[1.0, 2.0]).into_dyn())));
        let e = Arc::new(Expr::MatMul(konst(perspective()), e));
        let e = Arc::new(Expr::Add(e, konst(arr1(&[1.0, 1.0]).into_dyn())));
        let e = Expr::MatMul(e, konst(Array2::eye(2).into_dyn()));

        let program = Compiler::compile(&e, &[2]).unwrap();
        assert_eq!(
            ops(&program),
            vec![OpCode::LoadInput, OpCode::Transform, OpCode::Transform]
        );
        assert!(program.transforms()[0].is_projective());
        assert!(!program.transforms()[1].is_projective());
        assert_eq!(program.instrs()[2].a(), 1);
    }

    #[test]
    fn traced_operands_on_both_sides_stay_generic() {
        let x = Arc::new(Expr::Input);
        let shifted = Arc::new(Expr::Add(x.clone(), konst(arr1(&[1.0, 0.0]).into_dyn())));
        let e = Expr::MatMul(shifted, x);

        let program = Compiler::compile(&e, &[2]).unwrap();
        assert_eq!(
            ops(&program),
            vec![OpCode::LoadInput, OpCode::Transform, OpCode::MatMul]
        );
        let product = program.instrs()[2];
        assert_eq!((product.a(), product.b()), (1, 0));
        assert_eq!(program.instrs()[1].b(), 0);
        // One input slot feeds both the transform and the product.
        assert_eq!(program.reads, vec![2, 1, 0]);
        assert_eq!(program.output_shape(), &[] as &[usize]);
    }

    #[test]
    fn broadcasting_constant_is_not_fused() {
        let batch_offset = arr2(&[[1.0, 1.0], [2.0, 2.0], [3.0, 3.0]]).into_dyn();
        let e = Expr::Add(Arc::new(Expr::Input), konst(batch_offset));

        let program = Compiler::compile(&e, &[2]).unwrap();
        assert_eq!(
            ops(&program),
            vec![OpCode::LoadInput, OpCode::PushConst, OpCode::Add]
        );
        assert_eq!(program.output_shape(), &[3, 2]);
    }

    #[test]
    fn shared_subtree_is_computed_once() {
        let shifted = Arc::new(Expr::Add(
            Arc::new(Expr::Input),
            konst(arr1(&[2.0, 2.0]).into_dyn()),
        ));
        let mut e = shifted;
        for _ in 0..40 {
            e = Arc::new(Expr::Add(e.clone(), e));
        }

        let program = Compiler::compile(&e, &[2]).unwrap();
        assert_eq!(program.instrs().len(), 2 + 40);
        assert_eq!(program.transforms().len(), 1);
    }

    #[test]
    fn mismatched_matrix_is_rejected_at_compile_time() {
        let e = Expr::MatMul(Arc::new(Expr::Input), konst(Array2::eye(4).into_dyn()));
        assert!(matches!(
            Compiler::compile(&e, &[2]),
            Err(TraceError::ShapeMismatch { .. })
        ));
    }
}
