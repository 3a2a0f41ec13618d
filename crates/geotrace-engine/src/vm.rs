use crate::error::{OpKind, TraceError, TraceResult};
use crate::expr::Tensor;
use crate::options::EvalOptions;
use crate::program::{OpCode, Program};
use crate::tensor;
use ndarray::ArrayViewD;

/// Slot-based program interpreter.
///
/// Every instruction writes its own slot; a slot is freed as soon as its last reader has run.
#[derive(Default)]
pub struct Vm {
    slots: Vec<Option<Tensor>>,
    pending_reads: Vec<u32>,
    options: EvalOptions,
}

fn missing(slot: u32) -> TraceError {
    TraceError::InvalidTensor(format!("program read slot {slot} before it was written"))
}

impl Vm {
    pub fn new(options: EvalOptions) -> Self {
        Self {
            slots: Vec::new(),
            pending_reads: Vec::new(),
            options,
        }
    }

    fn slot(&self, slot: u32) -> TraceResult<&Tensor> {
        self.slots
            .get(slot as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| missing(slot))
    }

    fn release(&mut self, slot: u32) {
        let idx = slot as usize;
        if let Some(reads) = self.pending_reads.get_mut(idx) {
            *reads = reads.saturating_sub(1);
            if *reads == 0 {
                self.slots[idx] = None;
            }
        }
    }

    pub fn eval(&mut self, program: &Program, input: &ArrayViewD<'_, f64>) -> TraceResult<Tensor> {
        if input.shape() != program.input_shape() {
            return Err(TraceError::ShapeMismatch {
                op: OpKind::Transform,
                left: input.shape().to_vec(),
                right: program.input_shape().to_vec(),
            });
        }

        self.slots.clear();
        self.slots.resize_with(program.instrs().len(), || None);
        self.pending_reads.clear();
        self.pending_reads.extend_from_slice(&program.reads);

        for (idx, inst) in program.instrs().iter().enumerate() {
            let value = match inst.op() {
                OpCode::LoadInput => input.to_owned(),
                OpCode::PushConst => {
                    let c = program
                        .consts
                        .get(inst.a() as usize)
                        .ok_or_else(|| missing(inst.a()))?;
                    (**c).clone()
                }
                OpCode::Transform => {
                    let h = program
                        .transforms
                        .get(inst.b() as usize)
                        .ok_or_else(|| missing(inst.b()))?;
                    let out = h.apply(&self.slot(inst.a())?.view(), &self.options)?;
                    self.release(inst.a());
                    out
                }
                OpCode::Add | OpCode::MatMul => {
                    let left = self.slot(inst.a())?.view();
                    let right = self.slot(inst.b())?.view();
                    let out = match inst.op() {
                        OpCode::Add => tensor::add(&left, &right)?,
                        _ => tensor::matmul(&left, &right)?,
                    };
                    self.release(inst.a());
                    self.release(inst.b());
                    out
                }
            };
            self.slots[idx] = Some(value);
        }

        self.slots
            .get_mut(program.output() as usize)
            .and_then(Option::take)
            .ok_or_else(|| missing(program.output()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Compiler;
    use crate::expr::Expr;
    use ndarray::{arr1, arr2};
    use std::sync::Arc;

    #[test]
    fn eval_rejects_input_of_another_shape() {
        let program = Compiler::compile(&Expr::Input, &[2]).unwrap();
        let mut vm = Vm::default();
        let input = arr2(&[[1.0, 2.0]]).into_dyn();
        assert!(matches!(
            vm.eval(&program, &input.view()),
            Err(TraceError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn eval_runs_generic_instructions() {
        let x = Arc::new(Expr::Input);
        let e = Expr::Add(x.clone(), x);
        let program = Compiler::compile(&e, &[3]).unwrap();

        let mut vm = Vm::default();
        let input = arr1(&[1.0, -2.0, 0.5]).into_dyn();
        let out = vm.eval(&program, &input.view()).unwrap();
        assert_eq!(out, arr1(&[2.0, -4.0, 1.0]).into_dyn());
    }

    #[test]
    fn shared_slots_are_read_by_every_consumer() {
        let shifted = Arc::new(Expr::Add(
            Arc::new(Expr::Input),
            Arc::new(Expr::constant(arr1(&[1.0, 1.0]).into_dyn())),
        ));
        let doubled = Arc::new(Expr::Add(shifted.clone(), shifted));
        let e = Expr::MatMul(doubled.clone(), doubled);
        let program = Compiler::compile(&e, &[2]).unwrap();

        let mut vm = Vm::default();
        let out = vm.eval(&program, &arr1(&[0.0, 1.0]).into_dyn().view()).unwrap();
        // (2, 4) . (2, 4)
        assert_eq!(out.iter().copied().collect::<Vec<_>>(), vec![20.0]);
        assert!(vm.slots.iter().all(Option::is_none));
    }
}
