use crate::expr::Tensor;
use crate::transform::Homography;
use std::sync::Arc;

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpCode {
    LoadInput = 0,
    PushConst = 1,
    Transform = 2,
    Add = 3,
    MatMul = 4,
}

/// Packed instruction:
/// - bits 56..63: opcode
/// - bits 28..55: operand a
/// - bits 0..27: operand b
///
/// Instruction `i` writes slot `i`. Operands refer to earlier slots or to the program's pools:
///
/// | opcode      | a              | b                  |
/// |-------------|----------------|--------------------|
/// | `LoadInput` | unused         | unused             |
/// | `PushConst` | constant index | unused             |
/// | `Transform` | source slot    | homography index   |
/// | `Add`       | left slot      | right slot         |
/// | `MatMul`    | left slot      | right slot         |
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Instruction(u64);

impl Instruction {
    #[inline]
    pub fn new(op: OpCode, a: u32, b: u32) -> Self {
        debug_assert!(a < (1 << 28));
        debug_assert!(b < (1 << 28));
        Instruction(((op as u64) << 56) | ((a as u64) << 28) | (b as u64))
    }

    #[inline]
    pub fn op(self) -> OpCode {
        match ((self.0 >> 56) & 0xFF) as u8 {
            0 => OpCode::LoadInput,
            1 => OpCode::PushConst,
            2 => OpCode::Transform,
            3 => OpCode::Add,
            4 => OpCode::MatMul,
            _ => unreachable!("invalid opcode"),
        }
    }

    #[inline]
    pub fn a(self) -> u32 {
        ((self.0 >> 28) & 0x0FFF_FFFF) as u32
    }

    #[inline]
    pub fn b(self) -> u32 {
        (self.0 & 0x0FFF_FFFF) as u32
    }

    /// Slots this instruction reads.
    #[inline]
    pub(crate) fn reads(self) -> &'static [Operand] {
        match self.op() {
            OpCode::LoadInput | OpCode::PushConst => &[],
            OpCode::Transform => &[Operand::A],
            OpCode::Add | OpCode::MatMul => &[Operand::A, Operand::B],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Operand {
    A,
    B,
}

/// Slot program compiled for one input shape.
#[derive(Clone, Debug)]
pub struct Program {
    pub(crate) instrs: Vec<Instruction>,
    pub(crate) consts: Vec<Arc<Tensor>>,
    pub(crate) transforms: Vec<Homography>,
    /// Number of later instructions reading each slot.
    pub(crate) reads: Vec<u32>,
    pub(crate) output: u32,
    pub(crate) input_shape: Vec<usize>,
    pub(crate) output_shape: Vec<usize>,
}

impl Program {
    pub fn new(input_shape: Vec<usize>) -> Self {
        Self {
            instrs: Vec::new(),
            consts: Vec::new(),
            transforms: Vec::new(),
            reads: Vec::new(),
            output: 0,
            input_shape,
            output_shape: Vec::new(),
        }
    }

    #[inline]
    pub fn instrs(&self) -> &[Instruction] {
        &self.instrs
    }

    #[inline]
    pub fn transforms(&self) -> &[Homography] {
        &self.transforms
    }

    /// Slot holding the result.
    #[inline]
    pub fn output(&self) -> u32 {
        self.output
    }

    #[inline]
    pub fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }

    #[inline]
    pub fn output_shape(&self) -> &[usize] {
        &self.output_shape
    }

    /// Append an instruction and return the slot it writes.
    pub(crate) fn push(&mut self, op: OpCode, a: u32, b: u32) -> u32 {
        let inst = Instruction::new(op, a, b);
        for operand in inst.reads() {
            let slot = match operand {
                Operand::A => a,
                Operand::B => b,
            };
            self.reads[slot as usize] += 1;
        }
        let slot = self.instrs.len() as u32;
        self.instrs.push(inst);
        self.reads.push(0);
        slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instruction_packs_opcode_and_operands() {
        let inst = Instruction::new(OpCode::Transform, 12345, (1 << 28) - 1);
        assert_eq!(inst.op(), OpCode::Transform);
        assert_eq!(inst.a(), 12345);
        assert_eq!(inst.b(), (1 << 28) - 1);
    }

    #[test]
    fn push_counts_slot_reads() {
        let mut program = Program::new(vec![2]);
        let x = program.push(OpCode::LoadInput, 0, 0);
        let sum = program.push(OpCode::Add, x, x);
        let c = program.push(OpCode::PushConst, 0, 0);
        program.push(OpCode::MatMul, sum, c);
        assert_eq!(program.reads, vec![2, 1, 1, 0]);
    }
}
