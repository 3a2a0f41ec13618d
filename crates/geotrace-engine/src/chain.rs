//! JSON description of a tracer chain.
//!
//! ```json
//! { "steps": [
//!     { "op": "add", "side": "right", "operand": [0.5, -1.0] },
//!     { "op": "matmul", "side": "left", "operand": [[1, 0, 2], [0, 1, 0], [0, 0, 1]] },
//!     { "op": "add", "side": "right", "operand": "self" }
//! ] }
//! ```
//!
//! `"side": "right"` builds `tracer op operand`, `"left"` builds `operand op tracer`. The string
//! `"self"` composes the current tracer with itself.

use crate::error::{TraceError, TraceResult};
use crate::expr::Tensor;
use crate::tracer::{CoordinateTracer, MatMul};
use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

const SELF_OPERAND: &str = "self";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainOp {
    Add,
    MatMul,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChainStep {
    pub op: ChainOp,
    pub side: Side,
    pub operand: JsonValue,
}

impl ChainStep {
    pub fn with_tensor(op: ChainOp, side: Side, tensor: &Tensor) -> Self {
        Self {
            op,
            side,
            operand: tensor_to_json(tensor),
        }
    }

    pub fn with_self(op: ChainOp, side: Side) -> Self {
        Self {
            op,
            side,
            operand: JsonValue::String(SELF_OPERAND.to_string()),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainSpec {
    pub steps: Vec<ChainStep>,
}

impl ChainSpec {
    pub fn from_json(text: &str) -> TraceResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> TraceResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Replay the steps on a fresh tracer.
    pub fn build(&self) -> TraceResult<CoordinateTracer> {
        let mut tracer = CoordinateTracer::new();
        for step in &self.steps {
            tracer = match &step.operand {
                JsonValue::String(s) if s == SELF_OPERAND => match step.op {
                    ChainOp::Add => &tracer + &tracer,
                    ChainOp::MatMul => (&tracer).matmul(&tracer),
                },
                JsonValue::String(s) => {
                    return Err(TraceError::InvalidTensor(format!(
                        "unknown operand {s:?} (expected a number, a nested list or \"{SELF_OPERAND}\")"
                    )))
                }
                operand => {
                    let value = tensor_from_json(operand)?;
                    match (step.op, step.side) {
                        (ChainOp::Add, Side::Right) => tracer + value,
                        (ChainOp::Add, Side::Left) => value + tracer,
                        (ChainOp::MatMul, Side::Right) => tracer.matmul(value),
                        (ChainOp::MatMul, Side::Left) => value.matmul(tracer),
                    }
                }
            };
        }
        Ok(tracer)
    }
}

/// Convert a JSON number or (rectangular) nested list into a tensor.
pub fn tensor_from_json(value: &JsonValue) -> TraceResult<Tensor> {
    let mut shape = Vec::new();
    let mut data = Vec::new();
    collect(value, 0, &mut shape, &mut data)?;
    ArrayD::from_shape_vec(IxDyn(&shape), data)
        .map_err(|err| TraceError::InvalidTensor(err.to_string()))
}

fn collect(
    value: &JsonValue,
    depth: usize,
    shape: &mut Vec<usize>,
    data: &mut Vec<f64>,
) -> TraceResult<()> {
    match value {
        JsonValue::Number(n) => {
            if depth != shape.len() {
                return Err(ragged());
            }
            let v = n
                .as_f64()
                .ok_or_else(|| TraceError::InvalidTensor(format!("number {n} is not an f64")))?;
            data.push(v);
            Ok(())
        }
        JsonValue::Array(items) => {
            if depth == shape.len() {
                // First list seen at this depth fixes the extent; scalars must not appear here yet.
                if !data.is_empty() {
                    return Err(ragged());
                }
                shape.push(items.len());
            } else if depth > shape.len() || shape[depth] != items.len() {
                return Err(ragged());
            }
            for item in items {
                collect(item, depth + 1, shape, data)?;
            }
            Ok(())
        }
        other => Err(TraceError::InvalidTensor(format!(
            "expected a number or a list, got {other}"
        ))),
    }
}

fn ragged() -> TraceError {
    TraceError::InvalidTensor("ragged nested list".to_string())
}

/// Inverse of [`tensor_from_json`].
pub fn tensor_to_json(tensor: &Tensor) -> JsonValue {
    fn go(view: ndarray::ArrayViewD<'_, f64>) -> JsonValue {
        if view.ndim() == 0 {
            let v = view.iter().next().copied().unwrap_or(0.0);
            return serde_json::Number::from_f64(v)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null);
        }
        JsonValue::Array(view.outer_iter().map(go).collect())
    }
    go(tensor.view())
}
