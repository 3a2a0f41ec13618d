use std::fmt;

/// Operation that produced a [`TraceError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpKind {
    Add,
    MatMul,
    Transform,
}

impl OpKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OpKind::Add => "add",
            OpKind::MatMul => "matmul",
            OpKind::Transform => "transform",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("shape mismatch for {op}: left={left:?} right={right:?}")]
    ShapeMismatch {
        op: OpKind,
        left: Vec<usize>,
        right: Vec<usize>,
    },

    #[error("cannot broadcast shapes {left:?} and {right:?}")]
    Broadcast { left: Vec<usize>, right: Vec<usize> },

    #[error("unsupported rank {rank} for {op}")]
    UnsupportedRank { op: OpKind, rank: usize },

    #[error("invalid tensor: {0}")]
    InvalidTensor(String),

    #[error("invalid chain document: {0}")]
    Json(#[from] serde_json::Error),
}

impl TraceError {
    /// Structural equality that ignores payloads which don't implement `PartialEq`.
    ///
    /// Used to assert that both evaluation paths reject an expression for the same reason.
    pub fn same_kind(&self, other: &TraceError) -> bool {
        match (self, other) {
            (
                TraceError::ShapeMismatch {
                    op: a,
                    left: al,
                    right: ar,
                },
                TraceError::ShapeMismatch {
                    op: b,
                    left: bl,
                    right: br,
                },
            ) => a == b && al == bl && ar == br,
            (
                TraceError::Broadcast {
                    left: al,
                    right: ar,
                },
                TraceError::Broadcast {
                    left: bl,
                    right: br,
                },
            ) => al == bl && ar == br,
            (
                TraceError::UnsupportedRank { op: a, rank: ra },
                TraceError::UnsupportedRank { op: b, rank: rb },
            ) => a == b && ra == rb,
            (TraceError::InvalidTensor(a), TraceError::InvalidTensor(b)) => a == b,
            (TraceError::Json(_), TraceError::Json(_)) => true,
            _ => false,
        }
    }
}

pub type TraceResult<T> = Result<T, TraceError>;
