use crate::compiler::Compiler;
use crate::error::TraceResult;
use crate::expr::Expr;
use crate::program::Program;
use std::sync::Arc;

#[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
use dashmap::DashMap;

#[cfg(not(all(feature = "parallel", not(target_arch = "wasm32"))))]
use ahash::AHashMap;
#[cfg(not(all(feature = "parallel", not(target_arch = "wasm32"))))]
use std::sync::Mutex;

/// Cache compiled programs for one expression, keyed by input shape.
///
/// Fusion depends on the point dimension (a `3x3` matrix is linear on 3-D points but homogeneous
/// on 2-D points), so each distinct input shape gets its own program.
#[derive(Default)]
pub struct ProgramCache {
    #[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
    programs: DashMap<Vec<usize>, Arc<Program>>,
    #[cfg(not(all(feature = "parallel", not(target_arch = "wasm32"))))]
    programs: Mutex<AHashMap<Vec<usize>, Arc<Program>>>,
}

impl ProgramCache {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
    pub fn program_count(&self) -> usize {
        self.programs.len()
    }

    #[cfg(not(all(feature = "parallel", not(target_arch = "wasm32"))))]
    pub fn program_count(&self) -> usize {
        match self.programs.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Compile failures are not cached; the next call with the same shape retries (and fails the
    /// same way).
    #[cfg(all(feature = "parallel", not(target_arch = "wasm32")))]
    pub fn get_or_compile(&self, expr: &Expr, input_shape: &[usize]) -> TraceResult<Arc<Program>> {
        if let Some(program) = self.programs.get(input_shape) {
            return Ok(Arc::clone(program.value()));
        }
        let program = Arc::new(Compiler::compile(expr, input_shape)?);
        let entry = self.programs.entry(input_shape.to_vec()).or_insert(program);
        Ok(Arc::clone(entry.value()))
    }

    #[cfg(not(all(feature = "parallel", not(target_arch = "wasm32"))))]
    pub fn get_or_compile(&self, expr: &Expr, input_shape: &[usize]) -> TraceResult<Arc<Program>> {
        let mut programs = match self.programs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(program) = programs.get(input_shape) {
            return Ok(program.clone());
        }
        let program = Arc::new(Compiler::compile(expr, input_shape)?);
        programs.insert(input_shape.to_vec(), program.clone());
        Ok(program)
    }
}

impl std::fmt::Debug for ProgramCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgramCache")
            .field("programs", &self.program_count())
            .finish()
    }
}
