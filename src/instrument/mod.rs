//! IR-rewriting passes that bind runtime callbacks into a module.

pub mod inst_trace;
pub mod interface;
pub mod promote;
pub mod simpoint;

pub use inst_trace::InstTracePass;
pub use interface::InstrumentationInterface;
pub use promote::PromoteSlotsPass;
pub use simpoint::SimPointPass;

use std::path::PathBuf;

use crate::error::PassError;
use crate::ir::IrModule;

/// A rewriting pass that operates on an `IrModule` in place.
///
/// Passes must be deterministic: given the same `IrModule`, the transformed
/// output must be identical across runs (no global mutable state, no
/// randomness).
pub trait Pass {
    /// Human-readable name, used in error messages and diagnostics.
    fn name(&self) -> &'static str;

    /// Run the pass on the module.
    ///
    /// On success, the module is in a valid state for the next pass.
    /// On error, the module state is unspecified — the pipeline aborts.
    fn run(&mut self, module: &mut IrModule) -> Result<(), PassError>;
}

/// Manages and executes an ordered sequence of passes.
///
/// Passes run in the order they were registered. The pipeline aborts at the
/// first error.
pub struct PassManager {
    passes: Vec<Box<dyn Pass>>,
}

impl PassManager {
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    /// Appends a pass to the end of the pipeline.
    pub fn add_pass(&mut self, pass: impl Pass + 'static) {
        self.passes.push(Box::new(pass));
    }

    /// Runs all passes in registration order on `module`.
    ///
    /// Returns `Err((pass_name, error))` at the first failure.
    pub fn run(&mut self, module: &mut IrModule) -> Result<(), (String, PassError)> {
        for pass in &mut self.passes {
            tracing::debug!(pass = pass.name(), "running pass");
            pass.run(module).map_err(|e| (pass.name().to_owned(), e))?;
        }
        Ok(())
    }

    /// Returns the names of all registered passes in pipeline order.
    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }
}

impl Default for PassManager {
    fn default() -> Self {
        Self::new()
    }
}

/// The instruction-trace pipeline: the trace pass followed by scalar
/// promotion of the call-site slots it materialized.
pub fn inst_trace_pipeline(uid_file: Option<PathBuf>) -> PassManager {
    let mut pm = PassManager::new();
    pm.add_pass(InstTracePass::new(uid_file));
    pm.add_pass(PromoteSlotsPass);
    pm
}
