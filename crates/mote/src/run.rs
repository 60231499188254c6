//! Public interface for running an image to completion, with restarts.
//!
//! A failed run tears the whole runtime down: heap, threads and module table
//! are rebuilt from scratch by the boot closure before the next attempt.

use crate::{
    bytecode::{RunOutcome, Vm},
    exception_private::{ExcType, RunResult},
    io::PlatformIo,
    tracer::VmTracer,
};

/// Line written between a failed run and the next attempt.
pub const RESTART_BANNER: &[u8] = b"Restarting...\n";

/// Runs a module repeatedly until it succeeds, exits or the restart budget runs out.
///
/// # Example
/// ```no_run
/// use mote::{MemSpace, MemSpaces, NoIo, RunResult, Runner, Vm, VmConfig};
///
/// let image = std::fs::read("app.img").unwrap();
/// let finished = Runner::new("main", || -> RunResult<Vm<NoIo>> {
///     let mut vm = Vm::new(VmConfig::default(), MemSpaces::new().with_prog(image.clone()), NoIo)?;
///     vm.load_module_table(MemSpace::Prog, 0)?;
///     Ok(vm)
/// })
/// .with_max_restarts(Some(3))
/// .run()
/// .unwrap();
/// assert!(finished.result.is_ok());
/// ```
pub struct Runner<F> {
    module: String,
    boot: F,
    max_restarts: Option<usize>,
}

/// The last runtime and how its run ended.
pub struct Finished<P: PlatformIo, Tr: VmTracer> {
    pub vm: Vm<P, Tr>,
    pub result: RunResult<RunOutcome>,
    /// Runtimes rebuilt after failures.
    pub restarts: usize,
}

impl<F> Runner<F> {
    /// `boot` builds a fresh runtime with its images loaded; it runs once per attempt.
    pub fn new(module: impl Into<String>, boot: F) -> Self {
        Self {
            module: module.into(),
            boot,
            max_restarts: None,
        }
    }

    /// Restart budget; `None`, the default, restarts forever.
    #[must_use]
    pub fn with_max_restarts(mut self, max_restarts: Option<usize>) -> Self {
        self.max_restarts = max_restarts;
        self
    }

    /// Runs until an attempt succeeds, raises SystemExit or the budget is spent.
    ///
    /// Failures are reported through the runtime's platform output. An error
    /// from `boot` itself ends the loop immediately.
    pub fn run<P, Tr>(mut self) -> RunResult<Finished<P, Tr>>
    where
        P: PlatformIo,
        Tr: VmTracer,
        F: FnMut() -> RunResult<Vm<P, Tr>>,
    {
        let mut restarts = 0;
        loop {
            let mut vm = (self.boot)()?;
            let result = vm.run_module(&self.module);
            let err = match result {
                Ok(outcome) => {
                    tracing::info!(module = %self.module, ?outcome, restarts, "run finished");
                    return Ok(Finished {
                        vm,
                        result: Ok(outcome),
                        restarts,
                    });
                }
                Err(err) => err,
            };
            vm.report_error(&err);
            let budget_spent = self.max_restarts.is_some_and(|max| restarts >= max);
            if err.kind() == ExcType::SystemExit || budget_spent {
                tracing::info!(module = %self.module, kind = %err.kind(), restarts, "run ended with an error");
                return Ok(Finished {
                    vm,
                    result: Err(err),
                    restarts,
                });
            }
            let io = vm.io_mut();
            io.put_bytes(RESTART_BANNER)?;
            io.flush()?;
            restarts += 1;
            tracing::info!(module = %self.module, attempt = restarts, "restarting runtime");
        }
    }
}
