use std::sync::{Arc, Mutex, MutexGuard};

use texec::error::phase;
use texec::{
    Allocator, BufferId, BufferTree, CompiledProgram, ExecutorError, ExecutorResult,
    HostAllocator, ProgramKind, TraceEvent,
};

use crate::bindings::build_args_map;
use crate::config::ExecutorConfig;
use crate::outputs::{allocate_outputs, Strategy};
use crate::queue::TaskQueue;
use crate::registry::BufferState;
use crate::state::{ExecState, LoadedEngine};
use crate::transfer;

/// Drives compiled programs against one device. Owns the buffer registry,
/// the residency bookkeeping, and the task queue every engine operation is
/// serialised through.
///
/// All entry points lock the same state mutex for their full duration, so
/// two invocations never interleave their binding, allocation, and
/// transfer steps.
pub struct Executor {
    config: ExecutorConfig,
    queue: TaskQueue,
    state: Mutex<ExecState>,
}

impl Executor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self::with_allocator(config, Arc::new(HostAllocator))
    }

    pub fn with_allocator(config: ExecutorConfig, allocator: Arc<dyn Allocator>) -> Self {
        let ordinal = config.ordinal;
        Self {
            config,
            queue: TaskQueue::new(format!("texec-device-{ordinal}")),
            state: Mutex::new(ExecState::new(allocator, ordinal)),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    fn lock_state(&self) -> MutexGuard<'_, ExecState> {
        match self.state.lock() {
            Ok(guard) => guard,
            // A panic while the lock was held means the bookkeeping may be
            // torn; continuing would risk silent corruption.
            Err(_) => panic!("executor state mutex poisoned"),
        }
    }

    /// Registers a fresh host-resident buffer and returns its handle. The
    /// caller owns one reference.
    pub fn allocate_buffer(&self, byte_len: usize, zero_init: bool) -> ExecutorResult<BufferId> {
        self.lock_state().registry.allocate(byte_len, zero_init)
    }

    /// Takes one additional reference on a live buffer.
    pub fn retain_buffer(&self, id: BufferId) -> ExecutorResult<()> {
        self.lock_state().registry.add_ref(id)
    }

    /// Drops one reference; the buffer is destroyed when the last reference
    /// goes. Device-resident data in a destroyed buffer is abandoned, never
    /// flushed.
    pub fn release_buffer(&self, id: BufferId) -> ExecutorResult<()> {
        self.lock_state().registry.release(id)
    }

    pub fn buffer_state(&self, id: BufferId) -> Option<BufferState> {
        self.lock_state().registry.state(id)
    }

    pub fn live_buffers(&self) -> usize {
        self.lock_state().registry.len()
    }

    /// Overwrites a buffer's payload from the host side. The write makes
    /// the host copy authoritative again, so any device residency the
    /// buffer had is dropped without a transfer.
    pub fn write_buffer(&self, id: BufferId, bytes: &[u8]) -> ExecutorResult<()> {
        let mut state = self.lock_state();
        let control = state
            .registry
            .get_mut(id)
            .ok_or_else(|| ExecutorError::argument(format!("unknown buffer {id:?}")))?;
        if bytes.len() != control.byte_len {
            return Err(ExecutorError::argument(format!(
                "write of {} bytes into a {}-byte buffer",
                bytes.len(),
                control.byte_len
            )));
        }
        control.payload.copy_from_slice(bytes);
        control.clear_residency();
        Ok(())
    }

    /// Reads a buffer's payload. If the authoritative copy is on the device
    /// the executor flushes first, so the caller always sees current data.
    pub fn read_buffer(&self, id: BufferId) -> ExecutorResult<Vec<u8>> {
        let mut state = self.lock_state();
        let needs_flush = match state.registry.get(id) {
            Some(control) => control.is_device_output(),
            None => {
                return Err(ExecutorError::argument(format!("unknown buffer {id:?}")));
            }
        };
        if needs_flush {
            transfer::flush_device_to_host(&mut state, &self.config, &self.queue)?;
        }
        Ok(state.registry.expect_mut(id).payload.clone())
    }

    /// Appends one event to the trace stream. Compiler-side collaborators
    /// use this to interleave compile events with execution events.
    pub fn record_trace_event(&self, event: TraceEvent) {
        self.lock_state().events.push(event);
    }

    /// Drains and returns every trace event recorded so far, in order.
    pub fn take_trace_events(&self) -> Vec<TraceEvent> {
        std::mem::take(&mut self.lock_state().events)
    }

    /// Runs one compiled program over the given argument trees and returns
    /// the output buffer tree.
    ///
    /// Argument errors are detected before any state changes. Device faults
    /// are tagged with the phase they occurred in; buffer payloads are
    /// always restored even when a phase faults.
    pub fn execute(
        &self,
        program: &CompiledProgram,
        args: &[BufferTree],
    ) -> ExecutorResult<BufferTree> {
        let mut state = self.lock_state();
        let args_map = build_args_map(program, args, &state.registry)?;

        // Engine-less programs never touch the device or the persistent
        // binding maps: constants copy literals, remaps alias inputs.
        let Some(engine) = &program.engine else {
            let strategy = if program.is_constant() {
                Strategy::Constant
            } else if program.is_remap() {
                Strategy::Remap
            } else {
                panic!(
                    "program '{}' has no engine but is neither constant nor remap",
                    program.name
                );
            };
            let ExecState { registry, .. } = &mut *state;
            let (tree, _) = allocate_outputs(program, strategy, registry, &args_map)?;
            return Ok(tree);
        };

        let engine_changed = state
            .loaded
            .as_ref()
            .map_or(true, |loaded| loaded.id != program.id);

        state.args = args_map;

        if transfer::device_to_host_required(&state, engine_changed) {
            transfer::flush_device_to_host(&mut state, &self.config, &self.queue)?;
        }

        if engine_changed {
            transfer::load_engine(&self.queue, engine)
                .map_err(|err| ExecutorError::device_fault(phase::LOAD_ENGINE, err))?;
            state.loaded = Some(LoadedEngine {
                id: program.id,
                engine: Arc::clone(engine),
            });
            if self.config.io_trace {
                state.events.push(TraceEvent::EngineLoad {
                    module: program.name.clone(),
                });
            }
        }

        if transfer::host_to_device_required(&state, engine_changed) {
            transfer::load_host_to_device(&mut state, &self.config, &self.queue)?;
        }

        let (tree, outputs_map) = {
            let ExecState { registry, args, .. } = &mut *state;
            allocate_outputs(program, Strategy::Buffer, registry, args)?
        };
        state.outputs = outputs_map;

        let (streams, lent) = transfer::connect_streamed(&mut state, &self.config);
        let (streams, result) =
            transfer::run_engine(&self.queue, engine, ProgramKind::Main, streams);
        transfer::restore_streamed(&mut state, streams, &lent);
        result.map_err(|err| ExecutorError::device_fault(phase::EXECUTE_ENGINE, err))?;
        transfer::post_process_streamed(&mut state);

        let runs = state.execution_counts.entry(program.id).or_insert(0);
        let first_run = *runs == 0;
        *runs += 1;
        if self.config.execution_trace {
            let report = if first_run {
                transfer::engine_report(&self.queue, engine).unwrap_or_default()
            } else {
                String::new()
            };
            state.events.push(TraceEvent::Execute {
                module: program.name.clone(),
                report,
            });
        }

        Ok(tree)
    }
}
