use std::collections::HashMap;
use std::sync::Arc;

use texec::{Allocator, ProgramId, SharedEngine, TraceEvent};

use crate::bindings::{ArgsMap, OutputsMap};
use crate::registry::BufferRegistry;

/// The engine currently resident on the device.
pub(crate) struct LoadedEngine {
    pub id: ProgramId,
    pub engine: SharedEngine,
}

/// All mutable executor bookkeeping, guarded by one lock in `Executor` so
/// an invocation's binding/allocation/transfer steps never interleave with
/// another's. Nested bookkeeping (output allocation releasing or retaining
/// buffers mid-transfer) borrows through the already-held guard instead of
/// re-locking.
pub(crate) struct ExecState {
    pub registry: BufferRegistry,
    pub args: ArgsMap,
    pub outputs: OutputsMap,
    pub loaded: Option<LoadedEngine>,
    pub execution_counts: HashMap<ProgramId, u64>,
    pub events: Vec<TraceEvent>,
}

impl ExecState {
    pub fn new(allocator: Arc<dyn Allocator>, ordinal: u32) -> Self {
        Self {
            registry: BufferRegistry::new(allocator, ordinal),
            args: ArgsMap::new(),
            outputs: OutputsMap::new(),
            loaded: None,
            execution_counts: HashMap::new(),
            events: Vec::new(),
        }
    }
}
