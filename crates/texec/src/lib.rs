pub mod convert;
pub mod engine;
pub mod error;
pub mod program;
pub mod shape;
pub mod trace;

pub use convert::Conversion;
pub use engine::{
    Allocator, DeviceEngine, HostAllocator, ProgramKind, SharedEngine, StreamBuffer, StreamSet,
};
pub use error::{AllocationError, EngineError, ExecutorError, ExecutorResult};
pub use program::{CompiledProgram, InputInfo, OutputInfo, OutputKind, ProgramId};
pub use shape::{BufferId, BufferTree, ShapeTree};
pub use trace::{TraceEvent, TransferRecord, TransferSummary};
