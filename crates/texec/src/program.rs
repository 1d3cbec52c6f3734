use std::fmt;

use serde::{Deserialize, Serialize};

use crate::convert::Conversion;
use crate::engine::SharedEngine;
use crate::shape::ShapeTree;

/// Opaque compiled-program identity. Two programs with different ids are
/// treated as an engine change even if their engines share hardware state.
/// The id doubles as a stable key for cache-file naming.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ProgramId(pub u64);

impl ProgramId {
    pub fn cache_file_name(&self, extension: &str) -> String {
        format!("{:016x}.{extension}", self.0)
    }
}

/// Per-parameter metadata emitted by the compiler.
#[derive(Debug, Clone)]
pub struct InputInfo {
    pub shape: ShapeTree,
    /// Streamed parameters move while the main program runs and bypass the
    /// staged host-to-device transfer.
    pub streaming: bool,
    /// Host-to-device conversion per leaf, pre-order. An empty vector means
    /// no conversions anywhere in this parameter.
    pub conversions: Vec<Option<Conversion>>,
}

impl InputInfo {
    pub fn new(shape: ShapeTree, streaming: bool) -> Self {
        Self {
            shape,
            streaming,
            conversions: Vec::new(),
        }
    }

    pub fn with_conversions(mut self, conversions: Vec<Option<Conversion>>) -> Self {
        self.conversions = conversions;
        self
    }

    pub fn conversion(&self, leaf: usize) -> Option<Conversion> {
        self.conversions.get(leaf).and_then(Clone::clone)
    }
}

/// How one output position produces its buffer tree.
#[derive(Clone)]
pub enum OutputKind {
    /// General case: freshly allocated, or an in-place update of the input
    /// at `modifies_input` when the compiler declared the resource
    /// modified.
    Buffer { modifies_input: Option<usize> },
    /// The output is defined to be identical to the bound input at `input`.
    /// Never allocates, never copies.
    Remap { input: usize },
    /// Compile-time literal; one byte payload per leaf, pre-order.
    Constant { leaves: Vec<std::sync::Arc<[u8]>> },
}

impl fmt::Debug for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputKind::Buffer { modifies_input } => f
                .debug_struct("Buffer")
                .field("modifies_input", modifies_input)
                .finish(),
            OutputKind::Remap { input } => {
                f.debug_struct("Remap").field("input", input).finish()
            }
            OutputKind::Constant { leaves } => f
                .debug_struct("Constant")
                .field("leaves", &leaves.len())
                .finish(),
        }
    }
}

/// Per-output metadata emitted by the compiler.
#[derive(Debug, Clone)]
pub struct OutputInfo {
    pub shape: ShapeTree,
    /// Streamed outputs are written back to the host while the main program
    /// runs; non-streamed outputs stay device-resident until flushed.
    pub streaming: bool,
    pub kind: OutputKind,
    /// Device-to-host conversion per leaf, pre-order.
    pub conversions: Vec<Option<Conversion>>,
}

impl OutputInfo {
    pub fn new(shape: ShapeTree, streaming: bool, kind: OutputKind) -> Self {
        Self {
            shape,
            streaming,
            kind,
            conversions: Vec::new(),
        }
    }

    pub fn with_conversions(mut self, conversions: Vec<Option<Conversion>>) -> Self {
        self.conversions = conversions;
        self
    }

    pub fn conversion(&self, leaf: usize) -> Option<Conversion> {
        self.conversions.get(leaf).and_then(Clone::clone)
    }
}

/// The unit of work the executor consumes: an optional device engine plus
/// the parameter/output metadata the compiler derived for it. A program
/// with no engine must be all-constant or all-remap; it never touches the
/// device.
#[derive(Clone)]
pub struct CompiledProgram {
    pub id: ProgramId,
    pub name: String,
    pub engine: Option<SharedEngine>,
    pub inputs: Vec<InputInfo>,
    pub outputs: Vec<OutputInfo>,
}

impl CompiledProgram {
    pub fn new(
        id: ProgramId,
        name: impl Into<String>,
        engine: Option<SharedEngine>,
        inputs: Vec<InputInfo>,
        outputs: Vec<OutputInfo>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            engine,
            inputs,
            outputs,
        }
    }

    pub fn is_constant(&self) -> bool {
        !self.outputs.is_empty()
            && self
                .outputs
                .iter()
                .all(|output| matches!(output.kind, OutputKind::Constant { .. }))
    }

    pub fn is_remap(&self) -> bool {
        !self.outputs.is_empty()
            && self
                .outputs
                .iter()
                .all(|output| matches!(output.kind, OutputKind::Remap { .. }))
    }
}

impl fmt::Debug for CompiledProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledProgram")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("has_engine", &self.engine.is_some())
            .field("inputs", &self.inputs.len())
            .field("outputs", &self.outputs.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::ShapeTree;

    #[test]
    fn cache_file_name_is_stable_hex() {
        assert_eq!(ProgramId(0xab).cache_file_name("eng"), "00000000000000ab.eng");
    }

    #[test]
    fn constant_and_remap_classification() {
        let constant = OutputInfo::new(
            ShapeTree::leaf(4),
            false,
            OutputKind::Constant {
                leaves: vec![vec![0u8; 4].into()],
            },
        );
        let remap = OutputInfo::new(ShapeTree::leaf(4), false, OutputKind::Remap { input: 0 });

        let program = CompiledProgram::new(ProgramId(1), "c", None, vec![], vec![constant]);
        assert!(program.is_constant());
        assert!(!program.is_remap());

        let program = CompiledProgram::new(ProgramId(2), "r", None, vec![], vec![remap]);
        assert!(program.is_remap());
    }
}
