use std::collections::BTreeMap;

use texec::{BufferId, BufferTree, CompiledProgram, Conversion, ExecutorError, ExecutorResult};

use crate::registry::{BufferRegistry, ChannelName};

/// Channel name for a parameter leaf. The format is a contract with the
/// compiled program and is not renegotiable per call.
pub(crate) fn input_channel(parameter: usize, leaf: usize) -> ChannelName {
    format!("{parameter}.{leaf}")
}

/// Channel name for an output leaf.
pub(crate) fn output_channel(output: usize, leaf: usize) -> ChannelName {
    format!("out_{output}.{leaf}")
}

/// One bound argument leaf for the current invocation.
#[derive(Debug, Clone)]
pub(crate) struct ArgBinding {
    pub buffer: BufferId,
    pub streamed: bool,
    pub convert: Option<Conversion>,
}

/// One bound output leaf, recorded after output allocation.
#[derive(Debug, Clone)]
pub(crate) struct OutputBinding {
    pub buffer: BufferId,
    pub streamed: bool,
}

/// Ordered maps keep transfer sweeps and trace summaries deterministic.
pub(crate) type ArgsMap = BTreeMap<ChannelName, ArgBinding>;
pub(crate) type OutputsMap = BTreeMap<ChannelName, OutputBinding>;

/// Builds the per-invocation argument binding map by flattening each
/// caller buffer tree against the program's parameter shapes, pre-order.
/// Malformed bindings fail here, before any buffer state is touched.
pub(crate) fn build_args_map(
    program: &CompiledProgram,
    args: &[BufferTree],
    registry: &BufferRegistry,
) -> ExecutorResult<ArgsMap> {
    if program.inputs.len() != args.len() {
        return Err(ExecutorError::argument(format!(
            "program '{}' expects {} parameters, got {}",
            program.name,
            program.inputs.len(),
            args.len()
        )));
    }

    let mut map = ArgsMap::new();
    for (parameter, (info, tree)) in program.inputs.iter().zip(args).enumerate() {
        let leaves = tree.flatten_matching(&info.shape).ok_or_else(|| {
            ExecutorError::argument(format!(
                "parameter {parameter} of '{}' does not match its declared shape",
                program.name
            ))
        })?;
        let leaf_sizes = info.shape.leaf_sizes();
        for (leaf, buffer) in leaves.into_iter().enumerate() {
            let control = registry.get(buffer).ok_or_else(|| {
                ExecutorError::argument(format!(
                    "parameter {parameter} leaf {leaf} references unregistered buffer {buffer:?}"
                ))
            })?;
            let expected = leaf_sizes[leaf];
            if control.byte_len != expected {
                return Err(ExecutorError::argument(format!(
                    "parameter {parameter} leaf {leaf}: buffer holds {} bytes, shape wants {expected}",
                    control.byte_len
                )));
            }
            map.insert(
                input_channel(parameter, leaf),
                ArgBinding {
                    buffer,
                    streamed: info.streaming,
                    convert: info.conversion(leaf),
                },
            );
        }
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use texec::{HostAllocator, InputInfo, ProgramId, ShapeTree};

    fn registry_with(sizes: &[usize]) -> (BufferRegistry, Vec<BufferId>) {
        let mut reg = BufferRegistry::new(Arc::new(HostAllocator), 0);
        let ids = sizes
            .iter()
            .map(|len| reg.allocate(*len, false).expect("allocate"))
            .collect();
        (reg, ids)
    }

    fn program(inputs: Vec<InputInfo>) -> CompiledProgram {
        CompiledProgram::new(ProgramId(7), "p", None, inputs, Vec::new())
    }

    #[test]
    fn channel_names_follow_the_contract() {
        assert_eq!(input_channel(0, 0), "0.0");
        assert_eq!(input_channel(3, 12), "3.12");
        assert_eq!(output_channel(1, 2), "out_1.2");
    }

    #[test]
    fn nested_parameters_flatten_preorder() {
        let (reg, ids) = registry_with(&[4, 8, 12]);
        let shape = ShapeTree::tuple([
            ShapeTree::leaf(4),
            ShapeTree::tuple([ShapeTree::leaf(8), ShapeTree::leaf(12)]),
        ]);
        let tree = BufferTree::tuple([
            BufferTree::leaf(ids[0]),
            BufferTree::tuple([BufferTree::leaf(ids[1]), BufferTree::leaf(ids[2])]),
        ]);
        let program = program(vec![InputInfo::new(shape, false)]);
        let map = build_args_map(&program, &[tree], &reg).expect("build");
        assert_eq!(map.len(), 3);
        assert_eq!(map["0.0"].buffer, ids[0]);
        assert_eq!(map["0.1"].buffer, ids[1]);
        assert_eq!(map["0.2"].buffer, ids[2]);
    }

    #[test]
    fn arity_mismatch_is_an_argument_error() {
        let (reg, _) = registry_with(&[]);
        let program = program(vec![InputInfo::new(ShapeTree::leaf(4), false)]);
        assert!(build_args_map(&program, &[], &reg).is_err());
    }

    #[test]
    fn size_mismatch_is_an_argument_error() {
        let (reg, ids) = registry_with(&[4]);
        let program = program(vec![InputInfo::new(ShapeTree::leaf(8), false)]);
        let err = build_args_map(&program, &[BufferTree::leaf(ids[0])], &reg);
        assert!(err.is_err());
    }

    #[test]
    fn unregistered_buffer_is_an_argument_error() {
        let (reg, _) = registry_with(&[]);
        let program = program(vec![InputInfo::new(ShapeTree::leaf(4), false)]);
        let err = build_args_map(&program, &[BufferTree::leaf(BufferId(42))], &reg);
        assert!(err.is_err());
    }
}
