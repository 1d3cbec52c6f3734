use texec::{BufferTree, CompiledProgram, ExecutorResult, OutputInfo, OutputKind, ShapeTree};

use crate::bindings::{input_channel, output_channel, ArgsMap, OutputBinding, OutputsMap};
use crate::registry::BufferRegistry;
use texec::ExecutorError;

/// Which allocation policy this invocation uses. Engine-less programs are
/// classified up front as constant or remap; everything with an engine
/// takes the general buffer path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Strategy {
    Constant,
    Remap,
    Buffer,
}

/// Produces the output buffer tree for one invocation and, for the buffer
/// strategy, the output binding map used to connect streamed channels.
///
/// Binding errors are detected before any buffer state is mutated, so an
/// `ArgumentError` here leaves registry and residency untouched.
pub(crate) fn allocate_outputs(
    program: &CompiledProgram,
    strategy: Strategy,
    registry: &mut BufferRegistry,
    args: &ArgsMap,
) -> ExecutorResult<(BufferTree, OutputsMap)> {
    validate_output_bindings(program, strategy, registry, args)?;

    let mut outputs_map = OutputsMap::new();
    let mut trees = Vec::with_capacity(program.outputs.len());
    for (output_index, info) in program.outputs.iter().enumerate() {
        let mut flat = 0usize;
        trees.push(allocate_tree(
            &info.shape,
            output_index,
            &mut flat,
            info,
            strategy,
            registry,
            args,
            &mut outputs_map,
        )?);
    }

    let tree = if trees.len() == 1 {
        trees.remove(0)
    } else {
        BufferTree::Tuple(trees)
    };
    Ok((tree, outputs_map))
}

#[allow(clippy::too_many_arguments)]
fn allocate_tree(
    shape: &ShapeTree,
    output_index: usize,
    flat: &mut usize,
    info: &OutputInfo,
    strategy: Strategy,
    registry: &mut BufferRegistry,
    args: &ArgsMap,
    outputs_map: &mut OutputsMap,
) -> ExecutorResult<BufferTree> {
    match shape {
        ShapeTree::Tuple(children) => {
            let mut out = Vec::with_capacity(children.len());
            for child in children {
                out.push(allocate_tree(
                    child,
                    output_index,
                    flat,
                    info,
                    strategy,
                    registry,
                    args,
                    outputs_map,
                )?);
            }
            Ok(BufferTree::Tuple(out))
        }
        ShapeTree::Leaf { byte_len } => {
            let leaf = *flat;
            *flat += 1;
            let buffer = allocate_leaf(
                *byte_len,
                output_index,
                leaf,
                info,
                strategy,
                registry,
                args,
            )?;
            if strategy == Strategy::Buffer {
                outputs_map.insert(
                    output_channel(output_index, leaf),
                    OutputBinding {
                        buffer,
                        streamed: info.streaming,
                    },
                );
            }
            Ok(BufferTree::Leaf(buffer))
        }
    }
}

fn allocate_leaf(
    byte_len: usize,
    output_index: usize,
    leaf: usize,
    info: &OutputInfo,
    strategy: Strategy,
    registry: &mut BufferRegistry,
    args: &ArgsMap,
) -> ExecutorResult<texec::BufferId> {
    match (strategy, &info.kind) {
        // Compile-time literal: fresh host buffer, no device interaction,
        // no residency caching.
        (Strategy::Constant, OutputKind::Constant { leaves }) => {
            let id = registry.allocate(byte_len, false)?;
            let control = registry.expect_mut(id);
            control.payload.copy_from_slice(&leaves[leaf]);
            Ok(id)
        }
        // Identity alias of a bound input: same handle, one extra
        // reference, residency state left exactly as the input had it.
        (Strategy::Remap, OutputKind::Remap { input }) => {
            let binding = &args[&input_channel(*input, leaf)];
            registry.add_ref(binding.buffer)?;
            Ok(binding.buffer)
        }
        (Strategy::Buffer, OutputKind::Buffer { modifies_input }) => {
            let channel = output_channel(output_index, leaf);
            match modifies_input {
                // In-place resource update: the input's buffer becomes the
                // output as well.
                Some(input) => {
                    let binding = &args[&input_channel(*input, leaf)];
                    let buffer = binding.buffer;
                    registry.add_ref(buffer)?;
                    let control = registry.expect_mut(buffer);
                    control.on_device = !info.streaming;
                    control.output_handle = Some(channel);
                    control.output_convert = info.conversion(leaf);
                    Ok(buffer)
                }
                None => {
                    let id = registry.allocate(byte_len, false)?;
                    let control = registry.expect_mut(id);
                    control.on_device = !info.streaming;
                    control.output_handle = Some(channel);
                    control.output_convert = info.conversion(leaf);
                    Ok(id)
                }
            }
        }
        (_, kind) => panic!(
            "output {output_index} of kind {kind:?} contradicts the program's {strategy:?} classification"
        ),
    }
}

/// Checks every binding the strategies will rely on, without mutating
/// anything. Contract violations in the program metadata itself are fatal;
/// missing or mis-sized caller bindings are argument errors.
fn validate_output_bindings(
    program: &CompiledProgram,
    strategy: Strategy,
    registry: &BufferRegistry,
    args: &ArgsMap,
) -> ExecutorResult<()> {
    for (output_index, info) in program.outputs.iter().enumerate() {
        let leaf_sizes = info.shape.leaf_sizes();
        match (&info.kind, strategy) {
            (OutputKind::Constant { leaves }, Strategy::Constant) => {
                if leaves.len() != leaf_sizes.len() {
                    panic!(
                        "output {output_index}: {} constant literals for {} leaves",
                        leaves.len(),
                        leaf_sizes.len()
                    );
                }
                for (leaf, (literal, size)) in leaves.iter().zip(&leaf_sizes).enumerate() {
                    if literal.len() != *size {
                        panic!(
                            "output {output_index} leaf {leaf}: literal is {} bytes, shape wants {size}",
                            literal.len()
                        );
                    }
                }
            }
            (OutputKind::Remap { input }, Strategy::Remap) => {
                check_aliased_input(
                    "remap", output_index, *input, &leaf_sizes, registry, args,
                )?;
            }
            (OutputKind::Buffer { modifies_input }, Strategy::Buffer) => {
                if let Some(input) = modifies_input {
                    check_aliased_input(
                        "resource", output_index, *input, &leaf_sizes, registry, args,
                    )?;
                }
            }
            (kind, _) => panic!(
                "output {output_index} of kind {kind:?} contradicts the program's {strategy:?} classification"
            ),
        }
    }
    Ok(())
}

fn check_aliased_input(
    role: &str,
    output_index: usize,
    input: usize,
    leaf_sizes: &[usize],
    registry: &BufferRegistry,
    args: &ArgsMap,
) -> ExecutorResult<()> {
    for (leaf, size) in leaf_sizes.iter().enumerate() {
        let channel = input_channel(input, leaf);
        let binding = args.get(&channel).ok_or_else(|| {
            ExecutorError::argument(format!(
                "output {output_index} ({role}) needs input channel {channel}, which is not bound"
            ))
        })?;
        let control = registry.get(binding.buffer).ok_or_else(|| {
            ExecutorError::argument(format!(
                "output {output_index} ({role}) input channel {channel} references a freed buffer"
            ))
        })?;
        if control.byte_len != *size {
            return Err(ExecutorError::argument(format!(
                "output {output_index} ({role}) leaf {leaf}: input buffer holds {} bytes, output wants {size}",
                control.byte_len
            )));
        }
    }
    Ok(())
}
