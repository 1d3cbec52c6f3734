use std::mem;
use std::sync::mpsc;
use std::sync::Arc;

use texec::error::phase;
use texec::{
    BufferId, EngineError, ExecutorError, ExecutorResult, ProgramKind, SharedEngine, StreamSet,
    TraceEvent, TransferSummary,
};

use crate::bindings::ArgBinding;
use crate::config::ExecutorConfig;
use crate::queue::TaskQueue;
use crate::registry::BufferControl;
use crate::state::ExecState;

/// Dispatches one engine program onto the executor's task queue and blocks
/// until it finishes. The stream set rides along so payloads moved into it
/// always come back, fault or not.
pub(crate) fn run_engine(
    queue: &TaskQueue,
    engine: &SharedEngine,
    kind: ProgramKind,
    streams: StreamSet,
) -> (StreamSet, Result<(), EngineError>) {
    let engine = Arc::clone(engine);
    let (tx, rx) = mpsc::channel();
    queue.enqueue(move || {
        let mut streams = streams;
        let result = match engine.lock() {
            Ok(mut guard) => guard.run(kind, &mut streams),
            Err(_) => Err(EngineError::new("engine mutex poisoned")),
        };
        let _ = tx.send((streams, result));
    });
    match rx.recv() {
        Ok(outcome) => outcome,
        Err(_) => (
            StreamSet::new(),
            Err(EngineError::new("task queue worker terminated")),
        ),
    }
}

pub(crate) fn load_engine(queue: &TaskQueue, engine: &SharedEngine) -> Result<(), EngineError> {
    let engine = Arc::clone(engine);
    let (tx, rx) = mpsc::channel();
    queue.enqueue(move || {
        let result = match engine.lock() {
            Ok(mut guard) => guard.load(),
            Err(_) => Err(EngineError::new("engine mutex poisoned")),
        };
        let _ = tx.send(result);
    });
    rx.recv()
        .unwrap_or_else(|_| Err(EngineError::new("task queue worker terminated")))
}

pub(crate) fn engine_report(queue: &TaskQueue, engine: &SharedEngine) -> Option<String> {
    let engine = Arc::clone(engine);
    let (tx, rx) = mpsc::channel();
    queue.enqueue(move || {
        let report = engine.lock().ok().and_then(|mut guard| guard.execution_report());
        let _ = tx.send(report);
    });
    rx.recv().ok().flatten()
}

/// True when some device-resident output must come home before its storage
/// can be reinterpreted: the engine is changing, or the buffer is not
/// re-bound as the same logical argument it was last loaded as.
pub(crate) fn device_to_host_required(state: &ExecState, engine_changed: bool) -> bool {
    state.registry.iter().any(|(id, control)| {
        control.is_device_output()
            && (engine_changed
                || control
                    .input_handle
                    .as_ref()
                    .and_then(|handle| state.args.get(handle))
                    .map_or(true, |binding| binding.buffer != *id))
    })
}

/// True when some non-streamed argument is missing from the device or is
/// resident under a different channel than the one it is now bound to.
pub(crate) fn host_to_device_required(state: &ExecState, engine_changed: bool) -> bool {
    state.args.iter().any(|(channel, binding)| {
        if binding.streamed {
            return false;
        }
        match state.registry.get(binding.buffer) {
            Some(control) => {
                engine_changed
                    || !control.on_device
                    || control.input_handle.as_deref() != Some(channel.as_str())
            }
            None => true,
        }
    })
}

/// Runs the staged device-to-host program over every device-resident
/// output, applies device-to-host conversions, then drops residency for
/// every buffer: whatever the device held is no longer authoritative.
pub(crate) fn flush_device_to_host(
    state: &mut ExecState,
    config: &ExecutorConfig,
    queue: &TaskQueue,
) -> ExecutorResult<()> {
    if config.synthetic_data {
        return Ok(());
    }
    let engine = match &state.loaded {
        Some(loaded) => Arc::clone(&loaded.engine),
        None => panic!("device-resident outputs with no loaded engine"),
    };

    let mut summary = TransferSummary::default();
    let mut streams = StreamSet::new();
    let mut flushed: Vec<BufferId> = Vec::new();
    for (id, control) in state.registry.iter_mut() {
        if !control.is_device_output() {
            continue;
        }
        let Some(channel) = control.output_handle.clone() else {
            continue;
        };
        summary.record(&channel, control.byte_len as u64);
        streams.connect_to_host(channel, mem::take(&mut control.payload));
        flushed.push(*id);
    }
    if flushed.is_empty() {
        return Ok(());
    }

    let (streams, result) = run_engine(queue, &engine, ProgramKind::DeviceToHost, streams);
    restore_payloads(state, &flushed, streams);
    result.map_err(|err| ExecutorError::device_fault(phase::DEVICE_TO_HOST, err))?;

    if config.io_trace {
        state.events.push(TraceEvent::DeviceToHost { transfer: summary });
    }

    for id in &flushed {
        let control = state.registry.expect_mut(*id);
        if let Some(convert) = control.output_convert.clone() {
            control.payload = convert.apply(&control.payload);
        }
    }
    for (_, control) in state.registry.iter_mut() {
        control.clear_residency();
    }
    Ok(())
}

/// Runs the staged host-to-device program over every non-streamed bound
/// argument. Residency marks are applied only after the transfer program
/// succeeds; transient converted payloads are discarded either way.
pub(crate) fn load_host_to_device(
    state: &mut ExecState,
    config: &ExecutorConfig,
    queue: &TaskQueue,
) -> ExecutorResult<()> {
    if config.synthetic_data {
        return Ok(());
    }
    let engine = match &state.loaded {
        Some(loaded) => Arc::clone(&loaded.engine),
        None => panic!("host-to-device load requested with no loaded engine"),
    };

    let mut summary = TransferSummary::default();
    let mut streams = StreamSet::new();
    let mut marks: Vec<(BufferId, String)> = Vec::new();
    for (channel, binding) in state.args.iter() {
        if binding.streamed {
            continue;
        }
        let control = state.registry.expect_mut(binding.buffer);
        let bytes = pre_process(binding, control);
        summary.record(channel, control.byte_len as u64);
        streams.connect_to_device(channel.clone(), bytes);
        marks.push((binding.buffer, channel.clone()));
    }
    if marks.is_empty() {
        return Ok(());
    }

    let (_, result) = run_engine(queue, &engine, ProgramKind::HostToDevice, streams);
    let run_failed = result.is_err();
    for (id, _) in &marks {
        state.registry.expect_mut(*id).converted = None;
    }
    if !run_failed {
        for (id, channel) in marks {
            let control = state.registry.expect_mut(id);
            control.on_device = true;
            control.input_handle = Some(channel);
        }
        if config.io_trace {
            state.events.push(TraceEvent::HostToDevice { transfer: summary });
        }
    }
    result.map_err(|err| ExecutorError::device_fault(phase::HOST_TO_DEVICE, err))
}

/// Connects streamed argument and output channels for the main run.
/// Streamed data bypasses the staged programs entirely: arguments move in
/// and outputs move out while the engine's main program executes. Returns
/// the connected set plus the output buffers whose payloads were lent out.
pub(crate) fn connect_streamed(
    state: &mut ExecState,
    config: &ExecutorConfig,
) -> (StreamSet, Vec<BufferId>) {
    let mut streams = StreamSet::new();
    let mut lent: Vec<BufferId> = Vec::new();
    if config.synthetic_data {
        return (streams, lent);
    }
    for (channel, binding) in state.args.iter() {
        if !binding.streamed {
            continue;
        }
        let control = state.registry.expect_mut(binding.buffer);
        let bytes = pre_process(binding, control);
        streams.connect_to_device(channel.clone(), bytes);
    }
    for (channel, binding) in state.outputs.iter() {
        if !binding.streamed {
            continue;
        }
        let control = state.registry.expect_mut(binding.buffer);
        streams.connect_to_host(channel.clone(), mem::take(&mut control.payload));
        lent.push(binding.buffer);
    }
    (streams, lent)
}

/// Returns lent payloads to their buffers after the main run and discards
/// transient converted data for streamed arguments.
pub(crate) fn restore_streamed(state: &mut ExecState, streams: StreamSet, lent: &[BufferId]) {
    restore_payloads(state, lent, streams);
    let streamed_args: Vec<BufferId> = state
        .args
        .values()
        .filter(|binding| binding.streamed)
        .map(|binding| binding.buffer)
        .collect();
    for id in streamed_args {
        state.registry.expect_mut(id).converted = None;
    }
}

/// Applies device-to-host conversion to every streamed output's
/// freshly-written bytes.
pub(crate) fn post_process_streamed(state: &mut ExecState) {
    let streamed: Vec<BufferId> = state
        .outputs
        .values()
        .filter(|binding| binding.streamed)
        .map(|binding| binding.buffer)
        .collect();
    for id in streamed {
        let control = state.registry.expect_mut(id);
        if let Some(convert) = control.output_convert.clone() {
            control.payload = convert.apply(&control.payload);
        }
    }
}

/// Host-to-device pre-processing for one bound argument: convert when a
/// conversion is attached (caching the transient bytes), otherwise ship
/// the payload as-is.
fn pre_process(binding: &ArgBinding, control: &mut BufferControl) -> Vec<u8> {
    match &binding.convert {
        Some(convert) => {
            let converted = convert.apply(&control.payload);
            control.converted = Some(converted.clone());
            converted
        }
        None => control.payload.clone(),
    }
}

/// Moves device-to-host stream payloads back into their buffers, in the
/// connection order recorded alongside the stream set.
fn restore_payloads(state: &mut ExecState, ids: &[BufferId], streams: StreamSet) {
    let (_, to_host) = streams.into_parts();
    if to_host.len() != ids.len() {
        panic!(
            "engine returned {} device-to-host channels, expected {}",
            to_host.len(),
            ids.len()
        );
    }
    for (id, chunk) in ids.iter().zip(to_host) {
        let control = state.registry.expect_mut(*id);
        if chunk.bytes.len() != control.byte_len {
            panic!(
                "engine wrote {} bytes to channel {}, buffer holds {}",
                chunk.bytes.len(),
                chunk.channel,
                control.byte_len
            );
        }
        control.payload = chunk.bytes;
    }
}
