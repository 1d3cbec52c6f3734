use std::collections::BTreeMap;
use std::sync::Arc;

use texec::{Allocator, BufferId, Conversion, ExecutorResult};

/// Channel names are the executor's only addressing scheme for engine
/// data movement; see `bindings` for the naming contract.
pub(crate) type ChannelName = String;

/// Bookkeeping for one buffer: host payload plus residency metadata.
///
/// The residency state machine has exactly four reachable states:
///
///   on_device=false                     — host buffer is authoritative.
///   on_device=true, input set           — copied to the device as the
///                                         named argument of the loaded
///                                         engine; host copy still valid.
///   on_device=true, output set          — produced by the last run; the
///                                         device copy is authoritative
///                                         until flushed back.
///   on_device=true, input + output set  — in-place resource update: the
///                                         same buffer was an argument and
///                                         an output. Repeated runs with an
///                                         unchanged engine keep it on the
///                                         device with no transfers.
#[derive(Debug)]
pub(crate) struct BufferControl {
    pub byte_len: usize,
    pub payload: Vec<u8>,
    pub ref_count: usize,
    pub on_device: bool,
    pub input_handle: Option<ChannelName>,
    pub output_handle: Option<ChannelName>,
    /// Transient host-to-device converted bytes, live only while a staged
    /// transfer is in flight.
    pub converted: Option<Vec<u8>>,
    /// Device-to-host conversion attached when the buffer was written as
    /// an output.
    pub output_convert: Option<Conversion>,
}

impl BufferControl {
    pub fn is_device_output(&self) -> bool {
        self.on_device && self.output_handle.is_some()
    }

    /// Drops device residency, returning the buffer to the host state.
    pub fn clear_residency(&mut self) {
        self.on_device = false;
        self.input_handle = None;
        self.output_handle = None;
    }
}

/// Externally observable snapshot of one buffer's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferState {
    pub byte_len: usize,
    pub ref_count: usize,
    pub on_device: bool,
    pub input_handle: Option<String>,
    pub output_handle: Option<String>,
}

/// Owns every live buffer. The registry holds the only structural
/// reference; binding maps hold weak aliases counted through `ref_count`.
/// A buffer is destroyed exactly when its count reaches zero.
///
/// Keyed by id in allocation order so transfer sweeps and trace summaries
/// are deterministic.
pub(crate) struct BufferRegistry {
    next_id: u64,
    buffers: BTreeMap<BufferId, BufferControl>,
    allocator: Arc<dyn Allocator>,
    ordinal: u32,
}

impl BufferRegistry {
    pub fn new(allocator: Arc<dyn Allocator>, ordinal: u32) -> Self {
        Self {
            next_id: 1,
            buffers: BTreeMap::new(),
            allocator,
            ordinal,
        }
    }

    pub fn allocate(&mut self, byte_len: usize, zero_init: bool) -> ExecutorResult<BufferId> {
        let payload = self.allocator.allocate(self.ordinal, byte_len, zero_init)?;
        let id = BufferId(self.next_id);
        self.next_id += 1;
        self.buffers.insert(
            id,
            BufferControl {
                byte_len,
                payload,
                ref_count: 1,
                on_device: false,
                input_handle: None,
                output_handle: None,
                converted: None,
                output_convert: None,
            },
        );
        Ok(id)
    }

    /// Increments the reference count; used when an output aliases an
    /// already-registered input.
    pub fn add_ref(&mut self, id: BufferId) -> ExecutorResult<()> {
        let control = self
            .buffers
            .get_mut(&id)
            .ok_or_else(|| texec::ExecutorError::argument(format!("unknown buffer {id:?}")))?;
        control.ref_count += 1;
        Ok(())
    }

    /// Decrements the reference count, freeing the buffer at zero.
    pub fn release(&mut self, id: BufferId) -> ExecutorResult<()> {
        let control = self
            .buffers
            .get_mut(&id)
            .ok_or_else(|| texec::ExecutorError::argument(format!("unknown buffer {id:?}")))?;
        control.ref_count -= 1;
        if control.ref_count == 0 {
            self.buffers.remove(&id);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn get(&self, id: BufferId) -> Option<&BufferControl> {
        self.buffers.get(&id)
    }

    pub fn get_mut(&mut self, id: BufferId) -> Option<&mut BufferControl> {
        self.buffers.get_mut(&id)
    }

    /// Lookup that the caller has already validated or that program
    /// metadata guarantees; a miss means the buffer bookkeeping invariant
    /// is broken, which is fatal.
    pub fn expect_mut(&mut self, id: BufferId) -> &mut BufferControl {
        match self.buffers.get_mut(&id) {
            Some(control) => control,
            None => panic!("buffer {id:?} disappeared from the registry"),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BufferId, &BufferControl)> {
        self.buffers.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&BufferId, &mut BufferControl)> {
        self.buffers.iter_mut()
    }

    pub fn state(&self, id: BufferId) -> Option<BufferState> {
        self.buffers.get(&id).map(|control| BufferState {
            byte_len: control.byte_len,
            ref_count: control.ref_count,
            on_device: control.on_device,
            input_handle: control.input_handle.clone(),
            output_handle: control.output_handle.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use texec::HostAllocator;

    fn registry() -> BufferRegistry {
        BufferRegistry::new(Arc::new(HostAllocator), 0)
    }

    #[test]
    fn allocate_release_leaves_membership_unchanged() {
        let mut reg = registry();
        let before = reg.len();
        let id = reg.allocate(100, false).expect("allocate");
        assert_eq!(reg.len(), before + 1);
        reg.release(id).expect("release");
        assert_eq!(reg.len(), before);
        assert!(reg.state(id).is_none());
    }

    #[test]
    fn buffer_survives_until_ref_count_zero() {
        let mut reg = registry();
        let id = reg.allocate(8, false).expect("allocate");
        reg.add_ref(id).expect("add_ref");
        assert_eq!(reg.state(id).expect("state").ref_count, 2);

        reg.release(id).expect("first release");
        assert!(
            reg.state(id).is_some(),
            "buffer with ref_count>0 must stay enumerable"
        );
        reg.release(id).expect("second release");
        assert!(reg.state(id).is_none());
    }

    #[test]
    fn fresh_buffer_is_host_resident() {
        let mut reg = registry();
        let id = reg.allocate(16, true).expect("allocate");
        let state = reg.state(id).expect("state");
        assert!(!state.on_device);
        assert_eq!(state.input_handle, None);
        assert_eq!(state.output_handle, None);
        assert_eq!(state.ref_count, 1);
        assert_eq!(state.byte_len, 16);
    }

    #[test]
    fn release_unknown_buffer_is_an_argument_error() {
        let mut reg = registry();
        assert!(reg.release(BufferId(999)).is_err());
    }
}
