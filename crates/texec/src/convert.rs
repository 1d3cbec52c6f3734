use std::fmt;
use std::sync::Arc;

/// Pure byte-format transform applied when a tensor crosses the host/device
/// boundary. Host-to-device conversions run before a staged load or stream
/// connect; device-to-host conversions run after a readback completes.
pub type ConvertFn = dyn Fn(&[u8]) -> Vec<u8> + Send + Sync;

/// Shared, cloneable wrapper around a conversion function so program
/// metadata and buffer bookkeeping can hold the same transform.
#[derive(Clone)]
pub struct Conversion(Arc<ConvertFn>);

impl Conversion {
    pub fn new(f: impl Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn apply(&self, bytes: &[u8]) -> Vec<u8> {
        (self.0)(bytes)
    }
}

impl fmt::Debug for Conversion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Conversion(..)")
    }
}
