use std::env;

/// Executor behaviour knobs. Tests build the value directly; deployments
/// layer environment overrides on top of a default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Device ordinal forwarded to the allocator.
    pub ordinal: u32,
    /// Record a transfer summary event for every staged transfer and an
    /// event for every engine load.
    pub io_trace: bool,
    /// Record an execute event per invocation, with an engine report on
    /// the first run of each program.
    pub execution_trace: bool,
    /// Skip all data movement and stream connection; buffer bookkeeping
    /// still runs. Used to benchmark compute without I/O.
    pub synthetic_data: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            ordinal: 0,
            io_trace: false,
            execution_trace: false,
            synthetic_data: false,
        }
    }
}

impl ExecutorConfig {
    /// Applies `TEXEC_*` environment overrides on top of `self`.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(value) = env_bool("TEXEC_IO_TRACE") {
            self.io_trace = value;
        }
        if let Some(value) = env_bool("TEXEC_EXECUTION_TRACE") {
            self.execution_trace = value;
        }
        if let Some(value) = env_bool("TEXEC_SYNTHETIC_DATA") {
            self.synthetic_data = value;
        }
        self
    }
}

fn env_bool(name: &str) -> Option<bool> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Some(parse_bool(&value)),
        _ => None,
    }
}

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}
