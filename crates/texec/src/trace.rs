use serde::Serialize;

/// One tensor movement inside a staged transfer: channel name plus byte
/// count, recorded in connection order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferRecord {
    pub name: String,
    pub size: u64,
}

/// Summary of one staged transfer program run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransferSummary {
    pub tensors: Vec<TransferRecord>,
    pub total_size: u64,
}

impl TransferSummary {
    pub fn record(&mut self, name: impl Into<String>, size: u64) {
        self.tensors.push(TransferRecord {
            name: name.into(),
            size,
        });
        self.total_size += size;
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Structured events emitted by the executor (and by compiler-side
/// collaborators via the same sink). Drained with
/// `Executor::take_trace_events`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    CompileBegin { module: String },
    CompileEnd { module: String, duration_ms: u64 },
    EngineLoad { module: String },
    Execute { module: String, report: String },
    HostToDevice { transfer: TransferSummary },
    DeviceToHost { transfer: TransferSummary },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_accumulates_total() {
        let mut summary = TransferSummary::default();
        summary.record("0.0", 100);
        summary.record("1.0", 28);
        assert_eq!(summary.total_size, 128);
        assert_eq!(summary.tensors.len(), 2);
    }

    #[test]
    fn events_serialize_with_tag() {
        let event = TraceEvent::EngineLoad {
            module: "resnet".to_string(),
        };
        let json = serde_json::to_string(&event).expect("serialize");
        assert_eq!(json, r#"{"event":"engine_load","module":"resnet"}"#);
    }
}
