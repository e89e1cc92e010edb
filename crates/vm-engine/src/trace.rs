//! Observability: a structured per-instruction event and the trait object
//! that consumes it. There is no logging crate in this workspace — the
//! engine stays correct with no sink attached, same as `emu-core`'s
//! `Bus`/`Cpu` traits being passed in rather than reached for globally.

use crate::context::DeviceRef;

/// One executed instruction's worth of observable state.
#[derive(Debug, Clone)]
pub struct TraceEvent {
    pub ip: Option<u64>,
    pub device: DeviceRef,
    pub op_code: u16,
    pub op_name: &'static str,
    pub operand_raw: u64,
    pub operand_signed: i64,
    pub r1: i64,
    pub r2: i64,
    pub r3: i64,
    pub stack_depth: usize,
    pub ctx_switch: bool,
    pub extra_words: u32,
    pub pb_used: bool,
    pub device_position: Option<u64>,
    pub error: bool,
    pub anomalies: Vec<String>,
}

/// A sink for [`TraceEvent`]s, supplied by the caller. The engine holds
/// `Option<Box<dyn TraceSink>>` and runs unchanged with none attached.
pub trait TraceSink {
    fn emit(&mut self, event: &TraceEvent);
}

/// A rule that inspects an event and reports zero or more triggered
/// anomaly tags, mirroring `CPU.add_anomaly_rule` in the reference
/// implementation.
pub type AnomalyRule = Box<dyn FnMut(&TraceEvent) -> Vec<String>>;
