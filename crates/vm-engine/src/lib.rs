//! The fetch-decode-dispatch execution engine: register file, multi-device
//! CALL/RET context stack, PB argument passing, the boot protocol, and
//! observability.

mod cards;
mod context;
mod cpu;
mod error;
mod trace;

pub use cards::CardDeckBuilder;
pub use context::{ContextStack, DeviceRef, Frame};
pub use cpu::{BootStep, Cpu, PB_SHADOW_BASE};
pub use error::VmError;
pub use trace::{AnomalyRule, TraceEvent, TraceSink};
