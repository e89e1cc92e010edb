//! The multi-device CALL/RET context stack.
//!
//! Only the scratchpad and the library tape are legal call targets, so the
//! saved device is a two-variant enum rather than a heap reference.

/// Which device a context-stack frame (or the CPU's current execution
/// target) refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceRef {
    Scratchpad,
    Library,
}

/// One saved `(device, return_ip)` frame, pushed by CALL and popped by RET.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub device: DeviceRef,
    pub return_ip: u64,
}

/// The CALL/RET context stack. No advertised depth limit.
#[derive(Debug, Clone, Default)]
pub struct ContextStack(Vec<Frame>);

impl ContextStack {
    #[must_use]
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, device: DeviceRef, return_ip: u64) {
        self.0.push(Frame { device, return_ip });
    }

    pub fn pop(&mut self) -> Option<Frame> {
        self.0.pop()
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
