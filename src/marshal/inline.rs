//! Marshal for hosts without a dedicated UI thread
//!
//! Headless front ends (scripts, batch runners, tests) have no thread
//! affinity rule, so every thread counts as UI-affine and dispatched jobs run
//! immediately on the calling thread.

use super::{Job, ThreadMarshal};
use crate::error::Result;

/// Treats every thread as the UI thread
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineMarshal;

impl InlineMarshal {
    /// Create a new inline marshal
    pub fn new() -> Self {
        Self
    }
}

impl ThreadMarshal for InlineMarshal {
    fn is_ui_thread(&self) -> bool {
        true
    }

    fn dispatch(&self, job: Job) -> Result<()> {
        job();
        Ok(())
    }
}
