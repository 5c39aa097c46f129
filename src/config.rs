//! Configuration (spec §4.6), generalized from the teacher's
//! `LsmStorageOptions` into the full knob set the dynamic extension
//! recognises at construction.

use crate::error::{DynamicExtensionError, Result};

/// Shard/level layout policy (spec §3 "Extension structure").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutPolicy {
    /// Each level holds at most one shard; capacity grows geometrically.
    Leveling,
    /// Each level holds up to `scale_factor` shards of growing capacity.
    Tiering,
    /// Each level holds at most one shard; reconstruction consolidates
    /// across many levels at once (bulk-sorted merge).
    Bsm,
}

/// Delete policy (spec §3, §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletePolicy {
    /// `erase` appends a tombstone; cancellation happens during merges.
    Tombstone,
    /// `erase` flips a bit on the live record in place. Only legal with the
    /// serial scheduler (spec §4.6).
    Tagging,
}

/// Scheduler flavour (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerKind {
    /// Caller runs reconstruction/query jobs inline.
    Serial,
    /// FIFO executor on a bounded worker pool.
    ConcurrentFifo,
}

#[derive(Debug, Clone)]
pub struct ExtensionOptions {
    pub buffer_hwm: usize,
    pub buffer_lwm: usize,
    pub buffer_cap: usize,
    pub scale_factor: usize,
    pub max_delete_prop: f64,
    pub memory_budget: usize,
    pub thread_count: usize,
    pub layout_policy: LayoutPolicy,
    pub delete_policy: DeletePolicy,
    pub scheduler: SchedulerKind,
}

impl ExtensionOptions {
    pub fn new(buffer_hwm: usize, buffer_lwm: usize, scale_factor: usize) -> Self {
        Self {
            buffer_hwm,
            buffer_lwm,
            buffer_cap: buffer_hwm * 2,
            scale_factor,
            max_delete_prop: 0.1,
            memory_budget: 0,
            thread_count: 4,
            layout_policy: LayoutPolicy::Leveling,
            delete_policy: DeletePolicy::Tombstone,
            scheduler: SchedulerKind::ConcurrentFifo,
        }
    }

    pub fn with_layout_policy(mut self, policy: LayoutPolicy) -> Self {
        self.layout_policy = policy;
        self
    }

    pub fn with_delete_policy(mut self, policy: DeletePolicy) -> Self {
        self.delete_policy = policy;
        self
    }

    pub fn with_scheduler(mut self, scheduler: SchedulerKind) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_max_delete_prop(mut self, tau: f64) -> Self {
        self.max_delete_prop = tau;
        self
    }

    pub fn with_buffer_cap(mut self, cap: usize) -> Self {
        self.buffer_cap = cap;
        self
    }

    pub fn with_memory_budget(mut self, bytes: usize) -> Self {
        self.memory_budget = bytes;
        self
    }

    pub fn with_thread_count(mut self, threads: usize) -> Self {
        self.thread_count = threads;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.buffer_lwm >= self.buffer_hwm {
            return Err(DynamicExtensionError::InvalidConfig(
                "buffer_lwm must be strictly less than buffer_hwm".into(),
            ));
        }
        if self.buffer_cap < self.buffer_hwm {
            return Err(DynamicExtensionError::InvalidConfig(
                "buffer_cap must be at least buffer_hwm".into(),
            ));
        }
        if self.scale_factor < 2 {
            return Err(DynamicExtensionError::InvalidConfig(
                "scale_factor must be >= 2".into(),
            ));
        }
        if !(self.max_delete_prop > 0.0 && self.max_delete_prop < 1.0) {
            return Err(DynamicExtensionError::InvalidConfig(
                "max_delete_prop must be in (0, 1)".into(),
            ));
        }
        if self.delete_policy == DeletePolicy::Tagging && self.scheduler != SchedulerKind::Serial {
            return Err(DynamicExtensionError::InvalidConfig(
                "tagging delete policy requires the serial scheduler".into(),
            ));
        }
        if self.thread_count == 0 {
            return Err(DynamicExtensionError::InvalidConfig(
                "thread_count must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagging_with_concurrent_scheduler_is_rejected() {
        let opts = ExtensionOptions::new(4, 2, 2)
            .with_delete_policy(DeletePolicy::Tagging)
            .with_scheduler(SchedulerKind::ConcurrentFifo);
        assert!(opts.validate().is_err());
    }

    #[test]
    fn tagging_with_serial_scheduler_is_accepted() {
        let opts = ExtensionOptions::new(4, 2, 2)
            .with_delete_policy(DeletePolicy::Tagging)
            .with_scheduler(SchedulerKind::Serial);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn watermarks_must_be_ordered() {
        let opts = ExtensionOptions::new(4, 4, 2);
        assert!(opts.validate().is_err());
    }
}
