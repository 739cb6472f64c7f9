//! Per-mode runtime state: what's claimed, what's running, and what it's
//! doing, independent of the static [`super::mode::ModeId`] catalog entry.

use chrono::{DateTime, Utc};

use crate::device::DeviceId;
use crate::process::Handle;

use super::mode::ModeId;

/// Lifecycle state of a [`DecoderInstance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Idle,
    Starting,
    Running,
    Stopping,
    Crashed,
}

/// The mutable state of one mode's decoder, owned by the registry behind a
/// per-mode mutex. Holds everything `status` needs to answer without
/// touching the process table or device arbiter.
#[derive(Debug, Clone)]
pub struct DecoderInstance {
    pub mode_id: ModeId,
    pub status: InstanceStatus,
    pub claimed_devices: Vec<DeviceId>,
    pub process_handle: Option<Handle>,
    pub started_at: Option<DateTime<Utc>>,
    pub message_count: u64,
    pub last_error: Option<String>,
}

impl DecoderInstance {
    pub fn idle(mode_id: ModeId) -> Self {
        Self {
            mode_id,
            status: InstanceStatus::Idle,
            claimed_devices: Vec::new(),
            process_handle: None,
            started_at: None,
            message_count: 0,
            last_error: None,
        }
    }

    pub fn mark_starting(&mut self, devices: Vec<DeviceId>) {
        self.status = InstanceStatus::Starting;
        self.claimed_devices = devices;
        self.last_error = None;
    }

    pub fn mark_running(&mut self, handle: Handle, now: DateTime<Utc>) {
        self.status = InstanceStatus::Running;
        self.process_handle = Some(handle);
        self.started_at = Some(now);
    }

    pub fn mark_crashed(&mut self, reason: impl Into<String>) {
        self.status = InstanceStatus::Crashed;
        self.last_error = Some(reason.into());
        self.process_handle = None;
    }

    pub fn record_message(&mut self) {
        self.message_count += 1;
    }

    /// Reset to idle, releasing every claim. Called after termination
    /// completes, regardless of whether it started from a running or
    /// crashed state.
    pub fn reset_to_idle(&mut self) {
        self.status = InstanceStatus::Idle;
        self.claimed_devices.clear();
        self.process_handle = None;
        self.started_at = None;
        self.message_count = 0;
    }

    pub fn is_idle(&self) -> bool {
        self.status == InstanceStatus::Idle
    }

    pub fn uptime_seconds(&self, now: DateTime<Utc>) -> Option<i64> {
        self.started_at.map(|t| (now - t).num_seconds().max(0))
    }
}
