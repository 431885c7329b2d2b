// Session record for the shared output
//
// Owned exclusively by the sharing service. A session is active exactly when
// `aggregate_handle` is set, and it then has at least two members.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

use super::devices::types::{DeviceHandle, OutputDevice};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Active,
    /// Torn down by a missing member, waiting for all of them to return
    Interrupted,
}

#[derive(Debug, Clone, Default)]
pub struct AggregateSession {
    /// Index 0 is the clock master
    pub member_uids: Vec<String>,
    /// Kept after a member disappears so notifications can name it
    pub member_names: HashMap<String, String>,
    pub aggregate_handle: Option<DeviceHandle>,
    /// Default output UID captured before redirecting; never overwritten while active
    pub pre_session_default_output: Option<String>,
    pub pre_session_default_system_output: Option<String>,
    pub is_active: bool,
    pub is_interrupted: bool,
    pub was_started_manually: bool,
    pub paused_member_uids: Vec<String>,
    pub paused_member_names: HashMap<String, String>,
    pub session_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
}

impl AggregateSession {
    pub fn state(&self) -> SessionState {
        if self.is_active {
            SessionState::Active
        } else if self.is_interrupted && self.has_paused() {
            SessionState::Interrupted
        } else {
            SessionState::Idle
        }
    }

    pub fn has_paused(&self) -> bool {
        !self.paused_member_uids.is_empty()
    }

    /// Record members and mark the session live
    pub fn activate(
        &mut self,
        members: &[OutputDevice],
        aggregate_handle: DeviceHandle,
        is_manual: bool,
    ) {
        self.member_uids = members.iter().map(|d| d.uid.clone()).collect();
        self.member_names = members
            .iter()
            .map(|d| (d.uid.clone(), d.name.clone()))
            .collect();
        self.aggregate_handle = Some(aggregate_handle);
        self.is_active = true;
        self.is_interrupted = false;
        self.was_started_manually = is_manual;
        self.session_id = Some(Uuid::new_v4());
        self.started_at = Some(Utc::now());
    }

    /// Move the current members into the paused set
    pub fn pause_members(&mut self) {
        self.paused_member_uids = self.member_uids.clone();
        self.paused_member_names = self.member_names.clone();
    }

    pub fn clear_paused(&mut self) {
        self.paused_member_uids.clear();
        self.paused_member_names.clear();
    }

    /// Drop everything tied to the live aggregate. The paused set and the
    /// interrupted flag survive so a pending resume is not lost.
    pub fn reset_active(&mut self) {
        self.member_uids.clear();
        self.member_names.clear();
        self.aggregate_handle = None;
        self.pre_session_default_output = None;
        self.pre_session_default_system_output = None;
        self.is_active = false;
        self.was_started_manually = false;
        self.session_id = None;
        self.started_at = None;
    }

    pub fn member_name(&self, uid: &str) -> Option<&str> {
        self.member_names
            .get(uid)
            .or_else(|| self.paused_member_names.get(uid))
            .map(String::as_str)
    }

    pub fn display_names(&self) -> Vec<String> {
        self.member_uids
            .iter()
            .map(|uid| self.member_name(uid).unwrap_or(uid).to_string())
            .collect()
    }
}
