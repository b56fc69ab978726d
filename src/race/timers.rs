//! Per-session timer bookkeeping
//!
//! Every session owns the handles of its scheduled tasks: the countdown
//! start delay, the countdown tick loop, and the post-race cleanup. When a
//! session is destroyed, whatever it had pending is aborted so no timer can
//! outlive the session it belongs to.

use crate::types::RoomId;
use std::collections::HashMap;
use tokio::task::JoinHandle;

/// Timer handles belonging to one session
#[derive(Debug, Default)]
pub struct SessionTimers {
    start: Option<JoinHandle<()>>,
    countdown: Option<JoinHandle<()>>,
    cleanup: Option<JoinHandle<()>>,
}

impl SessionTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the countdown start delay task, aborting any previous one
    pub fn set_start(&mut self, handle: JoinHandle<()>) {
        if let Some(old) = self.start.replace(handle) {
            old.abort();
        }
    }

    /// Replace the countdown tick loop task, aborting any previous one
    pub fn set_countdown(&mut self, handle: JoinHandle<()>) {
        if let Some(old) = self.countdown.replace(handle) {
            old.abort();
        }
    }

    /// Replace the retention cleanup task, aborting any previous one
    pub fn set_cleanup(&mut self, handle: JoinHandle<()>) {
        if let Some(old) = self.cleanup.replace(handle) {
            old.abort();
        }
    }

    /// Abort every pending task for this session
    pub fn abort_all(&mut self) {
        for handle in [
            self.start.take(),
            self.countdown.take(),
            self.cleanup.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.abort();
        }
    }
}

impl Drop for SessionTimers {
    fn drop(&mut self) {
        self.abort_all();
    }
}

/// Timer handles for all live sessions, keyed by room
#[derive(Debug, Default)]
pub struct TimerTable {
    sessions: HashMap<RoomId, SessionTimers>,
}

impl TimerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_start(&mut self, room_id: RoomId, handle: JoinHandle<()>) {
        self.sessions.entry(room_id).or_default().set_start(handle);
    }

    pub fn set_countdown(&mut self, room_id: RoomId, handle: JoinHandle<()>) {
        self.sessions
            .entry(room_id)
            .or_default()
            .set_countdown(handle);
    }

    pub fn set_cleanup(&mut self, room_id: RoomId, handle: JoinHandle<()>) {
        self.sessions
            .entry(room_id)
            .or_default()
            .set_cleanup(handle);
    }

    /// Abort and forget all timers for a room; `false` when none existed
    pub fn cancel_room(&mut self, room_id: &RoomId) -> bool {
        match self.sessions.remove(room_id) {
            Some(mut timers) => {
                timers.abort_all();
                true
            }
            None => false,
        }
    }

    /// Abort everything (service shutdown)
    pub fn cancel_all(&mut self) {
        for (_, mut timers) in self.sessions.drain() {
            timers.abort_all();
        }
    }

    pub fn tracked_rooms(&self) -> usize {
        self.sessions.len()
    }
}
