//! Edit debouncing
//!
//! Rapid edit notifications are coalesced into a single segmentation +
//! scheduling pass once the document goes quiet. Each `notify_edit` resets
//! the deadline; N calls within the window produce exactly one pass. The
//! quiescence window adapts to document size (see
//! [`DebounceConfig::window_for`](crate::config::DebounceConfig::window_for)).
//!
//! The debouncer owns a dedicated timer thread so the interactive thread
//! only ever takes a short lock. `cancel` clears pending work without
//! firing a final pass, which is what document close needs.

use crate::config::DebounceConfig;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::trace;

struct PendingEdit {
    text: String,
    deadline: Instant,
}

struct DebounceState {
    pending: Option<PendingEdit>,
    closed: bool,
}

struct DebounceShared {
    state: Mutex<DebounceState>,
    wakeup: Condvar,
    config: DebounceConfig,
}

/// Coalesces edit bursts into single quiescence callbacks
pub struct Debouncer {
    shared: Arc<DebounceShared>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    /// Start the timer thread; `on_quiescent` receives the latest full text
    /// once no edit has arrived for the adaptive window
    pub fn new<F>(config: DebounceConfig, on_quiescent: F) -> Self
    where
        F: Fn(String) + Send + 'static,
    {
        let shared = Arc::new(DebounceShared {
            state: Mutex::new(DebounceState {
                pending: None,
                closed: false,
            }),
            wakeup: Condvar::new(),
            config,
        });

        let timer = {
            let shared = shared.clone();
            thread::Builder::new()
                .name("velin-debounce".to_string())
                .spawn(move || timer_loop(&shared, on_quiescent))
                .expect("failed to spawn debounce timer")
        };

        Debouncer {
            shared,
            timer: Mutex::new(Some(timer)),
        }
    }

    /// Record an edit, resetting the quiescence deadline
    pub fn notify_edit(&self, full_text: String) {
        let window = self.shared.config.window_for(full_text.len());
        let mut state = self.shared.state.lock();
        if state.closed {
            return;
        }
        state.pending = Some(PendingEdit {
            text: full_text,
            deadline: Instant::now() + window,
        });
        drop(state);
        self.shared.wakeup.notify_one();
    }

    /// Drop any pending edit without firing
    pub fn cancel(&self) {
        let mut state = self.shared.state.lock();
        state.pending = None;
        drop(state);
        self.shared.wakeup.notify_one();
    }

    /// Whether an edit is waiting for quiescence
    pub fn has_pending(&self) -> bool {
        self.shared.state.lock().pending.is_some()
    }

    /// Stop the timer thread; a pending edit is discarded, not fired
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            state.closed = true;
            state.pending = None;
        }
        self.shared.wakeup.notify_all();
        if let Some(handle) = self.timer.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Debouncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debouncer")
            .field("pending", &self.has_pending())
            .finish()
    }
}

fn timer_loop<F>(shared: &DebounceShared, on_quiescent: F)
where
    F: Fn(String),
{
    loop {
        let text = {
            let mut state = shared.state.lock();
            loop {
                if state.closed {
                    return;
                }
                match state.pending.as_ref() {
                    None => {
                        shared.wakeup.wait(&mut state);
                    }
                    Some(pending) => {
                        let now = Instant::now();
                        if now < pending.deadline {
                            let remaining = pending.deadline - now;
                            let _ = shared.wakeup.wait_for(&mut state, remaining);
                            continue;
                        }
                        match state.pending.take() {
                            Some(edit) => break edit.text,
                            None => continue,
                        }
                    }
                }
            }
        };

        trace!(bytes = text.len(), "debounce window elapsed, firing pass");
        on_quiescent(text);
    }
}
