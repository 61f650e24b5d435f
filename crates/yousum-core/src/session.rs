//! In-memory slot for the decrypted API key.
//!
//! Every clear trigger (idle watchdog, lock, exit) goes through
//! [`SessionKey::clear`]. A decrypt that completes after a clear cannot put
//! the key back: installs are tied to the generation observed when the
//! unlock started.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info};
use zeroize::Zeroizing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearReason {
    /// No activity within the idle window.
    IdleTimeout,
    /// The session was hidden or locked by the user.
    Hidden,
    /// The session is ending.
    Unload,
    /// The stored key was reset.
    Reset,
}

impl ClearReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IdleTimeout => "idle_timeout",
            Self::Hidden => "hidden",
            Self::Unload => "unload",
            Self::Reset => "reset",
        }
    }
}

impl std::fmt::Display for ClearReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Proof that an unlock started at a given generation.
#[derive(Debug, Clone, Copy)]
pub struct UnlockTicket {
    generation: u64,
}

struct Slot {
    key: Option<Zeroizing<String>>,
    generation: u64,
    last_activity: Instant,
}

#[derive(Clone)]
pub struct SessionKey {
    inner: Arc<Mutex<Slot>>,
}

impl Default for SessionKey {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionKey {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Slot {
                key: None,
                generation: 0,
                last_activity: Instant::now(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Call before starting a decrypt; pass the ticket to [`install`](Self::install).
    pub fn begin_unlock(&self) -> UnlockTicket {
        UnlockTicket {
            generation: self.lock().generation,
        }
    }

    /// Store `key` unless the slot was cleared after `ticket` was issued.
    /// Returns whether the key was installed.
    pub fn install(&self, ticket: UnlockTicket, key: Zeroizing<String>) -> bool {
        let mut slot = self.lock();
        if slot.generation != ticket.generation {
            debug!("discarding key from an unlock that raced a clear");
            return false;
        }
        slot.key = Some(key);
        slot.last_activity = Instant::now();
        true
    }

    /// A copy of the key, if unlocked. Counts as activity.
    pub fn get(&self) -> Option<Zeroizing<String>> {
        let mut slot = self.lock();
        let key = slot.key.clone()?;
        slot.last_activity = Instant::now();
        Some(key)
    }

    pub fn touch(&self) {
        self.lock().last_activity = Instant::now();
    }

    pub fn is_unlocked(&self) -> bool {
        self.lock().key.is_some()
    }

    /// Drop the key and invalidate outstanding unlock tickets.
    pub fn clear(&self, reason: ClearReason) {
        clear_locked(&mut self.lock(), reason);
    }

    fn clear_if_idle(&self, idle_timeout: Duration) -> bool {
        let mut slot = self.lock();
        if slot.key.is_none() || slot.last_activity.elapsed() < idle_timeout {
            return false;
        }
        clear_locked(&mut slot, ClearReason::IdleTimeout);
        true
    }

    /// Spawn a background task that clears the slot once it has been idle
    /// for `idle_timeout`.
    pub fn spawn_idle_watchdog(&self, idle_timeout: Duration) -> JoinHandle<()> {
        let slot = self.clone();
        let check_every =
            (idle_timeout / 4).clamp(Duration::from_millis(250), Duration::from_secs(5));
        tokio::spawn(async move {
            let mut ticker = time::interval(check_every);
            ticker.tick().await; // skip first immediate tick
            loop {
                ticker.tick().await;
                slot.clear_if_idle(idle_timeout);
            }
        })
    }
}

/// The one place the key is dropped. Callers hold the slot lock.
fn clear_locked(slot: &mut Slot, reason: ClearReason) {
    slot.generation += 1;
    if slot.key.take().is_some() {
        info!(%reason, "cleared API key from memory");
    }
}
