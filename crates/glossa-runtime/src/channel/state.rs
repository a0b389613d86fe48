//! Channel lifecycle state.
//!
//! ```text
//! ┌─────────┐   start    ┌──────────────┐   init ok   ┌─────────────┐
//! │ Default │ ─────────► │ Initializing │ ──────────► │ Initialized │
//! └─────────┘            └──────────────┘             └──────┬──────┘
//!                                                     reload │  ▲
//!                                                            ▼  │ response
//!                                                      ┌───────────┐
//!                                                      │ Reloading │
//!                                                      └───────────┘
//!       any state ──dispose/startup failure──► Disposed (terminal)
//! ```

use parking_lot::Mutex;

/// Lifecycle state of a worker channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Constructed; no worker process yet.
    Default,
    /// Worker launched; handshake in progress.
    Initializing,
    /// Handshake complete; invocations flow.
    Initialized,
    /// Environment reload in progress.
    Reloading,
    /// Terminal: torn down or startup failed.
    Disposed,
}

impl ChannelState {
    /// Returns the display name of this state.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Default => "Default",
            Self::Initializing => "Initializing",
            Self::Initialized => "Initialized",
            Self::Reloading => "Reloading",
            Self::Disposed => "Disposed",
        }
    }
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Guarded state holder.
#[derive(Debug)]
pub(crate) struct StateCell(Mutex<ChannelState>);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(Mutex::new(ChannelState::Default))
    }

    /// Returns the current state.
    pub(crate) fn get(&self) -> ChannelState {
        *self.0.lock()
    }

    /// Transitions `from → to` atomically.
    ///
    /// Returns `false` without modifying the state when the channel is
    /// not in `from`. [`ChannelState::Disposed`] is terminal; no
    /// transition leaves it.
    #[must_use]
    pub(crate) fn transition(&self, from: ChannelState, to: ChannelState) -> bool {
        let mut state = self.0.lock();
        if *state == from && *state != ChannelState::Disposed {
            *state = to;
            true
        } else {
            false
        }
    }

    /// Forces the terminal state from anywhere.
    pub(crate) fn dispose(&self) {
        *self.0.lock() = ChannelState::Disposed;
    }
}
