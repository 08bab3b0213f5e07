//! Control channel states

use std::fmt;

/// Lifecycle of a control connection.
///
/// `NotConnected -> Connected -> Authenticated -> Closed`; any state may move
/// to `Closed`, which is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    NotConnected,
    Connected,
    Authenticated,
    Closed,
}

impl ChannelState {
    /// Whether commands may be sent in this state.
    pub fn is_open(&self) -> bool {
        matches!(self, ChannelState::Connected | ChannelState::Authenticated)
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelState::NotConnected => "not connected",
            ChannelState::Connected => "connected",
            ChannelState::Authenticated => "authenticated",
            ChannelState::Closed => "closed",
        };
        f.write_str(name)
    }
}
