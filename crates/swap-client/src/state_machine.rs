//! The client-side session state machine: `idle` → `connecting` →
//! `connected` → `closing` → `idle`, plus the per-state gate on which
//! message kinds may be sent outbound.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    Connecting,
    Connected,
    Closing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEvent {
    Connect,
    /// An inbound `connect` from a peer, as opposed to the local `Connect`
    /// event raised by an outbound `connect` send.
    AcceptIncoming,
    Accept,
    Reject,
    Update,
    Close,
    Closed,
}

impl ClientState {
    pub fn label(self) -> &'static str {
        match self {
            ClientState::Idle => "idle",
            ClientState::Connecting => "connecting",
            ClientState::Connected => "connected",
            ClientState::Closing => "closing",
        }
    }

    /// Applies `event`, returning the resulting state, or `None` if the
    /// event is not valid from the current state.
    ///
    /// `AcceptIncoming` is special-cased ahead of the table: an inbound
    /// `connect` drives the machine to `connecting` regardless of the
    /// current state, not only from `idle`.
    pub fn transition(self, event: ClientEvent) -> Option<ClientState> {
        if event == ClientEvent::AcceptIncoming {
            return Some(ClientState::Connecting);
        }

        match (self, event) {
            (ClientState::Idle, ClientEvent::Connect) => Some(ClientState::Connecting),
            (ClientState::Connecting, ClientEvent::Accept) => Some(ClientState::Connected),
            (ClientState::Connecting, ClientEvent::Reject) => Some(ClientState::Idle),
            (ClientState::Connected, ClientEvent::Update) => Some(ClientState::Connected),
            (ClientState::Connected, ClientEvent::Close) => Some(ClientState::Closing),
            (ClientState::Closing, ClientEvent::Closed) => Some(ClientState::Idle),
            _ => None,
        }
    }

    /// Whether an outbound send of `kind` is permitted in this state.
    /// A disallowed send fails locally, without touching the transport.
    pub fn may_send(self, kind: &str) -> bool {
        match self {
            ClientState::Idle => matches!(kind, "register" | "connect"),
            ClientState::Connecting => {
                matches!(kind, "accept" | "reject" | "update" | "close" | "application" | "response")
            }
            ClientState::Connected => matches!(kind, "update" | "close" | "application" | "response"),
            ClientState::Closing => kind == "response",
        }
    }
}
