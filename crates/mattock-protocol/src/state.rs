/// The phase of a client connection. Transitions are strictly forward
/// except for the Play <-> AwaitingTeleportConfirm pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Handshaking,
    Status,
    Login,
    Configuration,
    Play,
    /// Play, but a synchronize-player-position is outstanding. Movement
    /// packets are dropped until the client confirms the teleport id.
    AwaitingTeleportConfirm,
}

impl ConnectionState {
    pub fn from_handshake_next(next: i32) -> Option<Self> {
        match next {
            1 => Some(ConnectionState::Status),
            2 => Some(ConnectionState::Login),
            _ => None,
        }
    }

    /// Whether the connection is in the play phase proper or awaiting a
    /// teleport confirm (both read play-phase packets).
    pub fn in_play(self) -> bool {
        matches!(
            self,
            ConnectionState::Play | ConnectionState::AwaitingTeleportConfirm
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_next_state() {
        assert_eq!(
            ConnectionState::from_handshake_next(1),
            Some(ConnectionState::Status)
        );
        assert_eq!(
            ConnectionState::from_handshake_next(2),
            Some(ConnectionState::Login)
        );
        assert_eq!(ConnectionState::from_handshake_next(3), None);
    }
}
