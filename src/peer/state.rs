use std::fmt;

/// Lifecycle of one remote peer, from first-seen offer to teardown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    New,
    RemoteOfferSet,
    LocalAnswerCreated,
    LocalDescriptionSet,
    AnswerPosted,
    Active,
    Closed,
}

impl ConnectionState {
    /// Negotiation only moves forward one step at a time; any state may close.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (New, RemoteOfferSet)
            | (RemoteOfferSet, LocalAnswerCreated)
            | (LocalAnswerCreated, LocalDescriptionSet)
            | (LocalDescriptionSet, AnswerPosted)
            | (AnswerPosted, Active) => true,
            _ => false,
        }
    }

    pub fn is_active(self) -> bool {
        self == ConnectionState::Active
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::New => "new",
            ConnectionState::RemoteOfferSet => "remote-offer-set",
            ConnectionState::LocalAnswerCreated => "local-answer-created",
            ConnectionState::LocalDescriptionSet => "local-description-set",
            ConnectionState::AnswerPosted => "answer-posted",
            ConnectionState::Active => "active",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}
