use std::fmt;

pub use murmur_llm::StreamOutcome;

use crate::chat::message::{MessageId, TurnId};

/// Why a `send` call was a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendRejection {
    EmptyMessage,
    TurnInFlight { active: TurnId },
}

impl fmt::Display for SendRejection {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyMessage => write!(formatter, "message is empty"),
            Self::TurnInFlight { active } => {
                write!(formatter, "a reply is still streaming for {active}")
            }
        }
    }
}

/// Identifiers allocated for an accepted turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnStarted {
    pub turn: TurnId,
    pub user_message_id: MessageId,
    pub assistant_message_id: MessageId,
}

/// Effect of applying one queued stream event to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    TurnOpened {
        turn: TurnId,
    },
    TokenAppended {
        message_id: MessageId,
        token: String,
    },
    ContextProvided(bool),
    TurnFinished {
        turn: TurnId,
        message_id: MessageId,
        outcome: StreamOutcome,
    },
    /// Stale or out-of-order event; nothing changed.
    Ignored,
}
