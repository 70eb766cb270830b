/// Event contracts between the session and its callers.
pub mod events;
/// Domain entities and the deterministic turn state machine.
pub mod message;
pub mod session;

pub use events::{SendRejection, SessionUpdate, StreamOutcome, TurnStarted};
pub use message::{
    Message, MessageId, MessageStatus, Role, Transcript, TurnId, TurnState, TurnTransition,
    TurnTransitionRejection, TurnTransitionResult,
};
pub use session::{ChatPreferences, ChatSession, user_facing_error};
