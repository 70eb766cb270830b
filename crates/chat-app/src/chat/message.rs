pub use murmur_llm::TurnId;

/// Stable identifier for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub u64);

impl MessageId {
    /// Creates a typed message identifier.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Chat speaker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Assistant,
}

/// Lifecycle status for one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageStatus {
    /// Placeholder still receiving tokens for the given turn.
    Streaming(TurnId),
    Complete,
    Errored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub status: MessageStatus,
}

impl Message {
    /// Creates a message with explicit status.
    pub fn new(
        id: MessageId,
        role: Role,
        content: impl Into<String>,
        status: MessageStatus,
    ) -> Self {
        Self {
            id,
            role,
            content: content.into(),
            status,
        }
    }

    /// User messages are settled from the start and never change.
    pub fn user(id: MessageId, content: impl Into<String>) -> Self {
        Self::new(id, Role::User, content, MessageStatus::Complete)
    }

    /// Creates an empty assistant placeholder for a streaming turn.
    pub fn assistant_streaming(id: MessageId, turn: TurnId) -> Self {
        Self::new(id, Role::Assistant, String::new(), MessageStatus::Streaming(turn))
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.status, MessageStatus::Streaming(_))
    }

    fn is_streaming_for(&self, turn: TurnId) -> bool {
        self.status == MessageStatus::Streaming(turn)
    }
}

/// Insertion-ordered message log.
///
/// Append-only, except that a cancelled turn's placeholder is removed outright.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|message| message.id == id)
    }

    pub fn streaming_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|message| message.is_streaming())
            .count()
    }

    /// Messages that may be replayed upstream: everything not still streaming.
    pub fn settled(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|message| !message.is_streaming())
    }

    pub(crate) fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Appends to the placeholder of `turn`. Settled messages are never touched.
    pub(crate) fn append_token(&mut self, id: MessageId, turn: TurnId, token: &str) -> bool {
        match self.streaming_mut(id, turn) {
            Some(message) => {
                message.content.push_str(token);
                true
            }
            None => false,
        }
    }

    pub(crate) fn complete(&mut self, id: MessageId, turn: TurnId) -> bool {
        match self.streaming_mut(id, turn) {
            Some(message) => {
                message.status = MessageStatus::Complete;
                true
            }
            None => false,
        }
    }

    /// Marks the placeholder errored and replaces whatever partial content it held.
    pub(crate) fn fail(&mut self, id: MessageId, turn: TurnId, content: String) -> bool {
        match self.streaming_mut(id, turn) {
            Some(message) => {
                message.status = MessageStatus::Errored;
                message.content = content;
                true
            }
            None => false,
        }
    }

    pub(crate) fn remove_streaming(&mut self, id: MessageId, turn: TurnId) -> Option<Message> {
        let index = self
            .messages
            .iter()
            .position(|message| message.id == id && message.is_streaming_for(turn))?;
        Some(self.messages.remove(index))
    }

    fn streaming_mut(&mut self, id: MessageId, turn: TurnId) -> Option<&mut Message> {
        self.messages
            .iter_mut()
            .find(|message| message.id == id && message.is_streaming_for(turn))
    }
}

/// Request lifecycle for the session. Terminal states behave like `Idle`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TurnState {
    #[default]
    Idle,
    Sending(TurnId),
    Streaming(TurnId),
    Complete(TurnId),
    Errored {
        turn: TurnId,
        message: String,
    },
    Cancelled(TurnId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnTransition {
    Start(TurnId),
    Open(TurnId),
    Complete(TurnId),
    Fail { turn: TurnId, message: String },
    Cancel(TurnId),
}

/// Rejection reason for illegal turn transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnTransitionRejection {
    AlreadyInFlight { active: TurnId, attempted: TurnId },
    NoActiveTurn,
    TurnMismatch { active: TurnId, attempted: TurnId },
}

pub type TurnTransitionResult = Result<TurnState, TurnTransitionRejection>;

impl TurnState {
    /// Returns the in-flight turn while `Sending` or `Streaming`.
    pub fn active_turn(&self) -> Option<TurnId> {
        match self {
            Self::Sending(turn) | Self::Streaming(turn) => Some(*turn),
            Self::Idle | Self::Complete(_) | Self::Errored { .. } | Self::Cancelled(_) => None,
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.active_turn().is_some()
    }

    /// Returns true when incoming stream data belongs to the in-flight turn.
    pub fn accepts_event(&self, turn: TurnId) -> bool {
        self.active_turn() == Some(turn)
    }

    /// Applies one transition deterministically.
    ///
    /// Settled states may start a new turn. `Open` and the terminal transitions must name
    /// the in-flight turn exactly.
    pub fn apply(&self, transition: TurnTransition) -> TurnTransitionResult {
        match transition {
            TurnTransition::Start(turn) => self.apply_start(turn),
            TurnTransition::Open(turn) => self.apply_open(turn),
            TurnTransition::Complete(turn) => self.settle(turn, Self::Complete(turn)),
            TurnTransition::Fail { turn, message } => {
                self.settle(turn, Self::Errored { turn, message })
            }
            TurnTransition::Cancel(turn) => self.settle(turn, Self::Cancelled(turn)),
        }
    }

    fn apply_start(&self, turn: TurnId) -> TurnTransitionResult {
        match self.active_turn() {
            Some(active) => Err(TurnTransitionRejection::AlreadyInFlight {
                active,
                attempted: turn,
            }),
            None => Ok(Self::Sending(turn)),
        }
    }

    fn apply_open(&self, turn: TurnId) -> TurnTransitionResult {
        self.ensure_active(turn)?;
        Ok(Self::Streaming(turn))
    }

    fn settle(&self, turn: TurnId, next: TurnState) -> TurnTransitionResult {
        self.ensure_active(turn)?;
        Ok(next)
    }

    fn ensure_active(&self, turn: TurnId) -> Result<(), TurnTransitionRejection> {
        match self.active_turn() {
            Some(active) if active == turn => Ok(()),
            Some(active) => Err(TurnTransitionRejection::TurnMismatch {
                active,
                attempted: turn,
            }),
            None => Err(TurnTransitionRejection::NoActiveTurn),
        }
    }
}
