use std::sync::Arc;

use murmur_llm::{
    ChatRequest, ChatTransport, HistoryEntry, HistoryRole, Language, StreamEventMapped,
    StreamEventPayload, StreamOutcome, TurnEventStream, TurnStreamHandle, start_turn,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::chat::events::{SendRejection, SessionUpdate, TurnStarted};
use crate::chat::message::{
    Message, MessageId, Role, Transcript, TurnId, TurnState, TurnTransition,
};
use crate::connection::ConnectionHandle;

/// Per-session request options, read at each send.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChatPreferences {
    pub use_docs: bool,
    pub language: Language,
}

/// Session-level metadata for the turn in flight.
struct ActiveTurn {
    turn: TurnId,
    assistant_message_id: MessageId,
    stream: TurnEventStream,
    _worker: JoinHandle<()>,
}

/// Owner of the transcript and the request lifecycle.
///
/// At most one turn is in flight. `send` and `cancel` are the only mutating entry points;
/// stream events are queued by the worker and applied by `next_update`, so every
/// transcript change happens on the task that owns the session.
pub struct ChatSession {
    transport: Arc<dyn ChatTransport>,
    connection: ConnectionHandle,
    preferences: ChatPreferences,
    transcript: Transcript,
    turn_state: TurnState,
    context_provided: bool,
    active_turn: Option<ActiveTurn>,
    next_message_id: u64,
    next_turn_id: u64,
    transcript_tx: watch::Sender<Transcript>,
}

impl ChatSession {
    pub fn new(transport: Arc<dyn ChatTransport>, connection: ConnectionHandle) -> Self {
        let (transcript_tx, _) = watch::channel(Transcript::new());
        Self {
            transport,
            connection,
            preferences: ChatPreferences::default(),
            transcript: Transcript::new(),
            turn_state: TurnState::Idle,
            context_provided: false,
            active_turn: None,
            next_message_id: 1,
            next_turn_id: 1,
            transcript_tx,
        }
    }

    pub fn with_preferences(mut self, preferences: ChatPreferences) -> Self {
        self.preferences = preferences;
        self
    }

    pub fn preferences(&self) -> ChatPreferences {
        self.preferences
    }

    pub fn set_use_docs(&mut self, use_docs: bool) {
        self.preferences.use_docs = use_docs;
    }

    pub fn set_language(&mut self, language: Language) {
        self.preferences.language = language;
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Receives a snapshot after every transcript mutation.
    pub fn subscribe(&self) -> watch::Receiver<Transcript> {
        self.transcript_tx.subscribe()
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    pub fn turn_state(&self) -> &TurnState {
        &self.turn_state
    }

    pub fn is_in_flight(&self) -> bool {
        self.active_turn.is_some()
    }

    /// Flag the backend reported last; sent with the next request.
    pub fn context_provided(&self) -> bool {
        self.context_provided
    }

    /// Starts a turn and returns without waiting for the reply.
    ///
    /// Rejected without side effects when `text` is blank or a turn is already in flight.
    /// Must be called inside a Tokio runtime: the stream worker is spawned here.
    pub fn send(&mut self, text: &str) -> Result<TurnStarted, SendRejection> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SendRejection::EmptyMessage);
        }

        if let Some(active) = self.active_turn.as_ref() {
            return Err(SendRejection::TurnInFlight {
                active: active.turn,
            });
        }

        let turn = self.alloc_turn_id();
        match self.turn_state.apply(TurnTransition::Start(turn)) {
            Ok(next_state) => self.turn_state = next_state,
            Err(rejection) => {
                tracing::warn!(turn = %turn, ?rejection, "turn state refused a new turn");
                return Err(SendRejection::TurnInFlight {
                    active: self.turn_state.active_turn().unwrap_or(turn),
                });
            }
        }

        // Snapshot before the new turn lands: only earlier settled messages are replayed.
        let history = self.build_history();

        let user_message_id = self.alloc_message_id();
        let assistant_message_id = self.alloc_message_id();
        self.transcript.push(Message::user(user_message_id, text));
        self.transcript
            .push(Message::assistant_streaming(assistant_message_id, turn));

        let request = ChatRequest::new(text, history)
            .with_use_docs(self.preferences.use_docs)
            .with_language(self.preferences.language)
            .with_context_provided(self.context_provided);

        tracing::info!(
            turn = %turn,
            history_len = request.history.len(),
            use_docs = request.use_docs,
            language = request.language.code(),
            context_provided = request.context_provided,
            "starting turn"
        );

        let TurnStreamHandle { stream, worker } =
            start_turn(Arc::clone(&self.transport), turn, request);

        self.active_turn = Some(ActiveTurn {
            turn,
            assistant_message_id,
            stream,
            _worker: tokio::spawn(worker),
        });
        self.publish();

        Ok(TurnStarted {
            turn,
            user_message_id,
            assistant_message_id,
        })
    }

    /// Requests cancellation of the in-flight turn.
    ///
    /// The placeholder is removed once the worker reports the cancellation. Returns false
    /// when nothing is in flight or cancellation was already requested.
    pub fn cancel(&mut self) -> bool {
        let Some(active) = self.active_turn.as_ref() else {
            return false;
        };

        let requested = active.stream.cancel();
        if requested {
            tracing::info!(turn = %active.turn, "cancellation requested");
        }
        requested
    }

    /// Waits for the next queued stream event and applies it.
    ///
    /// Returns `None` when no turn is in flight. Cancel-safe: dropping the future before it
    /// resolves loses no event.
    pub async fn next_update(&mut self) -> Option<SessionUpdate> {
        let active = self.active_turn.as_mut()?;
        let turn = active.turn;

        let event = match active.stream.recv().await {
            Some(event) => event,
            None => StreamEventMapped {
                turn,
                payload: StreamEventPayload::End(StreamOutcome::Failed(
                    "stream worker stopped before reporting an outcome".to_string(),
                )),
            },
        };

        Some(self.apply_stream_event(event))
    }

    /// Drives queued events until the in-flight turn settles.
    pub async fn settle(&mut self) -> Vec<SessionUpdate> {
        let mut updates = Vec::new();
        while let Some(update) = self.next_update().await {
            updates.push(update);
        }
        updates
    }

    pub(crate) fn apply_stream_event(&mut self, event: StreamEventMapped) -> SessionUpdate {
        if !self.event_is_current(event.turn) {
            tracing::debug!(turn = %event.turn, "ignoring event for a settled turn");
            return SessionUpdate::Ignored;
        }

        match event.payload {
            StreamEventPayload::Opened => self.open_turn(event.turn),
            StreamEventPayload::Token(token) => self.append_token(event.turn, token),
            StreamEventPayload::ContextProvided(flag) => {
                self.context_provided = flag;
                SessionUpdate::ContextProvided(flag)
            }
            StreamEventPayload::Terminate => self.finish_turn(event.turn, StreamOutcome::Completed),
            StreamEventPayload::End(outcome) => self.finish_turn(event.turn, outcome),
        }
    }

    fn open_turn(&mut self, turn: TurnId) -> SessionUpdate {
        match self.turn_state.apply(TurnTransition::Open(turn)) {
            Ok(next_state) => {
                self.turn_state = next_state;
                SessionUpdate::TurnOpened { turn }
            }
            Err(rejection) => {
                tracing::debug!(turn = %turn, ?rejection, "ignoring open for inactive turn");
                SessionUpdate::Ignored
            }
        }
    }

    fn append_token(&mut self, turn: TurnId, token: String) -> SessionUpdate {
        let Some(message_id) = self.active_message_id(turn) else {
            return SessionUpdate::Ignored;
        };

        if !self.transcript.append_token(message_id, turn, &token) {
            return SessionUpdate::Ignored;
        }

        self.publish();
        SessionUpdate::TokenAppended { message_id, token }
    }

    /// Single settlement path for every way a turn can end.
    fn finish_turn(&mut self, turn: TurnId, outcome: StreamOutcome) -> SessionUpdate {
        let Some(active) = self.active_turn.take() else {
            return SessionUpdate::Ignored;
        };
        let message_id = active.assistant_message_id;

        let transition = match &outcome {
            StreamOutcome::Completed => {
                self.transcript.complete(message_id, turn);
                self.connection.mark_connected();
                TurnTransition::Complete(turn)
            }
            StreamOutcome::Cancelled => {
                self.transcript.remove_streaming(message_id, turn);
                TurnTransition::Cancel(turn)
            }
            StreamOutcome::Failed(error) => {
                self.transcript
                    .fail(message_id, turn, user_facing_error(error));
                self.connection.mark_disconnected(error.clone());
                TurnTransition::Fail {
                    turn,
                    message: error.clone(),
                }
            }
        };

        match self.turn_state.apply(transition) {
            Ok(next_state) => self.turn_state = next_state,
            Err(rejection) => {
                tracing::warn!(turn = %turn, ?rejection, "turn settled outside the state machine")
            }
        }

        // Dropping the stream cancels a worker that is still reading after `Terminate`.
        drop(active);
        self.publish();

        tracing::info!(turn = %turn, ?outcome, "turn finished");
        SessionUpdate::TurnFinished {
            turn,
            message_id,
            outcome,
        }
    }

    fn event_is_current(&self, turn: TurnId) -> bool {
        self.active_turn
            .as_ref()
            .is_some_and(|active| active.turn == turn)
            && self.turn_state.accepts_event(turn)
    }

    fn active_message_id(&self, turn: TurnId) -> Option<MessageId> {
        self.active_turn
            .as_ref()
            .filter(|active| active.turn == turn)
            .map(|active| active.assistant_message_id)
    }

    fn build_history(&self) -> Vec<HistoryEntry> {
        self.transcript
            .settled()
            .map(|message| {
                HistoryEntry::new(chat_role_to_wire(message.role), message.content.clone())
            })
            .collect()
    }

    fn publish(&self) {
        self.transcript_tx.send_replace(self.transcript.clone());
    }

    fn alloc_message_id(&mut self) -> MessageId {
        let id = MessageId::new(self.next_message_id);
        self.next_message_id = self.next_message_id.saturating_add(1);
        id
    }

    fn alloc_turn_id(&mut self) -> TurnId {
        let id = TurnId::new(self.next_turn_id);
        self.next_turn_id = self.next_turn_id.saturating_add(1);
        id
    }
}

fn chat_role_to_wire(role: Role) -> HistoryRole {
    match role {
        Role::User => HistoryRole::User,
        Role::Assistant => HistoryRole::Assistant,
    }
}

pub fn user_facing_error(error: &str) -> String {
    format!("Error: Unable to connect to the backend. {error}")
}
