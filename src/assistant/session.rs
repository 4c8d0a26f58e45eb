use std::collections::HashMap;
use std::fmt;

use tokio::sync::watch;
use uuid::Uuid;

/// Opaque identifier of a single turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TurnId(Uuid);

impl TurnId {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Who authored a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

/// How a settled turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The turn holds a real answer (possibly the "no answer" fallback).
    Answered,
    /// A transport, protocol or content failure replaced the answer.
    Failed,
    /// The submission was cancelled before it finished.
    Cancelled,
}

/// Lifecycle of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Streaming,
    Settled(TurnOutcome),
}

/// One message in the conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    id: TurnId,
    role: Role,
    content: String,
    state: TurnState,
}

impl Turn {
    fn user(content: String) -> Self {
        Self {
            id: TurnId::generate(),
            role: Role::User,
            content,
            state: TurnState::Settled(TurnOutcome::Answered),
        }
    }

    fn assistant_placeholder() -> Self {
        Self {
            id: TurnId::generate(),
            role: Role::Assistant,
            content: String::new(),
            state: TurnState::Streaming,
        }
    }

    pub fn id(&self) -> TurnId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// True from creation until the reply is finalized.
    pub fn is_streaming(&self) -> bool {
        self.state == TurnState::Streaming
    }

    /// The outcome of a settled turn, `None` while still streaming.
    pub fn outcome(&self) -> Option<TurnOutcome> {
        match self.state {
            TurnState::Streaming => None,
            TurnState::Settled(outcome) => Some(outcome),
        }
    }
}

/// Misuse of the turn list API.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("unknown turn {0}")]
    UnknownTurn(TurnId),
    #[error("turn {0} is already settled")]
    AlreadySettled(TurnId),
    #[error("turn {0} is not an assistant turn")]
    NotAssistant(TurnId),
}

/// The conversation held by one assistant panel.
///
/// Turns are only ever appended, and are addressed by id rather than by
/// position. Assistant content can only grow while the turn is streaming;
/// [`Session::settle`] is the one place it may be replaced.
pub struct Session {
    session_id: String,
    turns: Vec<Turn>,
    index: HashMap<TurnId, usize>,
}

impl Session {
    /// Starts an empty conversation with a fresh random session id.
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            turns: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn turn(&self, id: TurnId) -> Option<&Turn> {
        self.index.get(&id).map(|&position| &self.turns[position])
    }

    /// Appends a settled user turn.
    pub fn push_user(&mut self, content: impl Into<String>) -> TurnId {
        self.push(Turn::user(content.into()))
    }

    /// Appends an empty assistant turn that is still streaming.
    pub fn push_assistant_placeholder(&mut self) -> TurnId {
        self.push(Turn::assistant_placeholder())
    }

    /// Appends `delta` to a streaming assistant turn.
    pub fn append_content(&mut self, id: TurnId, delta: &str) -> Result<(), SessionError> {
        let turn = self.streaming_turn_mut(id)?;
        turn.content.push_str(delta);
        Ok(())
    }

    /// Finalizes a streaming assistant turn.
    ///
    /// `Some(content)` replaces whatever was streamed so far; `None` keeps it.
    pub fn settle(
        &mut self,
        id: TurnId,
        content: Option<String>,
        outcome: TurnOutcome,
    ) -> Result<(), SessionError> {
        let turn = self.streaming_turn_mut(id)?;
        if let Some(content) = content {
            turn.content = content;
        }
        turn.state = TurnState::Settled(outcome);
        Ok(())
    }

    fn push(&mut self, turn: Turn) -> TurnId {
        let id = turn.id;
        self.index.insert(id, self.turns.len());
        self.turns.push(turn);
        id
    }

    fn streaming_turn_mut(&mut self, id: TurnId) -> Result<&mut Turn, SessionError> {
        let position = *self.index.get(&id).ok_or(SessionError::UnknownTurn(id))?;
        let turn = &mut self.turns[position];
        if turn.role != Role::Assistant {
            return Err(SessionError::NotAssistant(id));
        }
        if !turn.is_streaming() {
            return Err(SessionError::AlreadySettled(id));
        }
        Ok(turn)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared, observable handle on a [`Session`].
///
/// The session lives inside a `watch` channel and is changed in place, so a
/// streamed delta costs one append rather than a copy of the conversation.
/// Receivers borrow a consistent session and never see half of an update.
/// Writers wait while a borrow is held: keep borrows short and never hold one
/// across an `.await`.
pub struct Conversation {
    session: watch::Sender<Session>,
}

impl Conversation {
    pub fn new() -> Self {
        let (session, _) = watch::channel(Session::new());
        Self { session }
    }

    pub fn session_id(&self) -> String {
        self.session.borrow().session_id().to_string()
    }

    /// Copy of the current turn list.
    pub fn snapshot(&self) -> Vec<Turn> {
        self.session.borrow().turns().to_vec()
    }

    /// Receiver that is notified after every change to the turn list.
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.session.subscribe()
    }

    pub fn turn(&self, id: TurnId) -> Option<Turn> {
        self.session.borrow().turn(id).cloned()
    }

    /// Appends the user turn and the assistant placeholder of one submission.
    ///
    /// Both land in the same update.
    pub fn begin_exchange(&self, prompt: impl Into<String>) -> (TurnId, TurnId) {
        let user = Turn::user(prompt.into());
        let assistant = Turn::assistant_placeholder();
        let ids = (user.id, assistant.id);
        self.session.send_modify(|session| {
            session.push(user);
            session.push(assistant);
        });
        ids
    }

    pub fn append_content(&self, id: TurnId, delta: &str) -> Result<(), SessionError> {
        self.mutate(|session| session.append_content(id, delta))
    }

    pub fn settle(
        &self,
        id: TurnId,
        content: Option<String>,
        outcome: TurnOutcome,
    ) -> Result<(), SessionError> {
        self.mutate(|session| session.settle(id, content, outcome))
    }

    /// Applies `change` and notifies receivers only if it succeeded.
    fn mutate(
        &self,
        change: impl FnOnce(&mut Session) -> Result<(), SessionError>,
    ) -> Result<(), SessionError> {
        let mut result = Ok(());
        self.session.send_if_modified(|session| {
            result = change(session);
            result.is_ok()
        });
        result
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}
