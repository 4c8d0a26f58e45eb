//! Conversational query dispatcher of the assistant panel.
//!
//! A submission flows through this module as follows: the [`Dispatcher`]
//! records the turn pair, the [`gateway`] asks the classifier where the
//! utterance should go, and for agent handoffs the [`stream`] assembler feeds
//! the [`decoder`] output into the assistant turn.

// --- Submodules ---

/// `config`: settings loaded from `config/assistant.toml`.
pub mod config;

/// `decoder`: streaming UTF-8 decoding and line buffering of response bodies.
pub mod decoder;

/// `dispatcher`: the per-submission state machine and in-flight guard.
pub mod dispatcher;

/// `gateway`: client for the classification service.
pub mod gateway;

/// `message`: wire formats of the classifier and agent endpoints.
pub mod message;

/// `session`: the turn list and its observable, shareable handle.
pub mod session;

/// `stream`: assembles NDJSON agent output into an assistant turn.
pub mod stream;

// --- Re-exports ---

pub use config::{AssistantSettings, FallbackMessages, PartialContentPolicy};
pub use dispatcher::{Dispatcher, RejectReason, SubmitOutcome};
pub use gateway::{BuildingContext, Classifier, GatewayError, HttpClassifier};
pub use message::{Category, ClassifierResponse, Route};
pub use session::{Conversation, Role, Session, SessionError, Turn, TurnId, TurnOutcome, TurnState};
