use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use log::{debug, info, warn};
use reqwest::Client;
use tokio_util::sync::CancellationToken;

use super::config::{AssistantSettings, FallbackMessages};
use super::gateway::{BuildingContext, Classifier, HttpClassifier, augment_prompt};
use super::message::{ClassifierRequest, Route};
use super::session::{Conversation, TurnId, TurnOutcome};
use super::stream::{AgentStreamer, AgentTarget, settle};

/// Result of one call to [`Dispatcher::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Nothing was appended to the conversation.
    Rejected(RejectReason),
    /// The submission ran to completion and its assistant turn is settled.
    Settled { turn_id: TurnId, outcome: TurnOutcome },
}

/// Why a submission was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The input was empty after trimming.
    EmptyInput,
    /// Another submission is still in flight.
    Busy,
    /// The panel has been closed.
    Closed,
}

/// Entry point of the assistant panel.
///
/// `Dispatcher` takes user text, asks the classifier where it should go and
/// either shows the classifier's answer or streams one from the agent it
/// points to. It is responsible for:
/// - keeping at most one submission in flight;
/// - appending the user/assistant turn pair before any network call;
/// - making sure every assistant turn ends up settled, whatever fails.
pub struct Dispatcher {
    /// Turn list shared with the renderer.
    conversation: Arc<Conversation>,
    /// Decides between a direct answer and an agent handoff.
    classifier: Box<dyn Classifier>,
    /// Reads agent answers into assistant turns.
    streamer: AgentStreamer,
    /// Texts shown when no real answer is available.
    messages: FallbackMessages,
    /// Set while a submission runs; only `InFlight` clears it.
    in_flight: AtomicBool,
    /// Building selected in the surrounding UI, if any.
    building: Mutex<Option<BuildingContext>>,
    /// Cancelled when the panel closes; parent of every submission token.
    shutdown: CancellationToken,
    /// Token of the submission currently in flight.
    current: Mutex<Option<CancellationToken>>,
}

impl Dispatcher {
    pub fn new(
        classifier: Box<dyn Classifier>,
        streamer: AgentStreamer,
        messages: FallbackMessages,
    ) -> Self {
        Self {
            conversation: Arc::new(Conversation::new()),
            classifier,
            streamer,
            messages,
            in_flight: AtomicBool::new(false),
            building: Mutex::new(None),
            shutdown: CancellationToken::new(),
            current: Mutex::new(None),
        }
    }

    /// Wires the HTTP classifier and agent streamer described by `settings`.
    pub fn from_settings(settings: &AssistantSettings) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = settings.connect_timeout() {
            builder = builder.connect_timeout(timeout);
        }
        let client = builder.build().context("failed to build HTTP client")?;
        let url = settings.classifier.resolved_url()?;
        let classifier =
            HttpClassifier::new(client.clone(), url, &settings.classifier.extra_headers)
                .context("invalid classifier settings")?;
        let streamer = AgentStreamer::new(
            client,
            &settings.agent.extra_headers,
            settings.messages.clone(),
            settings.partial_content,
        )
        .context("invalid agent settings")?;
        Ok(Self::new(
            Box::new(classifier),
            streamer,
            settings.messages.clone(),
        ))
    }

    /// The conversation this dispatcher writes to, for rendering.
    pub fn conversation(&self) -> &Arc<Conversation> {
        &self.conversation
    }

    /// Selects the building later submissions refer to.
    pub fn set_building_context(&self, building: Option<BuildingContext>) {
        *lock(&self.building) = building;
    }

    pub fn building_context(&self) -> Option<BuildingContext> {
        lock(&self.building).clone()
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Cancels the submission in flight, if any.
    ///
    /// Returns `true` when there was one to cancel.
    pub fn cancel(&self) -> bool {
        match lock(&self.current).as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Closes the panel: cancels the submission in flight and refuses new ones.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    /// Handles one user submission from start to settlement.
    pub async fn submit(&self, text: &str) -> SubmitOutcome {
        let text = text.trim();
        if text.is_empty() {
            return SubmitOutcome::Rejected(RejectReason::EmptyInput);
        }
        if self.shutdown.is_cancelled() {
            return SubmitOutcome::Rejected(RejectReason::Closed);
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Submission ignored: another one is in flight");
            return SubmitOutcome::Rejected(RejectReason::Busy);
        }

        let cancel = self.shutdown.child_token();
        *lock(&self.current) = Some(cancel.clone());
        let mut guard = InFlight {
            dispatcher: self,
            turn: None,
        };

        let (_, turn_id) = self.conversation.begin_exchange(text);
        guard.turn = Some(turn_id);

        let building = self.building_context();
        let prompt = augment_prompt(text, building.as_ref());
        let session_id = self.conversation.session_id();
        let request = ClassifierRequest {
            prompt: prompt.clone(),
            session_id: session_id.clone(),
            building_id: building.as_ref().map(|building| building.id.clone()),
            building_name: building.as_ref().and_then(|building| building.name.clone()),
        };

        info!("Classifying turn {}", turn_id);
        let verdict = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            verdict = self.classifier.classify(&request) => Some(verdict),
        };

        let outcome = match verdict {
            None => {
                info!("Turn {} cancelled during classification", turn_id);
                settle(
                    &self.conversation,
                    turn_id,
                    Some(self.messages.cancelled.clone()),
                    TurnOutcome::Cancelled,
                )
            }
            Some(Err(err)) => {
                warn!("Classification of turn {} failed: {}", turn_id, err);
                settle(
                    &self.conversation,
                    turn_id,
                    Some(self.messages.connection_failure.clone()),
                    TurnOutcome::Failed,
                )
            }
            Some(Ok(response)) => match response.route {
                Route::Direct { answer } => {
                    info!("Turn {} answered directly ({:?})", turn_id, response.category);
                    let content = if answer.trim().is_empty() {
                        self.messages.no_answer.clone()
                    } else {
                        answer
                    };
                    settle(
                        &self.conversation,
                        turn_id,
                        Some(content),
                        TurnOutcome::Answered,
                    )
                }
                Route::Redirect {
                    url,
                    prompt: rewritten,
                } => {
                    info!("Turn {} redirected ({:?})", turn_id, response.category);
                    let target = AgentTarget {
                        url,
                        prompt: rewritten.unwrap_or(prompt),
                        session_id,
                        building,
                    };
                    self.streamer
                        .stream_into(&self.conversation, turn_id, &target, &cancel)
                        .await
                }
            },
        };

        drop(guard);
        SubmitOutcome::Settled { turn_id, outcome }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Holds the in-flight flag for one submission.
///
/// Dropping it releases the flag on every path, including a submit future
/// dropped half-way; an assistant turn left streaming is settled as cancelled.
struct InFlight<'a> {
    dispatcher: &'a Dispatcher,
    turn: Option<TurnId>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let dispatcher = self.dispatcher;
        if let Some(turn_id) = self.turn
            && let Some(turn) = dispatcher.conversation.turn(turn_id)
            && turn.is_streaming()
        {
            let content = turn
                .content()
                .is_empty()
                .then(|| dispatcher.messages.cancelled.clone());
            settle(
                &dispatcher.conversation,
                turn_id,
                content,
                TurnOutcome::Cancelled,
            );
        }
        *lock(&dispatcher.current) = None;
        dispatcher.in_flight.store(false, Ordering::Release);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
