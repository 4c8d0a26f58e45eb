//! Assembles a streamed agent answer into an assistant turn.
//!
//! Agents reply with NDJSON: one `{type, content?, metadata?}` object per
//! line, ended by closing the connection. Every `item` record extends the
//! target turn as soon as it arrives. A record that fails to parse is dropped
//! and reading goes on, since intermediaries may split or garble lines.
//!
//! The body is always read as NDJSON, whatever its `Content-Type` says. A
//! body in which no line parses as an agent record is shown verbatim.

use std::collections::BTreeMap;

use futures_util::StreamExt;
use log::{debug, info, warn};
use reqwest::Client;
use reqwest::header::HeaderMap;
use tokio_util::sync::CancellationToken;

use super::config::{FallbackMessages, PartialContentPolicy};
use super::decoder::LineDecoder;
use super::gateway::{BuildingContext, GatewayError, build_headers};
use super::message::{AgentChunk, AgentRequest};
use super::session::{Conversation, TurnId, TurnOutcome};

/// Everything needed to open one agent stream.
#[derive(Debug, Clone)]
pub struct AgentTarget {
    /// Agent endpoint chosen by the classifier.
    pub url: String,
    /// Sent as `chatInput`.
    pub prompt: String,
    /// Sent as `sessionId`, same value the classifier saw.
    pub session_id: String,
    /// Building the user is looking at, forwarded as `building_id`/`building_name`.
    pub building: Option<BuildingContext>,
}

impl AgentTarget {
    fn request(&self) -> AgentRequest {
        AgentRequest {
            chat_input: self.prompt.clone(),
            session_id: self.session_id.clone(),
            building_id: self.building.as_ref().map(|building| building.id.clone()),
            building_name: self
                .building
                .as_ref()
                .and_then(|building| building.name.clone()),
        }
    }
}

/// Streams agent answers into conversation turns.
pub struct AgentStreamer {
    client: Client,
    /// `Content-Type` plus the configured extra headers.
    headers: HeaderMap,
    messages: FallbackMessages,
    /// What happens to streamed text when the connection breaks.
    policy: PartialContentPolicy,
}

impl AgentStreamer {
    pub fn new(
        client: Client,
        extra_headers: &BTreeMap<String, String>,
        messages: FallbackMessages,
        policy: PartialContentPolicy,
    ) -> Result<Self, GatewayError> {
        Ok(Self {
            client,
            headers: build_headers(extra_headers)?,
            messages,
            policy,
        })
    }

    /// Runs one agent request and settles `turn_id` with the result.
    ///
    /// Always leaves the turn settled, whatever happens on the wire.
    pub async fn stream_into(
        &self,
        conversation: &Conversation,
        turn_id: TurnId,
        target: &AgentTarget,
        cancel: &CancellationToken,
    ) -> TurnOutcome {
        info!("Streaming answer for turn {} from {}", turn_id, target.url);
        let send = self
            .client
            .post(&target.url)
            .headers(self.headers.clone())
            .json(&target.request())
            .send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return self.settle_cancelled(conversation, turn_id),
            response = send => response,
        };
        let response = match response {
            Ok(response) => response,
            Err(err) => {
                warn!("Agent request for turn {} failed: {}", turn_id, err);
                return self.settle_failed(conversation, turn_id);
            }
        };

        let status = response.status();
        if !status.is_success() {
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.settle_cancelled(conversation, turn_id),
                read = response.text() => read,
            };
            let body = read.unwrap_or_default();
            warn!("Agent endpoint returned HTTP {} for turn {}", status, turn_id);
            let content = if body.trim().is_empty() {
                self.messages.agent_unavailable.clone()
            } else {
                body
            };
            return settle(conversation, turn_id, Some(content), TurnOutcome::Failed);
        }

        let mut body = response.bytes_stream();
        let mut decoder = LineDecoder::new();
        let mut assembly = Assembly::default();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.settle_cancelled(conversation, turn_id),
                next = body.next() => next,
            };
            match next {
                Some(Ok(bytes)) => {
                    for line in decoder.push(&bytes) {
                        assembly.line(conversation, turn_id, &line, true);
                    }
                }
                Some(Err(err)) => {
                    warn!("Agent stream for turn {} broke: {}", turn_id, err);
                    return self.settle_failed(conversation, turn_id);
                }
                None => break,
            }
        }
        if let Some(rest) = decoder.finish() {
            assembly.line(conversation, turn_id, &rest, false);
        }
        if assembly.dropped > 0 {
            info!(
                "Dropped {} malformed records for turn {}",
                assembly.dropped, turn_id
            );
        }
        match assembly.into_plain_reply() {
            Some(text) => {
                debug!("Agent reply for turn {} was not NDJSON, showing it as is", turn_id);
                settle(conversation, turn_id, Some(text), TurnOutcome::Answered)
            }
            None => settle(conversation, turn_id, None, TurnOutcome::Answered),
        }
    }

    fn settle_failed(&self, conversation: &Conversation, turn_id: TurnId) -> TurnOutcome {
        let partial = conversation
            .turn(turn_id)
            .map(|turn| turn.content().to_string())
            .unwrap_or_default();
        let content = failure_content(&partial, self.policy, &self.messages.stream_failure);
        settle(conversation, turn_id, Some(content), TurnOutcome::Failed)
    }

    fn settle_cancelled(&self, conversation: &Conversation, turn_id: TurnId) -> TurnOutcome {
        info!("Turn {} cancelled while streaming", turn_id);
        let nothing_yet = conversation
            .turn(turn_id)
            .is_none_or(|turn| turn.content().is_empty());
        let content = nothing_yet.then(|| self.messages.cancelled.clone());
        settle(conversation, turn_id, content, TurnOutcome::Cancelled)
    }
}

/// Bookkeeping for one read loop.
#[derive(Debug, Default)]
struct Assembly {
    /// Records that parsed as agent chunks.
    chunks: usize,
    /// Non-blank records that did not parse.
    dropped: usize,
    /// Body text read before the first chunk, for agents that answer with a
    /// plain document instead of NDJSON.
    raw: String,
}

impl Assembly {
    /// Handles one decoded line; `terminated` is false only for the final
    /// remainder of the body.
    fn line(&mut self, conversation: &Conversation, turn_id: TurnId, line: &str, terminated: bool) {
        if self.chunks == 0 {
            self.raw.push_str(line);
            if terminated {
                self.raw.push('\n');
            }
        }
        match parse_record(line) {
            Record::Blank => {}
            Record::Malformed => self.dropped += 1,
            Record::Chunk(chunk) => {
                if self.chunks == 0 {
                    self.raw = String::new();
                }
                self.chunks += 1;
                match chunk.text_delta() {
                    Some(delta) => {
                        if let Err(err) = conversation.append_content(turn_id, delta) {
                            warn!("Could not append to turn {}: {}", turn_id, err);
                        }
                    }
                    None => debug!("Ignoring agent record of type {:?}", chunk.kind),
                }
            }
        }
    }

    /// The whole body, when not a single line of it was an agent record.
    fn into_plain_reply(self) -> Option<String> {
        (self.chunks == 0 && !self.raw.trim().is_empty()).then_some(self.raw)
    }
}

#[derive(Debug, PartialEq)]
enum Record {
    Blank,
    Malformed,
    Chunk(AgentChunk),
}

fn parse_record(line: &str) -> Record {
    let line = line.trim();
    if line.is_empty() {
        return Record::Blank;
    }
    match serde_json::from_str::<AgentChunk>(line) {
        Ok(chunk) => Record::Chunk(chunk),
        Err(err) => {
            debug!("Dropping malformed agent record ({}): {}", err, line);
            Record::Malformed
        }
    }
}

/// Content of a turn whose stream failed after `partial` had arrived.
fn failure_content(partial: &str, policy: PartialContentPolicy, message: &str) -> String {
    match policy {
        PartialContentPolicy::Keep if !partial.trim().is_empty() => {
            format!("{}\n\n{}", partial.trim_end(), message)
        }
        _ => message.to_string(),
    }
}

pub(super) fn settle(
    conversation: &Conversation,
    turn_id: TurnId,
    content: Option<String>,
    outcome: TurnOutcome,
) -> TurnOutcome {
    if let Err(err) = conversation.settle(turn_id, content, outcome) {
        warn!("Could not settle turn {}: {}", turn_id, err);
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assemble(lines: &[&str]) -> String {
        let conversation = Conversation::new();
        let (_, turn) = conversation.begin_exchange("q");
        let mut assembly = Assembly::default();
        for line in lines {
            assembly.line(&conversation, turn, line, true);
        }
        conversation.turn(turn).unwrap().content().to_string()
    }

    #[test]
    fn blank_and_garbled_lines_are_classified() {
        assert_eq!(parse_record("   \r"), Record::Blank);
        assert_eq!(parse_record("{bad json"), Record::Malformed);
        assert_eq!(parse_record(r#"{"content":"no type"}"#), Record::Malformed);
        assert!(matches!(
            parse_record("{\"type\":\"item\",\"content\":\"x\"}\r"),
            Record::Chunk(_)
        ));
    }

    #[test]
    fn malformed_line_does_not_change_the_result() {
        let clean = assemble(&[
            r#"{"type":"item","content":"A"}"#,
            r#"{"type":"item","content":"B"}"#,
        ]);
        let noisy = assemble(&[
            r#"{"type":"item","content":"A"}"#,
            r#"{"type":"item","content":"#,
            r#"{"type":"item","content":"B"}"#,
        ]);
        assert_eq!(clean, "AB");
        assert_eq!(noisy, clean);
    }

    #[test]
    fn non_item_records_are_ignored() {
        let content = assemble(&[
            r#"{"type":"begin","metadata":{"nodeId":"agent"}}"#,
            r#"{"type":"item","content":"Hi "}"#,
            "",
            r#"{"type":"item","content":"there"}"#,
            r#"{"type":"end","content":"ignored"}"#,
        ]);
        assert_eq!(content, "Hi there");
    }

    #[test]
    fn partial_content_policy_decides_failure_text() {
        let message = "interrupted";
        assert_eq!(
            failure_content("half an answer", PartialContentPolicy::Discard, message),
            "interrupted"
        );
        assert_eq!(
            failure_content("half an answer ", PartialContentPolicy::Keep, message),
            "half an answer\n\ninterrupted"
        );
        assert_eq!(
            failure_content("", PartialContentPolicy::Keep, message),
            "interrupted"
        );
    }

    #[test]
    fn body_without_agent_records_is_kept_verbatim() {
        let conversation = Conversation::new();
        let (_, turn) = conversation.begin_exchange("q");
        let mut assembly = Assembly::default();
        assembly.line(&conversation, turn, "The building has", true);
        assembly.line(&conversation, turn, "", true);
        assembly.line(&conversation, turn, "12 units.", false);

        assert_eq!(assembly.dropped, 2);
        assert_eq!(
            assembly.into_plain_reply().as_deref(),
            Some("The building has\n\n12 units.")
        );
        assert_eq!(conversation.turn(turn).unwrap().content(), "");
    }

    #[test]
    fn one_agent_record_switches_off_the_verbatim_reply() {
        let conversation = Conversation::new();
        let (_, turn) = conversation.begin_exchange("q");
        let mut assembly = Assembly::default();
        assembly.line(&conversation, turn, "{garbled", true);
        assembly.line(&conversation, turn, r#"{"type":"item","content":"A"}"#, true);
        assembly.line(&conversation, turn, "trailing noise", false);

        assert_eq!(assembly.into_plain_reply(), None);
        assert_eq!(conversation.turn(turn).unwrap().content(), "A");
    }

    #[test]
    fn empty_body_is_not_a_plain_reply() {
        let conversation = Conversation::new();
        let (_, turn) = conversation.begin_exchange("q");
        let mut assembly = Assembly::default();
        assembly.line(&conversation, turn, "  \r", true);
        assert_eq!(assembly.into_plain_reply(), None);
    }

    #[test]
    fn agent_request_carries_building_context() {
        let target = AgentTarget {
            url: "https://agent/x".into(),
            prompt: "rent roll".into(),
            session_id: "s-1".into(),
            building: Some(BuildingContext::new("b-1", Some("Torre Norte".into()))),
        };
        let request = target.request();
        assert_eq!(request.chat_input, "rent roll");
        assert_eq!(request.building_id.as_deref(), Some("b-1"));
        assert_eq!(request.building_name.as_deref(), Some("Torre Norte"));
    }
}
