//! Wire formats exchanged with the classifier and agent endpoints.

use serde::{Deserialize, Serialize};

/// Body posted to the classifier endpoint.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ClassifierRequest {
    /// The user text, already augmented with the building context preamble.
    pub prompt: String,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub building_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub building_name: Option<String>,
}

/// Raw classifier verdict as it comes off the wire.
///
/// Field names follow the classifier service (`tipo`, `categoria`, `respuesta`).
/// Nothing here is validated yet; see `gateway::validate_reply`.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct ClassifierReply {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub tipo: Option<String>,
    #[serde(default)]
    pub categoria: Option<Category>,
    #[serde(default)]
    pub url: Option<String>,
    /// Prompt rewritten by the classifier for the agent, if any.
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub respuesta: Option<String>,
}

/// Topic the classifier assigned to the utterance.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    #[serde(rename = "edificios")]
    Buildings,
    #[serde(rename = "certificados")]
    Certificates,
    #[serde(rename = "financiero")]
    Financial,
    #[serde(rename = "unidades")]
    Units,
    General,
    /// Any category this build does not know about yet.
    #[default]
    #[serde(other)]
    Unknown,
}

/// Validated classifier verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifierResponse {
    pub category: Category,
    pub route: Route,
}

/// Where the classifier sends the utterance next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// The classifier answered on its own.
    Direct { answer: String },
    /// The utterance must be forwarded to a streaming agent.
    Redirect {
        url: String,
        /// Replacement prompt for the agent, when the classifier supplied one.
        prompt: Option<String>,
    },
}

/// Body posted to an agent endpoint.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct AgentRequest {
    #[serde(rename = "chatInput")]
    pub chat_input: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub building_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub building_name: Option<String>,
}

/// One NDJSON record of an agent stream.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct AgentChunk {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

impl AgentChunk {
    /// Text this record contributes to the answer, if any.
    ///
    /// Only `item` records with non-empty content count; every other kind is
    /// accepted and ignored.
    pub fn text_delta(&self) -> Option<&str> {
        if self.kind != "item" {
            return None;
        }
        self.content.as_deref().filter(|content| !content.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn agent_request_uses_camel_case_identifiers() {
        let request = AgentRequest {
            chat_input: "hola".into(),
            session_id: "s-1".into(),
            building_id: Some("42".into()),
            building_name: None,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({"chatInput": "hola", "sessionId": "s-1", "building_id": "42"})
        );
    }

    #[test]
    fn unknown_category_is_tolerated() {
        let reply: ClassifierReply =
            serde_json::from_value(json!({"success": true, "tipo": "directo", "categoria": "esg"}))
                .unwrap();
        assert_eq!(reply.categoria, Some(Category::Unknown));

        let reply: ClassifierReply =
            serde_json::from_value(json!({"success": true, "categoria": "certificados"})).unwrap();
        assert_eq!(reply.categoria, Some(Category::Certificates));
    }

    #[test]
    fn only_non_empty_items_contribute_text() {
        let item: AgentChunk =
            serde_json::from_str(r#"{"type":"item","content":"Hi"}"#).unwrap();
        assert_eq!(item.text_delta(), Some("Hi"));

        let empty: AgentChunk = serde_json::from_str(r#"{"type":"item","content":""}"#).unwrap();
        assert_eq!(empty.text_delta(), None);

        let begin: AgentChunk = serde_json::from_str(
            r#"{"type":"begin","content":"ignored","metadata":{"node":"agent"}}"#,
        )
        .unwrap();
        assert_eq!(begin.text_delta(), None);
        assert!(begin.metadata.is_some());
    }
}
