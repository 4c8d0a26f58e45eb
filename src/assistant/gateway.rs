//! Client for the classification service.
//!
//! The classifier decides whether an utterance is answered on the spot or
//! handed to a streaming agent. This module only talks to the service and
//! validates its verdict; applying the verdict to the conversation is the
//! dispatcher's job.

use std::collections::BTreeMap;

use async_trait::async_trait;
use log::debug;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, StatusCode};

use super::message::{ClassifierReply, ClassifierRequest, ClassifierResponse, Route};

/// Ways the classification stage can fail.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("classifier unreachable: {0}")]
    Unreachable(#[source] reqwest::Error),
    #[error("classifier returned HTTP {0}")]
    BadStatus(StatusCode),
    #[error("classifier body could not be decoded: {0}")]
    InvalidBody(#[source] reqwest::Error),
    #[error("classifier rejected the request")]
    Rejected,
    #[error("classifier reply has no route kind")]
    MissingRoute,
    #[error("unknown route kind {0:?}")]
    UnknownRoute(String),
    #[error("redirect verdict without a target url")]
    MissingRedirectTarget,
    #[error("invalid header configuration: {0}")]
    InvalidHeader(String),
}

/// The building the user is looking at while chatting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildingContext {
    pub id: String,
    pub name: Option<String>,
}

impl BuildingContext {
    pub fn new(id: impl Into<String>, name: Option<String>) -> Self {
        Self {
            id: id.into(),
            name,
        }
    }
}

/// Anything able to classify an utterance.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, request: &ClassifierRequest)
    -> Result<ClassifierResponse, GatewayError>;
}

/// [`Classifier`] backed by the HTTP classification endpoint.
pub struct HttpClassifier {
    client: Client,
    url: String,
    headers: HeaderMap,
}

impl HttpClassifier {
    pub fn new(
        client: Client,
        url: impl Into<String>,
        extra_headers: &BTreeMap<String, String>,
    ) -> Result<Self, GatewayError> {
        Ok(Self {
            client,
            url: url.into(),
            headers: build_headers(extra_headers)?,
        })
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(
        &self,
        request: &ClassifierRequest,
    ) -> Result<ClassifierResponse, GatewayError> {
        let response = self
            .client
            .post(&self.url)
            .headers(self.headers.clone())
            .json(request)
            .send()
            .await
            .map_err(GatewayError::Unreachable)?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::BadStatus(status));
        }

        let reply: ClassifierReply = response.json().await.map_err(GatewayError::InvalidBody)?;
        if let Some(echoed) = reply.session_id.as_deref()
            && echoed != request.session_id
        {
            debug!("classifier echoed a different session id: {}", echoed);
        }
        validate_reply(reply)
    }
}

/// Turns a raw classifier reply into a verdict, enforcing the route contract.
pub fn validate_reply(reply: ClassifierReply) -> Result<ClassifierResponse, GatewayError> {
    if !reply.success {
        return Err(GatewayError::Rejected);
    }
    let category = reply.categoria.unwrap_or_default();
    let route = match reply.tipo.as_deref() {
        None => return Err(GatewayError::MissingRoute),
        Some("directo") => Route::Direct {
            answer: reply.respuesta.unwrap_or_default(),
        },
        Some("redirect") => {
            let url = reply
                .url
                .filter(|url| !url.trim().is_empty())
                .ok_or(GatewayError::MissingRedirectTarget)?;
            Route::Redirect {
                url,
                prompt: reply.prompt.filter(|prompt| !prompt.trim().is_empty()),
            }
        }
        Some(other) => return Err(GatewayError::UnknownRoute(other.to_string())),
    };
    Ok(ClassifierResponse { category, route })
}

/// Prepends the building preamble to the user text.
///
/// The classifier (and the agent behind it) only sees the prompt, so this is
/// how references like "this building" get resolved.
pub fn augment_prompt(text: &str, building: Option<&BuildingContext>) -> String {
    let text = text.trim();
    let Some(building) = building else {
        return text.to_string();
    };
    let subject = match building.name.as_deref().filter(|name| !name.trim().is_empty()) {
        Some(name) => format!("the building \"{}\" (ID: {})", name.trim(), building.id),
        None => format!("the building with ID {}", building.id),
    };
    format!(
        "[Building context] The user is currently viewing {subject}. \
         Interpret references such as \"this building\" or \"the building\" as referring to it.\n\n{text}"
    )
}

/// Builds the headers attached to every request to a configured endpoint.
pub(crate) fn build_headers(extra: &BTreeMap<String, String>) -> Result<HeaderMap, GatewayError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    for (key, value) in extra {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|_| GatewayError::InvalidHeader(key.clone()))?;
        let value =
            HeaderValue::from_str(value).map_err(|_| GatewayError::InvalidHeader(key.clone()))?;
        headers.insert(name, value);
    }
    Ok(headers)
}
