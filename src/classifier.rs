// =============================================================================
// classifier.rs — THE BOUNDARY TO THE MODEL
// =============================================================================
//
// The model is a black box that takes a report description plus an
// instruction and hands back some text. We ask it four questions:
//
//   1. Is this spam?
//   2. Which category is it?
//   3. How urgent is it?
//   4. How wide an area does it affect?
//
// The model is allowed to be slow, wrong, or absent. Every call is wrapped in
// a timeout and a circuit breaker, and every answer except an explicit SPAM
// verdict degrades to a safe default instead of failing the report. The
// degradations are collected into one `ClassificationResult` so callers and
// tests can see exactly which defaults were used.
// =============================================================================

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::circuit_breaker::CircuitBreaker;
use crate::error::ClassifierError;
use crate::models::{Category, Priority, Radius};
use crate::text_scanner::{self, Parsed};

/// The four questions we ask the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Task {
    Spam,
    Category,
    Priority,
    Radius,
}

impl Task {
    /// System instruction sent alongside the description.
    pub fn instruction(self) -> &'static str {
        match self {
            Task::Spam => {
                "You screen reports submitted to a municipal issue tracker. \
                 Reply with exactly SPAM if the text is advertising, abuse, gibberish, \
                 or otherwise not a report about a public civic problem. \
                 Otherwise reply with exactly OK."
            }
            Task::Category => {
                "Classify the civic issue into exactly one of: Roads, Water Supply, \
                 Sewerage, Electricity, Garbage, Street Lights, Public Transport, \
                 Healthcare, Education, Public Safety, Encroachment, Environment, Other. \
                 Reply with the category name only."
            }
            Task::Priority => {
                "Rate the urgency of the civic issue on a 0 to 2 scale: \
                 0 = inconvenience, 1 = needs attention soon, 2 = danger to people or property. \
                 Reply with the single digit only."
            }
            Task::Radius => {
                "Estimate, in meters, the radius of the area affected by the civic issue. \
                 A single pothole or streetlight is about 50. A blocked street is a few hundred. \
                 A district-wide outage is several thousand. Reply with one integer only."
            }
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::Spam => write!(f, "spam"),
            Task::Category => write!(f, "category"),
            Task::Priority => write!(f, "priority"),
            Task::Radius => write!(f, "radius"),
        }
    }
}

/// Anything that can answer a task about a piece of text.
#[async_trait]
pub trait TextClassifier: Send + Sync {
    async fn query(&self, task: Task, text: &str) -> Result<String, ClassifierError>;
}

// =============================================================================
// HTTP client for an OpenAI-compatible chat completions endpoint
// =============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

pub struct HttpClassifier {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl HttpClassifier {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, ClassifierError> {
        let base_url = base_url.into();
        match url::Url::parse(&base_url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
            _ => return Err(ClassifierError::InvalidEndpoint(base_url)),
        }

        let http = reqwest::Client::builder()
            .user_agent(concat!("civic-intake-engine/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if !self.api_key.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", self.api_key)) {
                headers.insert(AUTHORIZATION, value);
            }
        }
        headers
    }
}

#[async_trait]
impl TextClassifier for HttpClassifier {
    async fn query(&self, task: Task, text: &str) -> Result<String, ClassifierError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: task.instruction(),
                },
                ChatMessage {
                    role: "user",
                    content: text,
                },
            ],
            temperature: 0.0,
        };

        debug!(task = %task, model = %self.model, "Classifier request");

        let response = self
            .http
            .post(&url)
            .headers(self.headers())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ClassifierError::Api { status, body });
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(ClassifierError::EmptyCompletion)
    }
}

// =============================================================================
// The boundary: timeouts, breaker, fallbacks
// =============================================================================

/// Which fields of a classification came from defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Fallbacks {
    pub category: bool,
    pub priority: bool,
    pub radius: bool,
}

impl Fallbacks {
    pub fn count(&self) -> u64 {
        [self.category, self.priority, self.radius]
            .into_iter()
            .filter(|used| *used)
            .count() as u64
    }

    pub fn any(&self) -> bool {
        self.count() > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClassificationResult {
    pub category: Category,
    pub priority: Priority,
    pub radius: Radius,
    pub fallbacks: Fallbacks,
}

/// Outcome of the spam screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpamScreen {
    /// Not spam. `degraded` is set when the screen itself failed and the
    /// report was let through unchecked.
    Clean { degraded: bool },
    Spam { verdict: String },
}

pub struct ClassificationBoundary {
    classifier: Arc<dyn TextClassifier>,
    breaker: CircuitBreaker,
    timeout: Duration,
    default_category: Category,
}

impl ClassificationBoundary {
    pub fn new(
        classifier: Arc<dyn TextClassifier>,
        breaker: CircuitBreaker,
        timeout: Duration,
        default_category: Category,
    ) -> Self {
        Self {
            classifier,
            breaker,
            timeout,
            default_category,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// One guarded call: breaker gate, timeout, breaker bookkeeping.
    async fn ask(&self, task: Task, text: &str) -> Result<String, ClassifierError> {
        if !self.breaker.allow_request() {
            return Err(ClassifierError::CircuitOpen);
        }

        let result = match tokio::time::timeout(self.timeout, self.classifier.query(task, text)).await {
            Ok(result) => result,
            Err(_) => Err(ClassifierError::Timeout(self.timeout)),
        };

        match &result {
            Ok(_) => self.breaker.record_success(),
            Err(e) => {
                self.breaker.record_failure();
                warn!(task = %task, error = %e, "Classifier degraded, default will be used");
            }
        }

        result
    }

    /// Spam screen. Only an explicit verdict rejects; a failed screen lets
    /// the report through.
    pub async fn screen_spam(&self, description: &str) -> SpamScreen {
        match self.ask(Task::Spam, description).await {
            Ok(verdict) if text_scanner::is_spam_verdict(&verdict) => SpamScreen::Spam { verdict },
            Ok(_) => SpamScreen::Clean { degraded: false },
            Err(_) => SpamScreen::Clean { degraded: true },
        }
    }

    /// Category, priority and radius. Never fails.
    ///
    /// An explicit radius from the citizen is trusted and the estimator is
    /// not consulted.
    pub async fn classify(&self, description: &str, explicit_radius: Option<Radius>) -> ClassificationResult {
        let radius_query = async {
            match explicit_radius {
                Some(radius) => Parsed {
                    value: radius,
                    fallback: false,
                },
                None => match self.ask(Task::Radius, description).await {
                    Ok(raw) => text_scanner::parse_radius(&raw),
                    Err(_) => Parsed {
                        value: Radius::DEFAULT,
                        fallback: true,
                    },
                },
            }
        };

        let category_query = async {
            match self.ask(Task::Category, description).await {
                Ok(raw) => text_scanner::parse_category(&raw, self.default_category),
                Err(_) => Parsed {
                    value: self.default_category,
                    fallback: true,
                },
            }
        };

        let priority_query = async {
            match self.ask(Task::Priority, description).await {
                Ok(raw) => text_scanner::parse_priority(&raw),
                Err(_) => Parsed {
                    value: Priority::LOW,
                    fallback: true,
                },
            }
        };

        let (category, priority, radius) = tokio::join!(category_query, priority_query, radius_query);

        ClassificationResult {
            category: category.value,
            priority: priority.value,
            radius: radius.value,
            fallbacks: Fallbacks {
                category: category.fallback,
                priority: priority.fallback,
                radius: radius.fallback,
            },
        }
    }
}
