use crate::config::LlmOptions;
use crate::context::AssembledContext;
use crate::error::{ConfigError, ModelError};
use crate::models::{AnalysisResult, Answer};
use crate::traits::{ChatMessage, CompletionRequest, LanguageModel};
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a highly accurate legal assistant specializing in interpreting insurance contracts. Answer the user's question strictly from the provided context, which contains clauses, definitions and terms from real insurance documents.

Give a direct YES or NO answer. Justify it in 1-2 concise lines using evidence from the context and say where in the context (document, page, section or clause) the evidence was found.

Rate your confidence from 0 to 1. Use 0.8-1.0 only when the answer is explicitly stated or clearly implied; use 0.0-0.5 when the context is vague or incomplete.

If the answer cannot be determined from the context, respond with:
{"answer": "UNKNOWN", "justification": "The answer could not be found in the provided context.", "source_clause": null, "confidence": 0.0}

Do not make assumptions or invent facts.

Your response must be exactly one JSON object of this form:
{"answer": "<YES or NO or UNKNOWN>", "justification": "<1-2 line explanation referencing the context>", "source_clause": "<exact clause, section or line if available, else null>", "confidence": <number between 0.0 and 1.0>}"#;

/// How forcefully the system instruction demands a bare JSON reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum InstructionStrength {
    Standard,
    JsonOnly,
    Strict,
}

impl InstructionStrength {
    pub fn escalate(self) -> Self {
        match self {
            InstructionStrength::Standard => InstructionStrength::JsonOnly,
            InstructionStrength::JsonOnly | InstructionStrength::Strict => InstructionStrength::Strict,
        }
    }

    pub fn directive(self) -> Option<&'static str> {
        match self {
            InstructionStrength::Standard => None,
            InstructionStrength::JsonOnly => Some(
                "IMPORTANT: Respond with ONLY a JSON object. Do not add any text before or after it.",
            ),
            InstructionStrength::Strict => Some(
                "IMPORTANT: Respond with ONLY a JSON object. Your entire reply must start with '{' and end with '}'. \
                 All four fields are required: answer, justification, source_clause, confidence.",
            ),
        }
    }
}

/// State carried from one attempt to the next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptContext {
    /// 1-based attempt number.
    pub attempt: u32,
    pub max_attempts: u32,
    pub strength: InstructionStrength,
    /// Contract violation of the previous reply, quoted back to the model.
    pub last_failure: Option<String>,
}

impl AttemptContext {
    pub fn first(max_attempts: u32) -> Self {
        Self {
            attempt: 1,
            max_attempts: max_attempts.max(1),
            strength: InstructionStrength::Standard,
            last_failure: None,
        }
    }

    pub fn can_retry(&self) -> bool {
        self.attempt < self.max_attempts
    }

    /// Transport failures say nothing about the reply, so only contract
    /// violations are remembered.
    pub fn escalate(&self, failure: &ModelError) -> Self {
        let last_failure = match failure {
            ModelError::Contract(reason) => Some(reason.clone()),
            _ => None,
        };
        Self {
            attempt: self.attempt + 1,
            max_attempts: self.max_attempts,
            strength: self.strength.escalate(),
            last_failure,
        }
    }

    pub fn system_instruction(&self, base: &str) -> String {
        let mut instruction = base.to_string();
        if let Some(directive) = self.strength.directive() {
            instruction.push_str("\n\n");
            instruction.push_str(directive);
        }
        if let Some(reason) = &self.last_failure {
            instruction.push_str(&format!("\nYour previous reply was rejected: {reason}."));
        }
        instruction
    }
}

pub fn load_system_prompt(options: &LlmOptions) -> Result<String, ConfigError> {
    let Some(path) = &options.system_prompt_path else {
        return Ok(DEFAULT_SYSTEM_PROMPT.to_string());
    };
    match std::fs::read_to_string(path) {
        Ok(prompt) if !prompt.trim().is_empty() => Ok(prompt),
        _ => Err(ConfigError::MissingPromptTemplate(path.clone())),
    }
}

fn fenced_block() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)```").expect("static fence pattern is valid")
    })
}

/// Every brace-balanced span starting at a `{`, skipping braces inside strings.
fn balanced_objects(raw: &str) -> Vec<&str> {
    let bytes = raw.as_bytes();
    let mut objects = Vec::new();

    for (start, _) in raw.match_indices('{') {
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;

        for (offset, &byte) in bytes[start..].iter().enumerate() {
            if in_string {
                match byte {
                    _ if escaped => escaped = false,
                    b'\\' => escaped = true,
                    b'"' => in_string = false,
                    _ => {}
                }
                continue;
            }
            match byte {
                b'"' => in_string = true,
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        objects.push(&raw[start..=start + offset]);
                        break;
                    }
                }
                _ => {}
            }
        }
    }
    objects
}

/// Candidate JSON texts in priority order: the whole reply, fenced blocks,
/// then brace-balanced spans in order of appearance.
fn json_candidates(raw: &str) -> Vec<&str> {
    let mut candidates = vec![raw.trim()];
    candidates.extend(
        fenced_block()
            .captures_iter(raw)
            .filter_map(|capture| capture.get(1))
            .map(|body| body.as_str().trim()),
    );
    candidates.extend(balanced_objects(raw));
    candidates
}

fn required<'a>(object: &'a Map<String, Value>, field: &str) -> Result<&'a Value, ModelError> {
    object
        .get(field)
        .ok_or_else(|| ModelError::Contract(format!("missing field `{field}`")))
}

fn validate(object: &Map<String, Value>) -> Result<AnalysisResult, ModelError> {
    let answer = match required(object, "answer")? {
        Value::String(label) => Answer::parse_label(label).ok_or_else(|| {
            ModelError::Contract(format!("answer `{label}` is not YES, NO or UNKNOWN"))
        })?,
        other => return Err(ModelError::Contract(format!("answer is not a string: {other}"))),
    };

    let justification = match required(object, "justification")? {
        Value::String(text) => text.trim().to_string(),
        other => {
            return Err(ModelError::Contract(format!(
                "justification is not a string: {other}"
            )))
        }
    };

    let source_clause = match required(object, "source_clause")? {
        Value::Null => None,
        Value::String(text) => {
            let text = text.trim();
            if text.is_empty() || text.eq_ignore_ascii_case("null") || text.eq_ignore_ascii_case("none") {
                None
            } else {
                Some(text.to_string())
            }
        }
        other => {
            return Err(ModelError::Contract(format!(
                "source_clause is not a string or null: {other}"
            )))
        }
    };

    let confidence = match required(object, "confidence")? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|value| value.is_finite())
    .ok_or_else(|| ModelError::Contract("confidence is not a number".to_string()))?;

    Ok(AnalysisResult {
        answer,
        justification,
        source_clause,
        // Out-of-range confidence is clamped rather than rejected.
        confidence: confidence.clamp(0.0, 1.0),
    })
}

/// Locates the first JSON object in `raw` that satisfies the response contract.
pub fn parse_reply(raw: &str) -> Result<AnalysisResult, ModelError> {
    let mut first_error = None;

    for candidate in json_candidates(raw) {
        let Ok(Value::Object(object)) = serde_json::from_str::<Value>(candidate) else {
            continue;
        };
        match validate(&object) {
            Ok(result) => return Ok(result),
            Err(error) => {
                first_error.get_or_insert(error);
            }
        }
    }

    Err(first_error
        .unwrap_or_else(|| ModelError::Contract("no JSON object found in reply".to_string())))
}

/// Asks the model for a verdict and enforces the JSON contract, retrying
/// with a stronger instruction until the attempt budget is spent. Model and
/// transport failures end in the canonical UNKNOWN result, never an error.
pub struct AnswerSynthesizer<M> {
    model: M,
    system_prompt: String,
    max_attempts: u32,
    temperature: f32,
    timeout: Duration,
    backoff: Duration,
}

impl<M> AnswerSynthesizer<M>
where
    M: LanguageModel,
{
    pub fn new(model: M, options: &LlmOptions) -> Result<Self, ConfigError> {
        Ok(Self {
            model,
            system_prompt: load_system_prompt(options)?,
            max_attempts: options.max_attempts(),
            temperature: options.temperature,
            timeout: options.request_timeout,
            backoff: options.retry_backoff,
        })
    }

    fn request(
        &self,
        attempt: &AttemptContext,
        context: &AssembledContext,
        query: &str,
        temperature: f32,
    ) -> CompletionRequest {
        CompletionRequest {
            messages: vec![
                ChatMessage::system(attempt.system_instruction(&self.system_prompt)),
                ChatMessage::user(format!(
                    "Context:\n{}\n\nQuestion: {query}\nAnswer:",
                    context.text
                )),
            ],
            temperature,
        }
    }

    async fn attempt_once(&self, request: &CompletionRequest) -> Result<AnalysisResult, ModelError> {
        let raw = tokio::time::timeout(self.timeout, self.model.complete(request))
            .await
            .map_err(|_| ModelError::Timeout(self.timeout))??;
        debug!(reply = %raw, "model reply");
        parse_reply(&raw)
    }

    pub async fn synthesize(
        &self,
        context: &AssembledContext,
        query: &str,
        temperature: Option<f32>,
    ) -> AnalysisResult {
        let temperature = temperature.unwrap_or(self.temperature);
        let mut attempt = AttemptContext::first(self.max_attempts);

        loop {
            let request = self.request(&attempt, context, query, temperature);
            match self.attempt_once(&request).await {
                Ok(result) => {
                    info!(attempt = attempt.attempt, answer = %result.answer, "model contract satisfied");
                    return result;
                }
                Err(error) if attempt.can_retry() => {
                    warn!(
                        attempt = attempt.attempt,
                        max_attempts = attempt.max_attempts,
                        %error,
                        "model attempt failed, escalating instruction"
                    );
                    attempt = attempt.escalate(&error);
                    tokio::time::sleep(self.backoff).await;
                }
                Err(error) => {
                    warn!(attempts = attempt.attempt, %error, "model attempts exhausted, returning fallback");
                    return AnalysisResult::model_failure(attempt.attempt, &error.to_string());
                }
            }
        }
    }
}
