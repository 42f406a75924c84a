//! Guided execution engine.
//!
//! Intercepts chat requests before they reach the answer generator: when a
//! message asks to be walked through a process, the matched document is
//! decomposed into ordered steps and the user is driven through them with
//! navigation commands. Requests that are not guide requests fall through
//! to the answer generator unchanged.
//!
//! Intent detection runs a cheap keyword screen first and only then asks
//! the completion provider for a classification, cached per
//! (message, tenant) for a short TTL. Decomposition output is parsed
//! defensively; on failure the session degrades to a generic three-step
//! skeleton instead of surfacing an error.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::answer;
use crate::cache::TtlCache;
use crate::completion::{ChatMessage, CompletionProvider};
use crate::config::{Config, GuidedConfig};
use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::markup::strip_markup;
use crate::models::{ChatResponse, Document, HistoryTurn, ProcessDefinition, ProcessStep, Source};
use crate::session::{GuidedSession, SessionCommand, SessionStore};
use crate::store::DocumentStore;

/// Vocabulary (English and French) that marks a message as a potential
/// guide request. Only messages passing this screen reach the completion
/// provider for classification.
const GUIDE_KEYWORDS: &[&str] = &[
    "how to",
    "guide me",
    "help me",
    "steps for",
    "process for",
    "walk me through",
    "show me how",
    "explain how",
    "guide",
    "help",
    "assist",
    "support",
    "tutorial",
    "procedure",
    "process",
    "workflow",
    "steps",
    "instructions",
    "manual",
    "can you",
    "could you",
    "would you",
    "i need",
    "i want",
    "comment faire",
    "guide-moi",
    "aide-moi",
    "étapes pour",
    "processus pour",
    "aide",
    "assistance",
    "tutoriel",
    "procédure",
    "processus",
    "étapes",
    "manuel",
    "peux-tu",
    "pourrais-tu",
    "j'ai besoin",
    "je veux",
    "je souhaite",
];

const INTENT_SYSTEM_PROMPT: &str = r#"You are an expert at intent detection. Decide whether the user message asks to be walked through or guided along a process, and if so, which of the available process documents it refers to.

Guide-request indicators include: "how to", "guide me through", "walk me through", "what are the steps for", "help me with", "comment faire pour", "guide-moi pour", "quelles sont les étapes pour".

Respond ONLY with JSON using exactly this structure:
{"isProcessRequest": true, "documentTitle": "Customer Onboarding", "confidence": 0.9}
or
{"isProcessRequest": false, "documentTitle": null, "confidence": 0.1}

Replace the values with your analysis but keep the exact JSON structure."#;

const DECOMPOSE_SYSTEM_PROMPT: &str = r#"You are an expert at process decomposition. Transform the given process document into clear, actionable steps.

Respond ONLY with JSON using this structure:
{
  "title": "process title",
  "description": "short description",
  "estimatedDuration": "total estimated time",
  "steps": [
    {
      "id": "step_1",
      "title": "Short step title",
      "description": "Detailed description of what to do",
      "estimatedTime": "estimated time",
      "checkpoints": ["checkpoint 1", "checkpoint 2"],
      "tools": ["tool1", "tool2"],
      "tips": "optional tip"
    }
  ]
}

Rules:
- Each step must be atomic: one clear action.
- Use action verbs (Create, Send, Verify, Configure).
- Extract checkpoints from the text.
- Identify mentioned tools and software.
- Estimate realistic times.

Never use emojis or emoticons in your response."#;

const GUIDED_STEP_SYSTEM_PROMPT: &str = r#"You are an assistant guiding a user step by step through a process. Respond directly to their question or concern about the current step, offer specific help, and ask for confirmation when they are done. Guide them naturally toward the next step when appropriate.

Be encouraging and professional. Use plain text only. Never use emojis or emoticons in your response."#;

/// Completion-provider verdict on whether a message is a guide request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IntentVerdict {
    is_process_request: bool,
    #[serde(default)]
    document_title: Option<String>,
    #[serde(default)]
    confidence: f64,
}

/// Cached outcome of intent detection for a (message, tenant) pair:
/// the id of the matched document, or `None` for "not a guide request".
#[derive(Debug, Clone)]
struct IntentOutcome {
    document_id: Option<String>,
}

pub struct GuidedEngine {
    completion: Arc<dyn CompletionProvider>,
    sessions: SessionStore,
    intent_cache: TtlCache<IntentOutcome>,
    config: GuidedConfig,
}

impl GuidedEngine {
    pub fn new(completion: Arc<dyn CompletionProvider>, config: GuidedConfig) -> Self {
        GuidedEngine {
            completion,
            sessions: SessionStore::new(),
            intent_cache: TtlCache::new(
                Duration::from_secs(config.intent_cache_ttl_secs),
                None,
            ),
            config,
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Entry point for guided-mode chat. Delegates to the active session
    /// when one exists, otherwise runs intent detection and either starts
    /// a session or falls through to the answer generator.
    #[allow(clippy::too_many_arguments)]
    pub async fn route(
        &self,
        store: &DocumentStore,
        embedder: &Embedder,
        config: &Config,
        query: &str,
        tenant_id: &str,
        user_id: &str,
        role: &str,
        history: &[HistoryTurn],
    ) -> Result<ChatResponse> {
        if query.trim().is_empty() {
            return Err(Error::validation("query must not be empty"));
        }
        if tenant_id.trim().is_empty() {
            return Err(Error::validation("tenant id must not be empty"));
        }

        if let Some(handle) = self.sessions.get(user_id) {
            let mut session = handle.lock().await;
            tracing::debug!(user = user_id, process = %session.process.title, "active guided session");
            let (response, delete_session) = self.handle_session(query, &mut session).await;
            drop(session);
            if delete_session {
                self.sessions.remove(user_id);
            }
            return Ok(response);
        }

        let matched = match self.detect_intent(store, query, tenant_id).await {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!(error = %e, "intent detection failed, treating as plain chat");
                None
            }
        };

        if let Some(doc) = matched {
            return Ok(self.start_session(user_id, doc).await);
        }

        let result = answer::generate_answer(
            store,
            embedder,
            self.completion.as_ref(),
            config,
            query,
            tenant_id,
            user_id,
            role,
            history,
        )
        .await?;
        Ok(ChatResponse::answer(result.text, result.sources))
    }

    /// Keyword screen, then a cached completion-provider classification.
    /// Returns the matched document when the message is a guide request.
    async fn detect_intent(
        &self,
        store: &DocumentStore,
        query: &str,
        tenant_id: &str,
    ) -> Result<Option<Document>> {
        let lower = query.to_lowercase();
        let cache_key = format!("{}::{}", lower.trim(), tenant_id);

        if let Some(outcome) = self.intent_cache.get(&cache_key) {
            tracing::debug!("intent cache hit");
            return match outcome.document_id {
                Some(id) => store.get(&id).await,
                None => Ok(None),
            };
        }

        if !GUIDE_KEYWORDS.iter().any(|k| lower.contains(k)) {
            self.intent_cache
                .insert(cache_key, IntentOutcome { document_id: None });
            return Ok(None);
        }

        let documents = store.list_documents(tenant_id, false).await?;
        if documents.is_empty() {
            self.intent_cache
                .insert(cache_key, IntentOutcome { document_id: None });
            return Ok(None);
        }

        let titles = documents
            .iter()
            .map(|d| format!("- {}", d.title))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "User message: \"{}\"\n\nAvailable process documents:\n{}",
            query, titles
        );

        let matched = match self
            .completion
            .complete(INTENT_SYSTEM_PROMPT, &[ChatMessage::user(prompt)])
            .await
        {
            Ok(raw) => match parse_intent_verdict(&raw) {
                Ok(verdict) => self.resolve_verdict(&verdict, &documents),
                Err(e) => {
                    tracing::warn!(error = %e, "intent verdict unparseable");
                    None
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "intent classification call failed");
                None
            }
        };

        self.intent_cache.insert(
            cache_key,
            IntentOutcome {
                document_id: matched.as_ref().map(|d| d.id.clone()),
            },
        );
        Ok(matched)
    }

    /// Map a verdict to a document: substring title match in either
    /// direction above the confidence threshold, or the first available
    /// document when confidence is high enough to act without a match.
    fn resolve_verdict(&self, verdict: &IntentVerdict, documents: &[Document]) -> Option<Document> {
        if !verdict.is_process_request || verdict.confidence <= self.config.intent_confidence {
            return None;
        }

        if let Some(named) = &verdict.document_title {
            let named_lower = named.to_lowercase();
            let matched = documents.iter().find(|d| {
                let title = d.title.to_lowercase();
                title.contains(&named_lower) || named_lower.contains(&title)
            });
            if let Some(doc) = matched {
                tracing::debug!(title = %doc.title, "guide request matched document");
                return Some(doc.clone());
            }
        }

        if verdict.confidence > self.config.fallback_confidence {
            tracing::debug!("no title match, falling back to first document");
            return documents.first().cloned();
        }

        None
    }

    /// Decompose the document and store a fresh session, replacing any
    /// existing one for the user. Never fails: decomposition errors
    /// degrade to the generic skeleton.
    async fn start_session(&self, user_id: &str, document: Document) -> ChatResponse {
        let process = match self
            .completion
            .complete(
                DECOMPOSE_SYSTEM_PROMPT,
                &[ChatMessage::user(document.content.clone())],
            )
            .await
        {
            Ok(raw) => parse_process_definition(&raw).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "decomposition unparseable, using skeleton");
                skeleton_process(&document.content)
            }),
            Err(e) => {
                tracing::warn!(error = %e, "decomposition call failed, using skeleton");
                skeleton_process(&document.content)
            }
        };

        tracing::info!(
            user = user_id,
            process = %process.title,
            steps = process.steps.len(),
            "starting guided session"
        );

        let session = GuidedSession::new(user_id.to_string(), document.id.clone(), process);
        let progress = session.progress();
        let first_step = session.current_step().clone();
        let process_title = session.process.title.clone();
        let welcome = welcome_message(&session);
        self.sessions.insert(session);

        ChatResponse {
            response: welcome,
            sources: vec![Source {
                id: document.id,
                title: document.title,
                content: answer::preview(&document.content, 150),
                tags: document.tags,
                relevance_score: 1.0,
            }],
            guided_mode: true,
            progress: Some(progress),
            current_step: Some(first_step),
            process_title: Some(process_title),
            step_completed: false,
            completed: false,
        }
    }

    /// Interpret a message addressed to an active session. Returns the
    /// reply and whether the session should be deleted.
    async fn handle_session(
        &self,
        query: &str,
        session: &mut GuidedSession,
    ) -> (ChatResponse, bool) {
        match SessionCommand::parse(query) {
            SessionCommand::Next => {
                if session.advance() {
                    let progress = session.progress();
                    let step = session.current_step().clone();
                    let text = format!(
                        "Moving to step {}/{}:\n\n{}",
                        progress.current_step,
                        progress.total_steps,
                        step_block(&step)
                    );
                    (ChatResponse::guided(text, progress, step), false)
                } else {
                    // Session persists after completion; only "stop"
                    // or the idle sweep removes it.
                    let mut response = ChatResponse::guided(
                        "Congratulations! You have completed all the steps of this process. Great job!"
                            .to_string(),
                        session.progress(),
                        session.current_step().clone(),
                    );
                    response.completed = true;
                    (response, false)
                }
            }
            SessionCommand::Previous => {
                if session.step_back() {
                    let progress = session.progress();
                    let step = session.current_step().clone();
                    let text = format!(
                        "Back to step {}/{}:\n\n{}\n\n{}",
                        progress.current_step, progress.total_steps, step.title, step.description
                    );
                    (ChatResponse::guided(text, progress, step), false)
                } else {
                    let response = ChatResponse::guided(
                        "You are already at the first step.".to_string(),
                        session.progress(),
                        session.current_step().clone(),
                    );
                    (response, false)
                }
            }
            SessionCommand::Stop => {
                let response = ChatResponse::answer(
                    "Guided session stopped. You can resume the process at any time by asking me for help."
                        .to_string(),
                    Vec::new(),
                );
                (response, true)
            }
            SessionCommand::CompleteStep => {
                session.mark_step_completed();
                if !session.is_last_step() {
                    let step = session.current_step().clone();
                    let mut response = ChatResponse::guided(
                        format!(
                            "Great! Step \"{}\" completed.\n\nWould you like to move to the next step? Say \"next\", or ask me a question about the current step.",
                            step.title
                        ),
                        session.progress(),
                        step,
                    );
                    response.step_completed = true;
                    (response, false)
                } else {
                    let mut response = ChatResponse::guided(
                        "Congratulations! You have successfully completed all the steps of this process."
                            .to_string(),
                        session.progress(),
                        session.current_step().clone(),
                    );
                    response.completed = true;
                    (response, false)
                }
            }
            SessionCommand::Question => {
                let step = session.current_step().clone();
                let progress = session.progress();
                let text = self.answer_step_question(query, session, &step).await;
                (ChatResponse::guided(text, progress, step), false)
            }
        }
    }

    /// Ask the completion provider a step-scoped question; on failure fall
    /// back to a templated restatement of the step.
    async fn answer_step_question(
        &self,
        query: &str,
        session: &GuidedSession,
        step: &ProcessStep,
    ) -> String {
        let progress = session.progress();
        let checkpoints = if step.checkpoints.is_empty() {
            "None".to_string()
        } else {
            step.checkpoints.join("\n- ")
        };
        let prompt = format!(
            "Process: {}\nCurrent step: {}/{}\nStep title: {}\nStep description: {}\nCheckpoints:\n- {}\n\nUser message: \"{}\"",
            session.process.title,
            progress.current_step,
            progress.total_steps,
            step.title,
            step.description,
            checkpoints,
            query
        );

        match self
            .completion
            .complete(GUIDED_STEP_SYSTEM_PROMPT, &[ChatMessage::user(prompt)])
            .await
        {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "step guidance call failed, using template");
                format!(
                    "For this step \"{}\": {}\n\nDo you have any specific questions? Say \"done\" when you are finished.",
                    step.title, step.description
                )
            }
        }
    }
}

fn step_block(step: &ProcessStep) -> String {
    let mut block = format!("{}\n\n{}", step.title, step.description);
    if !step.checkpoints.is_empty() {
        block.push_str("\n\nCheckpoints:\n- ");
        block.push_str(&step.checkpoints.join("\n- "));
    }
    block
}

fn welcome_message(session: &GuidedSession) -> String {
    let process = &session.process;
    let first = session.current_step();
    let total = process.steps.len();

    let mut message = format!(
        "Perfect! I will guide you step by step through: \"{}\"\n\nOverview: {}\nEstimated time: {}\nNumber of steps: {}\n\n---\n\nStep 1/{}: {}\n\n{}",
        process.title,
        process.description,
        process.estimated_duration.as_deref().unwrap_or("Variable"),
        total,
        total,
        first.title,
        first.description,
    );

    if !first.checkpoints.is_empty() {
        message.push_str("\n\nCheckpoints:\n- ");
        message.push_str(&first.checkpoints.join("\n- "));
    }
    if let Some(tips) = &first.tips {
        message.push_str(&format!("\n\nTip: {}", tips));
    }

    message.push_str(
        "\n\n---\n\nUseful commands:\n- Say \"next\" to go to the next step\n- Say \"previous\" to go back\n- Say \"stop\" to stop the guidance\n- Ask me questions about the current step\n\nReady to start?",
    );
    message
}

// ============ Decomposition parsing ============

/// Extract the outermost JSON object from completion output that may be
/// wrapped in code fences or prose.
fn extract_json(raw: &str) -> Result<&str> {
    let without_fences = raw.trim();
    let start = without_fences
        .find('{')
        .ok_or_else(|| Error::Decomposition("no JSON object in output".to_string()))?;
    let end = without_fences
        .rfind('}')
        .ok_or_else(|| Error::Decomposition("unterminated JSON object".to_string()))?;
    if end < start {
        return Err(Error::Decomposition("malformed JSON object".to_string()));
    }
    Ok(&without_fences[start..=end])
}

fn parse_intent_verdict(raw: &str) -> Result<IntentVerdict> {
    let json = extract_json(raw)?;
    serde_json::from_str(json).map_err(|e| Error::Decomposition(format!("intent verdict: {}", e)))
}

/// Parse decomposition output into a [`ProcessDefinition`], assigning
/// synthetic `step_N` ids where the provider omitted them. An empty step
/// list is an error; callers fall back to [`skeleton_process`].
pub fn parse_process_definition(raw: &str) -> Result<ProcessDefinition> {
    let json = extract_json(raw)?;
    let mut process: ProcessDefinition = serde_json::from_str(json)
        .map_err(|e| Error::Decomposition(format!("process definition: {}", e)))?;

    if process.steps.is_empty() {
        return Err(Error::Decomposition("process has no steps".to_string()));
    }

    for (i, step) in process.steps.iter_mut().enumerate() {
        if step.id.trim().is_empty() {
            step.id = format!("step_{}", i + 1);
        }
    }
    Ok(process)
}

/// Generic three-step process used when decomposition output cannot be
/// parsed, titled from the document's first line.
pub fn skeleton_process(content: &str) -> ProcessDefinition {
    let plain = strip_markup(content);
    let title = plain
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(|l| l.chars().take(50).collect::<String>())
        .unwrap_or_else(|| "Guided process".to_string());

    let step = |id: &str, title: &str, description: &str, time: &str| ProcessStep {
        id: id.to_string(),
        title: title.to_string(),
        description: description.to_string(),
        estimated_time: Some(time.to_string()),
        checkpoints: Vec::new(),
        tools: Vec::new(),
        tips: None,
    };

    ProcessDefinition {
        title,
        description: "Automatically extracted process".to_string(),
        estimated_duration: Some("Variable".to_string()),
        steps: vec![
            step(
                "step_1",
                "Preparation",
                "Prepare the necessary items for this process",
                "10 minutes",
            ),
            step(
                "step_2",
                "Execution",
                "Execute the main actions of the process",
                "20 minutes",
            ),
            step(
                "step_3",
                "Verification",
                "Check that everything has been done correctly",
                "5 minutes",
            ),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_definition_plain_json() {
        let raw = r#"{"title":"Onboarding","description":"d","estimatedDuration":"1h","steps":[{"id":"step_1","title":"A","description":"do a"}]}"#;
        let process = parse_process_definition(raw).unwrap();
        assert_eq!(process.title, "Onboarding");
        assert_eq!(process.steps.len(), 1);
    }

    #[test]
    fn test_parse_definition_strips_code_fences() {
        let raw = "```json\n{\"title\":\"T\",\"steps\":[{\"title\":\"A\",\"description\":\"d\"}]}\n```";
        let process = parse_process_definition(raw).unwrap();
        assert_eq!(process.title, "T");
        assert_eq!(process.steps[0].id, "step_1");
    }

    #[test]
    fn test_parse_definition_extracts_outermost_object() {
        let raw = "Here you go:\n{\"title\":\"T\",\"steps\":[{\"id\":\"s\",\"title\":\"A\",\"description\":\"d\"}]}\nHope that helps!";
        assert!(parse_process_definition(raw).is_ok());
    }

    #[test]
    fn test_parse_definition_assigns_missing_ids() {
        let raw = r#"{"title":"T","steps":[
            {"title":"A","description":"a"},
            {"id":"custom","title":"B","description":"b"},
            {"title":"C","description":"c"}
        ]}"#;
        let process = parse_process_definition(raw).unwrap();
        assert_eq!(process.steps[0].id, "step_1");
        assert_eq!(process.steps[1].id, "custom");
        assert_eq!(process.steps[2].id, "step_3");
    }

    #[test]
    fn test_parse_definition_rejects_empty_steps() {
        assert!(parse_process_definition(r#"{"title":"T","steps":[]}"#).is_err());
        assert!(parse_process_definition("not json at all").is_err());
    }

    #[test]
    fn test_skeleton_titled_from_first_line() {
        let process = skeleton_process("<h1>Customer Onboarding</h1><p>Body text</p>");
        assert_eq!(process.title, "Customer Onboarding");
        assert_eq!(process.steps.len(), 3);
        assert_eq!(process.steps[0].title, "Preparation");
        assert_eq!(process.steps[2].id, "step_3");
    }

    #[test]
    fn test_skeleton_empty_content() {
        let process = skeleton_process("");
        assert_eq!(process.title, "Guided process");
    }

    #[test]
    fn test_parse_intent_verdict() {
        let raw = "```json\n{\"isProcessRequest\": true, \"documentTitle\": \"Onboarding\", \"confidence\": 0.92}\n```";
        let verdict = parse_intent_verdict(raw).unwrap();
        assert!(verdict.is_process_request);
        assert_eq!(verdict.document_title.as_deref(), Some("Onboarding"));
        assert!((verdict.confidence - 0.92).abs() < 1e-9);
    }

    #[test]
    fn test_parse_intent_verdict_null_title() {
        let raw = r#"{"isProcessRequest": false, "documentTitle": null, "confidence": 0.1}"#;
        let verdict = parse_intent_verdict(raw).unwrap();
        assert!(!verdict.is_process_request);
        assert!(verdict.document_title.is_none());
    }
}
