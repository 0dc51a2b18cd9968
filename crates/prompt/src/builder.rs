//! Prompt builder for rendering templates.

use crate::builtin::INSUFFICIENT_ANSWER;
use crate::types::{BuiltPrompt, ContextPassage, HistoryLine, PromptDefinition};
use handlebars::Handlebars;
use ragchat_core::{AppError, AppResult};
use serde_json::{json, Value};
use std::collections::HashMap;

/// Build a prompt from a definition and template data.
///
/// `data` must be a JSON object; its string-valued fields are recorded in
/// the prompt metadata. Arrays and nested objects are available to the
/// template but not recorded.
///
/// # Example
/// ```no_run
/// use ragchat_prompt::{build_prompt, PromptDefinition};
///
/// # fn example(def: PromptDefinition) -> Result<(), Box<dyn std::error::Error>> {
/// let data = serde_json::json!({ "question": "What is Rust?" });
/// let built = build_prompt(&def, &data)?;
/// println!("User prompt: {}", built.user);
/// # Ok(())
/// # }
/// ```
pub fn build_prompt(definition: &PromptDefinition, data: &Value) -> AppResult<BuiltPrompt> {
    tracing::debug!("Building prompt: {}", definition.id);

    let object = data
        .as_object()
        .ok_or_else(|| AppError::Prompt("Prompt data must be an object".to_string()))?;

    let user = render_template(&definition.template, data)?;
    let system = definition
        .system
        .as_deref()
        .map(|s| render_template(s, data))
        .transpose()?;

    let resolved: HashMap<String, String> = object
        .iter()
        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
        .collect();

    let context_passages = object
        .get("context")
        .and_then(Value::as_array)
        .map(Vec::len)
        .unwrap_or(0);

    Ok(BuiltPrompt::new(
        system,
        user,
        definition.id.clone(),
        context_passages,
        resolved,
    ))
}

/// Build the condense-question prompt for a follow-up.
pub fn build_rewrite_prompt(
    definition: &PromptDefinition,
    history: &[HistoryLine],
    question: &str,
) -> AppResult<BuiltPrompt> {
    build_prompt(
        definition,
        &json!({
            "history": history,
            "question": question,
        }),
    )
}

/// Build the grounded answer prompt.
///
/// `question` is the user's original wording, never the rewritten one.
/// An empty `context` renders the instruction to reply with
/// [`INSUFFICIENT_ANSWER`].
pub fn build_answer_prompt(
    definition: &PromptDefinition,
    context: &[ContextPassage],
    history: &[HistoryLine],
    question: &str,
) -> AppResult<BuiltPrompt> {
    build_prompt(
        definition,
        &json!({
            "context": context,
            "history": history,
            "question": question,
            "insufficient": INSUFFICIENT_ANSWER,
        }),
    )
}

/// Render a Handlebars template with variables.
fn render_template(template: &str, data: &Value) -> AppResult<String> {
    let mut handlebars = Handlebars::new();

    // Plain text, not HTML
    handlebars.register_escape_fn(handlebars::no_escape);

    handlebars
        .register_template_string("prompt", template)
        .map_err(|e| AppError::Prompt(format!("Failed to register template: {}", e)))?;

    let rendered = handlebars
        .render("prompt", data)
        .map_err(|e| AppError::Prompt(format!("Failed to render template: {}", e)))?;

    Ok(rendered)
}
