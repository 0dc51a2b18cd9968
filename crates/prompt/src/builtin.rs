//! Built-in prompt definitions.

use crate::types::PromptDefinition;

/// Condense-question prompt used to rewrite follow-ups.
pub const REWRITE_PROMPT_ID: &str = "rag.rewrite";

/// Grounded answer prompt.
pub const ANSWER_PROMPT_ID: &str = "rag.answer";

/// Fixed reply when the context cannot support an answer.
pub const INSUFFICIENT_ANSWER: &str = "I don't have enough information to answer that question.";

const REWRITE_TEMPLATE: &str = "\
Given the following conversation and a follow up question, rephrase the follow up question \
to be a standalone question, in its original language. Do not answer the question. If it \
is already standalone, return it unchanged.

Chat History:
{{#each history}}
{{role}}: {{content}}
{{/each}}
Follow Up Input: {{question}}
Standalone question:";

const ANSWER_SYSTEM: &str = "\
You answer questions using only the numbered context passages supplied with each question. \
Cite every passage you rely on with its number in square brackets, for example [1] or [2][3]. \
Do not use outside knowledge. If the passages do not contain the answer, reply exactly: \
\"I don't have enough information to answer that question.\"";

const ANSWER_TEMPLATE: &str = "\
{{#if context}}
Context:
{{#each context}}
[{{number}}] (source: {{source}})
{{text}}

{{/each}}
{{else}}
No context passages were found for this question. Reply exactly with: \"{{insufficient}}\"
{{/if}}
Question: {{question}}";

/// Look up a built-in prompt by id.
pub fn builtin_prompt(id: &str) -> Option<PromptDefinition> {
    let (title, system, template) = match id {
        REWRITE_PROMPT_ID => ("Condense follow-up question", None, REWRITE_TEMPLATE),
        ANSWER_PROMPT_ID => ("Grounded answer", Some(ANSWER_SYSTEM), ANSWER_TEMPLATE),
        _ => return None,
    };

    Some(PromptDefinition {
        id: id.to_string(),
        title: title.to_string(),
        api_version: "1.0".to_string(),
        created_by: "ragchat".to_string(),
        system: system.map(str::to_string),
        template: template.to_string(),
    })
}
