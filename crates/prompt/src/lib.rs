//! Prompt system for ragchat.
//!
//! This crate provides the prompts sent to the generation model:
//! - Built-in condense-question and grounded-answer templates
//! - YAML overrides from `.ragchat/prompts/<id>.yml`
//! - Handlebars rendering with numbered context passages

pub mod builder;
pub mod builtin;
pub mod loader;
pub mod types;

pub use builder::{build_answer_prompt, build_prompt, build_rewrite_prompt};
pub use builtin::{ANSWER_PROMPT_ID, INSUFFICIENT_ANSWER, REWRITE_PROMPT_ID};
pub use loader::{list_prompts, load_prompt, PromptSet};
pub use types::{BuiltPrompt, BuiltPromptMetadata, ContextPassage, HistoryLine, PromptDefinition};
