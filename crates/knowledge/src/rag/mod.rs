//! RAG (Retrieval-Augmented Generation) answering.
//!
//! One conversational turn runs through rewrite, retrieval and grounded
//! generation; see [`pipeline::RagPipeline`].

pub mod citations;
pub mod pipeline;

pub use citations::select_sources;
pub use pipeline::{RagPipeline, TurnEvent, TurnPhase};
