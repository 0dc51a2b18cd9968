//! Retrieval-augmented question answering over a document index.
//!
//! Documents are parsed, split into overlapping chunks, embedded and stored
//! in a [`VectorIndexClient`]. Questions run through a per-session
//! [`RagPipeline`] turn: an optional standalone rewrite of follow-ups,
//! retrieval, then grounded, streamed generation with citations.
//!
//! [`ChatService`] wires everything from an [`ragchat_core::AppConfig`].

pub mod chunker;
pub mod conversation;
pub mod embeddings;
pub mod ingest;
pub mod local_index;
pub mod parser;
pub mod pinecone_index;
pub mod progress;
pub mod rag;
pub mod reranker;
pub mod retriever;
pub mod retry;
pub mod service;
pub mod session;
pub mod types;
pub mod vector_index;

#[cfg(test)]
mod testing;

pub use chunker::chunk_document;
pub use conversation::ConversationState;
pub use embeddings::{create_provider, EmbeddingConfig, EmbeddingProvider};
pub use ingest::{IngestOptions, IngestSummary, Ingester, SkippedFile};
pub use local_index::LocalVectorIndex;
pub use pinecone_index::PineconeIndex;
pub use progress::{IngestPhase, ProgressEvent, ProgressReporter};
pub use rag::{RagPipeline, TurnEvent, TurnPhase};
pub use reranker::{Reranker, TermOverlapReranker};
pub use retriever::Retriever;
pub use service::ChatService;
pub use session::{SessionRegistry, TurnHandle};
pub use types::{
    AnswerResult, Chunk, ConversationRole, ConversationTurn, Document, EmbeddingVector,
    IndexEntry, IndexStats, IngestReceipt, RetrievedContext, ScoredChunk,
};
pub use vector_index::VectorIndexClient;
