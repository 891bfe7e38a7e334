//! Pluggable provider backends
//!
//! Both cascades (evidence search and draft generation) are expressed as
//! prioritized lists of trait objects tried in order, so the pipeline code is
//! uniform over real HTTP clients and test fakes.

pub mod generate;
pub mod prompt;
pub mod search;
pub mod synthesizer;

pub use generate::{DraftProvider, DraftRequest, HostedLlmClient, LocalModelClient, ProviderKind};
pub use prompt::PromptVersion;
pub use search::{EncyclopediaClient, SearchHit, SearchProvider, WebSearchClient};
pub use synthesizer::LocalSynthesizer;
