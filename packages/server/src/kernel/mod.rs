// Kernel - core infrastructure with dependency injection
//
// ServerDeps holds the external services (places provider, scraper, LLM,
// store, event hub) behind traits for testability.
//
// IMPORTANT: Kernel is for INFRASTRUCTURE only, not business logic.
// Business logic belongs in domain layers.

pub mod ai;
pub mod deps;
pub mod llm_request;
pub mod places_client;
pub mod simple_scraper;
pub mod stream_hub;
pub mod test_dependencies;
pub mod traits;

pub use ai::{ClaudeClient, NoopAI};
pub use deps::ServerDeps;
pub use llm_request::{LlmRequest, LlmRequestError, LlmRequestExt};
pub use places_client::{GooglePlacesClient, NoopPlacesSearch};
pub use simple_scraper::SimpleScraper;
pub use stream_hub::StreamHub;
pub use test_dependencies::{
    MemoryPantryStore, MemoryPlacesCache, MockAI, MockPlacesSearch, MockScraper, TestDependencies,
};
pub use traits::*;
