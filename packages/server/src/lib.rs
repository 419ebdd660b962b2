// Pantry Atlas - API Core
//
// Backend for discovering and enriching food pantries: a places-search
// provider feeds a scrape + LLM-extract pipeline, validated records land in a
// geospatially indexed Postgres store, and per-job progress streams to
// subscribers over SSE.

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;
pub mod server;

pub use config::*;
