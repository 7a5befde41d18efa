//! Search Module
//!
//! Web and academic search used to ground sub-question answers. SerpAPI is
//! the backend for both Google Scholar and Google Light.

pub mod serpapi;

pub use serpapi::{SearchBackend, SearchError, SearchHit, SearchSource, SerpApiClient};
