pub mod converter;
pub mod mock;
pub mod provider;
pub mod sse;
pub mod types;

pub use mock::{MockProvider, MockResponse};
pub use provider::{GeminiAuth, GeminiConfig, GeminiEndpoint, GeminiProvider};
