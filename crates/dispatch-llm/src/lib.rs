//! Language-model provider implementations.
//!
//! [`AnthropicProvider`] speaks the Messages streaming API over HTTP;
//! [`MockProvider`] replays scripted responses for tests.

pub mod converter;
pub mod mock;
pub mod models;
pub mod provider;
pub mod sse;

pub use mock::{MockProvider, MockResponse};
pub use models::{cost_of, default_model_for, find_model, ModelPricing};
pub use provider::{AnthropicProvider, DEFAULT_BASE_URL};
