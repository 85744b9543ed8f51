//! OpenAI Chat Completions and the OpenAI-compatible vendors (Groq, Mistral, OpenRouter).

mod error;
mod provider;
mod response;
mod stream;
mod types;

pub use provider::OpenAiProvider;
