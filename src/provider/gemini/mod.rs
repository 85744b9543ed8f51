//! Google Gemini generateContent API.

mod error;
mod provider;
mod request;
mod response;
mod stream;
mod types;

pub use provider::GeminiProvider;
