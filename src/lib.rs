//! LLM 多后端统一调用库
//!
//! One [`LLM`] instance is bound to one provider. Requests use the chat-completion
//! shape ([`CompletionRequest`]); responses and stream chunks are normalized into
//! [`CompletionResponse`] and [`CompletionResponseChunk`], with
//! [`FinishReason::Unknown`] standing in for a missing or unrecognized finish reason.
//!
//! ```no_run
//! use polyllm::{ChatCompletionMessageParam, CompletionRequest, ConfigOptions, LLM, ProviderKind};
//!
//! # async fn run() -> Result<(), polyllm::LLMError> {
//! let llm = LLM::new(ConfigOptions::new(ProviderKind::OpenAi, "sk-..."))?;
//! let response = llm
//!     .create_completion(CompletionRequest::new(
//!         "gpt-4o-mini",
//!         vec![ChatCompletionMessageParam::user("hi")],
//!     ))
//!     .await?;
//! println!("{:?}", response.first_text());
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod provider;
pub mod stream;
pub mod types;

pub use client::{Completion, LLM};
pub use config::{BedrockOptions, ConfigOptions, ProviderKind};
pub use error::{LLMError, ProviderErrorKind};
pub use provider::LLMProvider;
pub use stream::StreamCompletionResponse;
pub use types::*;
