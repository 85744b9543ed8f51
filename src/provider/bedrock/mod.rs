//! AWS Bedrock Converse API, called through `aws-sdk-bedrockruntime`.

mod client;
mod document;
mod error;
mod provider;
mod request;
mod response;
mod stream;
mod types;

pub use provider::BedrockProvider;
