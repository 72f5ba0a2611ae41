//! Generator collaborator: the external model behind a narrow interface,
//! plus the retry policy applied around it.

#![warn(missing_docs)]

mod error;
mod openai;
mod retry;
mod traits;

pub use error::GenerateError;
pub use openai::{OpenAiConfig, OpenAiGenerator};
pub use retry::RetryPolicy;
pub use traits::Generator;
