pub mod deepgram;
pub mod rest;

pub use deepgram::{DeepgramStt, DeepgramTts};
pub use rest::ChatCompletionsAdapter;
