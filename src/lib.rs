//! Client core of a customer-support chat: message list, submission,
//! speech synthesis and the single audio slot of the chat view.

pub mod audio;
pub mod audio_source;
pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod markup;
pub mod notifications;
pub mod playback;
pub mod store;
pub mod submit;
pub mod tts;
pub mod types;

#[cfg(feature = "ui")]
pub mod ui;
#[cfg(feature = "ui")]
pub mod views;

pub use error::{ChatError, ChatResult};
