//! Engine error type.
//!
//! Configuration problems get their own variants; anything raised by a
//! decoder or renderer plugin is forwarded verbatim inside the matching
//! variant.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlayerError {
    /// No registered decoder handles the file's suffix.
    #[error("no decoder registered for file suffix `{0}`")]
    NoDecoder(String),

    /// No renderer plugin has been set.
    #[error("no renderer plugin is set")]
    NoRenderer,

    /// The decoder plugin reported an error.
    #[error("decoder error: {0:#}")]
    Decoder(anyhow::Error),

    /// The renderer plugin reported an error.
    #[error("renderer error: {0:#}")]
    Renderer(anyhow::Error),
}
