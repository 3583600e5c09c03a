use thiserror::Error;

/// The error type for decoder construction and execution.
///
/// Construction is the only place configuration is interpreted, so almost
/// every variant is raised by a `*Config::init` or by the factory.
#[derive(Error, Debug)]
pub enum DecoderError {
    /// The decoder discriminator matched none of the known decoder types.
    #[error("Decoder '{decoder}' not implemented")]
    UnknownDecoder {
        /// The unrecognized discriminator.
        decoder: String,
    },

    /// The activation name is not one of the supported activations.
    #[error("Unsupported activation: {activation}")]
    UnsupportedActivation {
        /// The unrecognized activation name.
        activation: String,
    },

    /// Configuration parameters are missing or logically inconsistent.
    #[error("Invalid decoder configuration: {reason}")]
    InvalidConfiguration {
        /// The reason why the configuration is invalid.
        reason: String,
    },

    /// A feature level required by the decoder was not provided.
    #[error("Missing feature level: {level}")]
    MissingFeatureLevel {
        /// The key of the missing level.
        level: String,
    },
}

/// A specialized `Result` type for decoder operations.
pub type DecoderResult<T> = Result<T, DecoderError>;
