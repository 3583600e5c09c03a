//! Enumeration types for decoder configuration.
//!
//! Both enums are selected by name in configuration files, so they parse from
//! the lowercase strings used there.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::DecoderError;

/// Defines the decoder architecture selected by `decoder.decoder_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecoderType {
    /// No decoder; backbone features are used directly.
    Identity,
    /// Feature Pyramid Network.
    Fpn,
    /// Feature pyramid found by neural architecture search.
    NasFpn,
    /// Atrous Spatial Pyramid Pooling.
    Aspp,
    /// Multi-resolution feature maps (SSD-style).
    Mrfm,
}

impl DecoderType {
    /// All known decoder types.
    pub const ALL: [Self; 5] = [Self::Identity, Self::Fpn, Self::NasFpn, Self::Aspp, Self::Mrfm];

    /// The discriminator string of this decoder type.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Fpn => "fpn",
            Self::NasFpn => "nasfpn",
            Self::Aspp => "aspp",
            Self::Mrfm => "mrfm",
        }
    }
}

impl fmt::Display for DecoderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DecoderType {
    type Err = DecoderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|decoder| decoder.as_str() == s)
            .ok_or_else(|| DecoderError::UnknownDecoder {
                decoder: s.to_string(),
            })
    }
}

/// Defines the activation applied after normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationKind {
    /// `max(x, 0)`.
    Relu,
    /// `min(max(x, 0), 6)`.
    Relu6,
    /// `x * sigmoid(x)`, also known as SiLU.
    Swish,
    /// `x * relu6(x + 3) / 6`.
    HardSwish,
    /// Logistic sigmoid.
    Sigmoid,
    /// Gaussian error linear unit.
    Gelu,
    /// No activation.
    Linear,
}

impl FromStr for ActivationKind {
    type Err = DecoderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "relu" => Ok(Self::Relu),
            "relu6" => Ok(Self::Relu6),
            "swish" | "silu" => Ok(Self::Swish),
            "hard_swish" => Ok(Self::HardSwish),
            "sigmoid" => Ok(Self::Sigmoid),
            "gelu" => Ok(Self::Gelu),
            "linear" | "identity" => Ok(Self::Linear),
            _ => Err(DecoderError::UnsupportedActivation {
                activation: s.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_type_round_trips_through_its_name() {
        for decoder in DecoderType::ALL {
            assert_eq!(decoder.as_str().parse::<DecoderType>().unwrap(), decoder);
        }
    }

    #[test]
    fn decoder_type_is_case_sensitive() {
        match "FPN".parse::<DecoderType>() {
            Err(DecoderError::UnknownDecoder { decoder }) => assert_eq!(decoder, "FPN"),
            other => panic!("Expected UnknownDecoder error, got {other:?}"),
        }
    }

    #[test]
    fn activation_aliases() {
        assert_eq!("silu".parse::<ActivationKind>().unwrap(), ActivationKind::Swish);
        assert_eq!("identity".parse::<ActivationKind>().unwrap(), ActivationKind::Linear);
        assert!(matches!(
            "tanh".parse::<ActivationKind>(),
            Err(DecoderError::UnsupportedActivation { .. })
        ));
    }
}
