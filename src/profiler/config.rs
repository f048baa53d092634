use std::fmt;
use std::ops::BitOr;
use std::str::FromStr;
use serde::{Deserialize, Serialize};
use crate::error::MlError;

/// Profiling flags of a model.
///
/// Flags combine with `|`. Bits outside the known set are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProfileConfig(u32);

impl ProfileConfig {
    pub const DISABLE: Self = Self(0);
    /// Count cycles of each complete run
    pub const ENABLE_MODEL: Self = Self(1);
    /// Count cycles of each layer
    pub const ENABLE_LAYER: Self = Self(2);
    /// Log model cycles after every frame
    pub const ENABLE_MODEL_PER_FRAME: Self = Self(4);
    /// Log layer cycles after every frame
    pub const ENABLE_LAYER_PER_FRAME: Self = Self(8);
    /// Log the output values of every run
    pub const LOG_ENABLE_MODEL_LOG: Self = Self(16);

    const ALL: u32 = 0x1F;

    const NAMES: [(&'static str, ProfileConfig); 5] = [
        ("model", Self::ENABLE_MODEL),
        ("layer", Self::ENABLE_LAYER),
        ("model_per_frame", Self::ENABLE_MODEL_PER_FRAME),
        ("layer_per_frame", Self::ENABLE_LAYER_PER_FRAME),
        ("output_log", Self::LOG_ENABLE_MODEL_LOG),
    ];

    pub fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & Self::ALL)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, other: Self) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    pub fn is_disabled(&self) -> bool {
        self.0 == 0
    }

    /// Whether any cycle counting is on
    pub fn counts_cycles(&self) -> bool {
        self.contains(Self::ENABLE_MODEL) || self.contains(Self::ENABLE_LAYER)
    }
}

impl BitOr for ProfileConfig {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Parses a comma separated list such as `model,layer_per_frame`, or
/// `disable`.
impl FromStr for ProfileConfig {
    type Err = MlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut config = Self::DISABLE;
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            if part.eq_ignore_ascii_case("disable") {
                continue;
            }
            let flag = Self::NAMES
                .iter()
                .find(|(name, _)| part.eq_ignore_ascii_case(name))
                .map(|(_, flag)| *flag)
                .ok_or_else(|| MlError::InvalidArgument(format!("Unknown profile flag: {}", part)))?;
            config = config | flag;
        }
        Ok(config)
    }
}

impl fmt::Display for ProfileConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_disabled() {
            return write!(f, "disable");
        }
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(_, flag)| self.contains(*flag))
            .map(|(name, _)| *name)
            .collect();
        write!(f, "{}", names.join(","))
    }
}

impl TryFrom<String> for ProfileConfig {
    type Error = MlError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ProfileConfig> for String {
    fn from(value: ProfileConfig) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_combine() {
        let config = ProfileConfig::ENABLE_MODEL | ProfileConfig::ENABLE_LAYER_PER_FRAME;
        assert_eq!(config.bits(), 9);
        assert!(config.contains(ProfileConfig::ENABLE_MODEL));
        assert!(!config.contains(ProfileConfig::ENABLE_LAYER));
        assert!(!config.contains(ProfileConfig::DISABLE));
        assert!(config.counts_cycles());
    }

    #[test]
    fn test_unknown_bits_dropped() {
        assert_eq!(ProfileConfig::from_bits_truncate(0xFF).bits(), 0x1F);
        assert!(ProfileConfig::from_bits_truncate(0x40).is_disabled());
    }

    #[test]
    fn test_parse_and_display() {
        let config: ProfileConfig = "model, output_log".parse().unwrap();
        assert_eq!(config, ProfileConfig::ENABLE_MODEL | ProfileConfig::LOG_ENABLE_MODEL_LOG);
        assert_eq!(config.to_string(), "model,output_log");
        assert_eq!("disable".parse::<ProfileConfig>().unwrap(), ProfileConfig::DISABLE);
        assert!("cycles".parse::<ProfileConfig>().is_err());
    }
}
