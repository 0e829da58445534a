use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Model capability/cost level. The derived ordering is the cap order:
/// `Cheap < Mid < Deep`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Cheap,
    Mid,
    Deep,
}

impl ModelTier {
    pub const ALL: [ModelTier; 3] = [ModelTier::Cheap, ModelTier::Mid, ModelTier::Deep];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cheap => "cheap",
            Self::Mid => "mid",
            Self::Deep => "deep",
        }
    }

    /// How much of the assembled context survives compression at this tier.
    pub fn detail_level(&self) -> DetailLevel {
        match self {
            Self::Cheap => DetailLevel::Summary,
            Self::Mid => DetailLevel::Standard,
            Self::Deep => DetailLevel::Full,
        }
    }

    /// Apply an optional cap. Never raises the tier.
    pub fn capped(self, cap: Option<ModelTier>) -> ModelTier {
        match cap {
            Some(cap) => self.min(cap),
            None => self,
        }
    }
}

impl fmt::Display for ModelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelTier {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cheap" => Ok(Self::Cheap),
            "mid" => Ok(Self::Mid),
            "deep" => Ok(Self::Deep),
            other => Err(format!("unknown model tier: {other}")),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum DetailLevel {
    Summary,
    Standard,
    Full,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_are_totally_ordered() {
        assert!(ModelTier::Cheap < ModelTier::Mid);
        assert!(ModelTier::Mid < ModelTier::Deep);
        assert_eq!(ModelTier::ALL.iter().max(), Some(&ModelTier::Deep));
    }

    #[test]
    fn cap_never_raises() {
        for tier in ModelTier::ALL {
            assert_eq!(tier.capped(None), tier);
            for cap in ModelTier::ALL {
                let effective = tier.capped(Some(cap));
                assert!(effective <= tier);
                assert!(effective <= cap);
            }
        }
    }

    #[test]
    fn detail_levels_follow_tiers() {
        assert_eq!(ModelTier::Cheap.detail_level(), DetailLevel::Summary);
        assert_eq!(ModelTier::Mid.detail_level(), DetailLevel::Standard);
        assert_eq!(ModelTier::Deep.detail_level(), DetailLevel::Full);
    }

    #[test]
    fn parse_and_display_agree() {
        for tier in ModelTier::ALL {
            assert_eq!(tier.to_string().parse::<ModelTier>().unwrap(), tier);
        }
        assert!("ultra".parse::<ModelTier>().is_err());
    }

    #[test]
    fn serde_snake_case() {
        assert_eq!(serde_json::to_string(&ModelTier::Mid).unwrap(), r#""mid""#);
    }
}
