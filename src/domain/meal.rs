use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Meal Value Objects - shared by orders, catalog, timing and subscriptions
// ============================================================================

/// Raised when a client-supplied enum string has no canonical counterpart.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("unknown {kind} value: {value:?}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Upper-cases and folds `-` / spaces into `_` so "eco-friendly" == "ECO_FRIENDLY".
fn canonical(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| match c {
            '-' | ' ' => '_',
            other => other.to_ascii_uppercase(),
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MealType {
    Lunch,
    Dinner,
}

impl MealType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MealType::Lunch => "LUNCH",
            MealType::Dinner => "DINNER",
        }
    }
}

impl fmt::Display for MealType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MealType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match canonical(s).as_str() {
            "LUNCH" => Ok(MealType::Lunch),
            "DINNER" => Ok(MealType::Dinner),
            _ => Err(UnknownVariant {
                kind: "meal type",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PackagingType {
    #[default]
    Standard,
    EcoFriendly,
    Premium,
}

impl PackagingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackagingType::Standard => "STANDARD",
            PackagingType::EcoFriendly => "ECO_FRIENDLY",
            PackagingType::Premium => "PREMIUM",
        }
    }
}

impl fmt::Display for PackagingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PackagingType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match canonical(s).as_str() {
            "STANDARD" => Ok(PackagingType::Standard),
            "ECO_FRIENDLY" | "ECOFRIENDLY" => Ok(PackagingType::EcoFriendly),
            "PREMIUM" => Ok(PackagingType::Premium),
            _ => Err(UnknownVariant {
                kind: "packaging type",
                value: s.to_string(),
            }),
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meal_type_parsing_is_case_insensitive() {
        assert_eq!("lunch".parse::<MealType>().unwrap(), MealType::Lunch);
        assert_eq!(" Dinner ".parse::<MealType>().unwrap(), MealType::Dinner);
        assert_eq!("LUNCH".parse::<MealType>().unwrap(), MealType::Lunch);
    }

    #[test]
    fn test_unknown_meal_type_rejected() {
        let err = "brunch".parse::<MealType>().unwrap_err();
        assert_eq!(err.kind, "meal type");
        assert_eq!(err.value, "brunch");
    }

    #[test]
    fn test_packaging_accepts_separator_variants() {
        assert_eq!("eco-friendly".parse::<PackagingType>().unwrap(), PackagingType::EcoFriendly);
        assert_eq!("eco_friendly".parse::<PackagingType>().unwrap(), PackagingType::EcoFriendly);
        assert_eq!("premium".parse::<PackagingType>().unwrap(), PackagingType::Premium);
        assert!("plastic".parse::<PackagingType>().is_err());
    }

    #[test]
    fn test_meal_type_serializes_canonically() {
        assert_eq!(serde_json::to_string(&MealType::Dinner).unwrap(), "\"DINNER\"");
        assert_eq!(
            serde_json::to_string(&PackagingType::EcoFriendly).unwrap(),
            "\"ECO_FRIENDLY\""
        );
    }
}
