//! Reset frequency values

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::DomainError;

/// How often a usage state is restored to the full allowance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResetFrequency {
    #[serde(rename = "every second")]
    EverySecond,
    #[serde(rename = "every minute")]
    EveryMinute,
    #[serde(rename = "every hour")]
    EveryHour,
    #[serde(rename = "every day")]
    EveryDay,
    #[serde(rename = "every week")]
    EveryWeek,
    #[serde(rename = "every two weeks")]
    EveryTwoWeeks,
    #[serde(rename = "every month")]
    EveryMonth,
    #[serde(rename = "every quarter")]
    EveryQuarter,
    #[serde(rename = "every six months")]
    EverySixMonths,
    #[serde(rename = "every year")]
    EveryYear,
    #[serde(rename = "never")]
    Never,
}

impl ResetFrequency {
    /// Every accepted value, in ascending period length
    pub const ALL: [ResetFrequency; 11] = [
        Self::EverySecond,
        Self::EveryMinute,
        Self::EveryHour,
        Self::EveryDay,
        Self::EveryWeek,
        Self::EveryTwoWeeks,
        Self::EveryMonth,
        Self::EveryQuarter,
        Self::EverySixMonths,
        Self::EveryYear,
        Self::Never,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EverySecond => "every second",
            Self::EveryMinute => "every minute",
            Self::EveryHour => "every hour",
            Self::EveryDay => "every day",
            Self::EveryWeek => "every week",
            Self::EveryTwoWeeks => "every two weeks",
            Self::EveryMonth => "every month",
            Self::EveryQuarter => "every quarter",
            Self::EverySixMonths => "every six months",
            Self::EveryYear => "every year",
            Self::Never => "never",
        }
    }

    /// Parses an optional raw value. Blank input means "not set".
    pub fn parse_optional(raw: Option<&str>) -> Result<Option<Self>, DomainError> {
        match raw {
            Some(value) if !value.trim().is_empty() => value.parse().map(Some),
            _ => Ok(None),
        }
    }

    /// Whether usage states under this frequency ever reset on a schedule
    pub fn is_scheduled(&self) -> bool {
        !matches!(self, Self::Never)
    }

    fn allowed_values() -> String {
        Self::ALL
            .iter()
            .map(|f| f.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl FromStr for ResetFrequency {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| {
                DomainError::invalid_argument(format!(
                    "Invalid reset frequency '{}'. Value should be one of the following: {}",
                    s,
                    Self::allowed_values()
                ))
            })
    }
}

impl std::fmt::Display for ResetFrequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
