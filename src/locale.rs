// src/locale.rs
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::utils::error::Error;

/// A supported UI language. The set is closed: anything else is rejected at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    Ar,
    En,
    Fr,
    Es,
    De,
    Pt,
    It,
    Tr,
}

/// Text layout direction. Always derived from a [`Locale`], never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Rtl,
    Ltr,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Rtl => "rtl",
            Direction::Ltr => "ltr",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Locale {
    pub const ALL: [Locale; 8] = [
        Locale::Ar,
        Locale::En,
        Locale::Fr,
        Locale::Es,
        Locale::De,
        Locale::Pt,
        Locale::It,
        Locale::Tr,
    ];

    pub fn code(self) -> &'static str {
        match self {
            Locale::Ar => "ar",
            Locale::En => "en",
            Locale::Fr => "fr",
            Locale::Es => "es",
            Locale::De => "de",
            Locale::Pt => "pt",
            Locale::It => "it",
            Locale::Tr => "tr",
        }
    }

    pub fn direction(self) -> Direction {
        match self {
            Locale::Ar => Direction::Rtl,
            _ => Direction::Ltr,
        }
    }

    /// Lenient match for platform tags such as `ar-SA`, `en_US.UTF-8` or `pt-BR`.
    ///
    /// Only the primary language subtag is considered. Used for system locale
    /// detection, never for values a caller hands to the manager.
    pub fn from_tag(tag: &str) -> Option<Locale> {
        let primary = tag
            .trim()
            .split(|c: char| matches!(c, '-' | '_' | '.' | '@'))
            .next()
            .unwrap_or_default();
        primary.parse().ok()
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Locale {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        Locale::ALL
            .into_iter()
            .find(|locale| locale.code() == normalized)
            .ok_or_else(|| Error::InvalidLocale(s.to_string()))
    }
}

/// Detect the operating system locale and map it onto the supported set.
pub fn detect_system_locale() -> Option<Locale> {
    sys_locale::get_locale().and_then(|tag| Locale::from_tag(&tag))
}
