// src/translations.rs
use crate::locale::Locale;
use crate::utils::error::Error;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

const BUNDLED_TABLE: &str = include_str!("../locales/app.yml");

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([^{}]+)\}").expect("placeholder pattern is valid"));

/// A value substituted into a `{name}` placeholder.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum ParamValue {
    String(String),
    Integer(i64),
    Float(f64),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::String(s) => write!(f, "{}", s),
            ParamValue::Integer(i) => write!(f, "{}", i),
            ParamValue::Float(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::String(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::String(s)
    }
}

impl From<i64> for ParamValue {
    fn from(i: i64) -> Self {
        ParamValue::Integer(i)
    }
}

impl From<i32> for ParamValue {
    fn from(i: i32) -> Self {
        ParamValue::Integer(i.into())
    }
}

impl From<u32> for ParamValue {
    fn from(i: u32) -> Self {
        ParamValue::Integer(i.into())
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

pub type Params = HashMap<String, ParamValue>;

/// Build a [`Params`] map from `name => value` pairs.
#[macro_export]
macro_rules! params {
    () => {
        $crate::translations::Params::new()
    };
    ($($name:expr => $value:expr),+ $(,)?) => {{
        let mut params = $crate::translations::Params::new();
        $(params.insert(($name).to_string(), $crate::translations::ParamValue::from($value));)+
        params
    }};
}

/// Replace every `{name}` whose name is in `params`. Unknown placeholders stay verbatim.
pub fn interpolate(template: &str, params: &Params) -> String {
    if params.is_empty() {
        return template.to_string();
    }
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| match params.get(&caps[1]) {
            Some(value) => value.to_string(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Lookup order after the active locale misses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackChain {
    pub default: Locale,
    pub secondary: Locale,
}

impl FallbackChain {
    pub fn new(default: Locale, secondary: Locale) -> Self {
        Self { default, secondary }
    }

    /// `current`, then `default`, then `secondary`, without repeats.
    pub fn candidates(&self, current: Locale) -> Vec<Locale> {
        let mut chain = Vec::with_capacity(3);
        for locale in [current, self.default, self.secondary] {
            if !chain.contains(&locale) {
                chain.push(locale);
            }
        }
        chain
    }
}

/// Where a translated string came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Active,
    Fallback(Locale),
    RawKey,
}

/// Static `Locale -> key -> string` data. Never mutated after construction.
#[derive(Debug, Clone, Default)]
pub struct TranslationTable {
    entries: HashMap<Locale, HashMap<String, String>>,
}

impl TranslationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Strings shipped with the crate.
    pub fn bundled() -> Self {
        match Self::from_yaml_str(BUNDLED_TABLE) {
            Ok(table) => table,
            Err(e) => {
                warn!("Bundled translation table failed to parse: {}. Using an empty table.", e);
                Self::default()
            }
        }
    }

    pub fn with_entry(mut self, locale: Locale, key: &str, text: &str) -> Self {
        self.entries
            .entry(locale)
            .or_default()
            .insert(key.to_string(), text.to_string());
        self
    }

    /// Parse a YAML document whose top-level keys are locale codes.
    ///
    /// Nested mappings are flattened into dotted keys. Unsupported locale codes are skipped.
    pub fn from_yaml_str(content: &str) -> Result<Self, Error> {
        let root: HashMap<String, Value> = serde_yaml::from_str(content)?;
        let mut entries = HashMap::new();
        for (code, tree) in root {
            let locale: Locale = match code.parse() {
                Ok(locale) => locale,
                Err(_) => {
                    warn!("Skipping translations for unsupported locale '{}'.", code);
                    continue;
                }
            };
            let mut flat = HashMap::new();
            flatten_into(&mut flat, String::new(), &tree);
            entries.insert(locale, flat);
        }
        Ok(Self { entries })
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, Error> {
        let content = fs::read_to_string(path)?;
        let table = Self::from_yaml_str(&content)?;
        info!(
            "Loaded translations for {} locale(s) from {:?}",
            table.entries.len(),
            path
        );
        Ok(table)
    }

    /// Table from `path` when one is configured and loads, otherwise the bundled one.
    pub fn load_or_bundled(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::bundled();
        };
        match Self::from_yaml_file(path) {
            Ok(table) => table,
            Err(e) => {
                warn!(
                    "Failed to load translations from {:?}: {}. Using the bundled table.",
                    path, e
                );
                Self::bundled()
            }
        }
    }

    pub fn get(&self, locale: Locale, key: &str) -> Option<&str> {
        self.entries
            .get(&locale)
            .and_then(|strings| strings.get(key))
            .map(String::as_str)
    }

    pub fn locales(&self) -> Vec<Locale> {
        let mut locales: Vec<_> = self.entries.keys().copied().collect();
        locales.sort();
        locales
    }

    pub fn key_count(&self, locale: Locale) -> usize {
        self.entries.get(&locale).map_or(0, HashMap::len)
    }

    /// Keys present for `reference` but absent for `locale`. Sorted.
    pub fn missing_keys(&self, locale: Locale, reference: Locale) -> Vec<String> {
        let Some(reference_strings) = self.entries.get(&reference) else {
            return Vec::new();
        };
        let mut missing: Vec<_> = reference_strings
            .keys()
            .filter(|key| self.get(locale, key).is_none())
            .cloned()
            .collect();
        missing.sort();
        missing
    }

    /// Walk the fallback chain. Always yields something: the raw key at worst.
    pub fn resolve<'a>(
        &'a self,
        current: Locale,
        chain: &FallbackChain,
        key: &'a str,
    ) -> (&'a str, Resolution) {
        for locale in chain.candidates(current) {
            if let Some(text) = self.get(locale, key) {
                let resolution = if locale == current {
                    Resolution::Active
                } else {
                    Resolution::Fallback(locale)
                };
                return (text, resolution);
            }
        }
        (key, Resolution::RawKey)
    }

    /// Resolve `key` and substitute `params`.
    pub fn translate(
        &self,
        current: Locale,
        chain: &FallbackChain,
        key: &str,
        params: Option<&Params>,
        log_missing: bool,
    ) -> String {
        let (text, resolution) = self.resolve(current, chain, key);
        if log_missing && resolution != Resolution::Active {
            debug!(
                key,
                locale = %current,
                resolution = ?resolution,
                "Missing translation"
            );
        }
        match params {
            Some(params) => interpolate(text, params),
            None => text.to_string(),
        }
    }
}

fn flatten_into(out: &mut HashMap<String, String>, prefix: String, node: &Value) {
    match node {
        Value::Mapping(map) => {
            for (k, v) in map {
                let segment = match k {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    _ => continue,
                };
                let key = if prefix.is_empty() {
                    segment
                } else {
                    format!("{}.{}", prefix, segment)
                };
                flatten_into(out, key, v);
            }
        }
        Value::String(s) => {
            out.insert(prefix, s.clone());
        }
        Value::Number(n) => {
            out.insert(prefix, n.to_string());
        }
        Value::Bool(b) => {
            out.insert(prefix, b.to_string());
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> FallbackChain {
        FallbackChain::new(Locale::Ar, Locale::En)
    }

    #[test]
    fn bundled_table_covers_default_and_secondary() {
        let table = TranslationTable::bundled();
        assert_eq!(table.get(Locale::Ar, "nav.home"), Some("الرئيسية"));
        assert_eq!(table.get(Locale::En, "nav.home"), Some("Home"));
        assert!(table.key_count(Locale::En) >= table.key_count(Locale::Fr));
    }

    #[test]
    fn candidates_are_deduplicated() {
        assert_eq!(chain().candidates(Locale::Ar), vec![Locale::Ar, Locale::En]);
        assert_eq!(
            chain().candidates(Locale::Fr),
            vec![Locale::Fr, Locale::Ar, Locale::En]
        );
    }

    #[test]
    fn falls_back_default_then_secondary_then_key() {
        let table = TranslationTable::new()
            .with_entry(Locale::Ar, "only.ar", "عربي")
            .with_entry(Locale::En, "only.en", "english")
            .with_entry(Locale::Fr, "both", "fr")
            .with_entry(Locale::Ar, "both", "ar");

        assert_eq!(table.resolve(Locale::Fr, &chain(), "both"), ("fr", Resolution::Active));
        assert_eq!(
            table.resolve(Locale::Fr, &chain(), "only.ar"),
            ("عربي", Resolution::Fallback(Locale::Ar))
        );
        assert_eq!(
            table.resolve(Locale::Fr, &chain(), "only.en"),
            ("english", Resolution::Fallback(Locale::En))
        );
        assert_eq!(
            table.resolve(Locale::Fr, &chain(), "nope"),
            ("nope", Resolution::RawKey)
        );
    }

    #[test]
    fn missing_locale_falls_back() {
        let table = TranslationTable::new().with_entry(Locale::En, "k", "v");
        assert_eq!(table.translate(Locale::Tr, &chain(), "k", None, true), "v");
    }

    #[test]
    fn interpolates_known_and_keeps_unknown() {
        let params = params!("name" => "Ahmed");
        assert_eq!(
            interpolate("Hi {name}, {name}! {other}", &params),
            "Hi Ahmed, Ahmed! {other}"
        );
    }

    #[test]
    fn interpolates_names_outside_ascii_words() {
        let params = params!("first-name" => "Ahmed", "الاسم" => "أحمد");
        assert_eq!(interpolate("Hi {first-name}", &params), "Hi Ahmed");
        assert_eq!(interpolate("مرحبا {الاسم}", &params), "مرحبا أحمد");
        assert_eq!(interpolate("{first-name}{", &params), "Ahmed{");
    }

    #[test]
    fn interpolates_numbers() {
        let params = params!("count" => 3, "ratio" => 0.5);
        assert_eq!(interpolate("{count} of {ratio}", &params), "3 of 0.5");
    }

    #[test]
    fn flattens_nested_yaml_and_skips_unknown_locales() {
        let yaml = "en:\n  a:\n    b: deep\n  n: 5\nxx:\n  a: ignored\n";
        let table = TranslationTable::from_yaml_str(yaml).unwrap();
        assert_eq!(table.get(Locale::En, "a.b"), Some("deep"));
        assert_eq!(table.get(Locale::En, "n"), Some("5"));
        assert_eq!(table.locales(), vec![Locale::En]);
    }

    #[test]
    fn reports_missing_keys() {
        let table = TranslationTable::new()
            .with_entry(Locale::En, "a", "A")
            .with_entry(Locale::En, "b", "B")
            .with_entry(Locale::Fr, "a", "A");
        assert_eq!(table.missing_keys(Locale::Fr, Locale::En), vec!["b".to_string()]);
    }

    #[test]
    fn configured_file_replaces_bundled_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("club.yml");
        std::fs::write(&path, "en:\n  nav:\n    home: Clubhouse\n").unwrap();

        let table = TranslationTable::load_or_bundled(Some(&path));
        assert_eq!(table.get(Locale::En, "nav.home"), Some("Clubhouse"));
        assert_eq!(table.get(Locale::Ar, "nav.home"), None);
    }

    #[test]
    fn unusable_file_keeps_bundled_table() {
        let dir = tempfile::tempdir().unwrap();
        let broken = dir.path().join("broken.yml");
        std::fs::write(&broken, "en: [unclosed").unwrap();
        let missing = dir.path().join("missing.yml");

        assert!(matches!(
            TranslationTable::from_yaml_file(&missing),
            Err(Error::Io(_))
        ));
        assert!(matches!(
            TranslationTable::from_yaml_file(&broken),
            Err(Error::Yaml(_))
        ));
        for path in [&broken, &missing] {
            let table = TranslationTable::load_or_bundled(Some(path));
            assert_eq!(table.get(Locale::En, "nav.home"), Some("Home"));
        }
        assert_eq!(TranslationTable::load_or_bundled(None).get(Locale::En, "nav.home"), Some("Home"));
    }

    #[test]
    fn malformed_yaml_is_an_error() {
        assert!(TranslationTable::from_yaml_str("en: [unclosed").is_err());
    }
}
