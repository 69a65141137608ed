// src/settings.rs
use crate::bus::LANGUAGE_CHANGED_EVENT;
use crate::locale::{detect_system_locale, Locale};
use crate::translations::FallbackChain;
use crate::utils::path::get_config_path;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

pub const DEFAULT_LOCALE: Locale = Locale::Ar;
pub const SECONDARY_FALLBACK_LOCALE: Locale = Locale::En;

/// Mirrored storage keys, highest priority first. Older screens read the later ones.
pub const DEFAULT_STORAGE_KEYS: [&str; 3] = ["soccer-hunter-language", "language", "i18nextLng"];

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LocaleSettings {
    pub default_locale: Locale,
    pub secondary_fallback: Locale,
    pub storage_keys: Vec<String>,
    pub broadcast_event: String,
    pub log_missing_translations: bool,
    pub detect_system_locale: bool,
    /// YAML translation table replacing the bundled one.
    pub translations_file: Option<PathBuf>,
}

impl Default for LocaleSettings {
    fn default() -> Self {
        Self {
            default_locale: DEFAULT_LOCALE,
            secondary_fallback: SECONDARY_FALLBACK_LOCALE,
            storage_keys: DEFAULT_STORAGE_KEYS.iter().map(|k| k.to_string()).collect(),
            broadcast_event: LANGUAGE_CHANGED_EVENT.to_string(),
            log_missing_translations: true,
            detect_system_locale: false,
            translations_file: None,
        }
    }
}

/// What the file may contain. Every field is optional and individually validated.
#[derive(Deserialize, Debug, Default)]
struct RawLocaleSettings {
    default_locale: Option<String>,
    secondary_fallback: Option<String>,
    storage_keys: Option<Vec<String>>,
    broadcast_event: Option<String>,
    log_missing_translations: Option<bool>,
    detect_system_locale: Option<bool>,
    translations_file: Option<PathBuf>,
}

fn locale_or(name: &str, raw: Option<String>, default: Locale) -> Locale {
    match raw {
        None => default,
        Some(value) => match value.parse() {
            Ok(locale) => locale,
            Err(_) => {
                warn!(
                    "Value '{}' for setting '{}' is not a supported locale. Resetting to default '{}'.",
                    value, name, default
                );
                default
            }
        },
    }
}

impl RawLocaleSettings {
    fn into_settings(self) -> LocaleSettings {
        let defaults = LocaleSettings::default();
        let mut settings = LocaleSettings {
            default_locale: locale_or("default_locale", self.default_locale, defaults.default_locale),
            secondary_fallback: locale_or(
                "secondary_fallback",
                self.secondary_fallback,
                defaults.secondary_fallback,
            ),
            storage_keys: self.storage_keys.unwrap_or(defaults.storage_keys),
            broadcast_event: self.broadcast_event.unwrap_or(defaults.broadcast_event),
            log_missing_translations: self
                .log_missing_translations
                .unwrap_or(defaults.log_missing_translations),
            detect_system_locale: self
                .detect_system_locale
                .unwrap_or(defaults.detect_system_locale),
            translations_file: self.translations_file,
        };
        settings.normalize();
        settings
    }
}

impl LocaleSettings {
    /// Read settings from a YAML file. Any problem falls back to defaults.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            info!(
                "Locale settings file {:?} not found. Proceeding with default settings.",
                path
            );
            return Self::default();
        }
        match fs::read_to_string(path) {
            Ok(content) => match Self::from_yaml_str(&content) {
                Ok(settings) => {
                    info!("Locale settings loaded from {:?}", path);
                    settings
                }
                Err(e) => {
                    error!(
                        "Failed to parse locale settings {:?}: {}. Using default settings.",
                        path, e
                    );
                    Self::default()
                }
            },
            Err(e) => {
                error!(
                    "Failed to read locale settings {:?}: {}. Using default settings.",
                    path, e
                );
                Self::default()
            }
        }
    }

    /// [`LocaleSettings::load`] from `data/config/locale.yml`.
    pub fn load_default_location() -> Self {
        Self::load(&get_config_path())
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, serde_yaml::Error> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let raw: RawLocaleSettings = serde_yaml::from_str(content)?;
        Ok(raw.into_settings())
    }

    fn normalize(&mut self) {
        let mut seen = Vec::with_capacity(self.storage_keys.len());
        for key in self.storage_keys.drain(..) {
            let key = key.trim().to_string();
            if key.is_empty() {
                warn!("Dropping empty storage key from locale settings.");
                continue;
            }
            if seen.contains(&key) {
                warn!("Dropping duplicate storage key '{}' from locale settings.", key);
                continue;
            }
            seen.push(key);
        }
        if seen.is_empty() {
            warn!("No usable storage keys configured. Restoring defaults.");
            seen = DEFAULT_STORAGE_KEYS.iter().map(|k| k.to_string()).collect();
        }
        self.storage_keys = seen;

        if self.broadcast_event.trim().is_empty() {
            warn!(
                "Empty broadcast event name. Resetting to '{}'.",
                LANGUAGE_CHANGED_EVENT
            );
            self.broadcast_event = LANGUAGE_CHANGED_EVENT.to_string();
        }
    }

    pub fn fallback_chain(&self) -> FallbackChain {
        FallbackChain::new(self.default_locale, self.secondary_fallback)
    }

    /// Locale used when nothing valid is persisted.
    pub fn initial_locale(&self) -> Locale {
        if self.detect_system_locale {
            if let Some(locale) = detect_system_locale() {
                info!("Using detected system locale '{}' as initial locale.", locale);
                return locale;
            }
        }
        self.default_locale
    }

    pub fn is_storage_key(&self, key: &str) -> bool {
        self.storage_keys.iter().any(|k| k == key)
    }
}
