// src/utils/locale.rs
use crate::locale::Locale;
use crate::manager::locale_manager;
use crate::settings::DEFAULT_LOCALE;
use crate::translations::Params;

/// Active locale of the global manager, or the default before initialization.
pub fn get_locale() -> Locale {
    locale_manager().map_or(DEFAULT_LOCALE, |manager| manager.get_locale())
}

/// Translate through the global manager. Before initialization the key comes back as-is.
pub fn t(key: &str) -> String {
    match locale_manager() {
        Some(manager) => manager.translate(key),
        None => key.to_string(),
    }
}

pub fn t_with(key: &str, params: &Params) -> String {
    match locale_manager() {
        Some(manager) => manager.translate_with(key, params),
        None => crate::translations::interpolate(key, params),
    }
}
