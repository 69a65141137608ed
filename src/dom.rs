// src/dom.rs
use crate::locale::Locale;
use crate::utils::lock;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::trace;

pub const DIR_ATTRIBUTE: &str = "dir";
pub const LANG_ATTRIBUTE: &str = "lang";
/// Global some older views read instead of the document attributes.
pub const LEGACY_LANGUAGE_GLOBAL: &str = "appLanguage";

/// The document root plus the handful of globals legacy code inspects.
pub trait DomBinder: Send + Sync {
    fn set_attribute(&self, name: &str, value: &str);
    fn set_global(&self, name: &str, value: &str);
}

/// Write everything that renders off the active locale. Only the manager calls this.
pub fn bind_locale(binder: &dyn DomBinder, locale: Locale) {
    let dir = locale.direction();
    binder.set_attribute(DIR_ATTRIBUTE, dir.as_str());
    binder.set_attribute(LANG_ATTRIBUTE, locale.code());
    binder.set_global(LEGACY_LANGUAGE_GLOBAL, locale.code());
    trace!(%locale, %dir, "Bound locale to document root");
}

/// In-memory document root. Also what headless hosts and tests bind against.
#[derive(Debug, Default)]
pub struct DocumentRoot {
    attributes: Mutex<HashMap<String, String>>,
    globals: Mutex<HashMap<String, String>>,
    writes: Mutex<u64>,
}

impl DocumentRoot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attribute(&self, name: &str) -> Option<String> {
        lock(&self.attributes).get(name).cloned()
    }

    pub fn global(&self, name: &str) -> Option<String> {
        lock(&self.globals).get(name).cloned()
    }

    /// Number of attribute writes, for asserting that no-ops stay no-ops.
    pub fn write_count(&self) -> u64 {
        *lock(&self.writes)
    }
}

impl DomBinder for DocumentRoot {
    fn set_attribute(&self, name: &str, value: &str) {
        lock(&self.attributes).insert(name.to_string(), value.to_string());
        *lock(&self.writes) += 1;
    }

    fn set_global(&self, name: &str, value: &str) {
        lock(&self.globals).insert(name.to_string(), value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_rtl_for_arabic() {
        let root = DocumentRoot::new();
        bind_locale(&root, Locale::Ar);
        assert_eq!(root.attribute(DIR_ATTRIBUTE).as_deref(), Some("rtl"));
        assert_eq!(root.attribute(LANG_ATTRIBUTE).as_deref(), Some("ar"));
        assert_eq!(root.global(LEGACY_LANGUAGE_GLOBAL).as_deref(), Some("ar"));
    }

    #[test]
    fn rebinding_overwrites() {
        let root = DocumentRoot::new();
        bind_locale(&root, Locale::Ar);
        bind_locale(&root, Locale::Fr);
        assert_eq!(root.attribute(DIR_ATTRIBUTE).as_deref(), Some("ltr"));
        assert_eq!(root.attribute(LANG_ATTRIBUTE).as_deref(), Some("fr"));
        assert_eq!(root.write_count(), 4);
    }
}
