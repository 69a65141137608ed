//! Locale state for the Soccer Hunter client: one manager owns the active UI
//! language, persists it under every mirrored storage key, binds `dir`/`lang`
//! on the document root and keeps every tab of the origin in step.

pub mod bus;
pub mod dom;
pub mod locale;
pub mod manager;
pub mod settings;
pub mod store;
pub mod translations;
pub mod utils;

pub use crate::bus::{global_bus, ChangeOrigin, EventBus, LocaleChanged, Subscription, LANGUAGE_CHANGED_EVENT};
pub use crate::dom::{bind_locale, DocumentRoot, DomBinder};
pub use crate::locale::{Direction, Locale};
pub use crate::manager::{
    init_default_locale_manager, init_locale_manager, locale_manager, LocaleStateManager,
    LocaleStateManagerBuilder,
};
pub use crate::settings::LocaleSettings;
pub use crate::store::{FileStore, MemoryStore, PersistentStore, StoreError, StoreEvent};
pub use crate::translations::{FallbackChain, ParamValue, Params, TranslationTable};
pub use crate::utils::error::Error;
pub use crate::utils::locale::{get_locale, t, t_with};
pub use crate::utils::logger::LoggerBuilder;
