// src/utils/error.rs

/// Failures surfaced by the fallible setup helpers. The manager itself logs
/// and recovers instead of returning these.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Reading a translation file or preparing the log directory.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("invalid translation table: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("unsupported locale: {0:?}")]
    InvalidLocale(String),
    #[error("{0}")]
    Msg(String),
}

#[macro_export]
macro_rules! err {
    ($msg:literal $(,)?) => {
        $crate::utils::error::Error::Msg($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::utils::error::Error::Msg(format!($fmt, $($arg)*))
    };
}
