use crate::locale::Locale;

const DEFAULT_THREAD_NAME: &str = "saver-worker";

/// Saver configuration.
///
/// ```
/// # use saver::{locale::Locale, Config};
/// let config = Config::default().with_thread_name("results-io").with_locale(Locale::DE_DE).with_verbose(true);
///
/// assert_eq!(config.thread_name(), "results-io");
/// assert_eq!(config.locale(), Locale::DE_DE);
/// assert!(config.force_locale());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Name given to the worker thread.
    thread_name: String,
    /// Locale installed on the worker thread when forced.
    locale: Locale,
    /// Whether `locale` is forced on both the starting thread and the worker thread.
    ///
    /// Otherwise, the worker thread inherits the locale of the thread starting it.
    force_locale: bool,
    /// Whether every job execution is logged at `DEBUG` level rather than `TRACE`.
    verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            thread_name: DEFAULT_THREAD_NAME.to_owned(),
            locale: Locale::EN_US,
            force_locale: true,
            verbose: false,
        }
    }
}

impl Config {
    #[inline]
    pub fn with_thread_name(self, thread_name: impl Into<String>) -> Self {
        Self {
            thread_name: thread_name.into(),
            ..self
        }
    }

    #[inline]
    pub fn with_locale(self, locale: Locale) -> Self {
        Self { locale, ..self }
    }

    #[inline]
    pub fn with_force_locale(self, force_locale: bool) -> Self {
        Self { force_locale, ..self }
    }

    #[inline]
    pub fn with_verbose(self, verbose: bool) -> Self {
        Self { verbose, ..self }
    }

    #[inline]
    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    #[inline]
    pub fn locale(&self) -> Locale {
        self.locale
    }

    #[inline]
    pub fn force_locale(&self) -> bool {
        self.force_locale
    }

    #[inline]
    pub fn verbose(&self) -> bool {
        self.verbose
    }
}
