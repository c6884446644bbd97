//! This module provides the thread-scoped number formatting settings.
//!
//! Each thread carries its own [`Locale`], [`Locale::INVARIANT`] unless set otherwise with [`set_current()`]. The background worker
//! installs its locale once at startup and keeps it for its whole lifetime, so that any number formatted by a job looks the same
//! whatever thread submitted it.

use std::cell::Cell;

/// Number formatting settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Locale {
    /// Separator between the integral and fractional parts.
    decimal_separator: char,
    /// Separator between groups of thousands, if any.
    thousands_separator: Option<char>,
}

impl Default for Locale {
    #[inline]
    fn default() -> Self {
        Self::INVARIANT
    }
}

impl Locale {
    /// Culture-independent formatting: `.` decimal separator, no grouping.
    pub const INVARIANT: Locale = Locale::new('.', None);
    /// English (United States): `.` decimal separator, `,` thousands separator.
    pub const EN_US: Locale = Locale::new('.', Some(','));
    /// German (Germany): `,` decimal separator, `.` thousands separator.
    pub const DE_DE: Locale = Locale::new(',', Some('.'));
    /// French (France): `,` decimal separator, narrow no-break space thousands separator.
    pub const FR_FR: Locale = Locale::new(',', Some('\u{202f}'));

    /// Create a new `Locale`.
    pub const fn new(decimal_separator: char, thousands_separator: Option<char>) -> Self {
        Self {
            decimal_separator,
            thousands_separator,
        }
    }

    #[inline]
    pub fn decimal_separator(&self) -> char {
        self.decimal_separator
    }

    #[inline]
    pub fn thousands_separator(&self) -> Option<char> {
        self.thousands_separator
    }

    /// Format a floating point number, using the shortest representation when `precision` is `None`.
    ///
    /// Thousands are never grouped.
    ///
    /// ```
    /// # use saver::locale::Locale;
    /// assert_eq!(Locale::EN_US.format_float(1234.5, None), "1234.5");
    /// assert_eq!(Locale::DE_DE.format_float(1234.5, Some(2)), "1234,50");
    /// ```
    pub fn format_float(&self, value: f64, precision: Option<usize>) -> String {
        let text = match precision {
            Some(precision) => format!("{value:.precision$}"),
            None => value.to_string(),
        };

        if self.decimal_separator == '.' {
            text
        } else {
            text.replacen('.', self.decimal_separator.encode_utf8(&mut [0; 4]), 1)
        }
    }

    /// Format an integer, grouping thousands when the locale has a thousands separator.
    ///
    /// ```
    /// # use saver::locale::Locale;
    /// assert_eq!(Locale::EN_US.format_int(-1234567), "-1,234,567");
    /// assert_eq!(Locale::INVARIANT.format_int(-1234567), "-1234567");
    /// ```
    pub fn format_int(&self, value: i64) -> String {
        let Some(separator) = self.thousands_separator else {
            return value.to_string();
        };

        let digits = value.unsigned_abs().to_string();
        let mut text = String::with_capacity(digits.len() + digits.len() / 3 + 1);

        if value < 0 {
            text.push('-');
        }

        for (i, digit) in digits.chars().enumerate() {
            if i > 0 && (digits.len() - i) % 3 == 0 {
                text.push(separator);
            }
            text.push(digit);
        }

        text
    }
}

thread_local! {
    static CURRENT: Cell<Locale> = const { Cell::new(Locale::INVARIANT) };
}

/// Return the locale of the current thread.
#[inline]
pub fn current() -> Locale {
    CURRENT.with(Cell::get)
}

/// Set the locale of the current thread, returning the previous one.
#[inline]
pub fn set_current(locale: Locale) -> Locale {
    CURRENT.with(|current| current.replace(locale))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_float() {
        assert_eq!(Locale::INVARIANT.format_float(0.25, None), "0.25");
        assert_eq!(Locale::FR_FR.format_float(0.25, None), "0,25");
        assert_eq!(Locale::EN_US.format_float(2.0, Some(3)), "2.000");
        assert_eq!(Locale::DE_DE.format_float(-3.14159, Some(2)), "-3,14");
        assert_eq!(Locale::DE_DE.format_float(42.0, None), "42");
    }

    #[test]
    fn test_format_int() {
        assert_eq!(Locale::EN_US.format_int(0), "0");
        assert_eq!(Locale::EN_US.format_int(999), "999");
        assert_eq!(Locale::EN_US.format_int(1000), "1,000");
        assert_eq!(Locale::DE_DE.format_int(1234567), "1.234.567");
        assert_eq!(Locale::FR_FR.format_int(-12345), "-12\u{202f}345");
        assert_eq!(Locale::EN_US.format_int(i64::MIN), "-9,223,372,036,854,775,808");
    }

    #[test]
    fn test_thread_scoped() {
        assert_eq!(current(), Locale::INVARIANT);
        assert_eq!(set_current(Locale::DE_DE), Locale::INVARIANT);
        assert_eq!(current(), Locale::DE_DE);

        std::thread::spawn(|| assert_eq!(current(), Locale::INVARIANT)).join().unwrap();

        assert_eq!(set_current(Locale::INVARIANT), Locale::DE_DE);
    }
}
