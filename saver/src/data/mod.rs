//! This module provides persistence of experiment data through a [`Saver`](crate::Saver).
//!
//! Data is laid out in the local storage by experiment, participant and session:
//!
//! ```text
//!     - root local storage
//!       L {experiment}
//!         L {ppid}
//!           L S001
//!             L trial_results.csv
//!             L settings.json
//!             L trackers
//!               L {name}_T001.csv
//!             L other
//!               L {name}_T001.json
//! ```
//!
//! Files are first written with an additional `.tmp` extension then renamed, so that an interrupted write never leaves a truncated file
//! in place of a valid one.

use std::path::PathBuf;

use thiserror::Error;

use crate::locale::Locale;

mod handler;
pub use handler::*;

mod utils;

#[derive(Debug, Error)]
pub enum Error {
    /// A path component is empty or contains forbidden characters.
    #[error("invalid name: {0:?}")]
    InvalidName(String),
    /// A row does not have as many cells as the table has columns.
    #[error("row has {actual} cell(s) but table has {expected} column(s)")]
    RowLength { expected: usize, actual: usize },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Saver(#[from] crate::Error),
}

/// Kind of experiment data, deciding where it is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataKind {
    TrialResults,
    Settings,
    ParticipantList,
    SessionLog,
    Summary,
    /// Per-trial tracked data, stored in a `trackers` directory.
    Trackers,
    OtherSessionData,
    /// Any other per-trial data, stored in an `other` directory.
    OtherTrialData,
}

impl DataKind {
    /// Return the sub-directory of the session directory this kind of data is stored in, if any.
    pub fn directory(&self) -> Option<&'static str> {
        match self {
            Self::Trackers => Some("trackers"),
            Self::OtherTrialData => Some("other"),
            _ => None,
        }
    }

    /// Return `true` if data of this kind relates to a single trial.
    #[inline]
    pub fn is_trial_scoped(&self) -> bool {
        matches!(self, Self::Trackers | Self::OtherTrialData)
    }
}

/// Return the directory name of a session number, eg. `S001`.
///
/// ```
/// # use saver::data::session_num_to_name;
/// assert_eq!(session_num_to_name(1), "S001");
/// assert_eq!(session_num_to_name(1234), "S1234");
/// ```
#[inline]
pub fn session_num_to_name(num: u32) -> String {
    format!("S{num:03}")
}

/// Where a piece of experiment data belongs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    experiment: String,
    ppid: String,
    session_num: u32,
    name: String,
    kind: DataKind,
    trial_num: Option<u32>,
}

impl Destination {
    /// Create a new `Destination` for session-wide data.
    pub fn new(experiment: impl Into<String>, ppid: impl Into<String>, session_num: u32, name: impl Into<String>, kind: DataKind) -> Self {
        Self {
            experiment: experiment.into(),
            ppid: ppid.into(),
            session_num,
            name: name.into(),
            kind,
            trial_num: None,
        }
    }

    /// Build a new `Destination` for the given trial.
    #[inline]
    pub fn with_trial(self, trial_num: u32) -> Self {
        Self {
            trial_num: Some(trial_num),
            ..self
        }
    }

    #[inline]
    pub fn kind(&self) -> DataKind {
        self.kind
    }

    /// Return the session directory, relative to the storage root.
    pub fn session_dir(&self) -> Result<PathBuf, Error> {
        Ok([
            utils::check_name(&self.experiment)?,
            utils::check_name(&self.ppid)?,
            session_num_to_name(self.session_num).as_str(),
        ]
        .into_iter()
        .collect())
    }

    /// Return the file path with extension `ext`, relative to the storage root.
    ///
    /// Trial-scoped data gets a `_T###` suffix, falling back to trial 0 when no trial is given.
    pub fn relative_path(&self, ext: &str) -> Result<PathBuf, Error> {
        let mut path = self.session_dir()?;

        if let Some(directory) = self.kind.directory() {
            path.push(directory);
        }

        let name = utils::check_name(&self.name)?;

        let file_name = if self.kind.is_trial_scoped() {
            format!("{name}_T{:03}.{ext}", self.trial_num.unwrap_or_default())
        } else {
            format!("{name}.{ext}")
        };

        path.push(file_name);

        Ok(path)
    }
}

/// A table cell.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Cell {
    #[default]
    Empty,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Cell {
    /// Format the cell as a CSV field, numbers following `locale` without grouping thousands.
    pub fn to_field(&self, locale: &Locale) -> String {
        match self {
            Self::Empty => String::new(),
            Self::Bool(value) => value.to_string(),
            Self::Int(value) => value.to_string(),
            Self::Float(value) => utils::escape_field(locale.format_float(*value, None)),
            Self::Text(value) => utils::escape_field(value.clone()),
        }
    }
}

macro_rules! impl_from_for_cell {
    ($($variant:ident($($ty:ty),+)),+ $(,)?) => {
        $($(
            impl From<$ty> for Cell {
                #[inline]
                fn from(value: $ty) -> Self {
                    Self::$variant(value.into())
                }
            }
        )+)+
    };
}

impl_from_for_cell! {
    Bool(bool),
    Int(i8, i16, i32, i64, u8, u16, u32),
    Float(f32, f64),
    Text(&str, String),
}

impl<T: Into<Cell>> From<Option<T>> for Cell {
    #[inline]
    fn from(value: Option<T>) -> Self {
        value.map_or(Cell::Empty, Into::into)
    }
}

/// A table of experiment data, persisted as CSV.
///
/// ```
/// # use saver::{data::{Cell, DataTable}, locale::Locale};
/// let mut table = DataTable::new(["trial_num", "quadrant", "rt"]);
/// table.add_row([Cell::from(1), Cell::from("top left"), Cell::from(0.532)])?;
///
/// assert_eq!(table.csv_lines(&Locale::DE_DE), ["trial_num,quadrant,rt", "1,top left,\"0,532\""]);
/// # Ok::<_, saver::data::Error>(())
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataTable {
    headers: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl DataTable {
    /// Create a new empty table with the given column headers.
    pub fn new<I: IntoIterator<Item = S>, S: Into<String>>(headers: I) -> Self {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows: vec![],
        }
    }

    /// Append a row to the table.
    ///
    /// # Errors
    /// This method fails if the row does not have exactly one cell per column.
    pub fn add_row<I: IntoIterator<Item = C>, C: Into<Cell>>(&mut self, row: I) -> Result<(), Error> {
        let row: Vec<Cell> = row.into_iter().map(Into::into).collect();

        if row.len() != self.headers.len() {
            return Err(Error::RowLength {
                expected: self.headers.len(),
                actual: row.len(),
            });
        }

        self.rows.push(row);

        Ok(())
    }

    #[inline]
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    #[inline]
    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    /// Return the number of rows.
    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Format the table as CSV lines, the header line first.
    pub fn csv_lines(&self, locale: &Locale) -> Vec<String> {
        let header = self.headers.iter().map(|header| utils::escape_field(header.clone())).collect::<Vec<_>>().join(",");

        let rows = self
            .rows
            .iter()
            .map(|row| row.iter().map(|cell| cell.to_field(locale)).collect::<Vec<_>>().join(","));

        std::iter::once(header).chain(rows).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    const EXPERIMENT: &str = "quadrant_color";
    const PPID: &str = "p042";

    #[test]
    fn test_relative_path() {
        let destination = Destination::new(EXPERIMENT, PPID, 2, "trial_results", DataKind::TrialResults);
        assert_eq!(
            destination.relative_path("csv").unwrap(),
            Path::new("quadrant_color/p042/S002/trial_results.csv")
        );

        let destination = Destination::new(EXPERIMENT, PPID, 1, "gaze", DataKind::Trackers).with_trial(7);
        assert_eq!(
            destination.relative_path("csv").unwrap(),
            Path::new("quadrant_color/p042/S001/trackers/gaze_T007.csv")
        );

        let destination = Destination::new(EXPERIMENT, PPID, 1, "picked_color", DataKind::OtherTrialData);
        assert_eq!(
            destination.relative_path("json").unwrap(),
            Path::new("quadrant_color/p042/S001/other/picked_color_T000.json")
        );
    }

    #[test]
    fn test_invalid_names() {
        for name in ["", ".", "..", "a/b", "a\\b", "nul\0"] {
            let destination = Destination::new(EXPERIMENT, name, 1, "log", DataKind::SessionLog);
            assert!(matches!(destination.session_dir(), Err(Error::InvalidName(_))), "{name:?} was accepted");

            let destination = Destination::new(EXPERIMENT, PPID, 1, name, DataKind::SessionLog);
            assert!(matches!(destination.relative_path("txt"), Err(Error::InvalidName(_))), "{name:?} was accepted");
        }
    }

    #[test]
    fn test_row_length() {
        let mut table = DataTable::new(["a", "b"]);

        assert!(matches!(table.add_row([1]), Err(Error::RowLength { expected: 2, actual: 1 })));
        assert!(table.is_empty());

        table.add_row([Some(1), None]).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.rows()[0], [Cell::Int(1), Cell::Empty]);
    }

    #[test]
    fn test_csv_lines() {
        let mut table = DataTable::new(["ppid", "note", "accurate", "rt", "hue"]);
        table
            .add_row([Cell::from(PPID), Cell::from("said \"red\", then blue"), Cell::from(true), Cell::from(0.25), Cell::from(-12)])
            .unwrap();
        table.add_row([Cell::from(PPID), Cell::Empty, Cell::from(false), Cell::from(1.5), Cell::from(300u32)]).unwrap();

        assert_eq!(
            table.csv_lines(&Locale::EN_US),
            [
                "ppid,note,accurate,rt,hue",
                "p042,\"said \"\"red\"\", then blue\",true,0.25,-12",
                "p042,,false,1.5,300",
            ]
        );

        assert_eq!(table.csv_lines(&Locale::FR_FR)[2], "p042,,false,\"1,5\",300");
    }
}
