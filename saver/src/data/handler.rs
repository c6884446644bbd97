use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::{fmt, fs, io};

use bytes::Bytes;
use serde::Serialize;

use super::*;
use crate::{locale, Saver};

const TEMP_EXT: &str = "tmp";

type ResultsSink = Arc<dyn Fn(String) + Send + Sync>;

/// Experiment data handler.
///
/// Files are written in the background by a [`Saver`] under a root local storage, following the layout described in the
/// [module documentation](super). Every `handle_*` method validates its destination synchronously, schedules the write and returns
/// the path of the file relative to the root. Write failures are logged by the saver.
///
/// Trial results can additionally be forwarded, as CSV text, to a sink running on the worker thread (eg. to send them to a remote
/// experiment server), see [`FileHandler::with_results_sink()`].
///
/// # Example
/// ```
/// # use std::sync::Arc;
/// # use saver::{data::{DataKind, DataTable, Destination, FileHandler}, Saver};
/// # let root = tempfile::tempdir().unwrap();
/// let saver = Arc::new(Saver::default());
/// saver.start()?;
///
/// let handler = FileHandler::new(root.path(), Arc::clone(&saver));
///
/// let mut table = DataTable::new(["trial_num", "rt"]);
/// table.add_row([1.0, 0.5])?;
///
/// let destination = Destination::new("quadrant", "p001", 1, "trial_results", DataKind::TrialResults);
/// let path = handler.handle_data_table(table, &destination)?;
///
/// saver.shutdown()?;
///
/// assert_eq!(std::fs::read_to_string(root.path().join(path))?, "trial_num,rt\n1,0.5\n");
/// # Ok::<_, Box<dyn std::error::Error>>(())
/// ```
#[derive(Clone)]
pub struct FileHandler {
    /// The path to store the data in the local storage.
    root: PathBuf,
    /// The saver executing writes in the background.
    saver: Arc<Saver>,
    /// An optional sink receiving trial results as CSV text.
    results_sink: Option<ResultsSink>,
}

impl fmt::Debug for FileHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileHandler")
            .field("root", &self.root)
            .field("saver", &self.saver)
            .field("results_sink", &self.results_sink.is_some())
            .finish()
    }
}

impl FileHandler {
    /// Create a new `FileHandler` storing data under `root` through `saver`.
    pub fn new(root: impl Into<PathBuf>, saver: Arc<Saver>) -> Self {
        Self {
            root: root.into(),
            saver,
            results_sink: None,
        }
    }

    /// Build a new `FileHandler` forwarding trial results, as CSV text, to `sink`.
    ///
    /// The sink is called on the worker thread, right after the trial results file has been written.
    #[inline]
    pub fn with_results_sink(self, sink: impl Fn(String) + Send + Sync + 'static) -> Self {
        Self {
            results_sink: Some(Arc::new(sink)),
            ..self
        }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    #[inline]
    pub fn saver(&self) -> &Saver {
        &self.saver
    }

    /// Return `true` if data already exists for this session, meaning it may be overwritten.
    pub fn check_if_risk_of_overwrite(&self, experiment: &str, ppid: &str, session_num: u32) -> Result<bool, Error> {
        let session_dir = Destination::new(experiment, ppid, session_num, "", DataKind::Settings).session_dir()?;

        Ok(self.root.join(session_dir).exists())
    }

    /// Schedule writing `table` as a CSV file.
    ///
    /// The table is formatted on the worker thread, so that numbers follow the worker locale.
    pub fn handle_data_table(&self, table: DataTable, destination: &Destination) -> Result<PathBuf, Error> {
        let relative = destination.relative_path("csv")?;
        let path = self.root.join(&relative);

        let sink = match destination.kind() {
            DataKind::TrialResults => self.results_sink.clone(),
            _ => None,
        };

        self.saver.submit(move || {
            let text = table.csv_lines(&locale::current()).join("\n");

            write_file(&path, format!("{text}\n"))?;

            if let Some(sink) = sink {
                sink(text);
            }

            Ok(())
        })?;

        Ok(relative)
    }

    /// Schedule writing `value` as a pretty-printed JSON file.
    ///
    /// The value is serialized right away, on the calling thread.
    pub fn handle_json<T: Serialize + ?Sized>(&self, value: &T, destination: &Destination) -> Result<PathBuf, Error> {
        let json = serde_json::to_vec_pretty(value)?;

        self.handle(destination, "json", json)
    }

    /// Schedule writing `text` as a UTF-8 text file.
    pub fn handle_text(&self, text: impl Into<String>, destination: &Destination) -> Result<PathBuf, Error> {
        self.handle(destination, "txt", text.into())
    }

    /// Schedule writing `bytes` as a raw binary file.
    pub fn handle_bytes(&self, bytes: impl Into<Bytes>, destination: &Destination) -> Result<PathBuf, Error> {
        self.handle(destination, "bin", bytes.into())
    }

    fn handle(&self, destination: &Destination, ext: &str, contents: impl AsRef<[u8]> + Send + 'static) -> Result<PathBuf, Error> {
        let relative = destination.relative_path(ext)?;
        let path = self.root.join(&relative);

        self.saver.submit(move || Ok(write_file(&path, contents)?))?;

        Ok(relative)
    }
}

/// Write `contents` to a temporary file next to `path`, then rename it to `path`.
fn write_file(path: &Path, contents: impl AsRef<[u8]>) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp = {
        let mut tmp = OsString::from(path);
        tmp.push(".");
        tmp.push(TEMP_EXT);
        PathBuf::from(tmp)
    };

    tracing::debug!("Writing file to local storage: `{}`", path.display());

    fs::write(&tmp, contents).inspect_err(|_| {
        let _ = fs::remove_file(&tmp);
    })?;

    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use serde::Serialize;

    use super::*;
    use crate::locale::Locale;
    use crate::Config;

    const EXPERIMENT: &str = "quadrant_color";
    const PPID: &str = "p007";

    fn handler(root: &Path, config: Config) -> FileHandler {
        let saver = Arc::new(Saver::new(config));
        saver.start().unwrap();

        FileHandler::new(root, saver)
    }

    fn destination(name: &str, kind: DataKind) -> Destination {
        Destination::new(EXPERIMENT, PPID, 1, name, kind)
    }

    #[test]
    fn test_handle_all() {
        #[derive(Serialize)]
        struct Settings {
            trials: u32,
            quadrants: [&'static str; 4],
        }

        let root = tempfile::tempdir().unwrap();
        let handler = handler(root.path(), Config::default());

        let mut table = DataTable::new(["x", "y"]);
        table.add_row([0.1, 0.2]).unwrap();

        let settings = Settings {
            trials: 40,
            quadrants: ["tl", "tr", "bl", "br"],
        };

        let gaze = destination("gaze", DataKind::Trackers).with_trial(3);
        let paths = [
            handler.handle_data_table(table, &gaze).unwrap(),
            handler.handle_json(&settings, &destination("settings", DataKind::Settings)).unwrap(),
            handler.handle_text("session started", &destination("log", DataKind::SessionLog)).unwrap(),
            handler.handle_bytes(vec![0u8, 1, 2, 255], &destination("raw", DataKind::OtherSessionData)).unwrap(),
        ];

        handler.saver().shutdown().unwrap();

        assert_eq!(
            paths,
            [
                Path::new("quadrant_color/p007/S001/trackers/gaze_T003.csv"),
                Path::new("quadrant_color/p007/S001/settings.json"),
                Path::new("quadrant_color/p007/S001/log.txt"),
                Path::new("quadrant_color/p007/S001/raw.bin"),
            ]
        );

        let read = |path: &Path| fs::read(root.path().join(path)).unwrap();

        assert_eq!(read(&paths[0]), b"x,y\n0.1,0.2\n");
        let json: serde_json::Value = serde_json::from_slice(&read(&paths[1])).unwrap();
        assert_eq!(json, serde_json::json!({ "trials": 40, "quadrants": ["tl", "tr", "bl", "br"] }));
        assert_eq!(read(&paths[2]), b"session started");
        assert_eq!(read(&paths[3]), [0u8, 1, 2, 255]);

        // no temporary file left behind
        let session_dir = root.path().join("quadrant_color/p007/S001");
        assert!(fs::read_dir(session_dir)
            .unwrap()
            .all(|entry| entry.unwrap().path().extension() != Some(TEMP_EXT.as_ref())));
    }

    #[test]
    fn test_worker_locale() {
        let root = tempfile::tempdir().unwrap();
        let handler = handler(root.path(), Config::default().with_locale(Locale::DE_DE));

        let mut table = DataTable::new(["rt"]);
        table.add_row([0.5]).unwrap();

        let path = handler.handle_data_table(table, &destination("trial_results", DataKind::TrialResults)).unwrap();
        handler.saver().shutdown().unwrap();

        assert_eq!(fs::read_to_string(root.path().join(path)).unwrap(), "rt\n\"0,5\"\n");
    }

    #[test]
    fn test_results_sink() {
        let root = tempfile::tempdir().unwrap();
        let (sender, receiver) = mpsc::channel();
        let sender = std::sync::Mutex::new(sender);

        let handler = handler(root.path(), Config::default()).with_results_sink(move |csv| sender.lock().unwrap().send(csv).unwrap());

        let mut results = DataTable::new(["trial_num", "quadrant"]);
        results.add_row([Cell::from(1), Cell::from("top left")]).unwrap();
        results.add_row([Cell::from(2), Cell::from("bottom right")]).unwrap();

        let mut tracker = DataTable::new(["t"]);
        tracker.add_row([0]).unwrap();

        handler.handle_data_table(tracker, &destination("gaze", DataKind::Trackers)).unwrap();
        handler.handle_data_table(results, &destination("trial_results", DataKind::TrialResults)).unwrap();
        handler.saver().shutdown().unwrap();

        assert_eq!(receiver.try_recv().unwrap(), "trial_num,quadrant\n1,top left\n2,bottom right");
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn test_check_if_risk_of_overwrite() {
        let root = tempfile::tempdir().unwrap();
        let handler = handler(root.path(), Config::default());

        assert!(!handler.check_if_risk_of_overwrite(EXPERIMENT, PPID, 1).unwrap());

        handler.handle_text("", &destination("log", DataKind::SessionLog)).unwrap();
        handler.saver().shutdown().unwrap();

        assert!(handler.check_if_risk_of_overwrite(EXPERIMENT, PPID, 1).unwrap());
        assert!(!handler.check_if_risk_of_overwrite(EXPERIMENT, PPID, 2).unwrap());
        assert!(matches!(handler.check_if_risk_of_overwrite(EXPERIMENT, "../p007", 1), Err(Error::InvalidName(_))));
    }

    #[test]
    fn test_invalid_destination() {
        let root = tempfile::tempdir().unwrap();
        let handler = handler(root.path(), Config::default());

        let result = handler.handle_text("escape", &Destination::new(EXPERIMENT, "..", 1, "log", DataKind::SessionLog));

        assert!(matches!(result, Err(Error::InvalidName(name)) if name == ".."));
        assert_eq!(handler.saver().pending(), 0);
    }

    #[test]
    #[tracing_test::traced_test]
    fn test_write_failure_is_logged() {
        let root = tempfile::tempdir().unwrap();

        // a file where the experiment directory should be
        fs::write(root.path().join(EXPERIMENT), "").unwrap();

        let handler = handler(root.path(), Config::default());
        handler.handle_text("lost", &destination("log", DataKind::SessionLog)).unwrap();
        handler.handle_text("lost too", &destination("notes", DataKind::SessionLog)).unwrap();
        handler.saver().shutdown().unwrap();

        logs_assert(|lines: &[&str]| match lines.iter().filter(|line| line.contains("Job failed")).count() {
            2 => Ok(()),
            n => Err(format!("expected 2 failures, got {n}")),
        });
    }
}
