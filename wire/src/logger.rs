//! Per-node tee logger.
//!
//! Installs a [`log`] backend that writes every record both to stdout and
//! to the node's append-only `outputfile_<kind>_<port>.txt` in the
//! working directory, one wall-clock-timestamped line per event. Level
//! defaults to `info` and can be raised with the `GOSSIPNET_LOG`
//! environment variable (`error|warn|info|debug|trace`).

use {
    crate::error::{Result, WireError},
    log::{Level, Log, Metadata, Record},
    std::{
        fs::{File, OpenOptions},
        io::Write,
        sync::Mutex,
        time::{SystemTime, UNIX_EPOCH},
    },
};

struct NodeLogger {
    tag: String,
    file: Mutex<File>,
    max_level: Level,
}

fn wall_clock() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}.{:06}", now.as_secs(), now.subsec_micros())
}

impl Log for NodeLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!(
            "{} [{}] {} {}\n",
            wall_clock(),
            self.tag,
            record.level(),
            record.args()
        );
        print!("{line}");
        if let Ok(mut file) = self.file.lock() {
            let _ = file.write_all(line.as_bytes());
            let _ = file.flush();
        }
    }

    fn flush(&self) {
        if let Ok(mut file) = self.file.lock() {
            let _ = file.flush();
        }
    }
}

fn level_from_env() -> Level {
    match std::env::var("GOSSIPNET_LOG").as_deref() {
        Ok("error") => Level::Error,
        Ok("warn") => Level::Warn,
        Ok("debug") => Level::Debug,
        Ok("trace") => Level::Trace,
        _ => Level::Info,
    }
}

/// Install the tee logger for a node. `kind` is `"seed"` or `"peer"`;
/// the output file is `outputfile_<kind>_<port>.txt`, appended.
pub fn init(kind: &str, port: u16) -> Result<()> {
    let path = format!("outputfile_{kind}_{port}.txt");
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| WireError::Config(format!("cannot open {path}: {e}")))?;

    let max_level = level_from_env();
    let logger = NodeLogger {
        tag: format!("{} {port}", kind.to_uppercase()),
        file: Mutex::new(file),
        max_level,
    };
    log::set_boxed_logger(Box::new(logger))
        .map_err(|e| WireError::Config(format!("logger already installed: {e}")))?;
    log::set_max_level(max_level.to_level_filter());
    Ok(())
}
