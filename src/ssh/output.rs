use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;

/// Receives remote output as it streams in
pub trait OutputHandler: Send + Sync {
    fn stdout(&self, data: &[u8]) -> io::Result<()>;
    fn stderr(&self, data: &[u8]) -> io::Result<()>;
}

/// Appends timestamped output to `<host>_stdout.log` and `<host>_stderr.log`
pub struct StreamLogger {
    host_id: String,
    stdout_file: Mutex<File>,
    stderr_file: Mutex<File>,
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

impl StreamLogger {
    pub fn new(host_id: &str, log_dir: &Path) -> io::Result<Self> {
        std::fs::create_dir_all(log_dir)?;

        let stdout_file = open_append(&log_dir.join(format!("{}_stdout.log", host_id)))?;
        let stderr_file = open_append(&log_dir.join(format!("{}_stderr.log", host_id)))?;

        Ok(Self {
            host_id: host_id.to_string(),
            stdout_file: Mutex::new(stdout_file),
            stderr_file: Mutex::new(stderr_file),
        })
    }

    fn log_to_file(file: &Mutex<File>, data: &[u8]) -> io::Result<()> {
        let mut file = file
            .lock()
            .map_err(|_| io::Error::other("log file lock poisoned"))?;

        let timestamp = chrono::Local::now()
            .format("[%Y-%m-%d %H:%M:%S] ")
            .to_string();
        file.write_all(timestamp.as_bytes())?;
        file.write_all(data)?;
        if !data.ends_with(b"\n") {
            file.write_all(b"\n")?;
        }
        file.flush()
    }

    pub fn host_id(&self) -> &str {
        &self.host_id
    }
}

impl OutputHandler for StreamLogger {
    fn stdout(&self, data: &[u8]) -> io::Result<()> {
        StreamLogger::log_to_file(&self.stdout_file, data)
    }

    fn stderr(&self, data: &[u8]) -> io::Result<()> {
        StreamLogger::log_to_file(&self.stderr_file, data)
    }
}
