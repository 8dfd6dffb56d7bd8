use crossbeam_channel::{Receiver, Sender, unbounded};
use std::fs::{File, OpenOptions, create_dir_all};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

pub mod message;

pub use message::{LogMessage, Severity};

/// Log file configuration
const LOG_FILE_MAX_SIZE: u64 = 1024 * 1024; // 1MB
const LOG_FILE_MAX_COUNT: usize = 5;
const LOG_FILE_NAME: &str = "filly.log";

/// File-based log writer with rotation
#[derive(Debug)]
pub struct LogFileWriter {
    log_dir: PathBuf,
    current_file: Option<File>,
    current_size: u64,
}

impl LogFileWriter {
    /// Opens a writer in `dir`, or in the platform data directory when `dir` is `None`.
    pub fn new(dir: Option<PathBuf>) -> Result<Self, std::io::Error> {
        let log_dir = match dir {
            Some(dir) => dir,
            None => Self::default_log_directory(),
        };
        create_dir_all(&log_dir)?;

        Ok(LogFileWriter {
            log_dir,
            current_file: None,
            current_size: 0,
        })
    }

    fn default_log_directory() -> PathBuf {
        let mut path = dirs::data_local_dir()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        path.push("filly");
        path.push("logs");
        path
    }

    fn current_log_path(&self) -> PathBuf {
        self.log_dir.join(LOG_FILE_NAME)
    }

    fn rotate_logs(&mut self) -> Result<(), std::io::Error> {
        let current_path = self.current_log_path();
        self.current_file = None;

        for i in (1..LOG_FILE_MAX_COUNT).rev() {
            let old_path = self.log_dir.join(format!("{}.{}", LOG_FILE_NAME, i));
            let new_path = self.log_dir.join(format!("{}.{}", LOG_FILE_NAME, i + 1));

            if old_path.exists() {
                if i == LOG_FILE_MAX_COUNT - 1 {
                    std::fs::remove_file(&old_path)?;
                } else {
                    std::fs::rename(&old_path, &new_path)?;
                }
            }
        }

        if current_path.exists() {
            let archived_path = self.log_dir.join(format!("{}.1", LOG_FILE_NAME));
            std::fs::rename(&current_path, &archived_path)?;
        }

        self.current_size = 0;
        Ok(())
    }

    fn ensure_file_open(&mut self) -> Result<(), std::io::Error> {
        if self.current_file.is_none() {
            let path = self.current_log_path();
            self.current_file = Some(OpenOptions::new().create(true).append(true).open(&path)?);
            if let Ok(metadata) = std::fs::metadata(&path) {
                self.current_size = metadata.len();
            }
        }
        Ok(())
    }

    pub fn write_log(&mut self, log_msg: &LogMessage) -> Result<(), std::io::Error> {
        self.ensure_file_open()?;

        let formatted_log = format!("{}\n", log_msg);
        let log_bytes = formatted_log.as_bytes();

        if self.current_size + log_bytes.len() as u64 > LOG_FILE_MAX_SIZE {
            self.rotate_logs()?;
            self.ensure_file_open()?;
        }

        if let Some(ref mut file) = self.current_file {
            file.write_all(log_bytes)?;
            file.flush()?;
            self.current_size += log_bytes.len() as u64;
        }

        Ok(())
    }

    pub fn log_file_path(&self) -> PathBuf {
        self.current_log_path()
    }
}

/// Logger operating mode
#[derive(Debug, Clone)]
pub enum LoggerMode {
    /// Logs directly to the terminal
    Standalone,
    /// Forwards every message through a channel (hosts, tests)
    Embedded(Sender<LogMessage>),
    /// Logs to the rotating log file only
    File,
    /// Logs to the log file and the terminal
    Full,
    /// Drops everything
    Silent,
}

/// Cloneable logging handle.
///
/// Every engine, driver and evaluation context receives one of these instead of
/// reaching for a process-wide logger. Clones share mode, level and file writer.
#[derive(Clone)]
pub struct Logger {
    mode: Arc<Mutex<LoggerMode>>,
    level: Arc<Mutex<Severity>>,
    file_writer: Arc<Mutex<Option<LogFileWriter>>>,
}

impl Default for Logger {
    fn default() -> Self {
        Logger::new_standalone()
    }
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger").field("level", &self.level()).finish()
    }
}

impl Logger {
    fn with_mode(mode: LoggerMode, file_writer: Option<LogFileWriter>) -> Self {
        Logger {
            mode: Arc::new(Mutex::new(mode)),
            level: Arc::new(Mutex::new(Severity::Info)),
            file_writer: Arc::new(Mutex::new(file_writer)),
        }
    }

    pub fn new_standalone() -> Self {
        Self::with_mode(LoggerMode::Standalone, None)
    }

    pub fn new_embedded(sender: Sender<LogMessage>) -> Self {
        Self::with_mode(LoggerMode::Embedded(sender), None)
    }

    pub fn new_silent() -> Self {
        Self::with_mode(LoggerMode::Silent, None)
    }

    /// Create a logger writing to the rotating log file in `dir`.
    pub fn new_file(dir: Option<PathBuf>) -> Self {
        Self::with_mode(LoggerMode::File, Self::open_writer(dir))
    }

    /// Create a logger writing to both the log file and the terminal.
    pub fn new_full(dir: Option<PathBuf>) -> Self {
        Self::with_mode(LoggerMode::Full, Self::open_writer(dir))
    }

    fn open_writer(dir: Option<PathBuf>) -> Option<LogFileWriter> {
        match LogFileWriter::new(dir) {
            Ok(writer) => Some(writer),
            Err(e) => {
                eprintln!("Failed to create log file writer: {}", e);
                None
            }
        }
    }

    /// Builder-style level override.
    pub fn with_level(self, level: Severity) -> Self {
        self.set_level(level);
        self
    }

    pub fn set_level(&self, level: Severity) {
        if let Ok(mut current) = self.level.lock() {
            *current = level;
        }
    }

    pub fn level(&self) -> Severity {
        self.level.lock().map(|l| *l).unwrap_or(Severity::Info)
    }

    pub fn set_mode(&self, new_mode: LoggerMode) {
        if let Ok(mut mode) = self.mode.lock() {
            *mode = new_mode;
        }
    }

    pub fn log_file_path(&self) -> Option<PathBuf> {
        self.file_writer
            .lock()
            .ok()
            .and_then(|w| w.as_ref().map(|w| w.log_file_path()))
    }

    fn to_terminal(log_msg: &LogMessage) {
        match log_msg.level {
            Severity::Fatal | Severity::Error => {
                eprintln!("{}", log_msg);
                let _ = std::io::stderr().flush();
            }
            _ => {
                println!("{}", log_msg);
                let _ = std::io::stdout().flush();
            }
        }
    }

    fn to_file(&self, log_msg: &LogMessage) {
        if let Ok(mut file_writer) = self.file_writer.lock() {
            if let Some(writer) = file_writer.as_mut() {
                if let Err(e) = writer.write_log(log_msg) {
                    eprintln!("Failed to write to log file: {}", e);
                }
            }
        }
    }

    /// Log a message with the specified severity
    pub fn log(&self, level: Severity, msg: String) {
        if level > self.level() {
            return;
        }
        let log_msg = LogMessage::new(level, msg);

        let Ok(mode) = self.mode.lock() else {
            return;
        };
        match &*mode {
            LoggerMode::Standalone => Self::to_terminal(&log_msg),
            LoggerMode::Embedded(sender) => {
                if sender.try_send(log_msg.clone()).is_err() {
                    eprintln!("Logger channel error: {}", log_msg);
                }
            }
            LoggerMode::File => self.to_file(&log_msg),
            LoggerMode::Full => {
                self.to_file(&log_msg);
                Self::to_terminal(&log_msg);
            }
            LoggerMode::Silent => (),
        }
    }

    pub fn debug(&self, msg: String) {
        self.log(Severity::Debug, msg);
    }

    pub fn info(&self, msg: String) {
        self.log(Severity::Info, msg);
    }

    pub fn warn(&self, msg: String) {
        self.log(Severity::Warn, msg);
    }

    pub fn error(&self, msg: String) {
        self.log(Severity::Error, msg);
    }

    pub fn fatal(&self, msg: String) {
        self.log(Severity::Fatal, msg);
    }
}

/// Create a logging channel pair for `Logger::new_embedded`
pub fn create_log_channel() -> (Sender<LogMessage>, Receiver<LogMessage>) {
    unbounded()
}

#[macro_export]
macro_rules! log_debug {
    ($logger:expr, $($arg:tt)*) => {
        $logger.debug(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_info {
    ($logger:expr, $($arg:tt)*) => {
        $logger.info(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($logger:expr, $($arg:tt)*) => {
        $logger.warn(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_error {
    ($logger:expr, $($arg:tt)*) => {
        $logger.error(format!($($arg)*))
    };
}
