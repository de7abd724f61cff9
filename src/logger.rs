use std::{
    fs::OpenOptions,
    io::{self, Write},
    path::Path,
    sync::{Mutex, OnceLock, PoisonError},
};

use log::{LevelFilter, Log, Metadata, Record};

/// Appends every record to a file. Installed when `--log-file` is given so
/// MI traffic does not interleave with the REPL on stderr.
#[derive(Debug)]
pub struct Logger {
    file: Mutex<Option<std::fs::File>>,
    level: Mutex<LevelFilter>,
}

impl Logger {
    pub fn new() -> Self {
        Self {
            file: Mutex::new(None),
            level: Mutex::new(LevelFilter::Info),
        }
    }

    pub fn open<P: AsRef<Path>>(&self, path: P, verbose: bool) -> io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        *self.file.lock().unwrap_or_else(PoisonError::into_inner) = Some(file);
        *self.level.lock().unwrap_or_else(PoisonError::into_inner) = level_for(verbose);
        Ok(())
    }

    fn max_level(&self) -> LevelFilter {
        *self.level.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut guard = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(f) = guard.as_mut() {
            let _ = writeln!(
                f,
                "{:<5} [{}] {}",
                record.level(),
                record.target(),
                record.args()
            );
        }
    }

    fn flush(&self) {
        let mut guard = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(f) = guard.as_mut() {
            let _ = f.flush();
        }
    }
}

static LOGGER: OnceLock<Logger> = OnceLock::new();

pub fn global() -> &'static Logger {
    LOGGER.get_or_init(Logger::new)
}

fn level_for(verbose: bool) -> LevelFilter {
    if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

/// Routes the `log` facade to `path` when given, to `env_logger` otherwise.
pub fn init(path: Option<&Path>, verbose: bool) -> io::Result<()> {
    match path {
        Some(path) => {
            let logger = global();
            logger.open(path, verbose)?;
            log::set_logger(logger)
                .map_err(|e| io::Error::new(io::ErrorKind::AlreadyExists, e.to_string()))?;
            log::set_max_level(level_for(verbose));
        }
        None => {
            let default = if verbose { "debug" } else { "warn" };
            let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
                .try_init();
        }
    }
    Ok(())
}
