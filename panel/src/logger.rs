use file_rotate::compression::Compression;
use file_rotate::suffix::AppendCount;
use file_rotate::{ContentLimit, FileRotate};
use parking_lot::Mutex;
use std::error::Error;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Clone)]
struct TracingWriter {
    file_rotate: Arc<Mutex<FileRotate<AppendCount>>>,
}

impl TracingWriter {
    fn new(file_rotate: Arc<Mutex<FileRotate<AppendCount>>>) -> Self {
        TracingWriter { file_rotate }
    }
}

impl io::Write for TracingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file_rotate.lock().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file_rotate.lock().flush()
    }
}

fn env_filter(verbose: bool) -> Result<EnvFilter, Box<dyn Error>> {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::new("warn")
        .add_directive(format!("panel={level}").parse()?)
        .add_directive(format!("ruleset={level}").parse()?)
        .add_directive(format!("generator={level}").parse()?)
        .add_directive("store=info".parse()?)
        .add_directive("config=info".parse()?);
    Ok(filter)
}

pub fn setup_logger(log_path: Option<&Path>, verbose: bool) -> Result<(), Box<dyn Error>> {
    let env_filter = env_filter(verbose)?;

    if let Some(log_path) = log_path {
        if let Some(path) = log_path.parent() {
            std::fs::create_dir_all(path)?;
        }
        let logger = Arc::new(Mutex::new(FileRotate::new(
            log_path,
            AppendCount::new(20),
            ContentLimit::Lines(100_000),
            Compression::None,
            #[cfg(unix)]
            None,
        )));
        let my_subscriber = FmtSubscriber::builder()
            .with_env_filter(env_filter)
            .with_ansi(false)
            .with_writer(move || TracingWriter::new(logger.clone()))
            .finish();
        tracing::subscriber::set_global_default(my_subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(env_filter)
            .with_writer(io::stderr)
            .compact()
            .finish();

        tracing::subscriber::set_global_default(subscriber)?;
    };
    Ok(())
}
