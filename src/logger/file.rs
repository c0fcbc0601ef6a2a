/// Plain-text log file output
///
/// The file is opened in append mode once at startup; every formatted line is
/// written without ANSI colors.
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

static LOG_FILE: Lazy<Mutex<Option<BufWriter<File>>>> = Lazy::new(|| Mutex::new(None));

pub fn init_file_logging(path: &str) -> std::io::Result<()> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let file = OpenOptions::new().create(true).append(true).open(path)?;
    *LOG_FILE.lock() = Some(BufWriter::new(file));
    Ok(())
}

pub fn write_to_file(line: &str) {
    let mut guard = LOG_FILE.lock();
    if let Some(writer) = guard.as_mut() {
        // A failing log file must not take the process down
        let _ = writeln!(writer, "{}", line);
    }
}

pub fn flush_file_logging() {
    if let Some(writer) = LOG_FILE.lock().as_mut() {
        let _ = writer.flush();
    }
}
