use std::{
  fs::{self, File, OpenOptions},
  io::{self, BufRead, BufReader, Write},
  path::{Path, PathBuf},
  sync::{Arc, OnceLock},
};

use parking_lot::Mutex;
use tracing_subscriber::{EnvFilter, fmt::{self, time::LocalTime}, prelude::*};

use crate::configs::Config;

static FILE_SINK: OnceLock<LineCappedWriter> = OnceLock::new();

/// `println!` that is mirrored into the log file once one is configured.
#[macro_export]
macro_rules! log_println {
    () => {{
        std::println!();
        $crate::common::logger::mirror_to_file("\n");
    }};
    ($($arg:tt)*) => {{
        let msg = format!($($arg)*);
        std::println!("{}", msg);
        $crate::common::logger::mirror_to_file(&format!("{}\n", msg));
    }};
}

pub fn mirror_to_file(msg: &str) {
  if let Some(mut writer) = FILE_SINK.get().cloned() {
    let _ = writer.write_all(strip_ansi(msg).as_bytes());
  }
}

fn strip_ansi(s: &str) -> String {
  let mut out = String::with_capacity(s.len());
  let mut chars = s.chars();
  while let Some(c) = chars.next() {
    if c == '\x1b' {
      // skip until the terminating letter of the CSI sequence
      for t in chars.by_ref() {
        if t.is_ascii_alphabetic() {
          break;
        }
      }
    } else {
      out.push(c);
    }
  }
  out
}

/// Builds the filter directive from `[logging]`: `level[,filters]`.
pub fn filter_directive(config: &Config) -> String {
  let logging = config.logging.as_ref();
  let level = logging.and_then(|l| l.level.as_deref()).unwrap_or("info");
  match logging.and_then(|l| l.filters.as_deref()) {
    Some(filters) if !filters.is_empty() => format!("{},{}", level, filters),
    _ => level.to_string(),
  }
}

pub fn init(config: &Config) {
  // RUST_LOG wins over the config file
  let env_filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_directive(config)));

  let stdout_layer = fmt::layer()
    .with_timer(LocalTime::rfc_3339())
    .with_target(true)
    .with_thread_ids(true)
    .with_line_number(true)
    .with_file(false);

  let file_layer = config
    .logging
    .as_ref()
    .and_then(|l| l.file.as_ref())
    .map(|file| {
      if let Some(parent) = Path::new(&file.path).parent() {
        if let Err(e) = fs::create_dir_all(parent) {
          eprintln!("Failed to create log directory: {}", e);
        }
      }
      let writer = LineCappedWriter::new(&file.path, file.max_lines);
      let _ = FILE_SINK.set(writer.clone());
      fmt::layer()
        .with_writer(writer)
        .with_timer(LocalTime::rfc_3339())
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_ansi(false)
    });

  tracing_subscriber::registry()
    .with(env_filter)
    .with(stdout_layer)
    .with(file_layer)
    .init();
}

/// Appends to a log file and trims it back to `max_lines` once it has grown
/// ten percent past the cap.
#[derive(Clone)]
pub struct LineCappedWriter {
  inner: Arc<Mutex<CappedFile>>,
}

struct CappedFile {
  path: PathBuf,
  max_lines: usize,
  approx_lines: usize,
}

impl LineCappedWriter {
  pub fn new(path: impl Into<PathBuf>, max_lines: u32) -> Self {
    let path = path.into();
    let approx_lines = File::open(&path)
      .map(|f| BufReader::new(f).lines().count())
      .unwrap_or(0);
    Self {
      inner: Arc::new(Mutex::new(CappedFile {
        path,
        max_lines: max_lines.max(1) as usize,
        approx_lines,
      })),
    }
  }
}

impl CappedFile {
  fn slack(&self) -> usize {
    (self.max_lines / 10).max(50)
  }

  fn trim(&mut self) -> io::Result<()> {
    let lines: Vec<String> = BufReader::new(File::open(&self.path)?)
      .lines()
      .collect::<Result<_, _>>()?;
    let keep_from = lines.len().saturating_sub(self.max_lines);
    let mut file = File::create(&self.path)?;
    for line in &lines[keep_from..] {
      writeln!(file, "{}", line)?;
    }
    self.approx_lines = lines.len() - keep_from;
    Ok(())
  }
}

impl io::Write for LineCappedWriter {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    let mut state = self.inner.lock();
    OpenOptions::new()
      .create(true)
      .append(true)
      .open(&state.path)?
      .write_all(buf)?;

    state.approx_lines += buf.iter().filter(|&&b| b == b'\n').count();
    if state.approx_lines >= state.max_lines + state.slack() {
      if let Err(e) = state.trim() {
        eprintln!("Failed to trim log file: {}", e);
      }
    }
    Ok(buf.len())
  }

  fn flush(&mut self) -> io::Result<()> {
    Ok(())
  }
}

impl<'a> fmt::MakeWriter<'a> for LineCappedWriter {
  type Writer = Self;

  fn make_writer(&'a self) -> Self::Writer {
    self.clone()
  }
}
