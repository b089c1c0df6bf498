//! Writing sweep results to disk
//!
//! A frame is stored twice: the raw norms as CSV and a log-scaled 8-bit
//! rendering (`.log.csv`) ready to be turned into an image. Existing files
//! are never overwritten.

use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use crate::sweep::ScalarField;

/// Failure to persist a matrix; the matrix itself is untouched
#[derive(Debug, Error)]
pub enum SinkError {
    /// Target file already exists
    #[error("refusing to overwrite {0}")]
    AlreadyExists(PathBuf),
    /// File could not be created or written
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    /// CSV encoding failed
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

/// Log-scaled 8-bit rendering of a [`ScalarField`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heatmap {
    /// Columns
    pub width: usize,
    /// Rows
    pub height: usize,
    /// Row-major intensities, top row first
    pub pixels: Vec<u8>,
}

impl Heatmap {
    /// Rows in storage order
    pub fn rows(&self) -> impl Iterator<Item = &[u8]> + '_ {
        self.pixels.chunks(self.width.max(1))
    }
}

/// Map norms to intensities.
///
/// Rows are mirrored so the lowest velocity row ends up at the bottom. Each
/// value becomes `ln(v + tol) - ln(tol)`, is divided by the largest such
/// value and scaled to `0..=255`. Failed (NaN) pixels saturate to 255.
pub fn log_normalize(field: &ScalarField, tolerance: f64) -> Heatmap {
    let offset = tolerance.ln();
    let scaled: Vec<f64> = field
        .values
        .iter()
        .map(|v| (v + tolerance).ln() - offset)
        .collect();
    let max = scaled
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(0.0f64, f64::max);

    let mut pixels = Vec::with_capacity(scaled.len());
    for row in scaled.chunks(field.width.max(1)).rev() {
        pixels.extend(row.iter().map(|&v| {
            if v.is_nan() {
                u8::MAX
            } else if max > 0.0 {
                (v / max * 255.0).clamp(0.0, 255.0) as u8
            } else {
                0
            }
        }));
    }

    Heatmap {
        width: field.width,
        height: field.height,
        pixels,
    }
}

fn create_new(path: &Path) -> Result<std::fs::File, SinkError> {
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|err| match err.kind() {
            io::ErrorKind::AlreadyExists => SinkError::AlreadyExists(path.to_path_buf()),
            _ => SinkError::Io(err),
        })
}

fn write_rows<'a, T, I>(path: &Path, rows: I) -> Result<(), SinkError>
where
    T: ToString + 'a,
    I: Iterator<Item = &'a [T]>,
{
    let file = create_new(path)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    for row in rows {
        writer.write_record(row.iter().map(|v| v.to_string()))?;
    }
    writer.flush()?;
    info!(path = %path.display(), "wrote");
    Ok(())
}

/// Write the raw norms, one CSV line per row.
pub fn write_csv(field: &ScalarField, path: impl AsRef<Path>) -> Result<(), SinkError> {
    write_rows(path.as_ref(), field.rows())
}

/// Write a log-scaled rendering, one CSV line per row.
pub fn write_log_csv(heatmap: &Heatmap, path: impl AsRef<Path>) -> Result<(), SinkError> {
    write_rows(path.as_ref(), heatmap.rows())
}

/// File names for a series of frames that does not clash with earlier runs
///
/// Frames are named `{base}_{group}_{frame}`; the group is the first index
/// whose frame 0 exists neither as `.csv` nor as `.log.csv`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSequence {
    directory: PathBuf,
    base: String,
    group: usize,
}

impl FrameSequence {
    /// Pick the first free group in `directory`.
    pub fn next_free(directory: impl Into<PathBuf>, base: impl Into<String>) -> Self {
        let mut seq = Self {
            directory: directory.into(),
            base: base.into(),
            group: 0,
        };
        while seq.csv_path(0).exists() || seq.log_csv_path(0).exists() {
            seq.group += 1;
        }
        seq
    }

    /// Group index shared by every frame of this run
    pub fn group(&self) -> usize {
        self.group
    }

    fn stem(&self, frame: usize) -> String {
        format!("{}_{}_{}", self.base, self.group, frame)
    }

    /// Path of the raw CSV for `frame`
    pub fn csv_path(&self, frame: usize) -> PathBuf {
        self.directory.join(format!("{}.csv", self.stem(frame)))
    }

    /// Path of the log-scaled CSV for `frame`
    pub fn log_csv_path(&self, frame: usize) -> PathBuf {
        self.directory.join(format!("{}.log.csv", self.stem(frame)))
    }

    /// Write both files of `frame`.
    pub fn save(&self, frame: usize, field: &ScalarField, tolerance: f64) -> Result<(), SinkError> {
        write_csv(field, self.csv_path(frame))?;
        write_log_csv(&log_normalize(field, tolerance), self.log_csv_path(frame))
    }
}
