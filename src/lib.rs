use std::path::{Path, PathBuf};

pub mod npy;

mod synthetic_dataset;

pub use npy::{NpyError, NpyHeader};

/// Bytes in front of the pixel data of a version 1.0 `.npy` dataset
pub const HEADER_SIZE: usize = 80;
pub const IMAGE_WIDTH: usize = 28;
pub const IMAGE_HEIGHT: usize = 28;
/// How many images are copied out of each dataset
pub const RECORD_COUNT: usize = 1000;
pub const DEFAULT_DATASET: &str = "train.npy";

/// Where the records live in the input, and how many of them to take
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLayout {
    pub header_size: usize,
    pub width: usize,
    pub height: usize,
    pub count: usize,
}

impl RecordLayout {
    pub const DEFAULT: Self = Self {
        header_size: HEADER_SIZE,
        width: IMAGE_WIDTH,
        height: IMAGE_HEIGHT,
        count: RECORD_COUNT,
    };

    pub const fn with_count(self, count: usize) -> Self {
        Self { count, ..self }
    }

    /// Bytes per record
    pub fn record_size(&self) -> ExtractResult<usize> {
        self.width
            .checked_mul(self.height)
            .ok_or(ExtractError::LayoutOverflow)
    }

    /// Bytes in the output file
    pub fn data_len(&self) -> ExtractResult<usize> {
        self.record_size()?
            .checked_mul(self.count)
            .ok_or(ExtractError::LayoutOverflow)
    }

    pub fn required_input_len(&self) -> ExtractResult<usize> {
        self.data_len()?
            .checked_add(self.header_size)
            .ok_or(ExtractError::LayoutOverflow)
    }
}

impl Default for RecordLayout {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Debug)]
pub enum ExtractError {
    Io(std::io::Error),
    /// The input ends before the last requested record does
    TruncatedInput { required: usize, actual: usize },
    /// The layout describes more bytes than fit in a `usize`
    LayoutOverflow,
    Npy(NpyError),
}

pub type ExtractResult<T> = Result<T, ExtractError>;

impl From<std::io::Error> for ExtractError {
    fn from(e: std::io::Error) -> Self {
        ExtractError::Io(e)
    }
}

impl From<NpyError> for ExtractError {
    fn from(e: NpyError) -> Self {
        ExtractError::Npy(e)
    }
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::Io(e) => write!(f, "i/o error: {e}"),
            ExtractError::TruncatedInput { required, actual } => write!(
                f,
                "input is {actual} bytes long, but the requested records need {required}"
            ),
            ExtractError::LayoutOverflow => write!(f, "record layout does not fit in memory"),
            ExtractError::Npy(e) => write!(f, "bad npy header: {e}"),
        }
    }
}

impl std::error::Error for ExtractError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExtractError::Io(e) => Some(e),
            ExtractError::Npy(e) => Some(e),
            _ => None,
        }
    }
}

/// The records described by `layout`, as one contiguous slice of `input`.
///
/// Anything after the last requested record is ignored.
pub fn extract_records<'a>(input: &'a [u8], layout: &RecordLayout) -> ExtractResult<&'a [u8]> {
    let required = layout.required_input_len()?;

    if input.len() < required {
        return Err(ExtractError::TruncatedInput {
            required,
            actual: input.len(),
        });
    }

    Ok(&input[layout.header_size..required])
}

/// `dir/train.npy` becomes `dir/train1000.bin` for 1000 records
pub fn output_path(input: &Path, count: usize) -> PathBuf {
    let mut name = input.file_stem().unwrap_or_default().to_os_string();
    name.push(format!("{count}.bin"));

    input.with_file_name(name)
}

/// Validate `input` against `layout` and return the record bytes.
///
/// Files with a readable npy header get that header checked too. Anything else,
/// including data that merely starts with the npy magic, is taken to be
/// `header_size` opaque bytes followed by records.
pub fn records_from_dataset<'a>(
    input: &'a [u8],
    layout: &RecordLayout,
) -> ExtractResult<&'a [u8]> {
    if !npy::has_magic(input) {
        log::warn!(
            "no npy magic found; skipping {} header bytes unchecked",
            layout.header_size
        );
        return extract_records(input, layout);
    }

    match NpyHeader::parse(input) {
        Ok(header) => {
            log::debug!(
                "npy v{}.{}: descr {:?}, shape {:?}, data at {}",
                header.major,
                header.minor,
                header.descr,
                header.shape,
                header.data_offset()
            );
            header.check(layout)?;
        }
        Err(e) => {
            log::warn!(
                "unreadable npy header ({e}); skipping {} header bytes unchecked",
                layout.header_size
            );
        }
    }

    extract_records(input, layout)
}

/// Convert the dataset at `input` into a headerless file next to it, and return
/// the path of that file. Nothing is written if the input fails validation.
pub fn convert(input: &Path, layout: &RecordLayout) -> ExtractResult<PathBuf> {
    let dataset = std::fs::read(input)?;
    let records = records_from_dataset(&dataset, layout)?;

    let path = output_path(input, layout.count);
    std::fs::write(&path, records)?;

    log::info!(
        "wrote {} records ({} bytes) from {} to {}",
        layout.count,
        records.len(),
        input.display(),
        path.display()
    );

    Ok(path)
}

/// Convert each dataset in turn, stopping at the first one that fails.
/// Returns the output paths in input order.
pub fn convert_all(datasets: &[PathBuf], layout: &RecordLayout) -> ExtractResult<Vec<PathBuf>> {
    let mut outputs = Vec::with_capacity(datasets.len());

    for dataset in datasets {
        match convert(dataset, layout) {
            Ok(path) => outputs.push(path),
            Err(e) => {
                log::error!("failed to convert {}: {e}", dataset.display());
                return Err(e);
            }
        }
    }

    Ok(outputs)
}
