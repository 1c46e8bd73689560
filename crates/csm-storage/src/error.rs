use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unexpected end of data: need {needed} bytes at offset {offset}, have {available}")]
    UnexpectedEof {
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("invalid utf-8 string at offset {offset}")]
    InvalidUtf8 { offset: usize },
    #[error("invalid header: {0}")]
    InvalidHeader(&'static str),
    #[error("incompatible component: expected tag {expected}, found {found}")]
    WrongComponent { expected: u8, found: u8 },
    #[error("unsupported format version {found} (supported {min}..={max})")]
    UnsupportedVersion { min: u16, max: u16, found: u16 },
    #[error("invalid {what} tag {tag}")]
    InvalidTag { what: &'static str, tag: u8 },
    #[error("payload hash mismatch: expected {expected}, found {found}")]
    HashMismatch { expected: u64, found: u64 },
    #[error("decompression failed: {0}")]
    Decompression(String),
    #[error("{message}")]
    Json { message: String },
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        // Key tables hold user paths; keep only the error category and position.
        let message = format!(
            "key table json error ({:?}) at line {} column {}",
            err.classify(),
            err.line(),
            err.column()
        );
        Self::Json { message }
    }
}
