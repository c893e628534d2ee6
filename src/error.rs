use thiserror::Error;

/// Error type covering every failure mode of BGZF decoding, Tabix index
/// parsing/building, and VCF line parsing.
#[derive(Debug, Error)]
pub enum Error {
    #[error("not a BGZF file (missing BC extra-field header)")]
    NotBgzf,
    #[error("not gzip format")]
    NotGzip,
    #[error("corrupt BGZF block: {0}")]
    BadBlock(&'static str),
    #[error("truncated input: {0}")]
    Truncated(&'static str),
    #[error("bad tabix index: {0}")]
    BadIndex(&'static str),
    #[error("compress unit size must be below {} bytes", crate::write::MAXIMUM_COMPRESS_UNIT_SIZE)]
    TooLargeCompressUnit,
    #[error("VCF parse error in state {state} at byte {position}: {message}")]
    ParseError {
        state: &'static str,
        position: usize,
        message: &'static str,
    },
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("UTF-8 error: {0}")]
    Utf8Error(#[from] std::str::Utf8Error),
    #[error("compression error: {0}")]
    CompressionError(#[from] crate::deflate::CompressError),
    #[error("decompression error: {0}")]
    DecompressionError(#[from] crate::deflate::DecompressError),
    #[error("{0}")]
    Other(&'static str),
}

impl Error {
    /// Convert to [`std::io::Error`] for APIs constrained to `std::io`'s error type
    /// (e.g. [`std::io::Read`]/[`std::io::BufRead`]/[`std::io::Seek`] implementations).
    pub fn into_io_error(self) -> std::io::Error {
        match self {
            Error::IoError(e) => e,
            other => std::io::Error::new(std::io::ErrorKind::Other, other),
        }
    }
}

impl From<Error> for std::io::Error {
    fn from(e: Error) -> std::io::Error {
        e.into_io_error()
    }
}
