//! Probe errors

use std::io;

use crate::backend::Arch;

pub type Result<T> = std::result::Result<T, ProbeError>;

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// The OS refused an executable mapping. Fatal for the whole run.
    #[error("mmap of {bytes} executable bytes failed")]
    Map {
        bytes: usize,
        #[source]
        source: io::Error,
    },

    #[error("munmap of {bytes} bytes failed")]
    Unmap {
        bytes: usize,
        #[source]
        source: io::Error,
    },

    #[error("{pages} pages of {page_size} bytes overflows the address space")]
    SizeOverflow { pages: usize, page_size: usize },

    #[error("write of {len} bytes at offset {offset} exceeds region of {capacity} bytes")]
    OutOfBounds {
        offset: usize,
        len: usize,
        capacity: usize,
    },

    #[error("region holds {available} pages, chain of {jumps} jumps needs {required}")]
    RegionTooSmall {
        jumps: usize,
        required: usize,
        available: usize,
    },

    #[error("{arch} jump displacement {displacement} is outside [{min}, {max}]")]
    DisplacementOverflow {
        arch: Arch,
        displacement: i64,
        min: i64,
        max: i64,
    },

    #[error("{arch} jump displacement {displacement} is not a multiple of {align}")]
    MisalignedDisplacement {
        arch: Arch,
        displacement: i64,
        align: i64,
    },

    #[error("malformed jump chain at page {page}: {reason}")]
    MalformedChain { page: usize, reason: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid page size {bytes}: {reason}")]
    InvalidPageSize { bytes: usize, reason: &'static str },

    #[error("no instruction encoder for host architecture {0}")]
    UnsupportedArch(&'static str),

    #[error(transparent)]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(err: &dyn std::error::Error) -> String {
        let mut out = err.to_string();
        let mut next = err.source();
        while let Some(cause) = next {
            out.push_str(": ");
            out.push_str(&cause.to_string());
            next = cause.source();
        }
        out
    }

    #[test]
    fn test_os_error_reported_once() {
        let map = ProbeError::Map {
            bytes: 8192,
            source: io::Error::from_raw_os_error(libc::ENOMEM),
        };
        let unmap = ProbeError::Unmap {
            bytes: 4096,
            source: io::Error::from_raw_os_error(libc::EINVAL),
        };
        for err in [map, unmap] {
            let text = chain(&err);
            assert_eq!(text.matches("os error").count(), 1, "{text}");
        }
        assert_eq!(
            ProbeError::Map {
                bytes: 8192,
                source: io::Error::from_raw_os_error(libc::ENOMEM),
            }
            .to_string(),
            "mmap of 8192 executable bytes failed"
        );
    }
}
