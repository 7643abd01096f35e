use thiserror::Error;

/// Broad classification used by the recovery policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The stream violates the codestream or box syntax.
    Corruption,
    /// The stream uses a coding option this decoder does not implement.
    Unsupported,
    /// A configured pixel or memory guard would be exceeded.
    ResourceLimit,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum J2kError {
    #[error("Need more data")]
    NeedMoreData,
    #[error("Invalid data: {0}")]
    InvalidData(String),
    #[error("Start of codestream marker not found and no valid JP2 box structure")]
    StartOfCodestreamNotFound,
    #[error("Invalid box field size")]
    InvalidBoxSize,
    #[error("Unknown codestream marker 0x{0:04X}")]
    UnknownMarker(u16),
    #[error("Invalid quantization style 0x{0:02X}")]
    InvalidQuantizationStyle(u8),
    #[error("Invalid progression order {0}")]
    InvalidProgressionOrder(u8),
    #[error("Marker 0x{marker:04X} found before the SIZ marker")]
    MissingSiz { marker: u16 },
    #[error("Tile index {index} out of range ({count} tiles)")]
    InvalidTileIndex { index: u16, count: usize },
    #[error("Inclusion tree missing for precinct {precinct} at resolution {resolution}")]
    MissingInclusionTree { resolution: usize, precinct: usize },
    #[error("Invalid segmentation symbol 0x{symbol:X} in code-block {codeblock}")]
    InvalidSegmentationSymbol { codeblock: usize, symbol: u8 },
    #[error(
        "Code-block {codeblock} declares {declared} coding passes but only {available} are possible"
    )]
    CodingPassMismatch {
        codeblock: usize,
        declared: u32,
        available: u32,
    },
    #[error("Unsupported feature: {0}")]
    UnsupportedFeature(String),
    #[error("Resource limit exceeded: {what} needs {requested}, limit is {limit}")]
    ResourceLimitExceeded {
        what: &'static str,
        requested: u64,
        limit: u64,
    },
}

impl J2kError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            J2kError::UnsupportedFeature(_) => ErrorKind::Unsupported,
            J2kError::ResourceLimitExceeded { .. } => ErrorKind::ResourceLimit,
            _ => ErrorKind::Corruption,
        }
    }

    /// Errors of this kind may be swallowed in best-effort mode.
    pub fn is_recoverable(&self) -> bool {
        self.kind() == ErrorKind::Corruption
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(J2kError::NeedMoreData.kind(), ErrorKind::Corruption);
        assert_eq!(
            J2kError::UnsupportedFeature("bypass".into()).kind(),
            ErrorKind::Unsupported
        );
        let limit = J2kError::ResourceLimitExceeded {
            what: "pixels",
            requested: 200,
            limit: 100,
        };
        assert_eq!(limit.kind(), ErrorKind::ResourceLimit);
        assert!(!limit.is_recoverable());
        assert!(J2kError::UnknownMarker(0xFF30).is_recoverable());
    }

    #[test]
    fn test_error_messages_name_the_offender() {
        assert_eq!(
            J2kError::UnknownMarker(0xFF30).to_string(),
            "Unknown codestream marker 0xFF30"
        );
        let limit = J2kError::ResourceLimitExceeded {
            what: "pixels",
            requested: 200,
            limit: 100,
        };
        assert_eq!(
            limit.to_string(),
            "Resource limit exceeded: pixels needs 200, limit is 100"
        );
    }
}
