use thiserror::Error;

/// Failure modes of cell calling and demultiplexing. I/O and parsing problems are reported
/// through `anyhow` by the loaders instead.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum DropletError {
    /// A parameter is out of range or parameters contradict each other
    #[error("invalid parameters: {reason}")]
    InvalidParameters {
        /// what was wrong
        reason: String,
    },

    /// The ambient pool can't support the null model
    #[error("degenerate ambient model: {reason}")]
    DegenerateAmbientModel {
        /// what was wrong
        reason: String,
    },

    /// A hashtag has no spread in its counts, so background and signal can't be separated
    #[error("hashtag '{tag}' can't be modelled: {reason}")]
    DegenerateTag {
        /// tag (feature) name
        tag: String,
        /// what was wrong
        reason: String,
    },

    /// No barcode qualified for the ambient pool
    #[error("no barcodes with 0 < total <= {lower} among {n_barcodes} barcodes to estimate the ambient profile")]
    InsufficientAmbientData {
        /// resolved lower bound on the ambient totals
        lower: u64,
        /// number of barcodes in the matrix
        n_barcodes: usize,
    },

    /// Nothing to work on
    #[error("empty input: {what}")]
    EmptyInput {
        /// which input was empty
        what: String,
    },
}

impl DropletError {
    pub(crate) fn invalid(reason: impl Into<String>) -> DropletError {
        DropletError::InvalidParameters { reason: reason.into() }
    }

    pub(crate) fn degenerate(reason: impl Into<String>) -> DropletError {
        DropletError::DegenerateAmbientModel { reason: reason.into() }
    }

    pub(crate) fn empty(what: impl Into<String>) -> DropletError {
        DropletError::EmptyInput { what: what.into() }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_messages() {
        let e = DropletError::InsufficientAmbientData {
            lower: 100,
            n_barcodes: 12,
        };
        assert_eq!(
            e.to_string(),
            "no barcodes with 0 < total <= 100 among 12 barcodes to estimate the ambient profile"
        );
        let e = DropletError::DegenerateTag {
            tag: "HTO_3".to_string(),
            reason: "all counts equal".to_string(),
        };
        assert!(e.to_string().contains("HTO_3"));
        assert_eq!(DropletError::invalid("x"), DropletError::InvalidParameters { reason: "x".into() });
    }
}
