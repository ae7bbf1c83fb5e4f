use thiserror::Error;

/// Why a loading task failed to produce a document.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("invalid PDF structure: {0}")]
    InvalidPdf(String),
    #[error("missing PDF: {0}")]
    MissingPdf(String),
    #[error("unexpected server response ({status}) while retrieving PDF \"{url}\"")]
    UnexpectedResponse { status: u16, url: String },
    #[error("password entry was cancelled")]
    PasswordCancelled,
    #[error("loading task was destroyed")]
    Destroyed,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// User-facing class of a document-open failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadFailure {
    InvalidPdf,
    MissingPdf,
    UnexpectedResponse,
    Unknown,
}

impl LoadFailure {
    pub fn classify(error: &LoadError) -> Self {
        if matches!(error, LoadError::InvalidPdf(_)) {
            LoadFailure::InvalidPdf
        } else if matches!(error, LoadError::MissingPdf(_)) {
            LoadFailure::MissingPdf
        } else if matches!(error, LoadError::UnexpectedResponse { .. }) {
            LoadFailure::UnexpectedResponse
        } else {
            LoadFailure::Unknown
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            LoadFailure::InvalidPdf => "Invalid or corrupted PDF file.",
            LoadFailure::MissingPdf => "Missing PDF file.",
            LoadFailure::UnexpectedResponse => "Unexpected server response.",
            LoadFailure::Unknown => "An error occurred while loading the PDF.",
        }
    }

    pub fn as_label(self) -> &'static str {
        match self {
            LoadFailure::InvalidPdf => "invalid_pdf",
            LoadFailure::MissingPdf => "missing_pdf",
            LoadFailure::UnexpectedResponse => "unexpected_response",
            LoadFailure::Unknown => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_is_exclusive_with_generic_fallback() {
        let cases = [
            (LoadError::InvalidPdf("bad xref".into()), LoadFailure::InvalidPdf),
            (LoadError::MissingPdf("gone.pdf".into()), LoadFailure::MissingPdf),
            (
                LoadError::UnexpectedResponse {
                    status: 500,
                    url: "https://example.com/a.pdf".into(),
                },
                LoadFailure::UnexpectedResponse,
            ),
            (LoadError::PasswordCancelled, LoadFailure::Unknown),
            (LoadError::Other(anyhow::anyhow!("boom")), LoadFailure::Unknown),
        ];
        for (error, expected) in cases {
            assert_eq!(LoadFailure::classify(&error), expected, "{error}");
        }
        assert_eq!(
            LoadFailure::Unknown.message(),
            "An error occurred while loading the PDF."
        );
    }
}
