use framegen_catalog::CatalogError;
use framegen_document::DocumentError;
use framegen_packer::PackerError;
use framegen_resolve::ResolveError;
use framegen_status::StatusError;
use thiserror::Error;

/// Message persisted when the packer returned neither frames nor errors.
pub const EMPTY_BUILD_MESSAGE: &str =
    "Frame Generator was not able to build frame. Increase bit rate or reduce required update rates.";

/// Message persisted when an embedded token or tool list is missing from the request.
pub const MISSING_INPUT_MESSAGE: &str = "RTOF.json file didn't load correctly. Please check your input.";

const COMPATIBILITY_MARKER: &str = "Rules for ";
const COMPATIBILITY_SUFFIX: &str = ". Tool is not compatible with Frame Generator.";

/// Rejections raised before the request touches the status store.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("request is not valid JSON: {0}")]
    Malformed(String),
    #[error("UID is missing in the request.")]
    MissingUid,
    #[error("section size {0:?} is not a number of inches")]
    SectionSize(String),
    #[error("unknown catalog version {0:?}")]
    UnknownCatalog(String),
    #[error("MWD tool is missing in frame request!")]
    NoPrimaryTool,
}

/// Failures after a UID has been accepted. Each one ends as a FAILED record.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Packer(#[from] PackerError),
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error(transparent)]
    Status(#[from] StatusError),
    #[error("{field} list missing from {frame}")]
    MissingInput { frame: String, field: &'static str },
    #[error("{field} list in {frame} is not valid JSON: {reason}")]
    MalformedInput {
        frame: String,
        field: &'static str,
        reason: String,
    },
    /// The packer rejected the frames; the payload is the user-facing summary.
    #[error("{0}")]
    Incompatible(String),
    #[error("packer returned no frames")]
    EmptyBuild,
}

impl BuildError {
    /// Text stored with the FAILED record and returned to the caller.
    pub fn user_message(&self) -> String {
        match self {
            BuildError::MissingInput { .. } => MISSING_INPUT_MESSAGE.to_string(),
            BuildError::EmptyBuild => EMPTY_BUILD_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PackerErrorClass {
    Hard,
    Compatibility,
    Advisory,
}

pub fn classify(message: &str) -> PackerErrorClass {
    if message.contains(COMPATIBILITY_MARKER) {
        PackerErrorClass::Compatibility
    } else if message.trim_start().to_lowercase().starts_with("warning") {
        PackerErrorClass::Advisory
    } else {
        PackerErrorClass::Hard
    }
}

/// Folds the packer's `(frame, message)` pairs into one user-facing message.
///
/// Hard errors win and are listed one per line. Otherwise the first compatibility message is
/// reported on its own, and advisories are joined on a single line.
pub fn summarize_packer_errors(messages: &[(&str, &str)]) -> Option<String> {
    if messages.is_empty() {
        return None;
    }
    let of_class = |class: PackerErrorClass| messages.iter().filter(move |(_, m)| classify(m) == class);

    let hard: Vec<String> = of_class(PackerErrorClass::Hard)
        .map(|(frame, m)| format!("{}: {m}", frame.to_uppercase()))
        .collect();
    if !hard.is_empty() {
        return Some(hard.join("\n"));
    }
    if let Some((_, m)) = of_class(PackerErrorClass::Compatibility).next() {
        let head = m.split(" (no ").next().unwrap_or_default();
        return Some(format!("{head}{COMPATIBILITY_SUFFIX}"));
    }
    let advisories: Vec<String> = of_class(PackerErrorClass::Advisory)
        .map(|(frame, m)| format!("{} - {m}", frame.to_uppercase()))
        .collect();
    Some(advisories.join(" | "))
}
