use std::path::PathBuf;

/// Process-level settings, read from `FRAMEGEN_*` environment variables.
#[derive(Clone, Debug, PartialEq)]
pub struct CompilerConfig {
    /// Directory holding the catalog database files.
    pub catalog_dir: PathBuf,
    pub status_db: PathBuf,
    /// Rule table override; the builtin table is used when unset.
    pub rules: Option<PathBuf>,
    pub frame_library: Option<PathBuf>,
    pub catalog_versions: Option<PathBuf>,
    /// Packing service endpoint; unset means frames are accepted as assembled.
    pub packer_url: Option<String>,
    /// Machine name stamped into documents.
    pub host: String,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            catalog_dir: PathBuf::from("./catalogs"),
            status_db: PathBuf::from("./framegen-status.db"),
            rules: None,
            frame_library: None,
            catalog_versions: None,
            packer_url: None,
            host: "framegen".into(),
        }
    }
}

fn non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl CompilerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            catalog_dir: non_empty("FRAMEGEN_CATALOG_DIR").map(PathBuf::from).unwrap_or(defaults.catalog_dir),
            status_db: non_empty("FRAMEGEN_STATUS_DB").map(PathBuf::from).unwrap_or(defaults.status_db),
            rules: non_empty("FRAMEGEN_RULES").map(PathBuf::from),
            frame_library: non_empty("FRAMEGEN_FRAME_LIBRARY").map(PathBuf::from),
            catalog_versions: non_empty("FRAMEGEN_CATALOG_VERSIONS").map(PathBuf::from),
            packer_url: non_empty("FRAMEGEN_PACKER_URL"),
            host: std::env::var("FRAMEGEN_HOST")
                .or_else(|_| std::env::var("HOSTNAME"))
                .unwrap_or(defaults.host),
        }
    }
}
