use std::sync::Arc;

use anyhow::Context;
use framegen_catalog::{
    Catalog, CatalogSource, CatalogVersions, FrameLibrary, SelectedCatalog, SqliteCatalogSource, StaticFrameLibrary,
};
use framegen_document::DocumentSerializer;
use framegen_packer::{HttpPacker, Packer, PackingRequest, PassthroughPacker};
use framegen_resolve::{DataPointResolver, ToolResolver};
use framegen_rules::RuleEngine;
use framegen_status::{RequestLifecycleStore, RequestState, SqliteLifecycleStore, StatusError, STATUS_FAILED};
use framegen_types::{parse_section_size, Tool};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::assemble::{declared_tools, FrameSetAssembler};
use crate::config::CompilerConfig;
use crate::error::{BuildError, ValidationError};
use crate::reconcile::reconcile;
use crate::request::RawRequest;

pub const STATUS_REJECTED: u16 = 400;
pub const STATUS_UNAVAILABLE: u16 = 503;

const BUILT_MESSAGE: &str = "Frames generated successfully!";

/// Outcome handed back to the caller for every request.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FrameResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    #[serde(rename = "xml")]
    pub document: Option<String>,
    pub message: String,
}

impl FrameResponse {
    fn built(status_code: u16, document: String) -> Self {
        Self {
            status_code,
            document: Some(document),
            message: BUILT_MESSAGE.into(),
        }
    }

    fn failed(message: String) -> Self {
        Self {
            status_code: STATUS_FAILED,
            document: None,
            message,
        }
    }

    fn rejected(err: &ValidationError) -> Self {
        Self {
            status_code: STATUS_REJECTED,
            document: None,
            message: err.to_string(),
        }
    }

    fn unavailable(err: &StatusError) -> Self {
        Self {
            status_code: STATUS_UNAVAILABLE,
            document: None,
            message: err.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.document.is_some()
    }
}

struct Accepted {
    uid: String,
    section_size: f64,
    selected: SelectedCatalog,
}

/// Request compiler: wires catalog, rules, packer, store and serializer together.
pub struct FrameCompiler {
    pub catalogs: Arc<dyn CatalogSource>,
    pub library: Arc<dyn FrameLibrary>,
    pub store: Arc<dyn RequestLifecycleStore>,
    pub packer: Arc<dyn Packer>,
    versions: CatalogVersions,
    rules: RuleEngine,
    serializer: DocumentSerializer,
}

impl FrameCompiler {
    pub fn new(
        catalogs: Arc<dyn CatalogSource>,
        library: Arc<dyn FrameLibrary>,
        store: Arc<dyn RequestLifecycleStore>,
        packer: Arc<dyn Packer>,
    ) -> Self {
        Self {
            catalogs,
            library,
            store,
            packer,
            versions: CatalogVersions::default(),
            rules: RuleEngine::builtin(),
            serializer: DocumentSerializer::new(CompilerConfig::default().host),
        }
    }

    pub fn with_rules(mut self, rules: RuleEngine) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_versions(mut self, versions: CatalogVersions) -> Self {
        self.versions = versions;
        self
    }

    pub fn with_serializer(mut self, serializer: DocumentSerializer) -> Self {
        self.serializer = serializer;
        self
    }

    pub fn rules(&self) -> &RuleEngine {
        &self.rules
    }

    /// Production wiring: SQLite catalogs and status store, optional YAML tables, HTTP packer
    /// when an endpoint is configured.
    pub fn from_config(config: &CompilerConfig) -> anyhow::Result<Self> {
        let store = SqliteLifecycleStore::open(&config.status_db)
            .with_context(|| format!("opening status store {}", config.status_db.display()))?;
        let library: Arc<dyn FrameLibrary> = match &config.frame_library {
            Some(path) => Arc::new(StaticFrameLibrary::from_path(path)?),
            None => Arc::new(StaticFrameLibrary::empty()),
        };
        let packer: Arc<dyn Packer> = match &config.packer_url {
            Some(url) => Arc::new(HttpPacker::new(url.clone())),
            None => Arc::new(PassthroughPacker),
        };
        let rules = match &config.rules {
            Some(path) => {
                RuleEngine::from_path(path).with_context(|| format!("loading rule table {}", path.display()))?
            }
            None => RuleEngine::builtin(),
        };
        let versions = match &config.catalog_versions {
            Some(path) => CatalogVersions::from_path(path)?,
            None => CatalogVersions::default(),
        };
        Ok(Self::new(
            Arc::new(SqliteCatalogSource::new(config.catalog_dir.clone())),
            library,
            Arc::new(store),
            packer,
        )
        .with_rules(rules)
        .with_versions(versions)
        .with_serializer(DocumentSerializer::new(config.host.clone())))
    }

    /// Parses and handles a JSON request body.
    pub async fn handle_json(&self, body: &str) -> FrameResponse {
        match RawRequest::from_json(body) {
            Ok(raw) => self.handle(&raw).await,
            Err(e) => FrameResponse::rejected(&ValidationError::Malformed(e.to_string())),
        }
    }

    /// Runs one request through the UID lifecycle. Never fails: every outcome is a response.
    ///
    /// Status store calls run on the blocking pool. Catalog reads stay on the calling task;
    /// they are local read-only queries without retries.
    pub async fn handle(&self, raw: &RawRequest) -> FrameResponse {
        let accepted = match self.validate(raw) {
            Ok(accepted) => accepted,
            Err(e) => {
                info!(error = %e, "request rejected");
                return FrameResponse::rejected(&e);
            }
        };
        let uid = accepted.uid.as_str();

        let stored = {
            let uid = uid.to_string();
            self.with_store(move |store| store.get(&uid)).await
        };
        match stored {
            Ok(Some(record)) => match record.state() {
                RequestState::Success { document, status } => {
                    info!(uid, status, "returning stored document");
                    return FrameResponse::built(status, document);
                }
                RequestState::Failed { message } => {
                    let cleared = {
                        let uid = uid.to_string();
                        self.with_store(move |store| store.clear(&uid)).await
                    };
                    if let Err(e) = cleared {
                        warn!(uid, error = %e, "failed record could not be cleared");
                    }
                    return FrameResponse::failed(message);
                }
                // A build that never finalized; nothing else will, so take it over.
                RequestState::Pending => info!(uid, "pending record found, building again"),
            },
            Ok(None) => {}
            Err(e) => {
                error!(uid, error = %e, "status store unavailable");
                return FrameResponse::unavailable(&e);
            }
        }

        let catalog = match self.catalogs.open(&accepted.selected) {
            Ok(catalog) => catalog,
            Err(e) => return self.fail_unrecorded(uid, e.into()).await,
        };
        let tools = match self.resolve_tools(catalog.as_ref(), raw, accepted.section_size) {
            Ok(tools) => tools,
            Err(e) => return self.fail_unrecorded(uid, e).await,
        };
        if !tools.iter().any(|t| t.is_mwd) {
            let err = ValidationError::NoPrimaryTool;
            info!(uid, error = %err, "request rejected");
            return FrameResponse::rejected(&err);
        }
        if let Err(e) = self.pending(uid).await {
            return self.fail(uid, e.into()).await;
        }

        let (document, status) = match self.build(catalog.as_ref(), raw, &accepted, tools).await {
            Ok(built) => built,
            Err(e) => return self.fail(uid, e).await,
        };
        let finalized = {
            let (uid, document) = (uid.to_string(), document.clone());
            self.with_store(move |store| store.finalize_success(&uid, &document, status)).await
        };
        match finalized {
            Ok(()) => FrameResponse::built(status, document),
            Err(e) => self.fail(uid, e.into()).await,
        }
    }

    /// Runs a store call on the blocking pool; the SQLite store sleeps between retries.
    async fn with_store<T, F>(&self, op: F) -> Result<T, StatusError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn RequestLifecycleStore) -> Result<T, StatusError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || op(store.as_ref()))
            .await
            .map_err(|e| StatusError::Task(e.to_string()))?
    }

    async fn pending(&self, uid: &str) -> Result<(), StatusError> {
        let uid = uid.to_string();
        self.with_store(move |store| store.ensure_pending(&uid)).await
    }

    fn validate(&self, raw: &RawRequest) -> Result<Accepted, ValidationError> {
        let uid = raw.uid().ok_or(ValidationError::MissingUid)?;
        let section_text = raw.section_size.clone().unwrap_or_default();
        let section_size =
            parse_section_size(&section_text).ok_or_else(|| ValidationError::SectionSize(section_text.clone()))?;
        let selected = self
            .versions
            .select(raw.hspm_version.as_deref())
            .map_err(|_| ValidationError::UnknownCatalog(raw.hspm_version.clone().unwrap_or_default()))?;
        Ok(Accepted {
            uid: uid.to_string(),
            section_size,
            selected,
        })
    }

    fn resolve_tools(&self, catalog: &dyn Catalog, raw: &RawRequest, section_size: f64) -> Result<Vec<Tool>, BuildError> {
        let entries = declared_tools(raw)?;
        Ok(ToolResolver::new().resolve(catalog, &entries, section_size)?)
    }

    async fn build(
        &self,
        catalog: &dyn Catalog,
        raw: &RawRequest,
        accepted: &Accepted,
        tools: Vec<Tool>,
    ) -> Result<(String, u16), BuildError> {
        let mut request = FrameSetAssembler::new(catalog, self.library.as_ref(), &self.rules).assemble(
            raw,
            &accepted.uid,
            &accepted.selected,
            tools,
        )?;
        let result = self.packer.pack(&PackingRequest::new(&request)).await?;

        let tools = request.tools.clone();
        let resolver = DataPointResolver::new(catalog, &self.rules, &tools);
        let status = reconcile(&mut request, &result, &resolver)?;
        let document = self.serializer.serialize(&request)?;
        Ok((document, status))
    }

    async fn fail(&self, uid: &str, err: BuildError) -> FrameResponse {
        let message = err.user_message();
        warn!(uid, error = %err, "build failed");
        let recorded = {
            let (uid, message) = (uid.to_string(), message.clone());
            self.with_store(move |store| store.finalize_failed(&uid, &message)).await
        };
        if let Err(e) = recorded {
            error!(uid, error = %e, "failure could not be recorded");
        }
        FrameResponse::failed(message)
    }

    /// Failure found before the PENDING row exists: create it, then record the failure.
    async fn fail_unrecorded(&self, uid: &str, err: BuildError) -> FrameResponse {
        if let Err(e) = self.pending(uid).await {
            error!(uid, error = %e, "failure could not be recorded");
        }
        self.fail(uid, err).await
    }
}
