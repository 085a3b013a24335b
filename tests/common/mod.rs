//! Shared fixtures for reconciler integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use tf_reconciler::controller::{ReconcileOutcome, Reconciler};
use tf_reconciler::engine::{ApplyRequest, Engine, EngineApply, EnginePlan, PlanRequest};
use tf_reconciler::error::{ApplyError, PlanError, ReconcilerError, StoreError};
use tf_reconciler::resource::{
    ConditionType, MemoryResourceStore, Resource, ResourceId, ResourceStore, SourceReference,
    TerraformSpec,
};
use tf_reconciler::source::{
    ArtifactLocation, MemorySourceProvider, SourceArtifact, SourceProvider, WorkspaceMaterializer,
};
use tf_reconciler::store::{
    BlobKey, BlobStore, Labels, LedgerStore, MemoryBlobStore, PlanStore, PutOutcome, StateStore,
    StoredBlob,
};

/// Outputs payload returned by a successful scripted apply.
pub const OUTPUTS: &str = r#"{
  "greeting": {"sensitive": false, "type": "string", "value": "Hello, world!"},
  "token": {"sensitive": true, "type": "string", "value": "s3cr3t"}
}"#;

/// Engine double that plans and applies in memory.
///
/// Plans report changes unless the workspace holds a `NO_CHANGES` file.
/// Plan bytes embed a call counter, so re-planning never yields the same
/// bytes. Failures are scripted per call.
#[derive(Default)]
pub struct ScriptedEngine {
    plan_calls: AtomicUsize,
    apply_calls: AtomicUsize,
    plan_failures: Mutex<VecDeque<PlanError>>,
    apply_failures: Mutex<VecDeque<ApplyError>>,
    outputs: Mutex<Option<Vec<u8>>>,
    applied: Mutex<Vec<Vec<u8>>>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plan_calls(&self) -> usize {
        self.plan_calls.load(Ordering::SeqCst)
    }

    pub fn apply_calls(&self) -> usize {
        self.apply_calls.load(Ordering::SeqCst)
    }

    /// Plan blobs passed to apply, in order.
    pub fn applied_plans(&self) -> Vec<Vec<u8>> {
        self.applied.lock().expect("lock").clone()
    }

    pub fn fail_next_plan(&self, error: PlanError) {
        self.plan_failures.lock().expect("lock").push_back(error);
    }

    pub fn fail_next_apply(&self, error: ApplyError) {
        self.apply_failures.lock().expect("lock").push_back(error);
    }

    pub fn set_outputs(&self, payload: &[u8]) {
        *self.outputs.lock().expect("lock") = Some(payload.to_vec());
    }
}

#[async_trait]
impl Engine for ScriptedEngine {
    async fn plan(&self, request: PlanRequest) -> Result<EnginePlan, PlanError> {
        let call = self.plan_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(error) = self.plan_failures.lock().expect("lock").pop_front() {
            return Err(error);
        }

        let has_changes = !request.workspace.join("NO_CHANGES").exists();
        let prior = request
            .prior_state
            .map(|s| String::from_utf8_lossy(&s).to_string())
            .unwrap_or_default();
        Ok(EnginePlan {
            has_changes,
            plan: format!("plan#{call} against [{prior}]").into_bytes(),
            diagnostics: String::from("Plan: 1 to add, 0 to change, 0 to destroy."),
        })
    }

    async fn apply(&self, request: ApplyRequest) -> Result<EngineApply, ApplyError> {
        self.apply_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.apply_failures.lock().expect("lock").pop_front() {
            return Err(error);
        }

        self.applied.lock().expect("lock").push(request.plan.clone());
        let outputs = self
            .outputs
            .lock()
            .expect("lock")
            .clone()
            .unwrap_or_else(|| OUTPUTS.as_bytes().to_vec());
        let mut state = b"state from ".to_vec();
        state.extend_from_slice(&request.plan);
        Ok(EngineApply {
            state,
            outputs,
            diagnostics: String::from("Apply complete! Resources: 1 added, 0 changed, 0 destroyed."),
        })
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Which write a scripted store fault hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Put,
    Replace,
}

struct Fault {
    kind: WriteKind,
    prefix: String,
    skip: usize,
    error: fn(&BlobKey) -> ReconcilerError,
}

/// Blob store that fails scripted writes and passes everything else to a
/// memory store.
#[derive(Default)]
pub struct FaultyBlobStore {
    inner: MemoryBlobStore,
    faults: Mutex<Vec<Fault>>,
}

impl FaultyBlobStore {
    /// Fails the write of `kind` to a key starting with `prefix` after
    /// letting `skip` matching writes through.
    pub fn fail_write(
        &self,
        kind: WriteKind,
        prefix: &str,
        skip: usize,
        error: fn(&BlobKey) -> ReconcilerError,
    ) {
        self.faults.lock().expect("lock").push(Fault {
            kind,
            prefix: prefix.to_string(),
            skip,
            error,
        });
    }

    /// Fails one replace with an I/O error.
    pub fn fail_replace(&self, prefix: &str, skip: usize) {
        self.fail_write(WriteKind::Replace, prefix, skip, |key| {
            StoreError::io(format!("injected failure writing {key}")).into()
        });
    }

    pub fn pending_faults(&self) -> usize {
        self.faults.lock().expect("lock").len()
    }

    fn check(&self, kind: WriteKind, key: &BlobKey) -> tf_reconciler::error::Result<()> {
        let mut faults = self.faults.lock().expect("lock");
        let Some(index) = faults
            .iter()
            .position(|f| f.kind == kind && key.name.starts_with(&f.prefix))
        else {
            return Ok(());
        };

        if faults[index].skip > 0 {
            faults[index].skip -= 1;
            return Ok(());
        }
        let fault = faults.remove(index);
        Err((fault.error)(key))
    }
}

#[async_trait]
impl BlobStore for FaultyBlobStore {
    async fn put(
        &self,
        key: &BlobKey,
        data: &[u8],
        labels: &Labels,
    ) -> tf_reconciler::error::Result<PutOutcome> {
        self.check(WriteKind::Put, key)?;
        self.inner.put(key, data, labels).await
    }

    async fn replace(
        &self,
        key: &BlobKey,
        data: &[u8],
        labels: &Labels,
    ) -> tf_reconciler::error::Result<()> {
        self.check(WriteKind::Replace, key)?;
        self.inner.replace(key, data, labels).await
    }

    async fn get(&self, key: &BlobKey) -> tf_reconciler::error::Result<StoredBlob> {
        self.inner.get(key).await
    }

    async fn exists(&self, key: &BlobKey) -> tf_reconciler::error::Result<bool> {
        self.inner.exists(key).await
    }

    async fn list(
        &self,
        namespace: &str,
        prefix: &str,
    ) -> tf_reconciler::error::Result<Vec<BlobKey>> {
        self.inner.list(namespace, prefix).await
    }

    async fn delete(&self, key: &BlobKey) -> tf_reconciler::error::Result<()> {
        self.inner.delete(key).await
    }

    fn backend_type(&self) -> &'static str {
        "faulty"
    }
}

/// Writes a gzip tarball holding `files` and returns its path and checksum.
pub fn build_artifact(dir: &Path, file_name: &str, files: &[(&str, &str)]) -> (PathBuf, String) {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (path, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, path, content.as_bytes())
            .expect("append entry");
    }
    let bytes = builder
        .into_inner()
        .expect("finish tar")
        .finish()
        .expect("finish gzip");

    let path = dir.join(file_name);
    std::fs::write(&path, &bytes).expect("write artifact");
    (path, hex::encode(Sha256::digest(&bytes)))
}

/// A reconciler over memory stores, a memory source and the scripted engine.
pub struct Harness {
    pub id: ResourceId,
    pub resources: Arc<MemoryResourceStore>,
    pub sources: Arc<MemorySourceProvider>,
    pub blobs: Arc<dyn BlobStore>,
    pub store: Arc<FaultyBlobStore>,
    pub engine: Arc<ScriptedEngine>,
    pub reconciler: Reconciler,
    pub workspaces: TempDir,
    pub artifacts: TempDir,
}

impl Harness {
    /// Creates a harness with one resource using `approve_plan`.
    pub fn new(approve_plan: &str) -> Self {
        Self::with_sources(approve_plan, |sources| sources)
    }

    /// Creates a harness whose reconciler sees the sources through `wrap`.
    pub fn with_sources<F>(approve_plan: &str, wrap: F) -> Self
    where
        F: FnOnce(Arc<MemorySourceProvider>) -> Arc<dyn SourceProvider>,
    {
        let workspaces = TempDir::new().expect("Failed to create temp dir");
        let artifacts = TempDir::new().expect("Failed to create temp dir");
        let resources = Arc::new(MemoryResourceStore::new());
        let sources = Arc::new(MemorySourceProvider::new());
        let store = Arc::new(FaultyBlobStore::default());
        let blobs: Arc<dyn BlobStore> = Arc::clone(&store) as Arc<dyn BlobStore>;
        let engine = Arc::new(ScriptedEngine::new());

        let id = ResourceId::new("flux-system", "helloworld");
        let mut spec = TerraformSpec::new(source_ref());
        spec.approve_plan = approve_plan.to_string();
        resources.apply(Resource::new(&id, spec));

        let reconciler = Reconciler::new(
            Arc::clone(&resources) as Arc<dyn ResourceStore>,
            wrap(Arc::clone(&sources)),
            Arc::clone(&engine) as Arc<dyn Engine>,
            Arc::clone(&blobs),
            WorkspaceMaterializer::new(workspaces.path()),
        );

        Self {
            id,
            resources,
            sources,
            blobs,
            store,
            engine,
            reconciler,
            workspaces,
            artifacts,
        }
    }

    /// Publishes a revision with a `main.tf` and optional extra files.
    pub fn publish(&self, revision: &str, extra: &[(&str, &str)]) -> String {
        let mut files = vec![("main.tf", "output \"greeting\" { value = \"Hello, world!\" }\n")];
        files.extend_from_slice(extra);
        let file_name = format!("{}.tar.gz", revision.replace('/', "_"));
        let (path, checksum) = build_artifact(self.artifacts.path(), &file_name, &files);
        self.publish_artifact(revision, path, &checksum);
        checksum
    }

    /// Publishes an artifact with an explicit checksum.
    pub fn publish_artifact(&self, revision: &str, path: PathBuf, checksum: &str) {
        self.sources.publish(
            &source_ref(),
            &self.id.namespace,
            SourceArtifact {
                revision: revision.to_string(),
                checksum: checksum.to_string(),
                location: ArtifactLocation::Path(path),
            },
        );
    }

    pub async fn reconcile(&self) -> ReconcileOutcome {
        self.reconciler.reconcile(&self.id).await.expect("reconcile")
    }

    pub async fn resource(&self) -> Resource {
        self.resources.get(&self.id).await.expect("get resource")
    }

    pub async fn approve(&self, fingerprint: &str) {
        self.resources
            .set_approval(&self.id, fingerprint)
            .await
            .expect("approve");
    }

    pub async fn edit_spec<F: FnOnce(&mut TerraformSpec)>(&self, edit: F) {
        let mut resource = self.resource().await;
        edit(&mut resource.spec);
        self.resources.apply(resource);
    }

    pub fn plans(&self) -> PlanStore {
        PlanStore::new(Arc::clone(&self.blobs))
    }

    pub fn states(&self) -> StateStore {
        StateStore::new(Arc::clone(&self.blobs))
    }

    pub fn ledgers(&self) -> LedgerStore {
        LedgerStore::new(Arc::clone(&self.blobs))
    }

    /// Reason of a condition, if set.
    pub async fn reason(&self, condition_type: ConditionType) -> Option<String> {
        self.resource()
            .await
            .status
            .condition(condition_type)
            .map(|c| c.reason.clone())
    }
}

pub fn source_ref() -> SourceReference {
    SourceReference::new("GitRepository", "flux-system", "helloworld")
}
