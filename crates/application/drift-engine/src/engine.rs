use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use drift_core::diff::compare_manifests;
use drift_core::{target, FileInfo, Manifest, SyncPlan};
use drift_infra::{ReceiverClient, SyncPools, TransferHooks, Transferer};
use drift_persistence::{self as persist, ApprovalState, ReceiverCacheStore, SettingsStore, SyncEventRecord};
use drift_scanner::{ScanError, ScanFilter, ScanOptions, Scanner};
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::hooks::{EngineHooks, Notifier, Severity, SyncEvent};
use crate::progress::{CycleState, EngineStatus, TransferProgress};

/// Files that failed stay off the plan for this long before a retry.
pub const FAILED_RETRY_HOLDDOWN: Duration = Duration::from_secs(3600);
const QUEUE_REENTER_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error("source manifest is empty while the target holds {target_entries} entries; refusing to touch the target")]
    PlanSafety { target_entries: usize },
    #[error("invalid engine configuration: {0}")]
    Config(String),
    #[error("engine pools are closed")]
    PoolClosed,
}

/// Collaborators an engine is wired to at construction.
pub struct EngineContext {
    pub pools: Arc<SyncPools>,
    pub store: Arc<dyn SettingsStore>,
    pub cache_dir: Utf8PathBuf,
    pub hooks: Arc<dyn EngineHooks>,
    pub notifier: Arc<dyn Notifier>,
    pub dest_host: Option<String>,
    pub rsync_password: Option<String>,
    /// Receiver API port; tests point this at an ephemeral listener.
    pub receiver_port: u16,
}

pub(crate) struct EngineState {
    pub cycle_state: CycleState,
    pub paused: bool,
    pub is_scanning: bool,
    pub sync_queued: bool,
    pub queued_manifest: Option<Manifest>,
    pub waiting_for_approval: bool,
    pub pending_deletions: Vec<String>,
    pub deletion_allowed: bool,
    pub last_source_manifest: Option<Manifest>,
    pub target_manifest: Manifest,
    /// Failure timestamps; `None` marks a pause interruption, which is
    /// retried without holddown.
    pub failed_files: HashMap<String, Option<Instant>>,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub plan_remaining_bytes: i64,
    pub progress: TransferProgress,
    pub alias: String,
    pub success_count: u64,
    pub error_count: u64,
    pub bandwidth_limit: u64,
    pub auto_approve_deletions: bool,
}

#[derive(Debug, Default)]
struct ExecOutcome {
    succeeded: u64,
    failed: u64,
    copied: u64,
    created: u64,
    renamed: u64,
    deleted: u64,
}

/// One sync engine: keeps `target_dir` mirroring `source_dir`, cycle by
/// cycle, with approval gates in front of destructive work.
pub struct SyncEngine {
    pub(crate) config: SyncConfig,
    pub(crate) pools: Arc<SyncPools>,
    pub(crate) client: reqwest::Client,
    pub(crate) transferer: Transferer,
    pub(crate) store: Arc<dyn SettingsStore>,
    pub(crate) cache: ReceiverCacheStore,
    pub(crate) hooks: Arc<dyn EngineHooks>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) filter: ScanFilter,
    pub(crate) dest_host: Option<String>,
    pub(crate) receiver_port: u16,
    pub(crate) state: RwLock<EngineState>,
    /// Admits one cycle at a time; late callers queue (last writer wins).
    cycle_lock: AsyncMutex<()>,
    pub(crate) cancel: CancellationToken,
    pub(crate) me: Weak<SyncEngine>,
}

impl SyncEngine {
    pub fn new(config: SyncConfig, ctx: EngineContext) -> Result<Arc<Self>, EngineError> {
        let filter = ScanFilter::new(&config.exclude_patterns, &config.include_patterns)
            .map_err(|e| EngineError::Config(e.to_string()))?;
        let client = reqwest::Client::new();
        let receiver = ReceiverClient::new(client.clone(), ctx.dest_host.clone())
            .with_port(ctx.receiver_port);
        let transferer = Transferer::new(
            ctx.pools.transfer.clone(),
            receiver,
            ctx.rsync_password.clone(),
        );

        let state = EngineState {
            cycle_state: CycleState::Idle,
            paused: false,
            is_scanning: false,
            sync_queued: false,
            queued_manifest: None,
            waiting_for_approval: false,
            pending_deletions: Vec::new(),
            deletion_allowed: false,
            last_source_manifest: None,
            target_manifest: Manifest::new(config.target_dir.clone()),
            failed_files: HashMap::new(),
            last_sync_time: None,
            plan_remaining_bytes: 0,
            progress: TransferProgress::default(),
            alias: config.alias.clone(),
            success_count: 0,
            error_count: 0,
            bandwidth_limit: config.bandwidth_limit,
            auto_approve_deletions: config.auto_approve_deletions,
        };

        Ok(Arc::new_cyclic(|me| Self {
            cache: ReceiverCacheStore::new(&ctx.cache_dir),
            config,
            pools: ctx.pools,
            client,
            transferer,
            store: ctx.store,
            hooks: ctx.hooks,
            notifier: ctx.notifier,
            filter,
            dest_host: ctx.dest_host,
            receiver_port: ctx.receiver_port,
            state: RwLock::new(state),
            cycle_lock: AsyncMutex::new(()),
            cancel: CancellationToken::new(),
            me: me.clone(),
        }))
    }

    /// Restore persisted state, spawn the background loops, and kick the
    /// initial sync.
    pub fn start(self: Arc<Self>) {
        let id = self.config.id;

        if let Ok(Some(v)) = self.store.get_setting(&format!("engine_paused_{id}")) {
            self.state_mut().paused = v == "true";
        }
        if let Ok(Some(alias)) = self.store.get_setting(&format!("alias_{id}")) {
            if !alias.is_empty() {
                self.state_mut().alias = alias;
            }
        }
        if let Ok(Some(approval)) = persist::load_approval_state(self.store.as_ref(), id) {
            let mut st = self.state_mut();
            st.waiting_for_approval = approval.waiting_for_approval;
            st.pending_deletions = approval.pending_deletions;
            if st.waiting_for_approval {
                st.cycle_state = CycleState::WaitingApproval;
            }
        }
        match self.cache.load(id) {
            Ok(Some(manifest)) => self.state_mut().target_manifest = manifest,
            Ok(None) => {}
            Err(e) => warn!(engine = id, error = %e, "receiver cache load failed"),
        }
        let queued = persist::load_engine_queue(self.store.as_ref(), id).unwrap_or(None);

        crate::loops::spawn_all(self.clone());

        info!(engine = id, source = %self.config.source_dir, target = %self.config.target_dir, "engine started");
        let this = self.clone();
        tokio::spawn(this.run_sync(queued));
    }

    /// Stop all loops. In-flight work observes the token at its next
    /// suspension point.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Request a cycle. If one is already running the request coalesces
    /// into a single queued follow-up; the most recent caller's manifest
    /// wins. A queued explicit manifest is persisted so a crash cannot
    /// lose it.
    pub fn run_sync(
        self: Arc<Self>,
        source: Option<Manifest>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
        Box::pin(async move {
            let guard = match self.cycle_lock.try_lock() {
                Ok(guard) => guard,
                Err(_) => {
                    {
                        let mut st = self.state_mut();
                        st.sync_queued = true;
                        st.queued_manifest = source.clone();
                    }
                    let persisted = match &source {
                        Some(m) => persist::save_engine_queue(self.store.as_ref(), self.config.id, m),
                        None => persist::clear_engine_queue(self.store.as_ref(), self.config.id),
                    };
                    if let Err(e) = persisted {
                        warn!(engine = self.config.id, error = %e, "queue persist failed");
                    }
                    debug!(engine = self.config.id, "cycle in flight; request queued");
                    return;
                }
            };

            if let Err(e) = self.cycle(source).await {
                error!(engine = self.config.id, error = %e, "sync cycle failed");
                self.hooks.on_error("", &e.to_string());
                self.state_mut().cycle_state = CycleState::Idle;
            }
            drop(guard);

            let queued = {
                let mut st = self.state_mut();
                if st.sync_queued {
                    st.sync_queued = false;
                    Some(st.queued_manifest.take())
                } else {
                    None
                }
            };
            if let Some(manifest) = queued {
                let this = self.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(QUEUE_REENTER_DELAY).await;
                    this.run_sync(manifest).await;
                });
            }
        })
    }

    async fn cycle(&self, source: Option<Manifest>) -> Result<(), EngineError> {
        if self.state().paused {
            debug!(engine = self.config.id, "paused; skipping cycle");
            return Ok(());
        }
        let _ = persist::clear_engine_queue(self.store.as_ref(), self.config.id);

        // Scan the source unless the caller handed us a manifest.
        let source_manifest = match source {
            Some(manifest) => manifest,
            None => {
                {
                    let mut st = self.state_mut();
                    st.is_scanning = true;
                    st.cycle_state = CycleState::Scanning;
                }
                let result = self.scan_source().await;
                self.state_mut().is_scanning = false;
                match result {
                    Ok(manifest) => manifest,
                    Err(e) => {
                        self.bump_error();
                        return Err(e);
                    }
                }
            }
        };

        // A target that cannot be scanned is treated as empty.
        self.state_mut().cycle_state = CycleState::Scanning;
        let target_manifest = match self.scan_target().await {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!(engine = self.config.id, error = %e, "target scan failed; assuming empty target");
                Manifest::new(self.config.target_dir.clone())
            }
        };

        self.state_mut().cycle_state = CycleState::Comparing;
        let is_remote = self.config.is_remote_target();
        let mut plan = compare_manifests(&source_manifest, &target_manifest, self.config.rule, is_remote);

        if plan.is_empty() {
            {
                let mut st = self.state_mut();
                st.last_sync_time = Some(Utc::now());
                st.last_source_manifest = Some(source_manifest);
                st.target_manifest = target_manifest;
                st.waiting_for_approval = false;
                st.deletion_allowed = false;
                st.pending_deletions.clear();
                st.plan_remaining_bytes = 0;
                st.cycle_state = CycleState::Idle;
            }
            let _ = persist::clear_approval_state(self.store.as_ref(), self.config.id);
            debug!(engine = self.config.id, "manifests already in sync");
            return Ok(());
        }

        // Empty-source interlock: a vanished mount must never translate
        // into a target wipe.
        if source_manifest.is_empty() && !target_manifest.is_empty() {
            let target_entries = target_manifest.files.len();
            self.bump_error();
            self.state_mut().cycle_state = CycleState::Failed;
            self.notifier.notify(
                &format!(
                    "engine {}: source {} is empty but target holds {} entries; sync refused",
                    self.config.id, self.config.source_dir, target_entries
                ),
                Severity::Error,
            );
            return Err(EngineError::PlanSafety { target_entries });
        }

        self.state_mut().plan_remaining_bytes = plan.total_sync_bytes();

        let sync_mode = self.setting_or("sync_mode", "auto");
        let sender_override = self.setting_or("sender_override", "off") == "on";
        let auto_approve = self.state().auto_approve_deletions
            || self.setting_or("auto_approve", "off") == "on";
        let prior_approval = self.state().deletion_allowed;

        if !prior_approval {
            let gate = if sync_mode == "manual" && plan.change_count() > 0 {
                Some(manual_pending(&plan))
            } else if !plan.conflicts.is_empty() && !sender_override {
                Some(plan.conflicts.iter().map(|c| c.path.clone()).collect())
            } else if plan.has_deletions() && !auto_approve {
                Some(deletion_pending(&plan))
            } else {
                None
            };

            if let Some(pending) = gate {
                {
                    let mut st = self.state_mut();
                    st.waiting_for_approval = true;
                    st.pending_deletions = pending.clone();
                    st.cycle_state = CycleState::WaitingApproval;
                }
                let _ = persist::save_approval_state(
                    self.store.as_ref(),
                    self.config.id,
                    &ApprovalState {
                        waiting_for_approval: true,
                        pending_deletions: pending.clone(),
                        conflicts: plan.conflicts.clone(),
                    },
                );
                info!(
                    engine = self.config.id,
                    pending = pending.len(),
                    "cycle gated; waiting for approval"
                );
                self.notifier.notify(
                    &format!(
                        "engine {}: {} change(s) awaiting approval",
                        self.config.id,
                        pending.len()
                    ),
                    Severity::Warning,
                );
                return Ok(());
            }
        } else {
            // Narrow the plan to the approved set, then consume the
            // one-shot approval.
            let allowed: HashSet<String> = {
                let mut st = self.state_mut();
                st.deletion_allowed = false;
                st.waiting_for_approval = false;
                std::mem::take(&mut st.pending_deletions).into_iter().collect()
            };
            let _ = persist::clear_approval_state(self.store.as_ref(), self.config.id);
            filter_plan(&mut plan, &allowed);
        }

        // Recently failed files sit out this cycle.
        {
            let st = self.state();
            plan.files_to_sync.retain(|f| match st.failed_files.get(&f.path) {
                Some(Some(at)) => at.elapsed() >= FAILED_RETRY_HOLDDOWN,
                _ => true,
            });
        }

        let dry_run = sync_mode == "dry" || self.hooks.is_dry_run();

        self.state_mut().cycle_state = CycleState::Executing;
        let outcome = self
            .execute_plan(&source_manifest, target_manifest, plan, dry_run)
            .await;

        let (success_total, error_total) = {
            let mut st = self.state_mut();
            st.last_sync_time = Some(Utc::now());
            st.last_source_manifest = Some(source_manifest);
            st.success_count += outcome.succeeded;
            st.error_count += outcome.failed;
            st.plan_remaining_bytes = 0;
            st.progress.end_file();
            st.cycle_state = CycleState::Idle;
            (st.success_count, st.error_count)
        };
        let id = self.config.id;
        let _ = self
            .store
            .save_setting(&format!("sync_success_{id}"), &success_total.to_string());
        let _ = self
            .store
            .save_setting(&format!("sync_errors_{id}"), &error_total.to_string());

        if !dry_run {
            let snapshot = self.state().target_manifest.clone();
            if let Err(e) = self.cache.save(id, &snapshot) {
                warn!(engine = id, error = %e, "receiver cache save failed");
            }
        }

        info!(
            engine = id,
            copied = outcome.copied,
            created = outcome.created,
            renamed = outcome.renamed,
            deleted = outcome.deleted,
            failed = outcome.failed,
            dry_run,
            "cycle complete"
        );
        Ok(())
    }

    async fn execute_plan(
        &self,
        source_manifest: &Manifest,
        target_scanned: Manifest,
        plan: SyncPlan,
        dry_run: bool,
    ) -> ExecOutcome {
        self.state_mut().target_manifest = target_scanned;
        let mut out = ExecOutcome::default();

        // Type changes first: a receiver file sitting where a directory
        // must go (or a receiver directory where a file must go) is removed
        // before the structure and content that replace it. Everything else
        // in the cleanup lists waits until after the sync phase.
        let create_set: HashSet<&str> = plan.dirs_to_create.iter().map(String::as_str).collect();
        let sync_set: HashSet<&str> = plan
            .files_to_sync
            .iter()
            .map(|f| f.path.as_str())
            .collect();
        let (type_change_files, files_to_delete): (Vec<&String>, Vec<&String>) = plan
            .files_to_delete
            .iter()
            .partition(|p| create_set.contains(p.as_str()));
        let (type_change_dirs, dirs_to_delete): (Vec<&String>, Vec<&String>) = plan
            .dirs_to_delete
            .iter()
            .partition(|d| sync_set.contains(d.as_str()));

        for path in &type_change_files {
            self.delete_file_op(path.as_str(), dry_run, &mut out).await;
        }
        for dir in &type_change_dirs {
            self.delete_dir_op(dir.as_str(), dry_run, &mut out).await;
        }

        // Sync phase: structure first, then renames, then content.
        for dir in &plan.dirs_to_create {
            if dry_run {
                self.emit("DRY-Created", dir, 0);
                out.created += 1;
                continue;
            }
            match self.transferer.create_dir(&self.dst_for(dir)).await {
                Ok(()) => {
                    let info = source_manifest
                        .get_dir(dir)
                        .cloned()
                        .unwrap_or_else(|| FileInfo::dir(dir.clone(), Utc::now()));
                    self.state_mut().target_manifest.add(info);
                    self.emit("Created", dir, 0);
                    out.created += 1;
                    out.succeeded += 1;
                }
                Err(e) => {
                    warn!(engine = self.config.id, dir, error = %e, "mkdir failed");
                    self.hooks.on_error(dir, &e.to_string());
                    out.failed += 1;
                }
            }
        }

        for ren in &plan.renames {
            if dry_run {
                self.emit("DRY-Renamed", &ren.new_path, 0);
                out.renamed += 1;
                continue;
            }
            let result = self
                .transferer
                .rename_file(&self.dst_for(&ren.old_path), &self.dst_for(&ren.new_path))
                .await;
            match result {
                Ok(()) => {
                    {
                        let mut st = self.state_mut();
                        if let Some(mut info) = st.target_manifest.remove(&ren.old_path) {
                            info.path = ren.new_path.clone();
                            st.target_manifest.add(info);
                        }
                    }
                    self.emit("Renamed", &ren.new_path, 0);
                    out.renamed += 1;
                    out.succeeded += 1;
                }
                Err(e) => {
                    warn!(engine = self.config.id, from = %ren.old_path, to = %ren.new_path, error = %e, "rename failed");
                    self.hooks.on_error(&ren.old_path, &e.to_string());
                    out.failed += 1;
                }
            }
        }

        let bandwidth_limit = self.state().bandwidth_limit;
        for file in &plan.files_to_sync {
            if dry_run {
                self.emit("DRY-Added", &file.path, file.size);
                out.copied += 1;
                continue;
            }
            self.state_mut()
                .progress
                .begin_file(&file.path, file.size.max(0) as u64);
            let src = self.config.source_dir.join(&file.path);
            let hooks = self.transfer_hooks();
            let result = self
                .transferer
                .copy_file(&src, &self.dst_for(&file.path), &file.path, bandwidth_limit, &hooks)
                .await;
            match result {
                Ok(bytes) => {
                    {
                        let mut st = self.state_mut();
                        st.target_manifest.add(file.clone());
                        st.plan_remaining_bytes = (st.plan_remaining_bytes - file.size).max(0);
                        st.failed_files.remove(&file.path);
                        st.progress.end_file();
                    }
                    let _ = self.store.add_traffic(bytes);
                    self.emit("Added", &file.path, file.size);
                    out.copied += 1;
                    out.succeeded += 1;
                }
                Err(e) if e.is_paused() => {
                    // Pause is not a failure: the file is retried on the
                    // next cycle without holddown.
                    let mut st = self.state_mut();
                    st.failed_files.insert(file.path.clone(), None);
                    st.progress.end_file();
                    info!(engine = self.config.id, path = %file.path, "transfer interrupted by pause");
                }
                Err(e) => {
                    {
                        let mut st = self.state_mut();
                        st.failed_files
                            .insert(file.path.clone(), Some(Instant::now()));
                        st.progress.end_file();
                    }
                    warn!(engine = self.config.id, path = %file.path, error = %e, "transfer failed");
                    self.hooks.on_error(&file.path, &e.to_string());
                    out.failed += 1;
                }
            }
        }

        // Cleanup phase: files, then directories leaves-first.
        for path in &files_to_delete {
            self.delete_file_op(path.as_str(), dry_run, &mut out).await;
        }
        for dir in dirs_to_delete.iter().rev() {
            self.delete_dir_op(dir.as_str(), dry_run, &mut out).await;
        }

        out
    }

    async fn delete_file_op(&self, path: &str, dry_run: bool, out: &mut ExecOutcome) {
        if dry_run {
            self.emit("DRY-Deleted", path, 0);
            out.deleted += 1;
            return;
        }
        let result = self
            .transferer
            .delete_file(&self.dst_for(path), &self.receiver_rel(path))
            .await;
        match result {
            Ok(()) => {
                self.state_mut().target_manifest.remove(path);
                self.emit("Deleted", path, 0);
                out.deleted += 1;
                out.succeeded += 1;
            }
            Err(e) => {
                warn!(engine = self.config.id, path, error = %e, "file delete failed");
                self.hooks.on_error(path, &e.to_string());
                out.failed += 1;
            }
        }
    }

    async fn delete_dir_op(&self, dir: &str, dry_run: bool, out: &mut ExecOutcome) {
        if dry_run {
            self.emit("DRY-Deleted", dir, 0);
            out.deleted += 1;
            return;
        }
        let result = self
            .transferer
            .delete_dir(&self.dst_for(dir), &self.receiver_rel(dir))
            .await;
        match result {
            Ok(()) => {
                self.state_mut().target_manifest.remove_subtree(dir);
                self.emit("Deleted", dir, 0);
                out.deleted += 1;
                out.succeeded += 1;
            }
            Err(e) => {
                warn!(engine = self.config.id, dir, error = %e, "dir delete failed");
                self.hooks.on_error(dir, &e.to_string());
                out.failed += 1;
            }
        }
    }

    pub(crate) async fn scan_source(&self) -> Result<Manifest, EngineError> {
        let permit = self
            .pools
            .scan
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| EngineError::PoolClosed)?;
        let root = self.config.source_dir.clone();
        let filter = self.filter.clone();
        let result = tokio::task::spawn_blocking(move || {
            Scanner::scan_local(&root, filter, ScanOptions::default(), None)
        })
        .await;
        drop(permit);
        match result {
            Ok(scan) => Ok(scan?),
            Err(e) => Err(EngineError::Config(format!("scan task failed: {e}"))),
        }
    }

    async fn scan_target(&self) -> Result<Manifest, EngineError> {
        let permit = self
            .pools
            .scan
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| EngineError::PoolClosed)?;
        let result = if self.config.is_remote_target() {
            drift_scanner::remote::scan_remote_at(
                &self.client,
                &self.config.target_dir,
                self.dest_host.as_deref(),
                self.receiver_port,
            )
            .await
            .map_err(EngineError::Scan)
        } else {
            let root = Utf8PathBuf::from(&self.config.target_dir);
            let filter = self.filter.clone();
            match tokio::task::spawn_blocking(move || {
                Scanner::scan_local(&root, filter, ScanOptions::default(), None)
            })
            .await
            {
                Ok(scan) => scan.map_err(EngineError::Scan),
                Err(e) => Err(EngineError::Config(format!("scan task failed: {e}"))),
            }
        };
        drop(permit);
        result
    }

    // --- approval API ---

    /// Approve everything that is pending and re-run asynchronously.
    pub fn approve_deletions(&self) {
        {
            let mut st = self.state_mut();
            st.deletion_allowed = true;
            st.waiting_for_approval = false;
            st.cycle_state = CycleState::Idle;
        }
        info!(engine = self.config.id, "deletions approved");
        self.spawn_sync(None);
    }

    /// Approve only `paths`; anything else pending is dropped from the
    /// next cycle's plan. Either endpoint of a rename admits it.
    pub fn approve_specific_changes(&self, paths: &[String]) {
        {
            let allowed: HashSet<&String> = paths.iter().collect();
            let mut st = self.state_mut();
            st.pending_deletions.retain(|p| allowed.contains(p));
            st.deletion_allowed = true;
            st.waiting_for_approval = false;
            st.cycle_state = CycleState::Idle;
        }
        info!(engine = self.config.id, approved = paths.len(), "specific changes approved");
        self.spawn_sync(None);
    }

    pub fn is_waiting_for_approval(&self) -> bool {
        self.state().waiting_for_approval
    }

    pub fn pending_deletions(&self) -> Vec<String> {
        self.state().pending_deletions.clone()
    }

    // --- pause / resume ---

    pub fn pause(&self) {
        self.state_mut().paused = true;
        let _ = self
            .store
            .save_setting(&format!("engine_paused_{}", self.config.id), "true");
        info!(engine = self.config.id, "paused");
    }

    pub fn resume(&self) {
        self.state_mut().paused = false;
        let _ = self
            .store
            .save_setting(&format!("engine_paused_{}", self.config.id), "false");
        info!(engine = self.config.id, "resumed");
        self.spawn_sync(None);
    }

    pub fn is_paused(&self) -> bool {
        self.state().paused
    }

    // --- runtime-adjustable settings ---

    pub fn set_bandwidth_limit(&self, bytes_per_second: u64) {
        self.state_mut().bandwidth_limit = bytes_per_second;
    }

    pub fn set_auto_approve(&self, enabled: bool) {
        self.state_mut().auto_approve_deletions = enabled;
    }

    pub fn set_alias(&self, alias: &str) {
        self.state_mut().alias = alias.to_string();
        let _ = self
            .store
            .save_setting(&format!("alias_{}", self.config.id), alias);
    }

    pub fn status(&self) -> EngineStatus {
        let st = self.state();
        EngineStatus {
            engine_id: self.config.id,
            alias: st.alias.clone(),
            state: st.cycle_state,
            paused: st.paused,
            current_file: st.progress.current_file.clone(),
            current_progress: st.progress.current_progress,
            total_file_size: st.progress.total_file_size,
            current_speed: st.progress.speed.current(),
            avg_speed: st.progress.speed.average(),
            plan_remaining_bytes: st.plan_remaining_bytes,
            waiting_for_approval: st.waiting_for_approval,
            pending_deletions: st.pending_deletions.clone(),
            failed_files: st.failed_files.len(),
            success_count: st.success_count,
            error_count: st.error_count,
            last_sync_time: st.last_sync_time,
        }
    }

    /// Snapshot of the in-memory receiver model.
    pub fn target_manifest(&self) -> Manifest {
        self.state().target_manifest.clone()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    // --- internals ---

    pub(crate) fn spawn_sync(&self, manifest: Option<Manifest>) {
        if let Some(me) = self.me.upgrade() {
            tokio::spawn(me.run_sync(manifest));
        }
    }

    pub(crate) fn state(&self) -> RwLockReadGuard<'_, EngineState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn state_mut(&self) -> RwLockWriteGuard<'_, EngineState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn bump_error(&self) {
        self.state_mut().error_count += 1;
    }

    fn setting_or(&self, key: &str, default: &str) -> String {
        self.store
            .get_setting(key)
            .ok()
            .flatten()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| default.to_string())
    }

    fn emit(&self, action: &str, path: &str, size: i64) {
        let timestamp = Utc::now();
        self.hooks.on_event(&SyncEvent {
            timestamp,
            engine_id: self.config.id,
            action: action.to_string(),
            path: path.to_string(),
            size,
        });
        let logged = self.store.log_event(&SyncEventRecord {
            timestamp,
            engine_id: self.config.id,
            action: action.to_string(),
            path: path.to_string(),
            size,
        });
        if let Err(e) = logged {
            debug!(engine = self.config.id, error = %e, "event log write failed");
        }
    }

    fn transfer_hooks(&self) -> TransferHooks {
        let progress_ref = self.me.clone();
        let pause_ref = self.me.clone();
        TransferHooks {
            on_progress: Arc::new(move |bytes| {
                if let Some(engine) = progress_ref.upgrade() {
                    engine.state_mut().progress.update(bytes);
                }
            }),
            on_complete: Arc::new(|_, _, _| {}),
            is_paused: Arc::new(move || {
                pause_ref
                    .upgrade()
                    .map(|engine| engine.state().paused)
                    .unwrap_or(true)
            }),
        }
    }

    /// Absolute destination (local path) or remote URI for a root-relative
    /// path.
    fn dst_for(&self, rel: &str) -> String {
        if self.config.is_remote_target() {
            format!("{}/{rel}", self.config.target_dir.trim_end_matches('/'))
        } else {
            Utf8Path::new(&self.config.target_dir).join(rel).to_string()
        }
    }

    /// Path relative to the receiver's data root, for the receiver API.
    fn receiver_rel(&self, rel: &str) -> String {
        match target::parse_target(&self.config.target_dir) {
            Some(t) if !t.subpath.is_empty() => format!("{}/{rel}", t.subpath),
            _ => rel.to_string(),
        }
    }
}

/// Manual mode gates every change, destructive or not.
fn manual_pending(plan: &SyncPlan) -> Vec<String> {
    let mut pending: Vec<String> = plan.files_to_sync.iter().map(|f| f.path.clone()).collect();
    pending.extend(plan.files_to_delete.iter().cloned());
    pending.extend(plan.renames.iter().map(|r| r.old_path.clone()));
    pending.extend(plan.dirs_to_delete.iter().cloned());
    pending
}

fn deletion_pending(plan: &SyncPlan) -> Vec<String> {
    let mut pending = plan.files_to_delete.clone();
    pending.extend(plan.dirs_to_delete.iter().cloned());
    pending
}

fn filter_plan(plan: &mut SyncPlan, allowed: &HashSet<String>) {
    plan.files_to_sync.retain(|f| allowed.contains(&f.path));
    plan.files_to_delete.retain(|p| allowed.contains(p));
    plan.dirs_to_delete.retain(|p| allowed.contains(p));
    plan.renames
        .retain(|r| allowed.contains(&r.old_path) || allowed.contains(&r.new_path));
    // dirs_to_create stay: structure is not destructive and approved
    // files may need their parents.
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use drift_core::RenameAction;

    fn file(path: &str, size: i64) -> FileInfo {
        FileInfo::file(path, size, Utc.timestamp_opt(1, 0).unwrap())
    }

    #[test]
    fn filter_plan_keeps_rename_when_either_endpoint_is_approved() {
        let mut plan = SyncPlan {
            files_to_sync: vec![file("a", 1), file("b", 1)],
            files_to_delete: vec!["x".to_string(), "y".to_string()],
            dirs_to_create: vec!["d".to_string()],
            dirs_to_delete: vec!["old_dir".to_string()],
            renames: vec![
                RenameAction {
                    old_path: "m_old".to_string(),
                    new_path: "m_new".to_string(),
                },
                RenameAction {
                    old_path: "n_old".to_string(),
                    new_path: "n_new".to_string(),
                },
            ],
            conflicts: Vec::new(),
        };

        let allowed: HashSet<String> = ["a", "x", "m_old"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        filter_plan(&mut plan, &allowed);

        assert_eq!(plan.files_to_sync.len(), 1);
        assert_eq!(plan.files_to_sync[0].path, "a");
        assert_eq!(plan.files_to_delete, vec!["x".to_string()]);
        assert!(plan.dirs_to_delete.is_empty());
        assert_eq!(plan.renames.len(), 1);
        assert_eq!(plan.renames[0].old_path, "m_old");
        // Non-destructive structure is never filtered.
        assert_eq!(plan.dirs_to_create, vec!["d".to_string()]);
    }

    #[test]
    fn manual_pending_covers_all_change_classes() {
        let plan = SyncPlan {
            files_to_sync: vec![file("new.mkv", 5)],
            files_to_delete: vec!["gone.mkv".to_string()],
            dirs_to_create: vec!["S2".to_string()],
            dirs_to_delete: vec!["S0".to_string()],
            renames: vec![RenameAction {
                old_path: "old.mkv".to_string(),
                new_path: "renamed.mkv".to_string(),
            }],
            conflicts: Vec::new(),
        };
        let pending = manual_pending(&plan);
        for expected in ["new.mkv", "gone.mkv", "old.mkv", "S0"] {
            assert!(pending.iter().any(|p| p == expected), "missing {expected}");
        }
        // Directory creation is not gated.
        assert!(!pending.iter().any(|p| p == "S2"));
    }
}
