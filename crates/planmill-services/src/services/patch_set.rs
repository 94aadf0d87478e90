//! Patch-set registry with apply and rollback
//!
//! A patch set is an ordered bundle of file patches with provenance and an
//! optional inverse bundle. Apply and rollback are best-effort per file: a
//! failing file is recorded and the remaining files are still attempted.
//! Calls against the same patch-set id are serialized through a per-id lock.

use crate::services::tools::resolve_within;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use planmill_config::PatchesConfig;
use planmill_foundation::checksum::calculate_combined_checksum;
use planmill_foundation::model::{
    ApplyOptions, ApplyReport, CreateOptions, FilePatch, FileSnapshot, Impact, PatchFailure,
    PatchSet, PatchSetMetadata, RollbackPlan, RollbackReport, RollbackVerification,
};
use planmill_foundation::{calculate_checksum, PlanError, PlanResult};
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Validates a patch against the live filesystem before it is accepted
#[async_trait]
pub trait PatchCheck: Send + Sync {
    async fn check(&self, project_root: &Path, patch: &FilePatch) -> Result<(), String>;
}

/// Accepts a patch only if the file on disk still holds its original content
///
/// A missing file is accepted when the patch creates it from nothing.
#[derive(Debug, Default)]
pub struct ChecksumPatchCheck;

#[async_trait]
impl PatchCheck for ChecksumPatchCheck {
    async fn check(&self, project_root: &Path, patch: &FilePatch) -> Result<(), String> {
        let path = resolve_within(project_root, &patch.file_path)?;
        let current = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound && patch.original_content.is_empty() => {
                return Ok(())
            }
            Err(e) => return Err(format!("Cannot read {}: {}", patch.file_path, e)),
        };

        let expected = calculate_checksum(&patch.original_content);
        let actual = calculate_checksum(&current);
        if expected != actual {
            warn!(
                file_path = %patch.file_path,
                expected = %expected,
                actual = %actual,
                "Checksum mismatch - file has changed since the patch was created"
            );
            return Err(format!(
                "File '{}' has changed since the patch was created. \
                 Expected checksum: {}, Actual: {}",
                patch.file_path, expected, actual
            ));
        }
        Ok(())
    }
}

/// Owned registry of patch sets, keyed by id
pub struct PatchSetManager {
    project_root: PathBuf,
    backup_dir: Option<PathBuf>,
    check: Arc<dyn PatchCheck>,
    patch_sets: DashMap<String, PatchSet>,
    backups: DashMap<String, Vec<FileSnapshot>>,
    /// Files each patch set brought into existence; rollback removes them
    created: DashMap<String, BTreeSet<String>>,
    /// One lock per id serializes apply and rollback
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl PatchSetManager {
    pub fn new(project_root: impl Into<PathBuf>, config: &PatchesConfig) -> Self {
        Self {
            project_root: project_root.into(),
            backup_dir: config.backup_dir.clone(),
            check: Arc::new(ChecksumPatchCheck),
            patch_sets: DashMap::new(),
            backups: DashMap::new(),
            created: DashMap::new(),
            locks: DashMap::new(),
        }
    }

    /// Replace the check run by `create` when validation is requested
    pub fn with_check(mut self, check: Arc<dyn PatchCheck>) -> Self {
        self.check = check;
        self
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// 'low' below 5 changes and 3 files, 'medium' below 20 changes and 10 files
    pub fn estimate_impact(total_changes: usize, files_affected: usize) -> Impact {
        if total_changes < 5 && files_affected < 3 {
            Impact::Low
        } else if total_changes < 20 && files_affected < 10 {
            Impact::Medium
        } else {
            Impact::High
        }
    }

    /// Register a new patch set
    ///
    /// # Errors
    ///
    /// Returns `PlanError::InvalidData` when validation is requested and a
    /// patch no longer matches the filesystem.
    pub async fn create(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        patches: Vec<FilePatch>,
        options: &CreateOptions,
    ) -> PlanResult<PatchSet> {
        let name = name.into();

        if options.validate {
            let mut problems = Vec::new();
            for patch in &patches {
                if let Err(reason) = self.check.check(&self.project_root, patch).await {
                    problems.push(reason);
                }
            }
            if !problems.is_empty() {
                return Err(PlanError::invalid_data(format!(
                    "Patch set '{}' failed validation: {}",
                    name,
                    problems.join("; ")
                )));
            }
        }

        let id = uuid::Uuid::new_v4().to_string();
        let total_changes = patches.iter().map(|p| p.changes.len()).sum();
        let files_affected = patches
            .iter()
            .map(|p| p.file_path.as_str())
            .collect::<BTreeSet<_>>()
            .len();

        let mut created = BTreeSet::new();
        let mut seen = BTreeSet::new();
        for patch in &patches {
            if seen.insert(patch.file_path.as_str())
                && patch.original_content.is_empty()
                && self.is_absent(&patch.file_path).await
            {
                created.insert(patch.file_path.clone());
            }
        }

        let mut backup_path = None;
        if options.backup {
            let snapshots: Vec<FileSnapshot> = patches
                .iter()
                .map(|p| {
                    if created.contains(&p.file_path) && p.original_content.is_empty() {
                        FileSnapshot::missing(p.file_path.clone())
                    } else {
                        FileSnapshot::new(p.file_path.clone(), p.original_content.clone())
                    }
                })
                .collect();
            backup_path = self.write_backup(&id, &snapshots).await;
            self.backups.insert(id.clone(), snapshots);
        }

        let rollback_plan = options.generate_rollback.then(|| RollbackPlan {
            // Undo later patches first so stacked edits unwind correctly
            patches: patches.iter().rev().map(FilePatch::inverse).collect(),
            verification: RollbackVerification {
                checksum: calculate_combined_checksum(
                    patches.iter().map(|p| p.original_content.as_str()),
                ),
                backup_path: backup_path.clone(),
            },
            instructions: rollback_instructions(&id, &patches, backup_path.as_deref()),
        });

        let patch_set = PatchSet {
            id: id.clone(),
            name,
            description: description.into(),
            metadata: PatchSetMetadata {
                created_at: Utc::now(),
                created_by: options.created_by.clone(),
                total_changes,
                files_affected,
                estimated_impact: Self::estimate_impact(total_changes, files_affected),
            },
            patches,
            dependencies: options.dependencies.clone(),
            rollback_plan,
        };

        info!(
            patch_set_id = %id,
            patches = patch_set.patches.len(),
            total_changes,
            files_affected,
            impact = ?patch_set.metadata.estimated_impact,
            "Created patch set"
        );

        if !created.is_empty() {
            self.created.insert(id.clone(), created);
        }
        self.patch_sets.insert(id, patch_set.clone());
        Ok(patch_set)
    }

    pub fn get(&self, id: &str) -> Option<PatchSet> {
        self.patch_sets.get(id).map(|entry| entry.value().clone())
    }

    /// All patch sets, oldest first
    pub fn list(&self) -> Vec<PatchSet> {
        let mut all: Vec<PatchSet> = self.patch_sets.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| {
            a.metadata
                .created_at
                .cmp(&b.metadata.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        all
    }

    /// Snapshots taken when the patch set was created
    pub fn backups(&self, id: &str) -> Option<Vec<FileSnapshot>> {
        self.backups.get(id).map(|entry| entry.value().clone())
    }

    pub async fn delete(&self, id: &str) -> bool {
        self.backups.remove(id);
        self.created.remove(id);
        self.locks.remove(id);
        let removed = self.patch_sets.remove(id).is_some();
        if removed {
            debug!(patch_set_id = %id, "Deleted patch set");
        }
        removed
    }

    pub async fn clear(&self) {
        let ids: Vec<String> = self.patch_sets.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.delete(&id).await;
        }
    }

    /// Write every patch of the set to disk
    ///
    /// # Errors
    ///
    /// Returns `PlanError::PatchSetNotFound` for an unknown id. Per-file write
    /// failures are reported in the returned report instead.
    pub async fn apply(&self, id: &str, options: ApplyOptions) -> PlanResult<ApplyReport> {
        let patch_set = self
            .get(id)
            .ok_or_else(|| PlanError::patch_set_not_found(id))?;

        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        debug!(
            patch_set_id = %id,
            patches = patch_set.patches.len(),
            dry_run = options.dry_run,
            "Applying patch set"
        );

        let mut report = ApplyReport::default();
        for patch in &patch_set.patches {
            let snapshot = self.snapshot(&patch.file_path).await;
            if let Some(snapshot) = &snapshot {
                if snapshot.missing && !options.dry_run {
                    self.created
                        .entry(id.to_string())
                        .or_default()
                        .insert(patch.file_path.clone());
                }
            }
            if options.backup {
                report.rollback_data.extend(snapshot);
            }
            match self
                .write_patch(&patch.file_path, &patch.new_content, options.dry_run)
                .await
            {
                Ok(()) => report.applied_patches.push(patch.file_path.clone()),
                Err(error) => {
                    warn!(
                        patch_set_id = %id,
                        file_path = %patch.file_path,
                        error = %error,
                        "Patch failed"
                    );
                    report.failed_patches.push(PatchFailure {
                        file_path: patch.file_path.clone(),
                        error,
                    });
                }
            }
        }

        report.success = report.failed_patches.is_empty();
        info!(
            patch_set_id = %id,
            applied = report.applied_patches.len(),
            failed = report.failed_patches.len(),
            success = report.success,
            "Applied patch set"
        );
        Ok(report)
    }

    /// Apply the inverse patches and verify the restored content
    ///
    /// # Errors
    ///
    /// Returns `PlanError::PatchSetNotFound` for an unknown id and
    /// `PlanError::MissingRollbackPlan` when the set was created without one.
    pub async fn rollback(&self, id: &str) -> PlanResult<RollbackReport> {
        let patch_set = self
            .get(id)
            .ok_or_else(|| PlanError::patch_set_not_found(id))?;
        let plan = patch_set
            .rollback_plan
            .ok_or_else(|| PlanError::missing_rollback_plan(id))?;

        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let created = self
            .created
            .get(id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();

        let mut report = RollbackReport::default();
        for patch in &plan.patches {
            let outcome = if patch.new_content.is_empty() && created.contains(&patch.file_path) {
                self.remove_created(&patch.file_path).await
            } else {
                match self.write_patch(&patch.file_path, &patch.new_content, false).await {
                    Ok(()) => self.verify_restored(patch).await,
                    Err(error) => Err(error),
                }
            };
            match outcome {
                Ok(()) => report.rolled_back_patches.push(patch.file_path.clone()),
                Err(error) => {
                    warn!(
                        patch_set_id = %id,
                        file_path = %patch.file_path,
                        error = %error,
                        "Rollback failed"
                    );
                    report.failed_patches.push(PatchFailure {
                        file_path: patch.file_path.clone(),
                        error,
                    });
                }
            }
        }

        report.success = report.failed_patches.is_empty();
        info!(
            patch_set_id = %id,
            rolled_back = report.rolled_back_patches.len(),
            failed = report.failed_patches.len(),
            success = report.success,
            "Rolled back patch set"
        );
        Ok(report)
    }

    /// Pretty JSON form of a patch set
    pub fn export_json(&self, id: &str) -> PlanResult<String> {
        let patch_set = self
            .get(id)
            .ok_or_else(|| PlanError::patch_set_not_found(id))?;
        Ok(serde_json::to_string_pretty(&patch_set)?)
    }

    fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    async fn snapshot(&self, file_path: &str) -> Option<FileSnapshot> {
        let path = resolve_within(&self.project_root, file_path).ok()?;
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Some(FileSnapshot::new(file_path, content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Some(FileSnapshot::missing(file_path)),
            Err(_) => None,
        }
    }

    async fn is_absent(&self, file_path: &str) -> bool {
        match resolve_within(&self.project_root, file_path) {
            Ok(path) => matches!(tokio::fs::try_exists(&path).await, Ok(false)),
            Err(_) => false,
        }
    }

    /// Undo a file creation by deleting the file
    async fn remove_created(&self, file_path: &str) -> Result<(), String> {
        let path = resolve_within(&self.project_root, file_path)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(format!("Failed to remove {}: {}", file_path, e)),
        }
    }

    async fn write_patch(
        &self,
        file_path: &str,
        content: &str,
        dry_run: bool,
    ) -> Result<(), String> {
        let path = resolve_within(&self.project_root, file_path)?;
        if dry_run {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("Failed to create {}: {}", parent.display(), e))?;
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| format!("Failed to write {}: {}", file_path, e))
    }

    async fn verify_restored(&self, patch: &FilePatch) -> Result<(), String> {
        let path = resolve_within(&self.project_root, &patch.file_path)?;
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| format!("Failed to re-read {}: {}", patch.file_path, e))?;
        if calculate_checksum(&content) == patch.metadata.checksum {
            Ok(())
        } else {
            Err(format!(
                "Restored content of {} does not match its checksum",
                patch.file_path
            ))
        }
    }

    /// Mirror the in-memory backup under `<backup_dir>/<id>/`
    async fn write_backup(&self, id: &str, snapshots: &[FileSnapshot]) -> Option<String> {
        let root = self.backup_dir.as_ref()?.join(id);
        for snapshot in snapshots.iter().filter(|s| !s.missing) {
            let written = async {
                let path = resolve_within(&root, &snapshot.file_path)
                    .map_err(std::io::Error::other)?;
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&path, &snapshot.content).await
            }
            .await;
            if let Err(e) = written {
                warn!(
                    patch_set_id = %id,
                    file_path = %snapshot.file_path,
                    error = %e,
                    "Failed to write on-disk backup, keeping the in-memory copy only"
                );
                return None;
            }
        }
        Some(root.display().to_string())
    }
}

fn rollback_instructions(
    id: &str,
    patches: &[FilePatch],
    backup_path: Option<&str>,
) -> Vec<String> {
    let mut instructions = vec![format!(
        "Apply the {} inverse patches of patch set {} in order",
        patches.len(),
        id
    )];
    if let Some(path) = backup_path {
        instructions.push(format!("Original files are also saved under {}", path));
    }
    instructions.push("Re-run the project checks after restoring".to_string());
    instructions
}
