use std::collections::HashSet;

use crate::path_utils::DriftPath;
use crate::{ConflictDetail, Manifest, RenameAction, SyncPlan, SyncRule};

/// Build a sync plan that makes `receiver` mirror `sender`.
///
/// Deletion is "smart": any receiver subtree whose top-level ancestor is
/// absent from the sender is considered receiver-owned and left alone. This
/// is what keeps an archive folder on the receiver alive through a
/// catastrophic source loss.
///
/// Renames are paired by (size, whole-second mtime) between deletion and
/// addition candidates; pairing is skipped for remote targets because the
/// transfer layer cannot rename there.
pub fn compare_manifests(
    sender: &Manifest,
    receiver: &Manifest,
    rule: SyncRule,
    is_remote: bool,
) -> SyncPlan {
    let mut plan = SyncPlan::default();
    // Paths that are pure additions (absent from the receiver); only these
    // are eligible rename targets.
    let mut additions: HashSet<String> = HashSet::new();

    let mut sender_paths: Vec<&String> = sender.files.keys().collect();
    sender_paths.sort();

    for path in sender_paths {
        let info = &sender.files[path];
        if info.is_dir {
            if receiver.get_dir(path).is_none() {
                plan.dirs_to_create.push(path.clone());
                if let Some(theirs) = receiver.get_file(path) {
                    // Type change: a file sits where a directory must go.
                    plan.files_to_delete.push(theirs.path.clone());
                }
            }
            continue;
        }

        match receiver.get_file(path) {
            None => {
                if let Some(dir) = receiver.get_dir(path) {
                    // Type change: drop the receiver directory before the
                    // file can take its place.
                    plan.dirs_to_delete.push(dir.path.clone());
                }
                plan.files_to_sync.push(info.clone());
                additions.insert(info.path.clone());
            }
            Some(theirs) => {
                if info.needs_update(theirs) {
                    plan.files_to_sync.push(info.clone());
                    plan.conflicts.push(ConflictDetail {
                        path: info.path.clone(),
                        source_size: info.size,
                        source_time: info.mod_time,
                        receiver_size: theirs.size,
                        receiver_time: theirs.mod_time,
                    });
                }
            }
        }
    }

    collect_deletions(sender, receiver, rule, &mut plan);

    if !is_remote {
        pair_renames(receiver, &additions, &mut plan);
    }

    plan.dirs_to_create.sort();
    plan.dirs_to_delete.sort();
    plan.dirs_to_delete.dedup();
    plan
}

/// True when the receiver path lives under a receiver-owned top-level
/// subtree. Top-level files have no protective ancestor.
fn is_protected(path: &str, sender: &Manifest) -> bool {
    let top = DriftPath::top_component(path);
    if top == path {
        return false;
    }
    sender.get_dir(top).is_none() && sender.get_file(top).is_none()
}

fn collect_deletions(sender: &Manifest, receiver: &Manifest, rule: SyncRule, plan: &mut SyncPlan) {
    let mut receiver_paths: Vec<&String> = receiver.files.keys().collect();
    receiver_paths.sort();

    for path in receiver_paths {
        let info = &receiver.files[path];
        if info.is_dir {
            if rule == SyncRule::Flat {
                continue;
            }
            // Never delete a receiver-only top-level directory, and leave
            // everything under one alone.
            if DriftPath::top_component(path) == path.as_str() {
                continue;
            }
            if is_protected(path, sender) {
                continue;
            }
            if sender.get_dir(path).is_none() && !plan.dirs_to_delete.contains(path) {
                plan.dirs_to_delete.push(path.clone());
            }
        } else {
            if is_protected(path, sender) {
                continue;
            }
            if sender.get_file(path).is_none() && !plan.files_to_delete.contains(path) {
                plan.files_to_delete.push(path.clone());
            }
        }
    }
}

/// One-to-one pairing of deletion candidates with addition candidates that
/// carry the same size and whole-second mtime. First match wins.
fn pair_renames(receiver: &Manifest, additions: &HashSet<String>, plan: &mut SyncPlan) {
    let mut claimed_new: HashSet<String> = HashSet::new();
    let mut renames: Vec<RenameAction> = Vec::new();

    plan.files_to_delete.retain(|old| {
        let Some(old_info) = receiver.get_file(old) else {
            return true;
        };
        let matched = plan.files_to_sync.iter().find(|cand| {
            additions.contains(&cand.path)
                && !claimed_new.contains(&cand.path)
                && cand.size == old_info.size
                && cand.mod_time.timestamp() == old_info.mod_time.timestamp()
        });
        match matched {
            Some(cand) => {
                claimed_new.insert(cand.path.clone());
                renames.push(RenameAction {
                    old_path: old.clone(),
                    new_path: cand.path.clone(),
                });
                false
            }
            None => true,
        }
    });

    plan.files_to_sync.retain(|f| !claimed_new.contains(&f.path));
    plan.renames = renames;
}
