//! Feasibility filtering and sub-task manifest reconciliation.

use tracing::info;

use crate::config::DatasetConfig;
use crate::manifest::Manifest;
use crate::{Error, Result};

/// Drop utterances with empty label sequences. Applied in every mode.
pub fn drop_empty(manifest: &mut Manifest) -> usize {
    let removed = manifest.retain_where(|r| r.ylen > 0);
    info!(removed, "removed empty utterances");
    removed
}

/// Drop utterances outside the frame-length bounds. Train mode only.
pub fn drop_outside_frame_bounds(manifest: &mut Manifest, min: u64, max: u64) -> usize {
    let removed = manifest.retain_where(|r| (min..=max).contains(&r.xlen));
    info!(removed, min, max, "removed utterances outside frame bounds");
    removed
}

/// Drop utterances whose labels cannot be aligned by a CTC loss after
/// subsampling (`ylen > xlen / subsample_factor`).
pub fn drop_ctc_infeasible(manifest: &mut Manifest, subsample_factor: u64) -> usize {
    manifest.retain_where(|r| r.ylen <= r.xlen / subsample_factor)
}

/// Run the full filtering pass over the primary manifest and any sub-task
/// manifests, leaving all of them with an identical retained index set.
///
/// Sub-task reconciliation is cumulative left-to-right: whenever a sub-task's
/// own CTC filter leaves it with a different row set, the primary is trimmed
/// to that sub-task's rows and sub-tasks up to and including it are re-trimmed
/// to the primary. Earlier sub-tasks are never re-checked in the reverse
/// direction.
pub fn filter_manifests(
    primary: &mut Manifest,
    subs: &mut [Option<Manifest>; 3],
    config: &DatasetConfig,
    min_n_frames: u64,
    max_n_frames: u64,
) -> Result<()> {
    drop_empty(primary);
    if config.is_test {
        return Ok(());
    }

    drop_outside_frame_bounds(primary, min_n_frames, max_n_frames);
    if config.ctc && config.subsample_factor > 1 {
        let removed = drop_ctc_infeasible(primary, config.subsample_factor);
        info!(removed, "removed CTC-infeasible utterances");
    }

    for task in 0..subs.len() {
        let Some(sub) = subs[task].as_mut() else {
            continue;
        };
        if let Some(sub_config) = &config.sub_tasks[task] {
            if sub_config.ctc && sub_config.subsample_factor > 1 {
                drop_ctc_infeasible(sub, sub_config.subsample_factor);
            }
        }
        if sub.retained_set() != primary.retained_set() {
            let keep = sub.retained_set().clone();
            let removed = primary.retain_ids(&keep);
            info!(removed, task = task + 1, "removed utterances missing from sub-task manifest");
            let keep = primary.retained_set().clone();
            for sub in subs[..=task].iter_mut().flatten() {
                sub.retain_ids(&keep);
            }
        }
    }

    for (task, sub) in subs.iter().enumerate() {
        if let Some(sub) = sub {
            if sub.retained_set() != primary.retained_set() {
                return Err(Error::UnreconciledManifests { task: task + 1 });
            }
        }
    }
    Ok(())
}
