//! Epoch ordering: which utterances come next, and when training ends.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::debug;

use crate::config::DatasetConfig;
use crate::context;
use crate::manifest::{Manifest, RowId};

/// Produces the per-epoch iteration order over retained rows and tracks the
/// `remaining` set consumed batch by batch.
///
/// The policy owns all mutable iteration state (remaining indices, epoch
/// counter, random source); feature reads are free to run in parallel, index
/// selection is not.
#[derive(Debug)]
pub struct OrderingPolicy {
    batch_size: usize,
    dynamic_batching: bool,
    is_test: bool,
    shuffle: bool,
    sort_by_input_length: bool,
    short2long: bool,
    sort_stop_epoch: Option<u64>,
    max_epoch: Option<u64>,
    context_mode: bool,
    session_ordered: bool,
    epoch: u64,
    remaining: VecDeque<RowId>,
    done: bool,
    rng: StdRng,
}

impl OrderingPolicy {
    pub(crate) fn new(config: &DatasetConfig, manifest: &Manifest, session_ordered: bool) -> Self {
        let mut policy = Self {
            batch_size: config.batch_size,
            dynamic_batching: config.dynamic_batching,
            is_test: config.is_test,
            shuffle: config.shuffle,
            sort_by_input_length: config.sort_by_input_length,
            short2long: config.short2long,
            sort_stop_epoch: config.sort_stop_epoch,
            max_epoch: config.max_epoch,
            context_mode: config.context_active(),
            session_ordered,
            epoch: 0,
            remaining: VecDeque::new(),
            done: false,
            rng: StdRng::seed_from_u64(config.seed),
        };
        policy.remaining = policy.epoch_order(manifest).into();
        policy
    }

    /// Completed epochs.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Row id of the next utterance to be drawn, if any.
    pub(crate) fn peek(&self) -> Option<RowId> {
        self.remaining.front().copied()
    }

    /// Draw the row ids of the next batch, removing them from `remaining`.
    /// `None` signals the end of training, a terminal state.
    pub(crate) fn next_indices(&mut self, manifest: &Manifest) -> Option<Vec<RowId>> {
        if self.done {
            return None;
        }
        if self.remaining.is_empty() {
            self.epoch += 1;
            let exhausted = self.max_epoch.is_some_and(|max| self.epoch >= max);
            if self.is_test || exhausted {
                self.done = true;
                return None;
            }
            debug!(epoch = self.epoch, "starting next epoch");
            self.remaining = self.epoch_order(manifest).into();
        }
        let size = self.draw_size(manifest);
        let mut indices = Vec::with_capacity(size);
        while indices.len() < size {
            match self.remaining.pop_front() {
                Some(id) => indices.push(id),
                None => break,
            }
        }
        Some(indices)
    }

    fn epoch_order(&mut self, manifest: &Manifest) -> Vec<RowId> {
        if self.sort_by_input_length
            && self.sort_stop_epoch.is_some_and(|stop| self.epoch >= stop)
        {
            // one-way transition back to a random order
            self.sort_by_input_length = false;
            self.shuffle = true;
            debug!(epoch = self.epoch, "length-sorting stopped, reverting to shuffled order");
        }

        let mut order: Vec<RowId> = manifest.retained().collect();
        if self.context_mode || self.is_test {
            if self.session_ordered {
                order = context::session_order(manifest);
            }
        } else if self.sort_by_input_length {
            order.sort_by_key(|&id| manifest.record(id).xlen);
            if self.short2long {
                order.reverse();
            }
        } else if self.shuffle {
            order.shuffle(&mut self.rng);
        } else {
            order.sort_by(|&a, &b| {
                manifest
                    .record(a)
                    .utt_id
                    .cmp(&manifest.record(b).utt_id)
            });
        }
        order
    }

    fn draw_size(&self, manifest: &Manifest) -> usize {
        if !self.dynamic_batching || self.is_test {
            return self.batch_size;
        }
        let front = match self.remaining.front() {
            Some(&id) => manifest.record(id),
            None => return self.batch_size,
        };
        let divisor = if front.xlen <= 800 {
            1
        } else if front.xlen <= 1600 || (80 < front.ylen && front.ylen <= 100) {
            2
        } else {
            4
        };
        (self.batch_size / divisor).max(1)
    }
}
