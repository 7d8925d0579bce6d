//! The dataset: construction pipeline and batch iteration.

use tracing::info;

use crate::batch::{Batch, BatchAssembler, FeatureReader};
use crate::config::{Corpus, DatasetConfig};
use crate::manifest::Manifest;
use crate::ordering::OrderingPolicy;
use crate::vocab::Vocabulary;
use crate::{context, filter, Error, Result};

/// A dataset split, iterated as ordered mini-batches.
///
/// Construction loads the manifests, links cross-utterance context when
/// requested, filters infeasible utterances and fixes the ordering policy.
/// Afterwards the manifests are read-only; the only mutable state is the
/// policy's remaining-index set and epoch counter, updated atomically per
/// batch draw.
pub struct AsrDataset<R: FeatureReader> {
    config: DatasetConfig,
    split: String,
    manifest: Manifest,
    subs: [Option<Manifest>; 3],
    vocab: Vocabulary,
    vocab_subs: [Option<Vocabulary>; 3],
    policy: OrderingPolicy,
    assembler: BatchAssembler,
    reader: R,
    input_dim: usize,
}

impl<R: FeatureReader> AsrDataset<R> {
    pub fn new(config: DatasetConfig, reader: R) -> Result<Self> {
        config.validate()?;

        let split = config
            .manifest_path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| name.split('.').next())
            .unwrap_or_default()
            .to_string();
        let vocab = Vocabulary::load(&config.dict_path)?;

        let mut manifest = Manifest::load(&config.manifest_path, &config.corpus)?;
        let mut subs: [Option<Manifest>; 3] = [None, None, None];
        let mut vocab_subs: [Option<Vocabulary>; 3] = [None, None, None];
        for (task, sub_config) in config.sub_tasks.iter().enumerate() {
            if let Some(sub_config) = sub_config {
                let sub = Manifest::load(&sub_config.manifest_path, &config.corpus)?;
                manifest.check_aligned(&sub, task + 1)?;
                subs[task] = Some(sub);
                vocab_subs[task] = Some(Vocabulary::load(&sub_config.dict_path)?);
            }
        }
        info!(split = %split, utterances = manifest.len(), "loaded manifest");

        // context mode replaces the frame bounds with near-unbounded ones
        let mut min_n_frames = config.min_n_frames;
        let mut max_n_frames = config.max_n_frames;
        let mut session_ordered = false;
        if config.context_active() {
            min_n_frames = 1;
            max_n_frames = 10000;
            context::parse_onsets(&mut manifest, &config.corpus)?;
            session_ordered = true;
            if !(config.is_test && config.cache_prev_n_tokens > 0) {
                context::link_prev_utterances(&mut manifest);
            }
            if config.concat_prev_n_utterances > 0 {
                manifest =
                    context::concat_prev_utterances(&manifest, config.concat_prev_n_utterances);
            }
        } else if config.is_test && config.corpus == Corpus::Swbd {
            context::parse_onsets(&mut manifest, &config.corpus)?;
            session_ordered = true;
        }

        filter::filter_manifests(&mut manifest, &mut subs, &config, min_n_frames, max_n_frames)?;
        if manifest.is_empty() {
            return Err(Error::EmptyDataset);
        }

        let policy = OrderingPolicy::new(&config, &manifest, session_ordered);

        // Probe the feature dimensionality once, on the first utterance in
        // iteration order.
        let first = policy.peek().ok_or(Error::EmptyDataset)?;
        let first = manifest.record(first);
        let probe = reader
            .read(&first.feat_path)
            .map_err(|source| Error::FeatureRead {
                path: first.feat_path.clone(),
                source: Box::new(source),
            })?;
        let (_, input_dim) = probe.dims2()?;

        let assembler = BatchAssembler::new(&config, input_dim);
        Ok(Self {
            config,
            split,
            manifest,
            subs,
            vocab,
            vocab_subs,
            policy,
            assembler,
            reader,
            input_dim,
        })
    }

    /// Draw and materialize the next mini-batch. `Ok(None)` signals the end
    /// of training, a terminal state distinct from any failure.
    pub fn next_batch(&mut self) -> Result<Option<Batch>> {
        let indices = match self.policy.next_indices(&self.manifest) {
            Some(indices) => indices,
            None => return Ok(None),
        };
        self.assembler
            .assemble(&self.reader, &self.manifest, &self.subs, &indices)
            .map(Some)
    }

    /// Name of the split, taken from the manifest file stem.
    pub fn split_name(&self) -> &str {
        &self.split
    }

    /// Completed epochs.
    pub fn epoch(&self) -> u64 {
        self.policy.epoch()
    }

    /// Retained utterance count.
    pub fn n_utterances(&self) -> usize {
        self.manifest.len()
    }

    /// Total retained input frames.
    pub fn n_frames(&self) -> u64 {
        self.manifest
            .retained()
            .map(|id| self.manifest.record(id).xlen)
            .sum()
    }

    /// Feature dimensionality, probed at construction.
    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    /// Main-task vocabulary size.
    pub fn vocab(&self) -> usize {
        self.vocab.size()
    }

    /// Vocabulary size of a sub-task (0-based), if configured.
    pub fn vocab_sub(&self, task: usize) -> Option<usize> {
        self.vocab_subs[task].as_ref().map(Vocabulary::size)
    }

    /// Main-task dictionary, for decoding display.
    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocab
    }

    pub fn config(&self) -> &DatasetConfig {
        &self.config
    }

    /// The primary manifest after context linking and filtering.
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }
}

impl<R: FeatureReader> Iterator for AsrDataset<R> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_batch().transpose()
    }
}
