//! Batch materialization: feature reads, context concatenation, label
//! parsing and the token cache.

use candle::Tensor;

use crate::config::DatasetConfig;
use crate::manifest::{Manifest, RowId};
use crate::{Error, Result, EOS, PAD_XLEN};

/// Reads one utterance's acoustic features as a `[T, input_dim]` tensor.
///
/// Implementations must be deterministic and side-effect free from the
/// batching engine's perspective; reads may be issued from multiple worker
/// threads while index selection stays serialized.
pub trait FeatureReader {
    fn read(&self, feat_path: &str) -> Result<Tensor>;
}

/// One mini-batch. All vectors are parallel over the same row order; the
/// sub-task label lists are empty when the task is absent.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Input features, one `[T, input_dim]` tensor per utterance.
    pub xs: Vec<Tensor>,
    pub xlens: Vec<u64>,
    /// Main-task label sequences.
    pub ys: Vec<Vec<u32>>,
    /// Trailing window of prior-utterance labels, when token caching is on.
    pub ys_cache: Vec<Vec<u32>>,
    pub ys_sub1: Vec<Vec<u32>>,
    pub ys_sub2: Vec<Vec<u32>>,
    pub ys_sub3: Vec<Vec<u32>>,
    pub utt_ids: Vec<String>,
    pub speakers: Vec<String>,
    pub sessions: Vec<String>,
    pub text: Vec<String>,
    pub feat_path: Vec<String>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.utt_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.utt_ids.is_empty()
    }
}

#[derive(Debug)]
pub(crate) struct BatchAssembler {
    concat_prev_n_utterances: usize,
    cache_prev_n_tokens: usize,
    input_dim: usize,
}

impl BatchAssembler {
    pub(crate) fn new(config: &DatasetConfig, input_dim: usize) -> Self {
        Self {
            concat_prev_n_utterances: config.concat_prev_n_utterances,
            cache_prev_n_tokens: config.cache_prev_n_tokens,
            input_dim,
        }
    }

    pub(crate) fn assemble<R: FeatureReader>(
        &self,
        reader: &R,
        primary: &Manifest,
        subs: &[Option<Manifest>; 3],
        indices: &[RowId],
    ) -> Result<Batch> {
        let mut xs = Vec::with_capacity(indices.len());
        for &id in indices {
            let record = primary.record(id);
            let x = read_features(reader, &record.feat_path)?;
            if self.concat_prev_n_utterances > 0 && !record.prev_utt.is_empty() {
                // oldest first, each segment followed by silence padding
                let mut parts = Vec::with_capacity(record.prev_utt.len() * 2 + 1);
                for &prev in &record.prev_utt {
                    let x_prev = read_features(reader, &primary.record(prev).feat_path)?;
                    let silence = Tensor::zeros(
                        (PAD_XLEN, self.input_dim),
                        x_prev.dtype(),
                        x_prev.device(),
                    )?;
                    parts.push(x_prev);
                    parts.push(silence);
                }
                parts.push(x);
                xs.push(Tensor::cat(&parts, 0)?);
            } else {
                xs.push(x);
            }
        }

        let mut ys = Vec::with_capacity(indices.len());
        for &id in indices {
            let record = primary.record(id);
            let mut y = Vec::new();
            if self.concat_prev_n_utterances > 0 {
                for &prev in &record.prev_utt {
                    y.extend(primary.record(prev).tokens()?);
                    y.push(EOS);
                }
            }
            y.extend(record.tokens()?);
            ys.push(y);
        }

        let mut ys_cache = Vec::new();
        if self.cache_prev_n_tokens > 0 {
            for &id in indices {
                let mut cache = Vec::new();
                for &prev in &primary.record(id).prev_utt {
                    cache.push(EOS);
                    cache.extend(primary.record(prev).tokens()?);
                }
                // keep the suffix: oldest cached tokens go first
                if cache.len() > self.cache_prev_n_tokens {
                    cache.drain(..cache.len() - self.cache_prev_n_tokens);
                }
                ys_cache.push(cache);
            }
        }

        let mut ys_subs: [Vec<Vec<u32>>; 3] = [Vec::new(), Vec::new(), Vec::new()];
        for (task, sub) in subs.iter().enumerate() {
            if let Some(sub) = sub {
                ys_subs[task] = indices
                    .iter()
                    .map(|&id| sub.record(id).tokens())
                    .collect::<Result<_>>()?;
            }
        }
        let [ys_sub1, ys_sub2, ys_sub3] = ys_subs;

        let field = |f: fn(&crate::manifest::UtteranceRecord) -> &str| -> Vec<String> {
            indices
                .iter()
                .map(|&id| f(primary.record(id)).to_string())
                .collect()
        };

        Ok(Batch {
            xs,
            xlens: indices.iter().map(|&id| primary.record(id).xlen).collect(),
            ys,
            ys_cache,
            ys_sub1,
            ys_sub2,
            ys_sub3,
            utt_ids: field(|r| r.utt_id.as_str()),
            speakers: field(|r| r.speaker.as_str()),
            sessions: field(|r| r.session.as_str()),
            text: field(|r| r.text.as_str()),
            feat_path: field(|r| r.feat_path.as_str()),
        })
    }
}

fn read_features<R: FeatureReader>(reader: &R, path: &str) -> Result<Tensor> {
    reader.read(path).map_err(|source| Error::FeatureRead {
        path: path.to_string(),
        source: Box::new(source),
    })
}
