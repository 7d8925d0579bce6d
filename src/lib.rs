//! Dataset indexing and batch assembly for CTC and attention-based ASR training.
//!
//! The crate turns tab-separated utterance manifests into ordered mini-batches
//! for a multi-task sequence model with up to three auxiliary label tasks:
//! manifest loading, cross-utterance context linking, feasibility filtering,
//! epoch ordering and batch materialization. Acoustic features are read
//! through the [`FeatureReader`] collaborator and carried as `[T, input_dim]`
//! tensors.
pub mod batch;
pub mod config;
pub mod context;
pub mod dataset;
pub mod filter;
pub mod manifest;
pub mod ordering;
pub mod vocab;

pub use batch::{Batch, FeatureReader};
pub use config::{Corpus, DatasetConfig, SubTaskConfig, Unit};
pub use dataset::AsrDataset;
pub use manifest::{Manifest, RowId, UtteranceRecord};
pub use vocab::Vocabulary;

/// Token id reserved for the end-of-sequence marker.
pub const EOS: u32 = 2;
/// Token id reserved for padding.
pub const PAD: u32 = 3;
/// Silence frames inserted between concatenated feature segments.
pub const PAD_XLEN: usize = 20;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("unsupported unit {0:?}")]
    UnsupportedUnit(String),

    #[error("context features are not supported for corpus {0:?}")]
    UnsupportedCorpus(String),

    #[error("concat_prev_n_utterances and cache_prev_n_tokens cannot both be set")]
    ConflictingContextSettings,

    #[error("context features cannot be combined with sub-task manifests")]
    ContextWithSubTasks,

    #[error("{0} cannot be combined with context features")]
    ConflictingOrdering(&'static str),

    #[error("batch_size must be positive")]
    ZeroBatchSize,

    #[error("sub{task} manifest has {sub} rows, primary has {primary}")]
    SubManifestLength {
        task: usize,
        primary: usize,
        sub: usize,
    },

    #[error("sub{task} manifest row {row}: utt_id {got:?} does not match primary {expected:?}")]
    MisalignedSubManifest {
        task: usize,
        row: usize,
        expected: String,
        got: String,
    },

    #[error("sub{task} manifest could not be reconciled with the primary manifest")]
    UnreconciledManifests { task: usize },

    #[error("utt_id {0:?}: cannot parse onset")]
    MalformedUttId(String),

    #[error("utt_id {0:?}: malformed token_id cell")]
    MalformedTokenId(String),

    #[error("no utterances left after filtering")]
    EmptyDataset,

    #[error("failed to read features from {path:?}")]
    FeatureRead {
        path: String,
        #[source]
        source: Box<Error>,
    },

    #[error(transparent)]
    Candle(#[from] candle::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
