//! Typed configuration for dataset construction.

use std::path::PathBuf;
use std::str::FromStr;

use crate::{Error, Result};

/// Labeling unit of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Word,
    WordChar,
    Wp,
    Char,
    Phone,
}

impl FromStr for Unit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "word" => Ok(Self::Word),
            "word_char" => Ok(Self::WordChar),
            "wp" => Ok(Self::Wp),
            "char" => Ok(Self::Char),
            s if s.contains("phone") => Ok(Self::Phone),
            _ => Err(Error::UnsupportedUnit(s.to_string())),
        }
    }
}

/// Corpus family, selecting the session and onset parsing rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Corpus {
    Swbd,
    Csj,
    Librispeech,
    Other(String),
}

impl Corpus {
    pub fn from_name(name: &str) -> Self {
        match name {
            "swbd" => Self::Swbd,
            "csj" => Self::Csj,
            "librispeech" => Self::Librispeech,
            _ => Self::Other(name.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Swbd => "swbd",
            Self::Csj => "csj",
            Self::Librispeech => "librispeech",
            Self::Other(name) => name,
        }
    }

    /// Whether an onset parsing rule exists for this corpus.
    pub(crate) fn supports_context_linking(&self) -> bool {
        matches!(self, Self::Swbd | Self::Csj)
    }
}

/// Settings for one auxiliary labeling task.
///
/// Holding the manifest path, dictionary path and unit in a single struct
/// makes a unit-without-manifest mismatch unrepresentable.
#[derive(Debug, Clone)]
pub struct SubTaskConfig {
    pub manifest_path: PathBuf,
    pub dict_path: PathBuf,
    pub unit: Unit,
    pub ctc: bool,
    pub subsample_factor: u64,
}

impl SubTaskConfig {
    pub fn new<P: Into<PathBuf>>(manifest_path: P, dict_path: P, unit: Unit) -> Self {
        Self {
            manifest_path: manifest_path.into(),
            dict_path: dict_path.into(),
            unit,
            ctc: false,
            subsample_factor: 1,
        }
    }

    pub fn ctc(mut self, ctc: bool, subsample_factor: u64) -> Self {
        self.ctc = ctc;
        self.subsample_factor = subsample_factor;
        self
    }
}

/// Constructor parameters for [`crate::AsrDataset`].
#[derive(Debug, Clone)]
pub struct DatasetConfig {
    pub manifest_path: PathBuf,
    pub dict_path: PathBuf,
    pub unit: Unit,
    pub batch_size: usize,
    /// `None` runs forever.
    pub max_epoch: Option<u64>,
    pub is_test: bool,
    pub min_n_frames: u64,
    pub max_n_frames: u64,
    pub shuffle: bool,
    pub sort_by_input_length: bool,
    pub short2long: bool,
    pub sort_stop_epoch: Option<u64>,
    pub dynamic_batching: bool,
    pub ctc: bool,
    pub subsample_factor: u64,
    pub corpus: Corpus,
    pub concat_prev_n_utterances: usize,
    pub cache_prev_n_tokens: usize,
    /// Seed for the ordering policy's random source.
    pub seed: u64,
    pub sub_tasks: [Option<SubTaskConfig>; 3],
}

impl DatasetConfig {
    pub fn new<P: Into<PathBuf>>(manifest_path: P, dict_path: P, unit: Unit) -> Self {
        Self {
            manifest_path: manifest_path.into(),
            dict_path: dict_path.into(),
            unit,
            batch_size: 1,
            max_epoch: None,
            is_test: false,
            min_n_frames: 40,
            max_n_frames: 2000,
            shuffle: false,
            sort_by_input_length: false,
            short2long: false,
            sort_stop_epoch: None,
            dynamic_batching: false,
            ctc: false,
            subsample_factor: 1,
            corpus: Corpus::Other(String::new()),
            concat_prev_n_utterances: 0,
            cache_prev_n_tokens: 0,
            seed: 1,
            sub_tasks: [None, None, None],
        }
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn max_epoch(mut self, max_epoch: Option<u64>) -> Self {
        self.max_epoch = max_epoch;
        self
    }

    pub fn is_test(mut self, is_test: bool) -> Self {
        self.is_test = is_test;
        self
    }

    pub fn frame_bounds(mut self, min_n_frames: u64, max_n_frames: u64) -> Self {
        self.min_n_frames = min_n_frames;
        self.max_n_frames = max_n_frames;
        self
    }

    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn sort_by_input_length(mut self, sort: bool) -> Self {
        self.sort_by_input_length = sort;
        self
    }

    pub fn short2long(mut self, short2long: bool) -> Self {
        self.short2long = short2long;
        self
    }

    pub fn sort_stop_epoch(mut self, epoch: Option<u64>) -> Self {
        self.sort_stop_epoch = epoch;
        self
    }

    pub fn dynamic_batching(mut self, dynamic_batching: bool) -> Self {
        self.dynamic_batching = dynamic_batching;
        self
    }

    pub fn ctc(mut self, ctc: bool, subsample_factor: u64) -> Self {
        self.ctc = ctc;
        self.subsample_factor = subsample_factor;
        self
    }

    pub fn corpus(mut self, corpus: Corpus) -> Self {
        self.corpus = corpus;
        self
    }

    pub fn concat_prev_n_utterances(mut self, n: usize) -> Self {
        self.concat_prev_n_utterances = n;
        self
    }

    pub fn cache_prev_n_tokens(mut self, n: usize) -> Self {
        self.cache_prev_n_tokens = n;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn sub_task(mut self, task: usize, config: SubTaskConfig) -> Self {
        self.sub_tasks[task] = Some(config);
        self
    }

    /// Whether cross-utterance context is requested in any form.
    pub fn context_active(&self) -> bool {
        self.concat_prev_n_utterances > 0 || self.cache_prev_n_tokens > 0
    }

    /// Rejects contradictory settings. Called once at dataset construction.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::ZeroBatchSize);
        }
        if self.concat_prev_n_utterances > 0 && self.cache_prev_n_tokens > 0 {
            return Err(Error::ConflictingContextSettings);
        }
        if self.context_active() {
            if !self.corpus.supports_context_linking() {
                return Err(Error::UnsupportedCorpus(self.corpus.name().to_string()));
            }
            if self.sub_tasks.iter().any(Option::is_some) {
                return Err(Error::ContextWithSubTasks);
            }
            if self.shuffle {
                return Err(Error::ConflictingOrdering("shuffle"));
            }
            if self.sort_by_input_length {
                return Err(Error::ConflictingOrdering("sort_by_input_length"));
            }
        }
        Ok(())
    }
}
