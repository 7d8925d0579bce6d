//! Utterance manifests: tab-separated tables with a fixed column schema.
//!
//! A manifest row describes one utterance (feature source, frame count, label
//! sequence). Loaded rows are never removed; filtering shrinks the retained
//! index set so cross-utterance context links stay resolvable afterwards.

use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;

use serde::Deserialize;

use crate::config::Corpus;
use crate::{Error, Result};

/// 0-based position of an utterance in the primary manifest file.
pub type RowId = usize;

#[derive(Debug, Deserialize)]
struct RawRow {
    utt_id: String,
    speaker: String,
    feat_path: String,
    xlen: u64,
    xdim: u64,
    text: String,
    token_id: String,
    ylen: u64,
    ydim: u64,
}

/// One manifest row plus the derived context fields.
#[derive(Debug, Clone)]
pub struct UtteranceRecord {
    pub utt_id: String,
    pub speaker: String,
    pub feat_path: String,
    /// Input frame count. Covers the whole concatenated sequence in
    /// context-concatenation mode.
    pub xlen: u64,
    pub xdim: u64,
    pub text: String,
    /// Whitespace-separated integer label sequence.
    pub token_id: String,
    pub ylen: u64,
    pub ydim: u64,
    /// Grouping key for context linking, derived from the speaker id.
    pub session: String,
    /// Temporal position within the session, parsed from the utterance id.
    /// Zero until onset parsing runs.
    pub onset: u64,
    /// Prior utterances in the same session, oldest first.
    pub prev_utt: Vec<RowId>,
}

impl UtteranceRecord {
    /// Parse the `token_id` cell into a label sequence.
    pub fn tokens(&self) -> Result<Vec<u32>> {
        self.token_id
            .split_whitespace()
            .map(|t| {
                t.parse::<u32>()
                    .map_err(|_| Error::MalformedTokenId(self.utt_id.clone()))
            })
            .collect()
    }
}

/// An ordered collection of utterance records keyed by row id.
#[derive(Debug, Clone)]
pub struct Manifest {
    records: Vec<UtteranceRecord>,
    retained: BTreeSet<RowId>,
}

impl Manifest {
    pub fn load<P: AsRef<Path>>(path: P, corpus: &Corpus) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file, corpus)
    }

    /// Parse a tab-separated manifest with a header row. Columns outside the
    /// fixed schema are ignored.
    pub fn from_reader<R: Read>(reader: R, corpus: &Corpus) -> Result<Self> {
        let mut tsv = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .quoting(false)
            .from_reader(reader);
        let mut records = Vec::new();
        for row in tsv.deserialize() {
            let row: RawRow = row?;
            let session = derive_session(&row.speaker, corpus);
            records.push(UtteranceRecord {
                utt_id: row.utt_id,
                speaker: row.speaker,
                feat_path: row.feat_path,
                xlen: row.xlen,
                xdim: row.xdim,
                text: row.text,
                token_id: row.token_id,
                ylen: row.ylen,
                ydim: row.ydim,
                session,
                onset: 0,
                prev_utt: Vec::new(),
            });
        }
        let retained = (0..records.len()).collect();
        Ok(Self { records, retained })
    }

    pub(crate) fn from_parts(records: Vec<UtteranceRecord>, retained: BTreeSet<RowId>) -> Self {
        Self { records, retained }
    }

    /// Number of retained rows.
    pub fn len(&self) -> usize {
        self.retained.len()
    }

    pub fn is_empty(&self) -> bool {
        self.retained.is_empty()
    }

    /// Number of loaded rows, retained or not.
    pub fn n_loaded(&self) -> usize {
        self.records.len()
    }

    /// Record by row id. Row ids never move, so dropped rows stay accessible.
    pub fn record(&self, id: RowId) -> &UtteranceRecord {
        &self.records[id]
    }

    pub fn is_retained(&self, id: RowId) -> bool {
        self.retained.contains(&id)
    }

    /// Retained row ids in ascending order.
    pub fn retained(&self) -> impl Iterator<Item = RowId> + '_ {
        self.retained.iter().copied()
    }

    pub(crate) fn retained_set(&self) -> &BTreeSet<RowId> {
        &self.retained
    }

    pub(crate) fn records(&self) -> &[UtteranceRecord] {
        &self.records
    }

    pub(crate) fn records_mut(&mut self) -> &mut [UtteranceRecord] {
        &mut self.records
    }

    /// Drop retained rows failing the predicate, returning the removed count.
    pub(crate) fn retain_where<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&UtteranceRecord) -> bool,
    {
        let before = self.retained.len();
        let records = &self.records;
        self.retained.retain(|&id| keep(&records[id]));
        before - self.retained.len()
    }

    /// Intersect the retained set with `keep`, returning the removed count.
    pub(crate) fn retain_ids(&mut self, keep: &BTreeSet<RowId>) -> usize {
        let before = self.retained.len();
        self.retained.retain(|id| keep.contains(id));
        before - self.retained.len()
    }

    /// Verify that a sub-task manifest lists the same utterance at every row
    /// position. `task` is 1-based, for error display.
    pub(crate) fn check_aligned(&self, sub: &Manifest, task: usize) -> Result<()> {
        if self.records.len() != sub.records.len() {
            return Err(Error::SubManifestLength {
                task,
                primary: self.records.len(),
                sub: sub.records.len(),
            });
        }
        for (row, (a, b)) in self.records.iter().zip(sub.records.iter()).enumerate() {
            if a.utt_id != b.utt_id {
                return Err(Error::MisalignedSubManifest {
                    task,
                    row,
                    expected: a.utt_id.clone(),
                    got: b.utt_id.clone(),
                });
            }
        }
        Ok(())
    }
}

fn derive_session(speaker: &str, corpus: &Corpus) -> String {
    match corpus {
        Corpus::Swbd => speaker.split('-').next().unwrap_or(speaker).to_string(),
        _ => speaker.to_string(),
    }
}
