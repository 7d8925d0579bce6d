//! Cross-utterance context: onset parsing, session ordering and
//! concatenation of prior utterances into the current one.

use std::collections::HashMap;

use crate::config::Corpus;
use crate::manifest::{Manifest, RowId};
use crate::{Error, Result, PAD_XLEN};

/// Parse the temporal onset of every record from its utterance id.
pub fn parse_onsets(manifest: &mut Manifest, corpus: &Corpus) -> Result<()> {
    for record in manifest.records_mut() {
        record.onset = parse_onset(&record.utt_id, corpus)?;
    }
    Ok(())
}

fn parse_onset(utt_id: &str, corpus: &Corpus) -> Result<u64> {
    let field = match corpus {
        // e.g. en_4156-A_030185-030248 -> 030185
        Corpus::Swbd => utt_id
            .rsplit('_')
            .next()
            .and_then(|field| field.split('-').next()),
        // e.g. A01M0097_0045_0067 -> 0045
        Corpus::Csj => utt_id.split('_').nth(1),
        _ => return Err(Error::UnsupportedCorpus(corpus.name().to_string())),
    };
    field
        .and_then(|field| field.parse().ok())
        .ok_or_else(|| Error::MalformedUttId(utt_id.to_string()))
}

/// Retained row ids ordered by `(session, onset)` ascending.
pub fn session_order(manifest: &Manifest) -> Vec<RowId> {
    let mut order: Vec<RowId> = manifest.retained().collect();
    order.sort_by(|&a, &b| {
        let (a, b) = (manifest.record(a), manifest.record(b));
        a.session
            .cmp(&b.session)
            .then(a.onset.cmp(&b.onset))
    });
    order
}

/// Compute `prev_utt` for every loaded record: the rows in the same session
/// with strictly smaller onset, ascending. Grouped by session so the whole
/// pass stays O(n log n).
pub fn link_prev_utterances(manifest: &mut Manifest) {
    let mut groups: HashMap<String, Vec<RowId>> = HashMap::new();
    for (id, record) in manifest.records().iter().enumerate() {
        groups.entry(record.session.clone()).or_default().push(id);
    }

    let mut linked: Vec<Vec<RowId>> = vec![Vec::new(); manifest.n_loaded()];
    for ids in groups.values_mut() {
        ids.sort_by_key(|&id| manifest.record(id).onset);
        for (pos, &id) in ids.iter().enumerate() {
            let onset = manifest.record(id).onset;
            // equal onsets are not "earlier"
            linked[id] = ids[..pos]
                .iter()
                .copied()
                .filter(|&prev| manifest.record(prev).onset < onset)
                .collect();
        }
    }
    for (record, prev_utt) in manifest.records_mut().iter_mut().zip(linked) {
        record.prev_utt = prev_utt;
    }
}

/// Truncate each history to its most recent `n` utterances and rewrite
/// `xlen`, `ylen` and `text` to cover the concatenated sequence: each prior
/// utterance contributes its own frames plus [`PAD_XLEN`] silence frames, its
/// own labels plus one end-of-sequence marker, and its transcript joined with
/// a space. Returns a derived manifest; the input is left untouched.
pub fn concat_prev_utterances(manifest: &Manifest, n: usize) -> Manifest {
    let mut records = manifest.records().to_vec();
    for record in records.iter_mut() {
        let start = record.prev_utt.len().saturating_sub(n);
        record.prev_utt.drain(..start);
        if record.prev_utt.is_empty() {
            continue;
        }
        let mut text = Vec::with_capacity(record.prev_utt.len() + 1);
        for &prev in &record.prev_utt {
            // lengths of the prior utterance as loaded, not as rewritten
            let prev = manifest.record(prev);
            record.xlen += prev.xlen + PAD_XLEN as u64;
            record.ylen += prev.ylen + 1;
            text.push(prev.text.as_str());
        }
        text.push(&record.text);
        let text = text.join(" ");
        record.text = text;
    }
    Manifest::from_parts(records, manifest.retained_set().clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swbd_onset() {
        assert_eq!(
            parse_onset("en_4156-A_030185-030248", &Corpus::Swbd).unwrap(),
            30185
        );
        assert!(parse_onset("sw02001", &Corpus::Swbd).is_err());
    }

    #[test]
    fn csj_onset() {
        assert_eq!(parse_onset("A01M0097_0045_0067", &Corpus::Csj).unwrap(), 45);
        assert!(parse_onset("A01M0097", &Corpus::Csj).is_err());
    }

    #[test]
    fn no_onset_rule_for_other_corpora() {
        assert!(matches!(
            parse_onset("1272-128104-0000", &Corpus::Librispeech),
            Err(Error::UnsupportedCorpus(_))
        ));
    }
}
