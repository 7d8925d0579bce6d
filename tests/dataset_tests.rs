use candle::{DType, Device, Tensor};

use asr_datasets::{AsrDataset, DatasetConfig, Error, FeatureReader, SubTaskConfig, Unit};

const HEADER: &str = "utt_id\tspeaker\tfeat_path\txlen\txdim\ttext\ttoken_id\tylen\tydim\n";

/// Returns `[T, 80]` all-ones features, with `T` encoded in the feat path.
struct StubReader;

impl FeatureReader for StubReader {
    fn read(&self, feat_path: &str) -> asr_datasets::Result<Tensor> {
        let frames: usize = feat_path
            .rsplit(':')
            .next()
            .unwrap()
            .parse()
            .expect("frame count encoded in feat_path");
        Ok(Tensor::ones((frames, 80), DType::F32, &Device::Cpu)?)
    }
}

struct FailingReader;

impl FeatureReader for FailingReader {
    fn read(&self, _feat_path: &str) -> asr_datasets::Result<Tensor> {
        Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into())
    }
}

fn fixture(name: &str, content: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("asr-datasets-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

fn row(utt_id: &str, speaker: &str, xlen: u64, token_id: &str) -> String {
    let ylen = token_id.split_whitespace().count();
    format!("{utt_id}\t{speaker}\tmem:{xlen}\t{xlen}\t80\ttext of {utt_id}\t{token_id}\t{ylen}\t500\n")
}

fn dict(name: &str) -> std::path::PathBuf {
    fixture(name, "a 4\nb 5\nc 6\n")
}

#[test]
fn length_sorted_epoch_with_partial_final_batch() -> asr_datasets::Result<()> {
    let mut manifest = String::from(HEADER);
    for (utt, xlen) in [("u1", 300), ("u2", 100), ("u3", 500), ("u4", 200), ("u5", 400)] {
        manifest.push_str(&row(utt, "spk1", xlen, "4 5 6"));
    }
    let manifest = fixture("sorted.tsv", &manifest);
    let config = DatasetConfig::new(manifest, dict("sorted.dict"), Unit::Char)
        .batch_size(2)
        .sort_by_input_length(true)
        .max_epoch(Some(1));
    let mut dataset = AsrDataset::new(config, StubReader)?;
    assert_eq!(dataset.split_name(), "sorted");
    assert_eq!(dataset.n_utterances(), 5);
    assert_eq!(dataset.n_frames(), 1500);
    assert_eq!(dataset.input_dim(), 80);
    assert_eq!(dataset.vocab(), 7);

    let mut sizes = Vec::new();
    let mut xlens = Vec::new();
    while let Some(batch) = dataset.next_batch()? {
        sizes.push(batch.len());
        assert_eq!(batch.xs.len(), batch.len());
        assert_eq!(batch.ys.len(), batch.len());
        assert_eq!(batch.utt_ids.len(), batch.len());
        assert_eq!(batch.speakers.len(), batch.len());
        assert_eq!(batch.sessions.len(), batch.len());
        assert_eq!(batch.text.len(), batch.len());
        assert_eq!(batch.feat_path.len(), batch.len());
        assert!(batch.ys_sub1.is_empty());
        assert!(batch.ys_cache.is_empty());
        xlens.extend(batch.xlens.iter().copied());
    }
    assert_eq!(sizes, [2, 2, 1]);
    assert_eq!(xlens, [100, 200, 300, 400, 500]);
    assert_eq!(dataset.epoch(), 1);

    // exhaustion is terminal, not an error
    assert!(dataset.next_batch()?.is_none());
    assert!(dataset.next_batch()?.is_none());
    Ok(())
}

#[test]
fn short2long_reverses_the_sort() -> asr_datasets::Result<()> {
    let mut manifest = String::from(HEADER);
    for (utt, xlen) in [("u1", 300), ("u2", 100), ("u3", 500)] {
        manifest.push_str(&row(utt, "spk1", xlen, "4 5"));
    }
    let manifest = fixture("short2long.tsv", &manifest);
    let config = DatasetConfig::new(manifest, dict("short2long.dict"), Unit::Char)
        .batch_size(3)
        .sort_by_input_length(true)
        .short2long(true)
        .max_epoch(Some(1));
    let mut dataset = AsrDataset::new(config, StubReader)?;
    let batch = dataset.next_batch()?.unwrap();
    assert_eq!(batch.xlens, [500, 300, 100]);
    Ok(())
}

#[test]
fn shuffle_is_deterministic_per_seed() -> asr_datasets::Result<()> {
    let mut manifest = String::from(HEADER);
    for i in 0..8 {
        manifest.push_str(&row(&format!("u{i}"), "spk1", 100 + i, "4 5 6"));
    }
    let manifest = fixture("shuffled.tsv", &manifest);
    let make = |seed| {
        let config = DatasetConfig::new(manifest.clone(), dict("shuffled.dict"), Unit::Char)
            .batch_size(3)
            .shuffle(true)
            .seed(seed)
            .max_epoch(Some(1));
        AsrDataset::new(config, StubReader)
    };
    let collect = |mut dataset: AsrDataset<StubReader>| -> asr_datasets::Result<Vec<String>> {
        let mut utt_ids = Vec::new();
        while let Some(batch) = dataset.next_batch()? {
            utt_ids.extend(batch.utt_ids);
        }
        Ok(utt_ids)
    };

    let first = collect(make(7)?)?;
    let second = collect(make(7)?)?;
    let other = collect(make(8)?)?;
    assert_eq!(first, second);
    assert_ne!(first, other);

    let mut sorted = first.clone();
    sorted.sort();
    assert_eq!(sorted, (0..8).map(|i| format!("u{i}")).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn sort_stop_epoch_reverts_to_shuffled_order() -> asr_datasets::Result<()> {
    let mut manifest = String::from(HEADER);
    for i in 0..12 {
        manifest.push_str(&row(&format!("u{i:02}"), "spk1", 100 + 10 * i, "4 5"));
    }
    let manifest = fixture("sortstop.tsv", &manifest);
    let config = DatasetConfig::new(manifest, dict("sortstop.dict"), Unit::Char)
        .batch_size(12)
        .sort_by_input_length(true)
        .sort_stop_epoch(Some(1))
        .seed(11)
        .max_epoch(Some(2));
    let mut dataset = AsrDataset::new(config, StubReader)?;

    let sorted_epoch = dataset.next_batch()?.unwrap();
    let expected: Vec<u64> = (0..12).map(|i| 100 + 10 * i).collect();
    assert_eq!(sorted_epoch.xlens, expected);

    let shuffled_epoch = dataset.next_batch()?.unwrap();
    assert_ne!(shuffled_epoch.xlens, expected);
    let mut xlens = shuffled_epoch.xlens.clone();
    xlens.sort();
    assert_eq!(xlens, expected);

    assert!(dataset.next_batch()?.is_none());
    assert_eq!(dataset.epoch(), 2);
    Ok(())
}

#[test]
fn test_mode_is_a_single_pass_in_manifest_order() -> asr_datasets::Result<()> {
    let mut manifest = String::from(HEADER);
    // would fail the train-mode frame bounds, but test mode keeps them
    for (utt, xlen) in [("u1", 5000), ("u2", 10), ("u3", 700)] {
        manifest.push_str(&row(utt, "spk1", xlen, "4 5"));
    }
    let manifest = fixture("testmode.tsv", &manifest);
    let config = DatasetConfig::new(manifest, dict("testmode.dict"), Unit::Char)
        .batch_size(2)
        .is_test(true);
    let mut dataset = AsrDataset::new(config, StubReader)?;

    let batch = dataset.next_batch()?.unwrap();
    assert_eq!(batch.utt_ids, ["u1", "u2"]);
    let batch = dataset.next_batch()?.unwrap();
    assert_eq!(batch.utt_ids, ["u3"]);
    assert!(dataset.next_batch()?.is_none());
    Ok(())
}

#[test]
fn dynamic_batching_bounds_total_frames() -> asr_datasets::Result<()> {
    let mut manifest = String::from(HEADER);
    for (utt, xlen) in [
        ("u1", 100),
        ("u2", 200),
        ("u3", 900),
        ("u4", 1000),
        ("u5", 1700),
        ("u6", 1800),
    ] {
        manifest.push_str(&row(utt, "spk1", xlen, "4 5"));
    }
    let manifest = fixture("dynamic.tsv", &manifest);
    let config = DatasetConfig::new(manifest, dict("dynamic.dict"), Unit::Char)
        .batch_size(4)
        .sort_by_input_length(true)
        .dynamic_batching(true)
        .max_epoch(Some(1));
    let mut dataset = AsrDataset::new(config, StubReader)?;

    let mut sizes = Vec::new();
    while let Some(batch) = dataset.next_batch()? {
        sizes.push(batch.len());
    }
    // draws led by a >1600-frame utterance shrink to a quarter
    assert_eq!(sizes, [4, 1, 1]);
    Ok(())
}

#[test]
fn sub_task_labels_are_parallel() -> asr_datasets::Result<()> {
    let mut primary = String::from(HEADER);
    let mut sub = String::from(HEADER);
    for (utt, xlen) in [("u1", 100), ("u2", 200)] {
        primary.push_str(&row(utt, "spk1", xlen, "4 5"));
        sub.push_str(&row(utt, "spk1", xlen, "6 7 8"));
    }
    let primary = fixture("multitask.tsv", &primary);
    let sub = fixture("multitask.sub1.tsv", &sub);
    let sub_dict = dict("multitask.sub1.dict");
    let config = DatasetConfig::new(primary, dict("multitask.dict"), Unit::Word)
        .batch_size(2)
        .max_epoch(Some(1))
        .sub_task(0, SubTaskConfig::new(sub, sub_dict, Unit::Char));
    let mut dataset = AsrDataset::new(config, StubReader)?;
    assert_eq!(dataset.vocab_sub(0), Some(7));
    assert_eq!(dataset.vocab_sub(1), None);

    let batch = dataset.next_batch()?.unwrap();
    assert_eq!(batch.ys, [[4, 5], [4, 5]]);
    assert_eq!(batch.ys_sub1, [[6, 7, 8], [6, 7, 8]]);
    assert!(batch.ys_sub2.is_empty());
    assert!(batch.ys_sub3.is_empty());
    Ok(())
}

#[test]
fn misaligned_sub_manifest_is_rejected() {
    let mut primary = String::from(HEADER);
    primary.push_str(&row("u1", "spk1", 100, "4 5"));
    let mut sub = String::from(HEADER);
    sub.push_str(&row("other", "spk1", 100, "6"));
    let primary = fixture("misaligned.tsv", &primary);
    let sub = fixture("misaligned.sub1.tsv", &sub);
    let config = DatasetConfig::new(primary, dict("misaligned.dict"), Unit::Word)
        .batch_size(1)
        .sub_task(0, SubTaskConfig::new(sub, dict("misaligned.sub1.dict"), Unit::Char));
    match AsrDataset::new(config, StubReader).err() {
        Some(Error::MisalignedSubManifest { task: 1, row: 0, .. }) => {}
        other => panic!("expected misalignment error, got {other:?}"),
    }
}

#[test]
fn fully_filtered_dataset_is_an_error() {
    let mut manifest = String::from(HEADER);
    manifest.push_str(&row("u1", "spk1", 100, ""));
    let manifest = fixture("allempty.tsv", &manifest);
    let config = DatasetConfig::new(manifest, dict("allempty.dict"), Unit::Char).batch_size(1);
    match AsrDataset::new(config, StubReader).err() {
        Some(Error::EmptyDataset) => {}
        other => panic!("expected empty-dataset error, got {other:?}"),
    }
}

#[test]
fn unreadable_features_fail_construction() {
    let mut manifest = String::from(HEADER);
    manifest.push_str(&row("u1", "spk1", 100, "4 5"));
    let manifest = fixture("unreadable.tsv", &manifest);
    let config = DatasetConfig::new(manifest, dict("unreadable.dict"), Unit::Char).batch_size(1);
    match AsrDataset::new(config, FailingReader).err() {
        Some(Error::FeatureRead { .. }) => {}
        other => panic!("expected feature-read error, got {other:?}"),
    }
}

#[test]
fn iterator_adapter_yields_batches() -> asr_datasets::Result<()> {
    let mut manifest = String::from(HEADER);
    for (utt, xlen) in [("u1", 100), ("u2", 200), ("u3", 300)] {
        manifest.push_str(&row(utt, "spk1", xlen, "4 5"));
    }
    let manifest = fixture("iterator.tsv", &manifest);
    let config = DatasetConfig::new(manifest, dict("iterator.dict"), Unit::Char)
        .batch_size(2)
        .max_epoch(Some(1));
    let dataset = AsrDataset::new(config, StubReader)?;
    let batches = dataset.collect::<asr_datasets::Result<Vec<_>>>()?;
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].len() + batches[1].len(), 3);
    Ok(())
}
