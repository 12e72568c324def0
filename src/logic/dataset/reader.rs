use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::logic::collector::EncodedBatch;
use crate::logic::error::{DatasetError, ModelError};
use super::record::ExampleRecord;

pub const SPLIT_NAMES: [&str; 4] = ["train", "dev", "test", "ood"];

/// Records of one split, in file order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Split {
    pub name: String,
    pub records: Vec<ExampleRecord>,
}

impl Split {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn sentences(&self) -> Vec<String> {
        self.records.iter().map(|r| r.sentence.clone()).collect()
    }

    /// Labels, with unlabeled records mapped to `default`
    pub fn labels_or(&self, default: u32) -> Vec<u32> {
        self.records.iter().map(|r| r.label.unwrap_or(default)).collect()
    }

    /// One single-example batch per record
    pub fn batches(&self, max_length: usize) -> Result<Vec<EncodedBatch>, ModelError> {
        self.records.iter().map(|r| r.encode(max_length)).collect()
    }

    pub fn recorded_losses(&self) -> Vec<Option<f64>> {
        self.records.iter().map(|r| r.loss).collect()
    }
}

/// All four splits of a dataset directory
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatasetSplits {
    pub train: Split,
    pub dev: Split,
    pub test: Split,
    pub ood: Split,
}

impl DatasetSplits {
    pub fn iter(&self) -> impl Iterator<Item = &Split> {
        [&self.train, &self.dev, &self.test, &self.ood].into_iter()
    }

    /// Largest label in train/dev/test, if any
    pub fn max_known_label(&self) -> Option<u32> {
        [&self.train, &self.dev, &self.test]
            .into_iter()
            .flat_map(|s| s.records.iter().filter_map(|r| r.label))
            .max()
    }
}

/// Read `<dir>/<name>.jsonl`. Blank lines are skipped.
pub fn read_split(dir: &Path, name: &str) -> Result<Split, DatasetError> {
    let path = dir.join(format!("{}.jsonl", name));
    if !path.exists() {
        return Err(DatasetError::MissingSplit(path.display().to_string()));
    }

    let reader = BufReader::new(File::open(&path)?);
    let mut records = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|source| DatasetError::BadRecord {
            file: path.display().to_string(),
            line: i + 1,
            source,
        })?;
        records.push(record);
    }

    log::info!("Loaded {} records from {}", records.len(), path.display());
    Ok(Split { name: name.to_string(), records })
}

pub fn load_splits(dir: &Path) -> Result<DatasetSplits, DatasetError> {
    Ok(DatasetSplits {
        train: read_split(dir, SPLIT_NAMES[0])?,
        dev: read_split(dir, SPLIT_NAMES[1])?,
        test: read_split(dir, SPLIT_NAMES[2])?,
        ood: read_split(dir, SPLIT_NAMES[3])?,
    })
}
