//! Dictionary resources: vocabulary size and id/token conversion for
//! decoding display. Batch assembly never consults these beyond the size.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use crate::Result;

/// Ids below the first dictionary entry: blank 0, unk 1, eos 2, pad 3.
const N_RESERVED: usize = 4;

/// A token dictionary, one entry per non-empty line (`<token> [<id>]`).
#[derive(Debug, Clone)]
pub struct Vocabulary {
    tokens: Vec<String>,
    ids: HashMap<String, u32>,
}

impl Vocabulary {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut tokens = Vec::new();
        let mut ids = HashMap::new();
        for line in BufReader::new(reader).lines() {
            let line = line?;
            let Some(token) = line.split_whitespace().next() else {
                continue;
            };
            ids.insert(token.to_string(), (N_RESERVED + tokens.len()) as u32);
            tokens.push(token.to_string());
        }
        Ok(Self { tokens, ids })
    }

    /// Vocabulary size including the reserved ids.
    pub fn size(&self) -> usize {
        self.tokens.len() + N_RESERVED
    }

    /// Token for an id, for display.
    pub fn token(&self, id: u32) -> Option<&str> {
        match id {
            0 => Some("<blank>"),
            1 => Some("<unk>"),
            2 => Some("<eos>"),
            3 => Some("<pad>"),
            _ => self.tokens.get(id as usize - N_RESERVED).map(String::as_str),
        }
    }

    pub fn id(&self, token: &str) -> Option<u32> {
        self.ids.get(token).copied()
    }
}
