//! Content-addressed, chunked context objects (`index.json` + `source.txt`).
//!
//! A context object is built once from raw text, a file, or an existing
//! context directory, then served read-only. Reads go straight to the source
//! file by byte offset so the full text is never held in memory.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::core::chunking::{
    ChunkingConfig, chunk_id, count_matches, fold_ascii, plan_chunk_ranges,
};
use crate::core::pointer::ContextPointer;
use crate::io::atomic::write_json_atomic;
use crate::io::clock::Clock;

pub const CONTEXT_INDEX_VERSION: u32 = 1;
pub const INDEX_FILE: &str = "index.json";
pub const SOURCE_FILE: &str = "source.txt";

/// Caller-contract violations against a context object.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("context pointer invalid: {0}")]
    PointerInvalid(String),
    #[error("context object mismatch: expected {expected}, got {actual}")]
    ObjectMismatch { expected: String, actual: String },
    #[error("context chunk missing: {0}")]
    ChunkMissing(String),
    #[error("context chunking invalid: {0}")]
    InvalidChunking(String),
    #[error("context source invalid: {0}")]
    InvalidSource(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextChunk {
    pub id: String,
    pub start: u64,
    pub end: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub path: String,
    pub byte_length: u64,
}

/// Persisted `index.json`. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextIndex {
    pub version: u32,
    pub object_id: String,
    pub created_at: String,
    pub source: SourceInfo,
    pub chunking: ChunkingConfig,
    pub chunks: Vec<ContextChunk>,
}

impl ContextIndex {
    fn validate(&self) -> Result<(), ContextError> {
        if self.version != CONTEXT_INDEX_VERSION {
            return Err(ContextError::InvalidSource(format!(
                "index version {} unsupported",
                self.version
            )));
        }
        if self.object_id.trim().is_empty() {
            return Err(ContextError::InvalidSource("index object_id missing".into()));
        }
        if self.created_at.trim().is_empty() {
            return Err(ContextError::InvalidSource("index created_at missing".into()));
        }
        if self.chunking.target_bytes == 0 {
            return Err(ContextError::InvalidChunking(
                "target_bytes must be > 0".into(),
            ));
        }
        for chunk in &self.chunks {
            if chunk.start > chunk.end || chunk.end > self.source.byte_length {
                return Err(ContextError::InvalidSource(format!(
                    "chunk {} out of bounds",
                    chunk.id
                )));
            }
        }
        Ok(())
    }
}

/// Where a context object comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextSource {
    Text(String),
    File(PathBuf),
    /// An existing context directory containing `index.json` + `source.txt`.
    Dir(PathBuf),
}

/// A built context object on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextObject {
    pub dir: PathBuf,
    pub index_path: PathBuf,
    pub source_path: PathBuf,
    pub index: ContextIndex,
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Build (or import) a context object into `target_dir`.
#[instrument(skip_all, fields(target = %target_dir.display()))]
pub fn build_context(
    source: &ContextSource,
    target_dir: &Path,
    chunking: &ChunkingConfig,
    clock: &dyn Clock,
) -> Result<ContextObject> {
    fs::create_dir_all(target_dir)
        .with_context(|| format!("create directory {}", target_dir.display()))?;
    let index_path = target_dir.join(INDEX_FILE);
    let source_path = target_dir.join(SOURCE_FILE);

    let bytes = match source {
        ContextSource::Dir(dir) => return import_context_dir(dir, target_dir),
        ContextSource::Text(text) => text.as_bytes().to_vec(),
        ContextSource::File(path) => {
            fs::read(path).with_context(|| format!("read {}", path.display()))?
        }
    };

    if chunking.target_bytes == 0 {
        return Err(ContextError::InvalidChunking("target_bytes must be > 0".into()).into());
    }
    let ranges = plan_chunk_ranges(bytes.len() as u64, chunking)?;
    let chunks = ranges
        .into_iter()
        .enumerate()
        .map(|(idx, range)| ContextChunk {
            id: chunk_id(idx + 1),
            sha256: sha256_hex(&bytes[range.start as usize..range.end as usize]),
            start: range.start,
            end: range.end,
        })
        .collect::<Vec<_>>();

    fs::write(&source_path, &bytes)
        .with_context(|| format!("write {}", source_path.display()))?;
    let index = ContextIndex {
        version: CONTEXT_INDEX_VERSION,
        object_id: format!("sha256:{}", sha256_hex(&bytes)),
        created_at: clock.now_rfc3339(),
        source: SourceInfo {
            path: SOURCE_FILE.to_string(),
            byte_length: bytes.len() as u64,
        },
        chunking: *chunking,
        chunks,
    };
    write_json_atomic(&index_path, &index)?;
    debug!(
        object_id = %index.object_id,
        bytes = index.source.byte_length,
        chunks = index.chunks.len(),
        "context object built"
    );
    Ok(ContextObject {
        dir: target_dir.to_path_buf(),
        index_path,
        source_path,
        index,
    })
}

fn import_context_dir(source_dir: &Path, target_dir: &Path) -> Result<ContextObject> {
    let existing_index = source_dir.join(INDEX_FILE);
    let existing_source = source_dir.join(SOURCE_FILE);
    if !existing_index.is_file() || !existing_source.is_file() {
        return Err(ContextError::InvalidSource(format!(
            "{} must contain {INDEX_FILE} and {SOURCE_FILE}",
            source_dir.display()
        ))
        .into());
    }
    let index = load_index(&existing_index)?;

    let index_path = target_dir.join(INDEX_FILE);
    let source_path = target_dir.join(SOURCE_FILE);
    if !same_dir(source_dir, target_dir) {
        fs::copy(&existing_index, &index_path)
            .with_context(|| format!("copy {}", existing_index.display()))?;
        fs::copy(&existing_source, &source_path)
            .with_context(|| format!("copy {}", existing_source.display()))?;
    }
    debug!(object_id = %index.object_id, "context object imported");
    Ok(ContextObject {
        dir: target_dir.to_path_buf(),
        index_path,
        source_path,
        index,
    })
}

fn same_dir(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Load and validate an `index.json`.
pub fn load_index(path: &Path) -> Result<ContextIndex> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let index: ContextIndex =
        serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))?;
    index.validate()?;
    Ok(index)
}

/// Open an already-built context directory.
pub fn open_context(dir: &Path) -> Result<ContextObject> {
    let index_path = dir.join(INDEX_FILE);
    let source_path = dir.join(SOURCE_FILE);
    let index = load_index(&index_path)?;
    if !source_path.is_file() {
        return Err(ContextError::InvalidSource(format!(
            "missing {}",
            source_path.display()
        ))
        .into());
    }
    Ok(ContextObject {
        dir: dir.to_path_buf(),
        index_path,
        source_path,
        index,
    })
}

/// Bytes read from the source, decoded lossily.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadSpan {
    pub text: String,
    pub start_byte: u64,
    pub end_byte: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub pointer: String,
    /// First match offset within the chunk.
    pub offset: u64,
    pub start_byte: u64,
    pub match_bytes: u64,
    /// Non-overlapping match count in the chunk.
    pub score: u64,
    pub preview: String,
}

/// Read-only view over a context object.
#[derive(Debug)]
pub struct ContextStore {
    object: ContextObject,
    chunk_positions: HashMap<String, usize>,
}

impl ContextStore {
    pub fn new(object: ContextObject) -> Self {
        let chunk_positions = object
            .index
            .chunks
            .iter()
            .enumerate()
            .map(|(pos, chunk)| (chunk.id.clone(), pos))
            .collect();
        Self {
            object,
            chunk_positions,
        }
    }

    pub fn open(dir: &Path) -> Result<Self> {
        Ok(Self::new(open_context(dir)?))
    }

    pub fn object(&self) -> &ContextObject {
        &self.object
    }

    pub fn object_id(&self) -> &str {
        &self.object.index.object_id
    }

    pub fn chunk_count(&self) -> usize {
        self.object.index.chunks.len()
    }

    pub fn source_byte_length(&self) -> u64 {
        self.object.index.source.byte_length
    }

    pub fn pointer_for(&self, chunk: &ContextChunk) -> ContextPointer {
        ContextPointer::new(self.object_id(), chunk.id.clone())
    }

    fn resolve(&self, raw: &str) -> Result<&ContextChunk, ContextError> {
        let pointer =
            ContextPointer::parse(raw).ok_or_else(|| ContextError::PointerInvalid(raw.into()))?;
        if pointer.object_id != self.object_id() {
            return Err(ContextError::ObjectMismatch {
                expected: self.object_id().to_string(),
                actual: pointer.object_id,
            });
        }
        self.chunk_positions
            .get(&pointer.chunk_id)
            .map(|pos| &self.object.index.chunks[*pos])
            .ok_or(ContextError::ChunkMissing(pointer.chunk_id))
    }

    /// Non-failing pointer check used during plan validation.
    pub fn validate_pointer(&self, raw: &str) -> Option<ContextPointer> {
        self.resolve(raw)
            .ok()
            .map(|chunk| self.pointer_for(chunk))
    }

    /// Read up to `bytes` from a chunk, starting `offset` bytes into it.
    ///
    /// Never crosses the chunk end; an offset past the end yields empty text.
    pub fn read(&self, pointer: &str, offset: u64, bytes: u64) -> Result<ReadSpan> {
        let chunk = self.resolve(pointer)?;
        let chunk_len = chunk.end - chunk.start;
        let max_bytes = bytes.min(chunk_len);
        let absolute_start = chunk.end.min(chunk.start.saturating_add(offset));
        let length = max_bytes.min(chunk.end - absolute_start);
        self.read_bytes(absolute_start, length)
    }

    /// Read `[start_byte, start_byte + bytes)` clamped to the source length.
    pub fn read_span(&self, start_byte: u64, bytes: u64) -> Result<ReadSpan> {
        let remaining = self.source_byte_length().saturating_sub(start_byte);
        self.read_bytes(start_byte, bytes.min(remaining))
    }

    fn read_raw(&self, start: u64, length: u64) -> Result<Vec<u8>> {
        if length == 0 {
            return Ok(Vec::new());
        }
        let path = &self.object.source_path;
        let mut file = File::open(path).with_context(|| format!("open {}", path.display()))?;
        file.seek(SeekFrom::Start(start))
            .with_context(|| format!("seek {}", path.display()))?;
        let mut buf = Vec::with_capacity(length as usize);
        file.take(length)
            .read_to_end(&mut buf)
            .with_context(|| format!("read {}", path.display()))?;
        Ok(buf)
    }

    fn read_bytes(&self, start: u64, length: u64) -> Result<ReadSpan> {
        let buf = self.read_raw(start, length)?;
        Ok(ReadSpan {
            start_byte: start,
            end_byte: start + buf.len() as u64,
            text: String::from_utf8_lossy(&buf).into_owned(),
        })
    }

    /// Case-insensitive (ASCII) substring search ranked by match count.
    ///
    /// Ties break on earliest absolute byte, then chunk id.
    #[instrument(skip_all, fields(top_k = top_k))]
    pub fn search(
        &self,
        query: &str,
        top_k: usize,
        preview_bytes: usize,
    ) -> Result<Vec<SearchHit>> {
        let trimmed = query.trim();
        if trimmed.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        let needle = fold_ascii(trimmed.as_bytes());
        let mut ranked = Vec::new();
        for chunk in &self.object.index.chunks {
            let slice = self.read_raw(chunk.start, chunk.end - chunk.start)?;
            let Some(found) = count_matches(&fold_ascii(&slice), &needle) else {
                continue;
            };
            let preview_end = slice.len().min(found.first_offset + preview_bytes);
            let start_byte = chunk.start + found.first_offset as u64;
            ranked.push((
                chunk.id.as_str(),
                SearchHit {
                    pointer: self.pointer_for(chunk).to_string(),
                    offset: found.first_offset as u64,
                    start_byte,
                    match_bytes: trimmed.len() as u64,
                    score: found.count,
                    preview: String::from_utf8_lossy(&slice[found.first_offset..preview_end])
                        .into_owned(),
                },
            ));
        }
        ranked.sort_by(|(a_id, a), (b_id, b)| {
            b.score
                .cmp(&a.score)
                .then(a.start_byte.cmp(&b.start_byte))
                .then(a_id.cmp(b_id))
        });
        debug!(query = trimmed, hits = ranked.len(), "context search");
        Ok(ranked
            .into_iter()
            .take(top_k)
            .map(|(_, hit)| hit)
            .collect())
    }
}
