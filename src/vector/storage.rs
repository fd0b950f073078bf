//! On-disk snapshots of built indexes.
//!
//! Each `(library, kind)` pair owns two files under the storage directory:
//!
//! - `{library_id}_{kind}.idx`: binary snapshot
//! - `{library_id}_{kind}_metadata.json`: human-readable companion record
//!
//! # Snapshot Format
//!
//! - Header (40 bytes): magic `LIDX`, format version (u32 LE), SHA-256 of
//!   the payload
//! - Payload: bincode encoding of the chunk records, the vector matrix and,
//!   for IVF, the centroids and labels
//!
//! Both files are written to a temporary file in the same directory and
//! renamed into place, so a crash mid-save never leaves a half-written file
//! under the final name. A snapshot that fails any header or checksum check
//! is treated as absent.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

use crate::types::{Chunk, ChunkId, DocumentId, IndexKind, LibraryId, Metadata};
use crate::vector::flat::FlatIndex;
use crate::vector::index::VectorIndex;
use crate::vector::ivf::{IvfConfig, IvfIndex};
use crate::vector::similarity::VectorMatrix;
use crate::vector::types::{ClusterId, VectorError};

/// Current snapshot format version.
pub const FORMAT_VERSION: u32 = 1;

/// Magic bytes to identify index snapshot files.
const MAGIC_BYTES: &[u8; 4] = b"LIDX";

const CHECKSUM_SIZE: usize = 32;

/// Size of the snapshot header in bytes.
const HEADER_SIZE: usize = 8 + CHECKSUM_SIZE;

const SNAPSHOT_EXTENSION: &str = "idx";
const METADATA_SUFFIX: &str = "_metadata.json";

/// Errors specific to index persistence.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid snapshot format: {0}")]
    InvalidFormat(String),

    #[error(
        "Snapshot version mismatch: expected {expected}, found {actual}\nSuggestion: The index will be rebuilt on next search"
    )]
    VersionMismatch { expected: u32, actual: u32 },

    #[error("Snapshot checksum mismatch\nSuggestion: The file is corrupt and will be rebuilt on next search")]
    ChecksumMismatch,

    #[error("Failed to encode snapshot: {0}")]
    Encode(String),

    #[error("Failed to decode snapshot: {0}")]
    Decode(String),

    #[error("Metadata serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Vector error: {0}")]
    Vector(#[from] VectorError),
}

/// Companion record written next to every snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub library_id: LibraryId,
    pub index_type: IndexKind,
    pub num_vectors: usize,
    pub vector_dimension: Option<usize>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// SHA-256 over the sorted chunk ids the snapshot covers.
    pub fingerprint: String,
    pub version: u32,
}

/// A snapshot read back from disk.
#[derive(Debug, Clone)]
pub struct PersistedIndex {
    pub index: VectorIndex,
    /// `None` when the companion record is missing or unreadable.
    pub metadata: Option<IndexMetadata>,
}

/// Chunk row as stored inside a snapshot.
///
/// Metadata is kept as a JSON string because the binary codec cannot
/// decode self-describing values.
#[derive(Debug, Serialize, Deserialize)]
struct ChunkRecord {
    id: ChunkId,
    document_id: DocumentId,
    library_id: LibraryId,
    content: String,
    embedding: Vec<u8>,
    metadata_json: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ChunkRecord {
    fn from_chunk(chunk: &Chunk) -> Result<Self, PersistenceError> {
        Ok(Self {
            id: chunk.id,
            document_id: chunk.document_id,
            library_id: chunk.library_id,
            content: chunk.content.clone(),
            embedding: chunk.embedding.clone(),
            metadata_json: serde_json::to_string(&chunk.metadata)?,
            created_at: chunk.created_at,
            updated_at: chunk.updated_at,
        })
    }

    fn into_chunk(self) -> Result<Chunk, PersistenceError> {
        let metadata: Metadata = serde_json::from_str(&self.metadata_json)?;
        Ok(Chunk {
            id: self.id,
            document_id: self.document_id,
            library_id: self.library_id,
            content: self.content,
            embedding: self.embedding,
            metadata,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct IvfState {
    config: IvfConfig,
    centroids: Vec<Vec<f32>>,
    labels: Vec<ClusterId>,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexPayload {
    kind: IndexKind,
    chunks: Vec<ChunkRecord>,
    vectors: Option<VectorMatrix>,
    ivf: Option<IvfState>,
}

impl IndexPayload {
    fn capture(index: &VectorIndex) -> Result<Self, PersistenceError> {
        let chunks = index
            .chunks()
            .iter()
            .map(ChunkRecord::from_chunk)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(match index {
            VectorIndex::Flat(flat) => Self {
                kind: IndexKind::Flat,
                chunks,
                vectors: flat.matrix().cloned(),
                ivf: None,
            },
            VectorIndex::Ivf(ivf) => Self {
                kind: IndexKind::Ivf,
                chunks,
                vectors: ivf.vectors().cloned(),
                ivf: Some(IvfState {
                    config: *ivf.config(),
                    centroids: ivf.centroids().to_vec(),
                    labels: ivf.labels().to_vec(),
                }),
            },
        })
    }

    fn restore(self) -> Result<VectorIndex, PersistenceError> {
        let chunks = self
            .chunks
            .into_iter()
            .map(ChunkRecord::into_chunk)
            .collect::<Result<Vec<_>, _>>()?;

        let index = match (self.kind, self.ivf) {
            (IndexKind::Flat, _) => VectorIndex::Flat(FlatIndex::from_parts(chunks, self.vectors)?),
            (IndexKind::Ivf, Some(state)) => VectorIndex::Ivf(IvfIndex::from_parts(
                state.config,
                chunks,
                self.vectors,
                state.centroids,
                state.labels,
            )?),
            (IndexKind::Ivf, None) => {
                return Err(PersistenceError::InvalidFormat(
                    "IVF snapshot without partition state".to_string(),
                ));
            }
        };
        Ok(index)
    }
}

/// Reads and writes index snapshots under a single directory.
#[derive(Debug, Clone)]
pub struct IndexStore {
    base_path: PathBuf,
}

impl IndexStore {
    #[must_use]
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    #[must_use]
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn snapshot_path(&self, library_id: LibraryId, kind: IndexKind) -> PathBuf {
        self.base_path
            .join(format!("{library_id}_{kind}.{SNAPSHOT_EXTENSION}"))
    }

    fn metadata_path(&self, library_id: LibraryId, kind: IndexKind) -> PathBuf {
        self.base_path
            .join(format!("{library_id}_{kind}{METADATA_SUFFIX}"))
    }

    /// Writes a snapshot of `index` and its companion record.
    ///
    /// The `created_at` of an existing record for the same key is kept.
    pub fn save(
        &self,
        library_id: LibraryId,
        index: &VectorIndex,
    ) -> Result<IndexMetadata, PersistenceError> {
        let kind = index.kind();
        let payload = bincode::serde::encode_to_vec(
            IndexPayload::capture(index)?,
            bincode::config::standard(),
        )
        .map_err(|e| PersistenceError::Encode(e.to_string()))?;

        let checksum = Sha256::digest(&payload);
        let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len());
        bytes.extend_from_slice(MAGIC_BYTES);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&checksum);
        bytes.extend_from_slice(&payload);

        fs::create_dir_all(&self.base_path)?;
        self.write_atomic(&self.snapshot_path(library_id, kind), &bytes)?;

        let now = Utc::now();
        let created_at = self
            .load_metadata(library_id, kind)
            .map_or(now, |previous| previous.created_at);
        let metadata = IndexMetadata {
            library_id,
            index_type: kind,
            num_vectors: index.len(),
            vector_dimension: index.dimension().map(|d| d.get()),
            created_at,
            updated_at: now,
            fingerprint: fingerprint(index.chunks()),
            version: FORMAT_VERSION,
        };
        let json = serde_json::to_vec_pretty(&metadata)?;
        self.write_atomic(&self.metadata_path(library_id, kind), &json)?;

        debug!(
            "Saved {kind} index for library {library_id}: {} vectors, {} bytes",
            metadata.num_vectors,
            bytes.len()
        );
        Ok(metadata)
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), PersistenceError> {
        let mut temp = NamedTempFile::new_in(&self.base_path)?;
        temp.write_all(bytes)?;
        temp.as_file().sync_all()?;
        temp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Reads the snapshot for `(library_id, kind)`.
    ///
    /// Returns `Ok(None)` when no snapshot exists, and also when the file is
    /// corrupt; corruption is logged and the caller is expected to rebuild.
    pub fn load(
        &self,
        library_id: LibraryId,
        kind: IndexKind,
    ) -> Result<Option<PersistedIndex>, PersistenceError> {
        let path = self.snapshot_path(library_id, kind);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match Self::read_snapshot(&file) {
            Ok(index) if index.kind() == kind => {
                debug!(
                    "Loaded {kind} index for library {library_id}: {} vectors",
                    index.len()
                );
                Ok(Some(PersistedIndex {
                    index,
                    metadata: self.load_metadata(library_id, kind),
                }))
            }
            Ok(index) => {
                warn!(
                    "Snapshot {} holds a {} index, expected {kind}; ignoring it",
                    path.display(),
                    index.kind()
                );
                Ok(None)
            }
            Err(PersistenceError::Io(e)) => Err(PersistenceError::Io(e)),
            Err(e) => {
                warn!("Ignoring corrupt snapshot {}: {e}", path.display());
                Ok(None)
            }
        }
    }

    fn read_snapshot(file: &File) -> Result<VectorIndex, PersistenceError> {
        if (file.metadata()?.len() as usize) < HEADER_SIZE {
            return Err(PersistenceError::InvalidFormat(
                "File too small to contain header".to_string(),
            ));
        }
        let mmap = unsafe { Mmap::map(file)? };

        if &mmap[0..4] != MAGIC_BYTES {
            return Err(PersistenceError::InvalidFormat(
                "Invalid magic bytes".to_string(),
            ));
        }
        let version = u32::from_le_bytes([mmap[4], mmap[5], mmap[6], mmap[7]]);
        if version != FORMAT_VERSION {
            return Err(PersistenceError::VersionMismatch {
                expected: FORMAT_VERSION,
                actual: version,
            });
        }

        let payload = &mmap[HEADER_SIZE..];
        if Sha256::digest(payload).as_slice() != &mmap[8..HEADER_SIZE] {
            return Err(PersistenceError::ChecksumMismatch);
        }

        let (decoded, _): (IndexPayload, usize) =
            bincode::serde::decode_from_slice(payload, bincode::config::standard())
                .map_err(|e| PersistenceError::Decode(e.to_string()))?;
        decoded.restore()
    }

    /// Reads only the companion record. Missing or unreadable records yield `None`.
    #[must_use]
    pub fn load_metadata(&self, library_id: LibraryId, kind: IndexKind) -> Option<IndexMetadata> {
        read_metadata(&self.metadata_path(library_id, kind))
    }

    /// Whether a stored snapshot covers exactly `chunks`, judged from its
    /// companion record alone.
    #[must_use]
    pub fn is_fresh(metadata: &IndexMetadata, chunks: &[Chunk]) -> bool {
        metadata.version == FORMAT_VERSION && metadata.fingerprint == fingerprint(chunks)
    }

    /// Whether a loaded index covers exactly the ids of `current_chunks`.
    ///
    /// Order is irrelevant; any added or removed chunk invalidates it.
    #[must_use]
    pub fn is_valid(loaded: &VectorIndex, current_chunks: &[Chunk]) -> bool {
        loaded.covers_exactly(current_chunks)
    }

    /// Removes both files for the key. Returns whether anything was removed.
    pub fn delete(&self, library_id: LibraryId, kind: IndexKind) -> Result<bool, PersistenceError> {
        let mut removed = false;
        for path in [
            self.snapshot_path(library_id, kind),
            self.metadata_path(library_id, kind),
        ] {
            match fs::remove_file(&path) {
                Ok(()) => removed = true,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        if removed {
            debug!("Deleted {kind} index for library {library_id}");
        }
        Ok(removed)
    }

    /// Removes every stored index of the library. Returns the kinds removed.
    pub fn delete_library(&self, library_id: LibraryId) -> Result<Vec<IndexKind>, PersistenceError> {
        let mut removed = Vec::new();
        for kind in IndexKind::ALL {
            if self.delete(library_id, kind)? {
                removed.push(kind);
            }
        }
        Ok(removed)
    }

    /// Lists every readable companion record, ordered by library then kind.
    pub fn list(&self) -> Result<Vec<IndexMetadata>, PersistenceError> {
        let entries = match fs::read_dir(&self.base_path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let is_metadata = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(METADATA_SUFFIX));
            if !is_metadata {
                continue;
            }
            match read_metadata(&path) {
                Some(record) => records.push(record),
                None => warn!("Skipping unreadable index metadata {}", path.display()),
            }
        }
        records.sort_by(|a, b| {
            (a.library_id.as_uuid(), a.index_type.as_str())
                .cmp(&(b.library_id.as_uuid(), b.index_type.as_str()))
        });
        Ok(records)
    }

    /// Checks that the storage directory exists (creating it if needed) and
    /// is writable.
    pub fn check_health(&self) -> Result<(), PersistenceError> {
        fs::create_dir_all(&self.base_path)?;
        let probe = NamedTempFile::new_in(&self.base_path)?;
        probe.close()?;
        Ok(())
    }
}

fn read_metadata(path: &Path) -> Option<IndexMetadata> {
    let content = fs::read(path).ok()?;
    serde_json::from_slice(&content).ok()
}

/// Hex SHA-256 over the sorted chunk ids.
#[must_use]
pub fn fingerprint(chunks: &[Chunk]) -> String {
    let ids: HashSet<ChunkId> = chunks.iter().map(|c| c.id).collect();
    let mut ids: Vec<ChunkId> = ids.into_iter().collect();
    ids.sort_by(|a, b| a.as_uuid().cmp(b.as_uuid()));

    let mut hasher = Sha256::new();
    for id in &ids {
        hasher.update(id.as_bytes());
    }
    let result = hasher.finalize();
    format!("{result:x}")
}
