//! Memory-mapped storage for the packed vector segment.
//!
//! Vectors live in a single packed file with a fixed header, mapped read-only
//! at query time. The positional layout means `VectorId` doubles as the
//! offset key: vector `i` starts at `HEADER_SIZE + i * dimension * 4`.
//!
//! # File Format
//! ```text
//! [Header: 16 bytes]
//! - Magic: "QSEG" (4 bytes)
//! - Version: u32 (4 bytes)
//! - Dimension: u32 (4 bytes)
//! - Vector count: u32 (4 bytes)
//!
//! [Vector data]
//! - count * dimension * f32 (little-endian), in VectorId order
//! ```

use memmap2::Mmap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::index::types::{IndexError, IndexResult, VectorDimension, VectorId};

/// Magic bytes identifying a vector segment file.
const MAGIC: &[u8; 4] = b"QSEG";

/// Current file format version.
const VERSION: u32 = 1;

/// Size of the file header in bytes.
const HEADER_SIZE: usize = 16;

/// Read-only memory-mapped vector segment.
#[derive(Debug)]
pub struct VectorSegment {
    mmap: Mmap,
    dimension: VectorDimension,
    count: usize,
}

impl VectorSegment {
    /// Writes a segment file containing the given vectors in order.
    ///
    /// Every vector must match `dimension`; the caller validates this before
    /// handing vectors over, so a mismatch here is an internal error.
    pub fn write(path: &Path, dimension: VectorDimension, vectors: &[Vec<f32>]) -> IndexResult<()> {
        for vector in vectors {
            dimension.validate_vector(vector)?;
        }

        let mut buffer =
            Vec::with_capacity(HEADER_SIZE + vectors.len() * dimension.get() * size_of::<f32>());
        buffer.extend_from_slice(MAGIC);
        buffer.extend_from_slice(&VERSION.to_le_bytes());
        buffer.extend_from_slice(&(dimension.get() as u32).to_le_bytes());
        buffer.extend_from_slice(&(vectors.len() as u32).to_le_bytes());

        for vector in vectors {
            for value in vector {
                buffer.extend_from_slice(&value.to_le_bytes());
            }
        }

        let mut file = File::create(path)?;
        file.write_all(&buffer)?;
        file.sync_all()?;
        Ok(())
    }

    /// Opens a segment file and validates its header.
    pub fn open(path: &Path) -> IndexResult<Self> {
        let file = File::open(path).map_err(|_| IndexError::NotBuilt {
            path: path.to_path_buf(),
        })?;

        // SAFETY: the file is opened read-only and the mapping is never
        // mutated. Concurrent rebuilds replace the file via rename, which
        // leaves this mapping pointing at the old inode.
        let mmap = unsafe { Mmap::map(&file)? };

        if mmap.len() < HEADER_SIZE {
            return Err(IndexError::InvalidFormat {
                path: path.to_path_buf(),
                reason: format!("file too small: {} bytes", mmap.len()),
            });
        }

        if &mmap[0..4] != MAGIC {
            return Err(IndexError::InvalidFormat {
                path: path.to_path_buf(),
                reason: "bad magic bytes".to_string(),
            });
        }

        let version = u32::from_le_bytes([mmap[4], mmap[5], mmap[6], mmap[7]]);
        if version != VERSION {
            return Err(IndexError::VersionMismatch {
                expected: VERSION,
                actual: version,
            });
        }

        let dim = u32::from_le_bytes([mmap[8], mmap[9], mmap[10], mmap[11]]) as usize;
        let count = u32::from_le_bytes([mmap[12], mmap[13], mmap[14], mmap[15]]) as usize;

        let dimension = VectorDimension::new(dim)?;

        let expected_len = HEADER_SIZE + count * dim * size_of::<f32>();
        if mmap.len() != expected_len {
            return Err(IndexError::InvalidFormat {
                path: path.to_path_buf(),
                reason: format!(
                    "size mismatch: expected {expected_len} bytes, found {}",
                    mmap.len()
                ),
            });
        }

        Ok(Self {
            mmap,
            dimension,
            count,
        })
    }

    /// Reads the vector stored at the given id.
    ///
    /// Returns `None` if the id is out of range.
    #[must_use]
    pub fn read_vector(&self, id: VectorId) -> Option<Vec<f32>> {
        let pos = id.position();
        if pos >= self.count {
            return None;
        }

        let dim = self.dimension.get();
        let start = HEADER_SIZE + pos * dim * size_of::<f32>();
        let end = start + dim * size_of::<f32>();

        let vector = self.mmap[start..end]
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        Some(vector)
    }

    /// Number of vectors in the segment.
    #[must_use]
    pub fn len(&self) -> usize {
        self.count
    }

    /// True when the segment holds no vectors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Dimension of every vector in the segment.
    #[must_use]
    pub fn dimension(&self) -> VectorDimension {
        self.dimension
    }
}
