//! Append-only block record persistence.
//!
//! Records round-trip byte-exact: the bytes handed to `append` are the
//! bytes `read` decodes. The store never interprets block contents beyond
//! framing them.

use crate::core::block::{Block, Header, HEADER_LEN};
use crate::types::encoding::{Decode, DecodeError, Encode};
use chaincore_derive::{BinaryCodec, Error};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Mutex;

/// Location of a block record within the store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, BinaryCodec)]
pub struct StorePosition {
    pub file_index: u32,
    pub offset: u64,
}

/// Magic prefix framing every on-disk record.
const RECORD_MAGIC: u32 = 0x4b43_4c42;

/// Data files roll over once they pass this size.
const MAX_FILE_SIZE: u64 = 128 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o failure: {0}")]
    Io(String),
    #[error("no record in file {file_index} at offset {offset}")]
    MissingRecord { file_index: u32, offset: u64 },
    #[error("stored record is malformed: {0:?}")]
    Corrupt(DecodeError),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

/// Persists serialized blocks and serves them back by position.
pub trait BlockStore: Send + Sync {
    /// Appends a block record, returning where it was written.
    fn append(&self, block: &Block) -> Result<StorePosition, StoreError>;

    /// Reads a block back. With `include_transactions` false only the
    /// 80 header bytes are decoded and the transaction list is empty.
    fn read(&self, position: StorePosition, include_transactions: bool)
        -> Result<Block, StoreError>;
}

impl<T: BlockStore + ?Sized> BlockStore for Box<T> {
    fn append(&self, block: &Block) -> Result<StorePosition, StoreError> {
        (**self).append(block)
    }

    fn read(
        &self,
        position: StorePosition,
        include_transactions: bool,
    ) -> Result<Block, StoreError> {
        (**self).read(position, include_transactions)
    }
}

fn decode_record(bytes: &[u8], include_transactions: bool) -> Result<Block, StoreError> {
    if include_transactions {
        Block::from_bytes(bytes).map_err(StoreError::Corrupt)
    } else {
        if bytes.len() < HEADER_LEN {
            return Err(StoreError::Corrupt(DecodeError::UnexpectedEof));
        }
        let header = Header::from_bytes(&bytes[..HEADER_LEN]).map_err(StoreError::Corrupt)?;
        Ok(Block::new(header, Vec::new()))
    }
}

/// In-memory store for tests and ephemeral nodes.
///
/// Offsets are record indices within a single virtual file.
#[derive(Default)]
pub struct MemoryBlockStore {
    records: Mutex<Vec<Vec<u8>>>,
}

impl MemoryBlockStore {
    pub fn new() -> MemoryBlockStore {
        MemoryBlockStore::default()
    }
}

impl BlockStore for MemoryBlockStore {
    fn append(&self, block: &Block) -> Result<StorePosition, StoreError> {
        let mut records = self.records.lock().unwrap();
        let offset = records.len() as u64;
        records.push(block.to_bytes().to_vec());
        Ok(StorePosition {
            file_index: 0,
            offset,
        })
    }

    fn read(
        &self,
        position: StorePosition,
        include_transactions: bool,
    ) -> Result<Block, StoreError> {
        let records = self.records.lock().unwrap();
        let bytes = records
            .get(position.offset as usize)
            .filter(|_| position.file_index == 0)
            .ok_or(StoreError::MissingRecord {
                file_index: position.file_index,
                offset: position.offset,
            })?;
        decode_record(bytes, include_transactions)
    }
}

struct FileStoreState {
    current_index: u32,
    current_len: u64,
    current: File,
}

/// Durable store writing numbered data files under one directory.
///
/// Record framing: 4-byte magic, 8-byte little-endian length, payload.
/// A `store.lock` file held for the store's lifetime keeps two processes
/// from appending to the same directory.
pub struct FileBlockStore {
    dir: PathBuf,
    _lock: File,
    state: Mutex<FileStoreState>,
}

impl FileBlockStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<FileBlockStore, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let lock = OpenOptions::new()
            .create(true)
            .write(true)
            .open(dir.join("store.lock"))?;
        lock.try_lock_exclusive()
            .map_err(|_| StoreError::Io("block store directory is locked".into()))?;

        // Resume appending to the highest existing data file.
        let mut current_index = 0;
        while dir.join(Self::file_name(current_index + 1)).exists() {
            current_index += 1;
        }

        let current = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(dir.join(Self::file_name(current_index)))?;
        let current_len = current.metadata()?.len();

        Ok(FileBlockStore {
            dir,
            _lock: lock,
            state: Mutex::new(FileStoreState {
                current_index,
                current_len,
                current,
            }),
        })
    }

    fn file_name(index: u32) -> String {
        format!("blk{index:05}.dat")
    }
}

impl BlockStore for FileBlockStore {
    fn append(&self, block: &Block) -> Result<StorePosition, StoreError> {
        let payload = block.to_bytes();
        let mut state = self.state.lock().unwrap();

        if state.current_len >= MAX_FILE_SIZE {
            state.current_index += 1;
            state.current = OpenOptions::new()
                .create(true)
                .read(true)
                .append(true)
                .open(self.dir.join(Self::file_name(state.current_index)))?;
            state.current_len = 0;
        }

        let position = StorePosition {
            file_index: state.current_index,
            offset: state.current_len,
        };

        let mut record = Vec::with_capacity(12 + payload.len());
        record.extend_from_slice(&RECORD_MAGIC.to_le_bytes());
        record.extend_from_slice(&(payload.len() as u64).to_le_bytes());
        record.extend_from_slice(&payload);

        state.current.write_all(&record)?;
        state.current.sync_data()?;
        state.current_len += record.len() as u64;

        Ok(position)
    }

    fn read(
        &self,
        position: StorePosition,
        include_transactions: bool,
    ) -> Result<Block, StoreError> {
        let path = self.dir.join(Self::file_name(position.file_index));
        let mut file = File::open(&path).map_err(|_| StoreError::MissingRecord {
            file_index: position.file_index,
            offset: position.offset,
        })?;
        file.seek(SeekFrom::Start(position.offset))?;

        let mut frame = [0u8; 12];
        file.read_exact(&mut frame)
            .map_err(|_| StoreError::MissingRecord {
                file_index: position.file_index,
                offset: position.offset,
            })?;

        if frame[..4] != RECORD_MAGIC.to_le_bytes() {
            return Err(StoreError::Corrupt(DecodeError::InvalidValue));
        }
        let len = u64::from_le_bytes(frame[4..].try_into().unwrap());

        let mut payload = vec![0u8; len as usize];
        file.read_exact(&mut payload)
            .map_err(|_| StoreError::Corrupt(DecodeError::UnexpectedEof))?;

        decode_record(&payload, include_transactions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_utils::utils::{pow_block, random_hash};

    #[test]
    fn memory_store_roundtrip() {
        let store = MemoryBlockStore::new();
        let block = pow_block(random_hash(), 100);

        let position = store.append(&block).unwrap();
        assert_eq!(store.read(position, true).unwrap(), block);

        let header_only = store.read(position, false).unwrap();
        assert_eq!(header_only.header, block.header);
        assert!(header_only.transactions.is_empty());
    }

    #[test]
    fn memory_store_missing_position() {
        let store = MemoryBlockStore::new();
        let position = StorePosition {
            file_index: 0,
            offset: 5,
        };
        assert!(matches!(
            store.read(position, true),
            Err(StoreError::MissingRecord { .. })
        ));
    }

    #[test]
    fn file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlockStore::open(dir.path()).unwrap();

        let a = pow_block(random_hash(), 100);
        let b = pow_block(random_hash(), 200);

        let pos_a = store.append(&a).unwrap();
        let pos_b = store.append(&b).unwrap();
        assert_ne!(pos_a, pos_b);

        assert_eq!(store.read(pos_a, true).unwrap(), a);
        assert_eq!(store.read(pos_b, true).unwrap(), b);

        let header_only = store.read(pos_b, false).unwrap();
        assert_eq!(header_only.header, b.header);
        assert!(header_only.transactions.is_empty());
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let block = pow_block(random_hash(), 100);

        let pos = {
            let store = FileBlockStore::open(dir.path()).unwrap();
            store.append(&block).unwrap()
        };

        let store = FileBlockStore::open(dir.path()).unwrap();
        assert_eq!(store.read(pos, true).unwrap(), block);

        // Appends continue after the existing record.
        let other = pow_block(random_hash(), 300);
        let pos2 = store.append(&other).unwrap();
        assert!(pos2.offset > pos.offset);
        assert_eq!(store.read(pos2, true).unwrap(), other);
    }

    #[test]
    fn second_open_of_locked_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let _store = FileBlockStore::open(dir.path()).unwrap();
        assert!(FileBlockStore::open(dir.path()).is_err());
    }
}
