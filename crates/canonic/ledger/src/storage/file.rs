use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use canonic_types::LedgerEntry;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::LedgerStorage;
use crate::error::{StorageError, StorageResult};

/// Segment magic bytes: "CNLG".
const LEDGER_MAGIC: [u8; 4] = [b'C', b'N', b'L', b'G'];
const LEDGER_VERSION: u16 = 1;
/// magic(4) + version(2) + reserved(2)
const HEADER_SIZE: u64 = 8;
/// length(4) + sequence(8)
const FRAME_PREFIX: u64 = 12;
/// Trailing crc32.
const FRAME_SUFFIX: u64 = 4;

const SEGMENT_FILE: &str = "ledger.seg";

#[derive(Clone, Copy, Debug)]
struct Slot {
    sequence: u64,
    offset: u64,
    len: u32,
}

struct Writer {
    file: File,
    end: u64,
}

/// Append-only segment file.
///
/// Layout: `[magic:4][version:2][reserved:2]` followed by frames of
/// `[length:4][sequence:8][entry_json:N][crc32:4]`. Every append is fsync'd
/// before it becomes visible. On open the file is scanned, the index rebuilt,
/// and a torn final frame truncated away.
///
/// The segment is locked exclusively for the lifetime of the storage, so only
/// one process writes a data directory at a time.
pub struct FileLedgerStorage {
    path: PathBuf,
    writer: Mutex<Writer>,
    index: RwLock<Vec<Slot>>,
}

impl FileLedgerStorage {
    /// Open or create the ledger segment inside `dir`.
    pub fn open(dir: impl AsRef<Path>) -> StorageResult<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let path = dir.join(SEGMENT_FILE);

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        // Held until the storage drops; a second writer would reuse sequences.
        fs2::FileExt::try_lock_exclusive(&file).map_err(|e| {
            StorageError::Unavailable(format!(
                "{} is locked by another process: {e}",
                path.display()
            ))
        })?;

        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        if (data.len() as u64) < HEADER_SIZE {
            if !data.is_empty() {
                warn!(path = %path.display(), "Torn ledger header, reinitializing empty segment");
            }
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            write_header(&mut file)?;
            file.sync_all()?;
            info!(path = %path.display(), "Ledger segment created");
            return Ok(Self {
                path,
                writer: Mutex::new(Writer {
                    file,
                    end: HEADER_SIZE,
                }),
                index: RwLock::new(Vec::new()),
            });
        }

        if data[..4] != LEDGER_MAGIC {
            return Err(StorageError::Corrupt(format!(
                "{} is not a ledger segment",
                path.display()
            )));
        }
        let version = u16::from_le_bytes([data[4], data[5]]);
        if version != LEDGER_VERSION {
            return Err(StorageError::Corrupt(format!(
                "unsupported ledger version {}",
                version
            )));
        }

        let (index, good_end) = scan(&data)?;
        let file_len = data.len() as u64;
        if good_end < file_len {
            warn!(
                path = %path.display(),
                discarded_bytes = file_len - good_end,
                "Truncating torn ledger tail"
            );
            file.set_len(good_end)?;
            file.sync_all()?;
        }
        file.seek(SeekFrom::Start(good_end))?;

        info!(
            path = %path.display(),
            entries = index.len(),
            last_sequence = index.last().map(|s| s.sequence).unwrap_or(0),
            "Ledger segment opened"
        );

        Ok(Self {
            path,
            writer: Mutex::new(Writer {
                file,
                end: good_end,
            }),
            index: RwLock::new(index),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn slots_from(&self, from: u64, limit: usize) -> StorageResult<Vec<Slot>> {
        let index = self
            .index
            .read()
            .map_err(|_| StorageError::Backend("ledger index lock poisoned".to_string()))?;
        let start = index.partition_point(|s| s.sequence < from);
        Ok(index[start..].iter().take(limit).copied().collect())
    }

    fn read_slot(file: &mut File, slot: Slot) -> StorageResult<LedgerEntry> {
        file.seek(SeekFrom::Start(slot.offset + FRAME_PREFIX))?;
        let mut body = vec![0u8; slot.len as usize];
        file.read_exact(&mut body)?;
        let mut crc = [0u8; 4];
        file.read_exact(&mut crc)?;
        if crc32fast::hash(&body) != u32::from_le_bytes(crc) {
            return Err(StorageError::Corrupt(format!(
                "checksum mismatch at sequence {}",
                slot.sequence
            )));
        }
        serde_json::from_slice(&body).map_err(|e| StorageError::Corrupt(e.to_string()))
    }
}

fn write_header(file: &mut File) -> std::io::Result<()> {
    let mut header = [0u8; HEADER_SIZE as usize];
    header[..4].copy_from_slice(&LEDGER_MAGIC);
    header[4..6].copy_from_slice(&LEDGER_VERSION.to_le_bytes());
    file.write_all(&header)
}

fn frame(entry: &LedgerEntry) -> StorageResult<Vec<u8>> {
    let body = serde_json::to_vec(entry).map_err(|e| StorageError::Serialization(e.to_string()))?;
    let length = u32::try_from(body.len())
        .map_err(|_| StorageError::Serialization("entry too large".into()))?;
    let crc = crc32fast::hash(&body);

    let mut out = Vec::with_capacity((FRAME_PREFIX + FRAME_SUFFIX) as usize + body.len());
    out.extend_from_slice(&length.to_le_bytes());
    out.extend_from_slice(&entry.sequence.to_le_bytes());
    out.extend_from_slice(&body);
    out.extend_from_slice(&crc.to_le_bytes());
    Ok(out)
}

/// Walk frames after the header. Returns the index and the end of the last
/// good frame.
///
/// An incomplete or unreadable final frame is a torn write and is excluded.
/// A bad frame followed by more data is corruption of committed history and
/// fails the open.
fn scan(data: &[u8]) -> StorageResult<(Vec<Slot>, u64)> {
    let total = data.len() as u64;
    let mut index: Vec<Slot> = Vec::new();
    let mut pos = HEADER_SIZE;

    while pos < total {
        if pos + FRAME_PREFIX > total {
            break;
        }
        let p = pos as usize;
        let len = u32::from_le_bytes([data[p], data[p + 1], data[p + 2], data[p + 3]]);
        let mut seq_bytes = [0u8; 8];
        seq_bytes.copy_from_slice(&data[p + 4..p + 12]);
        let sequence = u64::from_le_bytes(seq_bytes);

        let frame_end = pos + FRAME_PREFIX + len as u64 + FRAME_SUFFIX;
        if len == 0 || frame_end > total {
            break;
        }

        let body = &data[p + 12..p + 12 + len as usize];
        let crc_at = p + 12 + len as usize;
        let stored_crc = u32::from_le_bytes([
            data[crc_at],
            data[crc_at + 1],
            data[crc_at + 2],
            data[crc_at + 3],
        ]);
        let follows = index.last().map_or(true, |last| sequence > last.sequence);
        let valid = crc32fast::hash(body) == stored_crc
            && follows
            && serde_json::from_slice::<LedgerEntry>(body)
                .map(|e| e.sequence == sequence)
                .unwrap_or(false);

        if !valid {
            if frame_end == total {
                break;
            }
            return Err(StorageError::Corrupt(format!(
                "invalid frame at offset {} followed by further data",
                pos
            )));
        }

        index.push(Slot {
            sequence,
            offset: pos,
            len,
        });
        pos = frame_end;
    }

    Ok((index, pos.min(total)))
}

#[async_trait]
impl LedgerStorage for FileLedgerStorage {
    async fn append(&self, entry: &LedgerEntry) -> StorageResult<()> {
        let bytes = frame(entry)?;
        let mut writer = self.writer.lock().await;

        if let Some(last) = self.slots_last()? {
            if entry.sequence <= last {
                return Err(StorageError::Corrupt(format!(
                    "sequence {} does not follow {}",
                    entry.sequence, last
                )));
            }
        }

        let offset = writer.end;
        let file = &mut writer.file;
        if let Err(e) = file.write_all(&bytes).and_then(|_| file.sync_all()) {
            // Roll back a partial frame so the segment ends on a boundary.
            let _ = file.set_len(offset);
            let _ = file.seek(SeekFrom::Start(offset));
            return Err(StorageError::Io(e));
        }
        writer.end = offset + bytes.len() as u64;

        let mut index = self
            .index
            .write()
            .map_err(|_| StorageError::Backend("ledger index lock poisoned".to_string()))?;
        index.push(Slot {
            sequence: entry.sequence,
            offset,
            len: (bytes.len() as u64 - FRAME_PREFIX - FRAME_SUFFIX) as u32,
        });
        debug!(sequence = entry.sequence, offset, "Ledger entry committed");
        Ok(())
    }

    async fn read_from(&self, from: u64, limit: usize) -> StorageResult<Vec<LedgerEntry>> {
        let slots = self.slots_from(from, limit)?;
        if slots.is_empty() {
            return Ok(Vec::new());
        }
        let mut file = File::open(&self.path)?;
        slots
            .into_iter()
            .map(|slot| Self::read_slot(&mut file, slot))
            .collect()
    }

    async fn last(&self) -> StorageResult<Option<LedgerEntry>> {
        match self.slots_last()? {
            Some(seq) => Ok(self.read_from(seq, 1).await?.into_iter().next()),
            None => Ok(None),
        }
    }
}

impl FileLedgerStorage {
    fn slots_last(&self) -> StorageResult<Option<u64>> {
        let index = self
            .index
            .read()
            .map_err(|_| StorageError::Backend("ledger index lock poisoned".to_string()))?;
        Ok(index.last().map(|s| s.sequence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{compute_entry_hash, GENESIS_HASH};
    use canonic_types::{DecisionKind, Fingerprint, LedgerAppend, Outcome};

    fn entry(sequence: u64, tag: &str) -> LedgerEntry {
        let draft = LedgerAppend::new(
            Fingerprint::from_hash(blake3::hash(tag.as_bytes())),
            DecisionKind::Proceed,
            Outcome::Sent,
        );
        let hash = compute_entry_hash(&draft, sequence, GENESIS_HASH).unwrap();
        draft.seal(sequence, GENESIS_HASH.to_string(), hash)
    }

    #[tokio::test]
    async fn entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let storage = FileLedgerStorage::open(dir.path()).unwrap();
            storage.append(&entry(1, "a")).await.unwrap();
            storage.append(&entry(2, "b")).await.unwrap();
        }
        let storage = FileLedgerStorage::open(dir.path()).unwrap();
        let all = storage.read_from(1, 10).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].sequence, 2);
        assert_eq!(storage.last().await.unwrap().unwrap().sequence, 2);

        storage.append(&entry(3, "c")).await.unwrap();
        assert_eq!(storage.read_from(3, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn torn_tail_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        {
            let storage = FileLedgerStorage::open(dir.path()).unwrap();
            storage.append(&entry(1, "a")).await.unwrap();
            storage.append(&entry(2, "b")).await.unwrap();
        }
        let path = dir.path().join(SEGMENT_FILE);
        let committed_len = std::fs::metadata(&path).unwrap().len();

        // Simulate a crash halfway through writing frame 3.
        let partial = frame(&entry(3, "c")).unwrap();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&partial[..partial.len() / 2]).unwrap();
        drop(file);

        let storage = FileLedgerStorage::open(dir.path()).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), committed_len);
        assert_eq!(storage.read_from(1, 10).await.unwrap().len(), 2);

        storage.append(&entry(3, "c")).await.unwrap();
        drop(storage);
        let storage = FileLedgerStorage::open(dir.path()).unwrap();
        assert_eq!(storage.read_from(1, 10).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn bad_checksum_on_final_frame_is_treated_as_torn() {
        let dir = tempfile::tempdir().unwrap();
        {
            let storage = FileLedgerStorage::open(dir.path()).unwrap();
            storage.append(&entry(1, "a")).await.unwrap();
            storage.append(&entry(2, "b")).await.unwrap();
        }
        let path = dir.path().join(SEGMENT_FILE);
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();

        let storage = FileLedgerStorage::open(dir.path()).unwrap();
        assert_eq!(storage.read_from(1, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn corruption_inside_history_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        {
            let storage = FileLedgerStorage::open(dir.path()).unwrap();
            storage.append(&entry(1, "a")).await.unwrap();
            storage.append(&entry(2, "b")).await.unwrap();
        }
        let path = dir.path().join(SEGMENT_FILE);
        let mut bytes = std::fs::read(&path).unwrap();
        // Inside the first frame's JSON body.
        bytes[HEADER_SIZE as usize + FRAME_PREFIX as usize + 2] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            FileLedgerStorage::open(dir.path()),
            Err(StorageError::Corrupt(_))
        ));
    }

    #[tokio::test]
    async fn second_writer_is_refused_until_first_closes() {
        let dir = tempfile::tempdir().unwrap();
        let first = FileLedgerStorage::open(dir.path()).unwrap();
        first.append(&entry(1, "a")).await.unwrap();

        let err = FileLedgerStorage::open(dir.path()).err().unwrap();
        assert!(matches!(err, StorageError::Unavailable(_)));
        assert!(err.is_transient());

        drop(first);
        let second = FileLedgerStorage::open(dir.path()).unwrap();
        second.append(&entry(2, "b")).await.unwrap();
        assert_eq!(second.read_from(1, 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn foreign_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SEGMENT_FILE), b"NOTALEDGERFILE").unwrap();
        assert!(matches!(
            FileLedgerStorage::open(dir.path()),
            Err(StorageError::Corrupt(_))
        ));
    }

    #[tokio::test]
    async fn out_of_order_sequence_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileLedgerStorage::open(dir.path()).unwrap();
        storage.append(&entry(5, "a")).await.unwrap();
        assert!(storage.append(&entry(5, "b")).await.is_err());
        assert_eq!(storage.read_from(0, 10).await.unwrap().len(), 1);
    }
}
