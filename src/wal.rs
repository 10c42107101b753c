//! Write-ahead log and snapshots for the vault ledger.
//!
//! Every mutating operation appends its already-applied outcome before
//! in-memory state changes, so recovery never recomputes prices: replay
//! applies recorded results verbatim. Records are length-prefixed,
//! crc32-guarded bincode in fixed-capacity segments rolled by size.
//! Snapshots carry the full ledger state and are named with their crc32
//! so corruption is detected on load.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Result};
use crc32fast::Hasher;
use serde::{Deserialize, Serialize};

use crate::accounts::{AccountId, ShareLedger};
use crate::queue::WithdrawalQueue;
use crate::state::{ConfigUpdate, VaultConfig, VaultState};
use crate::timelock::TimelockGate;

// ==========================================
// 1. Configuration Constants
// ==========================================

// Safety limit: a corrupted length byte must not allocate gigabytes.
const MAX_RECORD_SIZE: usize = 1024 * 1024;
const READ_BUFFER_SIZE: usize = 1024 * 1024;

const SEGMENT_MAX_BYTES: u64 = 64 * 1024 * 1024;
const WAL_RETENTION: usize = 3;
const SNAPSHOT_RETENTION: usize = 3;

// ==========================================
// 2. Command Records
// ==========================================

/// Applied outcome of one vault operation. Fields like `shares` and
/// `cash_after` are results computed at execution time, so replay is
/// deterministic regardless of price history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum VaultCommand {
    Deposit {
        account: AccountId,
        amount: u64,
        shares: u64,
        cash_after: u64,
        timestamp: u64,
    },
    WithdrawalRequested {
        request_id: u64,
        account: AccountId,
        shares: u64,
        timestamp: u64,
    },
    WithdrawalCancelled {
        request_id: u64,
        timestamp: u64,
    },
    WithdrawalFulfilled {
        request_id: u64,
        shares: u64,
        value: u64,
        cash_after: u64,
        forced: bool,
        timestamp: u64,
    },
    /// Final head position after a fulfillment batch; captures advances
    /// over already-cleared entries that have no record of their own.
    HeadAdvanced {
        head: u64,
    },
    /// Value pulled back from the custody venue to cover a payout.
    LiquidityRecalled {
        amount: u64,
        cash_after: u64,
    },
    /// User-level share transfer (shares are claim tokens and move freely
    /// between accounts, escrow included).
    SharesTransferred {
        from: AccountId,
        to: AccountId,
        shares: u64,
        timestamp: u64,
    },
    ProcessedPurged {
        limit: u64,
    },
    YieldReported {
        delta: i64,
        fee_shares: u64,
        hwm_after: u128,
        timestamp: u64,
    },
    HwmReset {
        hwm: u128,
    },
    OrphanedSharesSwept {
        shares: u64,
    },
    /// Immediate (non-timelocked) parameter update.
    ConfigChanged {
        update: ConfigUpdate,
    },
    ParamChangeQueued {
        ticket: u64,
        update: ConfigUpdate,
        timestamp: u64,
    },
    ParamChangeCancelled {
        ticket: u64,
    },
    ParamChangeExecuted {
        ticket: u64,
        update: ConfigUpdate,
        timestamp: u64,
    },
}

// ==========================================
// 3. Snapshot
// ==========================================

#[derive(Serialize, Deserialize)]
pub struct Snapshot {
    pub last_seq: u64,
    pub shares: ShareLedger,
    pub state: VaultState,
    pub config: VaultConfig,
    pub queue: WithdrawalQueue,
    pub gate: TimelockGate,
}

impl Snapshot {
    /// Write atomically: tmp file, then rename with the crc32 of the
    /// payload embedded in the final name.
    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let payload = bincode::serialize(self)?;
        let mut hasher = Hasher::new();
        hasher.update(&payload);
        let crc = hasher.finalize();

        let tmp_path = dir.join(format!("snapshot_{}.tmp", self.last_seq));
        {
            let mut file = BufWriter::new(File::create(&tmp_path)?);
            file.write_all(&payload)?;
            file.flush()?;
        }

        let final_path = dir.join(format!("snapshot_{}_{:08x}.snap", self.last_seq, crc));
        fs::rename(&tmp_path, &final_path)?;

        Self::cleanup_old(dir)?;
        Ok(final_path)
    }

    /// Load the newest snapshot, verifying the crc32 recorded in its name.
    pub fn load_latest(dir: &Path) -> Result<Option<Snapshot>> {
        let Some((_, path, expected_crc)) = Self::find_latest(dir)? else {
            return Ok(None);
        };

        let mut payload = Vec::new();
        BufReader::new(File::open(&path)?).read_to_end(&mut payload)?;

        let mut hasher = Hasher::new();
        hasher.update(&payload);
        if hasher.finalize() != expected_crc {
            bail!("Snapshot CRC mismatch: {:?}", path);
        }

        Ok(Some(bincode::deserialize(&payload)?))
    }

    fn find_latest(dir: &Path) -> Result<Option<(u64, PathBuf, u32)>> {
        if !dir.exists() {
            return Ok(None);
        }
        let mut found: Option<(u64, PathBuf, u32)> = None;
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let Some((seq, crc)) = Self::parse_name(&path) else { continue };
            if found.as_ref().map_or(true, |(best, _, _)| seq > *best) {
                found = Some((seq, path, crc));
            }
        }
        Ok(found)
    }

    fn parse_name(path: &Path) -> Option<(u64, u32)> {
        if path.extension()? != "snap" {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        let mut parts = stem.split('_');
        if parts.next()? != "snapshot" {
            return None;
        }
        let seq = parts.next()?.parse::<u64>().ok()?;
        let crc = u32::from_str_radix(parts.next()?, 16).ok()?;
        Some((seq, crc))
    }

    fn cleanup_old(dir: &Path) -> Result<()> {
        let mut snaps = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if let Some((seq, _)) = Self::parse_name(&path) {
                snaps.push((seq, path));
            }
        }
        snaps.sort_by(|a, b| b.0.cmp(&a.0));
        for (_, path) in snaps.iter().skip(SNAPSHOT_RETENTION) {
            let _ = fs::remove_file(path);
        }
        Ok(())
    }
}

// ==========================================
// 4. Rolling WAL Writer
// ==========================================

pub struct VaultWal {
    dir: PathBuf,
    writer: BufWriter<File>,
    written: u64,
}

impl VaultWal {
    /// Open the WAL directory for appending. If the latest segment has a
    /// torn record at its tail, the tail is truncated away first.
    pub fn open(dir: &Path, next_seq: u64) -> Result<Self> {
        fs::create_dir_all(dir)?;

        let (path, valid_len) = match Self::list_segments(dir)?.pop() {
            Some((_, path)) => {
                let valid_len = Self::scan_valid_len(&path)?;
                (path, valid_len)
            }
            None => (dir.join(format!("vault_{}.wal", next_seq)), 0),
        };

        let mut file = OpenOptions::new().read(true).write(true).create(true).open(&path)?;
        file.set_len(valid_len)?;
        file.seek(SeekFrom::End(0))?;

        Ok(Self { dir: dir.to_path_buf(), writer: BufWriter::new(file), written: valid_len })
    }

    pub fn append(&mut self, seq: u64, cmd: &VaultCommand) -> Result<()> {
        if self.written >= SEGMENT_MAX_BYTES {
            self.rotate(seq)?;
        }

        let payload = bincode::serialize(cmd)?;
        let data_len = 8 + payload.len();

        let len_bytes = (data_len as u32).to_le_bytes();
        let seq_bytes = seq.to_le_bytes();

        let mut hasher = Hasher::new();
        hasher.update(&len_bytes);
        hasher.update(&seq_bytes);
        hasher.update(&payload);
        let crc_bytes = hasher.finalize().to_le_bytes();

        self.writer.write_all(&len_bytes)?;
        self.writer.write_all(&crc_bytes)?;
        self.writer.write_all(&seq_bytes)?;
        self.writer.write_all(&payload)?;
        self.written += (8 + data_len) as u64;
        Ok(())
    }

    /// Flush buffered records to the OS before state is considered durable.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    fn rotate(&mut self, next_seq: u64) -> Result<()> {
        self.writer.flush()?;
        let path = self.dir.join(format!("vault_{}.wal", next_seq));
        let file = OpenOptions::new().write(true).create(true).truncate(true).open(&path)?;
        self.writer = BufWriter::new(file);
        self.written = 0;
        Self::cleanup_old(&self.dir)?;
        Ok(())
    }

    fn list_segments(dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
        let mut segments = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if let Some(seq) = Self::parse_name(&path) {
                segments.push((seq, path));
            }
        }
        segments.sort_by_key(|s| s.0);
        Ok(segments)
    }

    fn parse_name(path: &Path) -> Option<u64> {
        if path.extension()? != "wal" {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        stem.strip_prefix("vault_")?.parse::<u64>().ok()
    }

    /// Byte offset of the last intact record in a segment.
    fn scan_valid_len(path: &Path) -> Result<u64> {
        let mut iter = WalIterator::new(path)?;
        let mut valid = 0;
        loop {
            match iter.next() {
                Some(Ok(_)) => valid = iter.offset,
                // Torn tail: keep everything before it
                Some(Err(_)) | None => break,
            }
        }
        Ok(valid)
    }

    fn cleanup_old(dir: &Path) -> Result<()> {
        let segments = Self::list_segments(dir)?;
        if segments.len() > WAL_RETENTION {
            for (_, path) in segments.iter().take(segments.len() - WAL_RETENTION) {
                let _ = fs::remove_file(path);
            }
        }
        Ok(())
    }

    /// Iterate all records across segments, starting from the segment that
    /// may contain `min_seq`. Callers filter duplicates below their own
    /// recovered sequence.
    pub fn replay_iter(
        dir: &Path,
        min_seq: u64,
    ) -> Result<impl Iterator<Item = Result<(u64, VaultCommand)>>> {
        if !dir.exists() {
            return Ok(Vec::new().into_iter().flatten());
        }
        let segments = Self::list_segments(dir)?;
        let start_idx = segments.partition_point(|(seq, _)| *seq <= min_seq).saturating_sub(1);

        let mut iters = Vec::new();
        for (_, path) in segments.iter().skip(start_idx) {
            iters.push(WalIterator::new(path)?);
        }
        Ok(iters.into_iter().flatten())
    }
}

// ==========================================
// 5. Streaming Record Iterator
// ==========================================

pub struct WalIterator {
    reader: BufReader<File>,
    offset: u64,
    path: PathBuf,
}

impl WalIterator {
    pub fn new(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::with_capacity(READ_BUFFER_SIZE, file);
        Ok(Self { reader, offset: 0, path: path.to_path_buf() })
    }
}

impl Iterator for WalIterator {
    type Item = Result<(u64, VaultCommand)>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut len_buf = [0u8; 4];
        match self.reader.read_exact(&mut len_buf) {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return None,
            Err(e) => return Some(Err(e.into())),
        }

        let data_len = u32::from_le_bytes(len_buf) as usize;
        if data_len < 8 || data_len > MAX_RECORD_SIZE {
            return Some(Err(anyhow!("Record size {} out of range in {:?}", data_len, self.path)));
        }

        let mut crc_buf = [0u8; 4];
        if let Err(e) = self.reader.read_exact(&mut crc_buf) {
            return Some(Err(e.into()));
        }
        let stored_crc = u32::from_le_bytes(crc_buf);

        let mut data_buf = vec![0u8; data_len];
        if let Err(e) = self.reader.read_exact(&mut data_buf) {
            return Some(Err(e.into()));
        }

        let mut hasher = Hasher::new();
        hasher.update(&len_buf);
        hasher.update(&data_buf);
        if hasher.finalize() != stored_crc {
            return Some(Err(anyhow!("CRC mismatch in {:?}", self.path)));
        }

        let (seq_bytes, payload) = data_buf.split_at(8);
        let seq = u64::from_le_bytes(seq_bytes.try_into().expect("8-byte slice"));
        let cmd = match bincode::deserialize(payload) {
            Ok(c) => c,
            Err(e) => return Some(Err(e.into())),
        };

        self.offset += (8 + data_len) as u64;
        Some(Ok((seq, cmd)))
    }
}
