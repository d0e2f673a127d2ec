//! Framed, append-only record partitions.
//!
//! Both durable partitions (cached entities and pending mutations) are
//! sequences of framed records:
//!
//! ```text
//! | magic (4) | version (2) | type (1) | length (4) | payload (CBOR) | crc32 (4) |
//! ```
//!
//! All integers are little-endian. The CRC covers every byte before it.
//! On open the partition is replayed from the start. A record cut short by
//! a crash ends the replay and is truncated away; a complete record whose
//! checksum does not match is reported as corruption.

use crate::error::{StoreError, StoreResult};
use outbox_storage::StorageBackend;
use tracing::{debug, info, warn};

/// Current partition format version.
pub const PARTITION_VERSION: u16 = 1;

/// magic (4) + version (2) + type (1) + length (4)
const HEADER_SIZE: usize = 11;

const CRC_SIZE: usize = 4;

/// A record type stored in a partition.
pub trait PartitionRecord: Sized {
    /// Magic bytes that open every record of this partition.
    const MAGIC: [u8; 4];

    /// Human-readable partition name used in errors and logs.
    const NAME: &'static str;

    /// Type byte written into the record header.
    fn record_type(&self) -> u8;

    /// Serializes the record body.
    fn encode_payload(&self) -> StoreResult<Vec<u8>>;

    /// Deserializes a record body of the given type.
    fn decode_payload(record_type: u8, payload: &[u8]) -> StoreResult<Self>;
}

/// Frames one record.
pub fn encode_frame<R: PartitionRecord>(record: &R) -> StoreResult<Vec<u8>> {
    let payload = record.encode_payload()?;
    let len = u32::try_from(payload.len())
        .map_err(|_| StoreError::invalid_operation("partition record larger than 4 GiB"))?;

    let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
    data.extend_from_slice(&R::MAGIC);
    data.extend_from_slice(&PARTITION_VERSION.to_le_bytes());
    data.push(record.record_type());
    data.extend_from_slice(&len.to_le_bytes());
    data.extend_from_slice(&payload);

    let crc = compute_crc32(&data);
    data.extend_from_slice(&crc.to_le_bytes());
    Ok(data)
}

/// Result of scanning partition bytes.
#[derive(Debug)]
pub struct Replay<R> {
    /// Records in write order, with their starting offsets.
    pub records: Vec<(u64, R)>,
    /// Length of the valid prefix; anything after it is a torn tail.
    pub valid_len: u64,
}

/// Decodes every complete record in `bytes`.
///
/// # Errors
///
/// Returns `Corrupted` for bad magic, unknown versions, checksum
/// mismatches or undecodable bodies in complete records.
pub fn scan<R: PartitionRecord>(bytes: &[u8]) -> StoreResult<Replay<R>> {
    let mut records = Vec::new();
    let mut pos = 0usize;

    while pos < bytes.len() {
        let offset = pos as u64;
        let corrupted = |message: String| StoreError::Corrupted {
            partition: R::NAME,
            offset,
            message,
        };

        if bytes.len() - pos < HEADER_SIZE {
            break;
        }
        let header = &bytes[pos..pos + HEADER_SIZE];
        if header[0..4] != R::MAGIC {
            return Err(corrupted(format!("bad magic {:02x?}", &header[0..4])));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != PARTITION_VERSION {
            return Err(corrupted(format!("unsupported format version {version}")));
        }
        let record_type = header[6];
        let len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as usize;

        let total = HEADER_SIZE + len + CRC_SIZE;
        if bytes.len() - pos < total {
            break;
        }

        let body_end = pos + HEADER_SIZE + len;
        let stored = u32::from_le_bytes([
            bytes[body_end],
            bytes[body_end + 1],
            bytes[body_end + 2],
            bytes[body_end + 3],
        ]);
        let actual = compute_crc32(&bytes[pos..body_end]);
        if stored != actual {
            return Err(corrupted(format!(
                "checksum mismatch: expected {stored:08x}, got {actual:08x}"
            )));
        }

        let record = R::decode_payload(record_type, &bytes[pos + HEADER_SIZE..body_end])
            .map_err(|e| corrupted(e.to_string()))?;
        records.push((offset, record));
        pos += total;
    }

    Ok(Replay {
        records,
        valid_len: pos as u64,
    })
}

/// A partition: one storage backend holding framed records of type `R`.
pub struct Partition<R: PartitionRecord> {
    backend: Box<dyn StorageBackend>,
    sync_on_write: bool,
    record_count: u64,
    // length to cut back to before the next append, after a failed cut
    cut_to: Option<u64>,
    _marker: std::marker::PhantomData<fn() -> R>,
}

impl<R: PartitionRecord> Partition<R> {
    /// Opens a partition and replays its records.
    ///
    /// A torn tail is truncated so later appends start on a record boundary.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the backend cannot be read, or
    /// `Corrupted` if a complete record is damaged.
    pub fn open(
        mut backend: Box<dyn StorageBackend>,
        sync_on_write: bool,
    ) -> StoreResult<(Self, Vec<R>)> {
        let bytes = backend.read_all()?;
        let replay = scan::<R>(&bytes)?;

        if replay.valid_len < bytes.len() as u64 {
            warn!(
                partition = R::NAME,
                valid = replay.valid_len,
                size = bytes.len(),
                "dropping torn record at partition tail"
            );
            backend.truncate(replay.valid_len)?;
        }

        debug!(
            partition = R::NAME,
            records = replay.records.len(),
            "partition replayed"
        );

        let partition = Self {
            backend,
            sync_on_write,
            record_count: replay.records.len() as u64,
            cut_to: None,
            _marker: std::marker::PhantomData,
        };
        let records = replay.records.into_iter().map(|(_, r)| r).collect();
        Ok((partition, records))
    }

    /// Appends one record.
    ///
    /// A failed append or sync is cut back off the backend, so a record
    /// reported as failed never shows up on the next replay.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the write does not reach the backend.
    pub fn append(&mut self, record: &R) -> StoreResult<()> {
        let frame = encode_frame(record)?;
        if let Some(len) = self.cut_to {
            self.backend.truncate(len)?;
            self.cut_to = None;
        }

        let start = self.backend.size()?;
        if let Err(e) = self.write_frame(&frame) {
            if let Err(cut) = self.backend.truncate(start) {
                warn!(
                    partition = R::NAME,
                    error = %cut,
                    "could not cut failed append, retrying before next write"
                );
                self.cut_to = Some(start);
            }
            return Err(e);
        }
        self.record_count += 1;
        Ok(())
    }

    fn write_frame(&mut self, frame: &[u8]) -> StoreResult<()> {
        self.backend.append(frame)?;
        if self.sync_on_write {
            self.backend.sync()?;
        }
        Ok(())
    }

    /// Replaces the partition with the given live records.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the replacement fails; the old
    /// contents stay in place.
    pub fn rewrite<'a, I>(&mut self, records: I) -> StoreResult<()>
    where
        I: IntoIterator<Item = &'a R>,
        R: 'a,
    {
        let mut data = Vec::new();
        let mut count = 0u64;
        for record in records {
            data.extend_from_slice(&encode_frame(record)?);
            count += 1;
        }
        let before = self.record_count;
        self.backend.replace(&data)?;
        self.backend.sync()?;
        self.record_count = count;
        self.cut_to = None;
        info!(
            partition = R::NAME,
            before,
            after = count,
            bytes = data.len(),
            "partition compacted"
        );
        Ok(())
    }

    /// Number of records currently in the partition, live or superseded.
    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    /// Size of the partition in bytes.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` if the backend cannot report its size.
    pub fn size(&self) -> StoreResult<u64> {
        Ok(self.backend.size()?)
    }
}

/// Computes the CRC-32 (IEEE) checksum of `data`.
pub fn compute_crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut bit = 0;
            while bit < 8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ 0xEDB8_8320
                } else {
                    crc >> 1
                };
                bit += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        crc = (crc >> 8) ^ TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize];
    }
    !crc
}
