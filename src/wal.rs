use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Upper bound for a single encoded event. A length prefix above this can
/// only come from a torn or corrupt tail.
const MAX_ENTRY_LEN: usize = 16 * 1024 * 1024;

/// Returns the number of bytes written.
fn encode_entry(writer: &mut impl Write, event: &Event) -> io::Result<u64> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(payload.len() as u64 + 8)
}

/// Fill `buf` completely. `Ok(false)` means the file ended first.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Next intact entry, or `None` at end of file or at the first damaged entry.
fn decode_entry(reader: &mut impl Read) -> io::Result<Option<Event>> {
    let mut word = [0u8; 4];
    if !read_full(reader, &mut word)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(word) as usize;
    if len > MAX_ENTRY_LEN {
        return Ok(None);
    }
    let mut payload = vec![0u8; len];
    if !read_full(reader, &mut payload)? || !read_full(reader, &mut word)? {
        return Ok(None);
    }
    if u32::from_le_bytes(word) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(bincode::deserialize::<Event>(&payload).ok())
}

/// Append-only booking log.
///
/// Each entry is `[u32 len][bincode Event][u32 crc32]`, little endian, where
/// `len` covers the payload only. Replay stops at the first entry that is
/// short, fails its checksum or does not decode, so a crash mid-write loses at
/// most the batch that was being written.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
    /// File length covering only fully committed batches.
    committed_len: u64,
    /// A failed batch may have left bytes past `committed_len`.
    needs_repair: bool,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = Self::open_append(path)?;
        let committed_len = file.metadata()?.len();
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
            committed_len,
            needs_repair: false,
        })
    }

    fn open_append(path: &Path) -> io::Result<File> {
        OpenOptions::new().create(true).append(true).open(path)
    }

    fn compact_tmp_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Append and fsync one event.
    #[cfg(test)]
    fn append(&mut self, event: &Event) -> io::Result<()> {
        self.commit(std::slice::from_ref(event))
    }

    /// Append a batch with one fsync. All or nothing: on failure the log is
    /// cut back to its last committed length, so no entry of the batch
    /// survives a restart and later batches never land behind torn bytes.
    pub fn commit(&mut self, events: &[Event]) -> io::Result<()> {
        if self.needs_repair {
            self.rollback()?;
        }
        match self.write_batch(events) {
            Ok(written) => {
                self.committed_len += written;
                self.appends_since_compact += events.len() as u64;
                Ok(())
            }
            Err(e) => {
                self.needs_repair = true;
                if let Err(repair) = self.rollback() {
                    tracing::error!(
                        "cannot roll back {}: {repair}; retrying before the next batch",
                        self.path.display()
                    );
                }
                Err(e)
            }
        }
    }

    fn write_batch(&mut self, events: &[Event]) -> io::Result<u64> {
        let mut written = 0;
        for event in events {
            written += encode_entry(&mut self.writer, event)?;
        }
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(written)
    }

    /// Drop buffered bytes and truncate the file to `committed_len`.
    fn rollback(&mut self) -> io::Result<()> {
        let file = self.writer.get_ref().try_clone()?;
        // into_parts hands back the unflushed buffer instead of writing it.
        let (_, _discarded) = std::mem::replace(&mut self.writer, BufWriter::new(file)).into_parts();
        let file = self.writer.get_ref();
        file.set_len(self.committed_len)?;
        file.sync_all()?;
        self.needs_repair = false;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a full snapshot next to the log and fsync it. The live log is
    /// untouched until `swap_compact_file`.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(Self::compact_tmp_path(path))?);
        for event in events {
            encode_entry(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the snapshot over the log and continue appending to it.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        if self.needs_repair {
            self.rollback()?;
        }
        self.writer.flush()?;
        fs::rename(Self::compact_tmp_path(&self.path), &self.path)?;
        let file = Self::open_append(&self.path)?;
        self.committed_len = file.metadata()?.len();
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Every intact event in the log, oldest first. A missing file is an
    /// empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        while let Some(event) = decode_entry(&mut reader)? {
            events.push(event);
        }
        Ok(events)
    }
}
