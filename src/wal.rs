use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{error, warn};

use crate::model::Event;

/// Frame one event as `[u32 le: len][bincode payload][u32 le: crc32(payload)]`.
/// Returns the number of bytes written.
fn write_frame(writer: &mut impl Write, event: &Event) -> io::Result<u64> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "event too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(FRAME_OVERHEAD + payload.len() as u64)
}

const FRAME_OVERHEAD: u64 = 8;

/// Read exactly `buf.len()` bytes; `Ok(false)` on a clean or torn end of file.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Next valid frame and its size on disk, or `None` at the end of the log
/// or at the first torn/corrupt frame.
fn read_frame(reader: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut word = [0u8; 4];
    if !read_full(reader, &mut word)? {
        return Ok(None);
    }
    let mut payload = vec![0u8; u32::from_le_bytes(word) as usize];
    if !read_full(reader, &mut payload)? || !read_full(reader, &mut word)? {
        return Ok(None);
    }
    if u32::from_le_bytes(word) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(bincode::deserialize::<Event>(&payload)
        .ok()
        .map(|event| (event, FRAME_OVERHEAD + payload.len() as u64)))
}

/// Valid events in append order, plus the byte offset where the valid prefix ends.
fn read_valid(path: &Path) -> io::Result<(Vec<Event>, u64)> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::new(file);
    let mut events = Vec::new();
    let mut end = 0;
    while let Some((event, size)) = read_frame(&mut reader)? {
        events.push(event);
        end += size;
    }
    Ok((events, end))
}

/// Append-only booking log. The store's in-memory tables are rebuilt from it at start-up.
///
/// A crash mid-append leaves a torn last frame. `recover` cuts the file back
/// to the last whole frame before new appends go in, and a batch that fails
/// halfway is cut back the same way, so later frames are never stranded
/// behind garbage.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    /// Length of the durable, fully-framed prefix.
    committed: u64,
    appends_since_compact: u64,
}

impl Wal {
    /// Open `path` for appends, keeping whatever is on disk.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let committed = file.metadata()?.len();
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            committed,
            appends_since_compact: 0,
        })
    }

    /// Replay the log, drop any torn tail, and open it for appends.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let (events, valid_len) = read_valid(path)?;
        let mut wal = Self::open(path)?;
        if wal.committed > valid_len {
            warn!(
                "truncating {} trailing bytes of {}",
                wal.committed - valid_len,
                path.display()
            );
            wal.truncate_to(valid_len)?;
        }
        Ok((wal, events))
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_batch(std::slice::from_ref(event))
    }

    /// Write `events` and fsync once. On any failure the file is cut back to
    /// its length before the batch and none of the events count as written.
    pub fn append_batch(&mut self, events: &[Event]) -> io::Result<()> {
        let mut written = 0;
        let result = events
            .iter()
            .try_for_each(|e| {
                written += write_frame(&mut self.writer, e)?;
                Ok(())
            })
            .and_then(|()| self.flush_sync());
        match result {
            Ok(()) => {
                self.committed += written;
                self.appends_since_compact += events.len() as u64;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = self.truncate_to(self.committed) {
                    error!("cannot roll back failed WAL batch in {}: {rollback}", self.path.display());
                }
                Err(e)
            }
        }
    }

    fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    /// Discard buffered bytes and shorten the file to `len`.
    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
        // `into_parts` hands back the unflushed buffer instead of writing it on drop.
        drop(stale.into_parts());
        let file = self.writer.get_ref();
        file.set_len(len)?;
        file.sync_all()?;
        self.committed = len;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    fn snapshot_path(path: &Path) -> PathBuf {
        path.with_extension("wal.snapshot")
    }

    /// Write a snapshot of the live bookings next to the log and fsync it.
    pub fn write_snapshot(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(Self::snapshot_path(path))?);
        for event in events {
            write_frame(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the snapshot over the log and reopen it for appends.
    pub fn install_snapshot(&mut self) -> io::Result<()> {
        fs::rename(Self::snapshot_path(&self.path), &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.committed = file.metadata()?.len();
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_snapshot(&self.path, events)?;
        self.install_snapshot()
    }

    /// All valid events on disk, in append order. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        read_valid(path).map(|(events, _)| events)
    }
}
