use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{error, warn};

use crate::limits::MAX_WAL_RECORD_LEN;
use crate::model::Event;

/// Every ledger file starts with this; the last byte is the format version.
const MAGIC: [u8; 8] = *b"STAYWAL\x01";

/// Serialises before writing anything, so a failed encode leaves `writer`
/// untouched.
fn write_record(writer: &mut impl Write, event: &Event) -> io::Result<u64> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if payload.len() > MAX_WAL_RECORD_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "event too large for ledger"));
    }
    let len = payload.len() as u32;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(8 + payload.len() as u64)
}

/// Fill `buf`, or report `false` if the file ends first.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Next intact event and its on-disk size, or `None` at the end of the
/// trustworthy prefix.
fn read_record(reader: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut word = [0u8; 4];
    if !read_full(reader, &mut word)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(word) as usize;
    if len > MAX_WAL_RECORD_LEN {
        return Ok(None);
    }
    let mut payload = vec![0u8; len];
    if !read_full(reader, &mut payload)? || !read_full(reader, &mut word)? {
        return Ok(None);
    }
    if u32::from_le_bytes(word) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    match bincode::deserialize::<Event>(&payload) {
        Ok(event) => Ok(Some((event, 8 + len as u64))),
        Err(_) => Ok(None),
    }
}

fn check_magic(reader: &mut impl Read) -> io::Result<()> {
    let mut header = [0u8; MAGIC.len()];
    if !read_full(reader, &mut header)? || header != MAGIC {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "not a staybook ledger (bad header)",
        ));
    }
    Ok(())
}

#[cfg(unix)]
fn sync_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => File::open(dir)?.sync_all(),
        _ => Ok(()),
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> io::Result<()> {
    Ok(())
}

/// What the ledger needs from the file underneath it.
pub trait LedgerFile: Write {
    fn sync(&mut self) -> io::Result<()>;
    /// Cut the file to `len` bytes; the next write lands at `len`.
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl LedgerFile for File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)?;
        self.seek(SeekFrom::Start(len))?;
        self.sync_data()
    }
}

/// A tenant's append-only booking ledger.
///
/// Layout: an 8-byte header, then `[u32 len][bincode Event][u32 crc32]`
/// records. A record cut short by a crash, or failing its checksum, ends
/// the ledger; `recover` chops it off before any new write lands.
///
/// Appends collect in memory until `flush_sync`, which writes and fsyncs
/// them together. If that fails the file is cut back to its last durable
/// length, so a failed group leaves nothing behind. If even that fails the
/// ledger refuses further writes until it is reopened.
pub struct Wal<F: LedgerFile = File> {
    file: F,
    path: PathBuf,
    pending: Vec<u8>,
    pending_events: u64,
    durable: u64,
    broken: bool,
    appends_since_compact: u64,
}

fn broken_ledger() -> io::Error {
    io::Error::other("ledger unusable after a failed rollback; reopen the tenant")
}

impl Wal<File> {
    /// Open the ledger at `path`, creating it if missing, and return every
    /// intact event in order.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)?;
        let on_disk = file.metadata()?.len();

        let mut events = Vec::new();
        let mut valid = MAGIC.len() as u64;
        if on_disk == 0 {
            file.write_all(&MAGIC)?;
            file.sync_all()?;
            sync_parent(path)?;
        } else {
            let mut reader = BufReader::new(&mut file);
            check_magic(&mut reader)?;
            while let Some((event, size)) = read_record(&mut reader)? {
                events.push(event);
                valid += size;
            }
        }

        if valid < on_disk {
            warn!(
                "ledger {}: discarding {} trailing bytes after {} events",
                path.display(),
                on_disk - valid,
                events.len()
            );
            file.set_len(valid)?;
            file.sync_all()?;
        }
        file.seek(SeekFrom::End(0))?;

        let wal = Self {
            file,
            path: path.to_path_buf(),
            pending: Vec::new(),
            pending_events: 0,
            durable: valid,
            broken: false,
            appends_since_compact: 0,
        };
        Ok((wal, events))
    }

    /// Replace the ledger with `events`. The new file is written beside the
    /// old one and renamed over it, so a crash leaves one or the other.
    pub fn rewrite(&mut self, events: &[Event]) -> io::Result<()> {
        if !self.pending.is_empty() {
            self.flush_sync()?;
        }
        let tmp_path = self.path.with_extension("wal.tmp");
        let mut size = MAGIC.len() as u64;
        {
            let mut tmp = BufWriter::new(File::create(&tmp_path)?);
            tmp.write_all(&MAGIC)?;
            for event in events {
                size += write_record(&mut tmp, event)?;
            }
            tmp.flush()?;
            tmp.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        sync_parent(&self.path)?;

        self.file = OpenOptions::new().append(true).open(&self.path)?;
        self.durable = size;
        self.broken = false;
        self.appends_since_compact = 0;
        Ok(())
    }
}

impl<F: LedgerFile> Wal<F> {
    /// Append and fsync a single event.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Queue an event; nothing is durable until `flush_sync`. An event that
    /// fails to encode is not queued.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        if self.broken {
            return Err(broken_ledger());
        }
        write_record(&mut self.pending, event)?;
        self.pending_events += 1;
        Ok(())
    }

    /// Write and fsync everything queued. On failure none of it counts.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        if self.broken {
            return Err(broken_ledger());
        }
        let written = self.pending.len() as u64;
        let events = std::mem::take(&mut self.pending_events);
        let result = self
            .file
            .write_all(&self.pending)
            .and_then(|()| self.file.sync());
        self.pending.clear();

        match result {
            Ok(()) => {
                self.durable += written;
                self.appends_since_compact += events;
                Ok(())
            }
            Err(e) => {
                if let Err(cut) = self.file.truncate(self.durable) {
                    error!("ledger {}: rollback after failed write failed: {cut}", self.path.display());
                    self.broken = true;
                }
                Err(e)
            }
        }
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Bytes in the ledger, queued records included.
    pub fn size(&self) -> u64 {
        self.durable + self.pending.len() as u64
    }

    #[cfg(test)]
    fn with_file<G: LedgerFile>(self, file: G) -> Wal<G> {
        Wal {
            file,
            path: self.path,
            pending: self.pending,
            pending_events: self.pending_events,
            durable: self.durable,
            broken: self.broken,
            appends_since_compact: self.appends_since_compact,
        }
    }
}
