use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::model::Event;

/// File magic followed by the frame format version.
const HEADER: [u8; 8] = *b"INNKEEP\x01";

/// Largest payload a frame may carry. Longer length prefixes end replay.
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

fn write_frame(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len as usize <= MAX_FRAME_LEN)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "journal frame too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Reads `buf.len()` bytes, or returns `false` on a clean or torn end of file.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Decoded events plus the byte offset just past the last good frame.
struct Replay {
    events: Vec<Event>,
    valid_len: u64,
}

fn replay_frames(reader: &mut impl Read) -> io::Result<Replay> {
    let mut events = Vec::new();
    let mut valid_len = HEADER.len() as u64;

    loop {
        let mut len_buf = [0u8; 4];
        if !read_full(reader, &mut len_buf)? {
            break;
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_FRAME_LEN {
            break;
        }

        let mut payload = vec![0u8; len];
        if !read_full(reader, &mut payload)? {
            break;
        }
        let mut crc_buf = [0u8; 4];
        if !read_full(reader, &mut crc_buf)? {
            break;
        }
        if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
            break;
        }
        let Ok(event) = bincode::deserialize::<Event>(&payload) else {
            break;
        };
        events.push(event);
        valid_len += 8 + len as u64;
    }

    Ok(Replay { events, valid_len })
}

/// Append-only event journal.
///
/// Layout: an 8-byte header, then frames of `[u32 len][bincode Event][u32 crc32]`.
/// A torn or corrupt tail is cut off when the journal is opened.
pub struct Journal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Journal {
    /// Open (or create) the journal at `path` and return every event it holds.
    pub fn open(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let events = match File::open(path) {
            Ok(file) => Self::recover(path, file)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Self::start_file(path)?;
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        let file = OpenOptions::new().append(true).open(path)?;
        let journal = Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: events.len() as u64,
        };
        Ok((journal, events))
    }

    fn start_file(path: &Path) -> io::Result<()> {
        let mut file = File::create(path)?;
        file.write_all(&HEADER)?;
        file.sync_all()
    }

    fn recover(path: &Path, file: File) -> io::Result<Vec<Event>> {
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let mut header = [0u8; HEADER.len()];
        if !read_full(&mut reader, &mut header)? {
            // Crashed while writing the header of a fresh journal
            Self::start_file(path)?;
            return Ok(Vec::new());
        }
        if header != HEADER {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} is not an innkeep journal", path.display()),
            ));
        }

        let Replay { events, valid_len } = replay_frames(&mut reader)?;
        if valid_len < file_len {
            warn!(
                path = %path.display(),
                discarded = file_len - valid_len,
                "truncating torn journal tail"
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        Ok(events)
    }

    /// Single append plus fsync. The engine goes through `append_buffered` + `flush_sync`.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        write_frame(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn snapshot_path(path: &Path) -> PathBuf {
        path.with_extension("journal.tmp")
    }

    /// Write a full replacement journal next to `path` and fsync it.
    pub fn write_snapshot(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(Self::snapshot_path(path))?);
        writer.write_all(&HEADER)?;
        for event in events {
            write_frame(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the snapshot over the live journal and reopen for appends.
    pub fn install_snapshot(&mut self, snapshot_len: u64) -> io::Result<()> {
        fs::rename(Self::snapshot_path(&self.path), &self.path)?;
        let file = OpenOptions::new().append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = snapshot_len;
        Ok(())
    }

    /// Frames written since open or the last compaction; a rough measure of journal churn.
    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Customer, RoomStatus, StatusChange};
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("innkeep_test_journal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn room_created(number: &str) -> Event {
        Event::RoomCreated {
            id: Ulid::new(),
            number: number.into(),
            category_id: Ulid::new(),
            floor_id: None,
            capacity: 2,
            created: StatusChange {
                old_status: None,
                new_status: RoomStatus::Available,
                changed_by: "System".into(),
                reason: None,
                changed_at: 0,
            },
        }
    }

    fn customer_created(name: &str) -> Event {
        Event::CustomerCreated {
            customer: Customer {
                id: Ulid::new(),
                full_name: name.into(),
                phone: "555-0100".into(),
                email: None,
                id_card: None,
            },
        }
    }

    #[test]
    fn new_journal_has_header_only() {
        let path = tmp_path("fresh.journal");
        let (journal, events) = Journal::open(&path).unwrap();
        assert!(events.is_empty());
        assert_eq!(journal.appends_since_compact(), 0);
        assert_eq!(fs::read(&path).unwrap(), HEADER.to_vec());
    }

    #[test]
    fn append_and_reopen() {
        let path = tmp_path("append_reopen.journal");
        let events = vec![room_created("101"), customer_created("Ana")];
        {
            let (mut journal, _) = Journal::open(&path).unwrap();
            for e in &events {
                journal.append(e).unwrap();
            }
        }
        let (journal, replayed) = Journal::open(&path).unwrap();
        assert_eq!(replayed, events);
        assert_eq!(journal.appends_since_compact(), 2);
    }

    #[test]
    fn torn_tail_is_truncated_and_later_appends_survive() {
        let path = tmp_path("torn.journal");
        let first = room_created("101");
        {
            let (mut journal, _) = Journal::open(&path).unwrap();
            journal.append(&first).unwrap();
        }
        let good_len = fs::metadata(&path).unwrap().len();
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[7u8; 6]).unwrap();
        }

        let second = customer_created("Ben");
        {
            let (mut journal, replayed) = Journal::open(&path).unwrap();
            assert_eq!(replayed, vec![first.clone()]);
            assert_eq!(fs::metadata(&path).unwrap().len(), good_len);
            journal.append(&second).unwrap();
        }

        let (_, replayed) = Journal::open(&path).unwrap();
        assert_eq!(replayed, vec![first, second]);
    }

    #[test]
    fn corrupt_crc_stops_replay() {
        let path = tmp_path("bad_crc.journal");
        let event = customer_created("Cleo");
        {
            let payload = bincode::serialize(&event).unwrap();
            let mut f = File::create(&path).unwrap();
            f.write_all(&HEADER).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEAD_BEEFu32.to_le_bytes()).unwrap();
        }
        let (_, replayed) = Journal::open(&path).unwrap();
        assert!(replayed.is_empty());
        assert_eq!(fs::metadata(&path).unwrap().len(), HEADER.len() as u64);
    }

    #[test]
    fn oversized_length_prefix_stops_replay() {
        let path = tmp_path("oversized.journal");
        let first = customer_created("Eve");
        {
            let (mut journal, _) = Journal::open(&path).unwrap();
            journal.append(&first).unwrap();
        }
        let good_len = fs::metadata(&path).unwrap().len();
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&u32::MAX.to_le_bytes()).unwrap();
            f.write_all(&[0u8; 64]).unwrap();
        }
        let (_, replayed) = Journal::open(&path).unwrap();
        assert_eq!(replayed, vec![first]);
        assert_eq!(fs::metadata(&path).unwrap().len(), good_len);
    }

    #[test]
    fn foreign_file_is_rejected() {
        let path = tmp_path("foreign.journal");
        fs::write(&path, b"NOTAJOURNALFILE").unwrap();
        let err = Journal::open(&path).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn snapshot_replaces_history() {
        let path = tmp_path("snapshot.journal");
        let keep = room_created("201");
        {
            let (mut journal, _) = Journal::open(&path).unwrap();
            for i in 0..20 {
                journal.append_buffered(&customer_created(&format!("guest {i}"))).unwrap();
            }
            journal.append_buffered(&keep).unwrap();
            journal.flush_sync().unwrap();
        }
        let before = fs::metadata(&path).unwrap().len();

        let after_event = customer_created("Dana");
        {
            let (mut journal, _) = Journal::open(&path).unwrap();
            Journal::write_snapshot(journal.path(), std::slice::from_ref(&keep)).unwrap();
            journal.install_snapshot(1).unwrap();
            assert_eq!(journal.appends_since_compact(), 1);
            journal.append(&after_event).unwrap();
        }
        assert!(fs::metadata(&path).unwrap().len() < before);

        let (_, replayed) = Journal::open(&path).unwrap();
        assert_eq!(replayed, vec![keep, after_event]);
    }
}
