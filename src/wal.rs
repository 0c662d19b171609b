//! On-disk journal behind [`MemoryStore`](crate::store::MemoryStore).
//!
//! A journal file is an 8-byte header (`QDRJ` plus a little-endian format
//! version) followed by frames of `[u32 len][u32 crc32][bincode Record]`.
//! Opening a journal replays every intact frame and cuts the file back to
//! the last one, so a torn tail from a crash never hides later appends.
//!
//! Writes go through [`JournalHandle`], which owns the file from a single
//! task. Appends that arrive together share one fsync. A rewrite is ordered
//! after every append queued before it.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use crate::model::Record;
use crate::observability::{WAL_FLUSH_BATCH_SIZE, WAL_FLUSH_DURATION_SECONDS};
use crate::store::StorageError;

const MAGIC: [u8; 4] = *b"QDRJ";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: u64 = 8;
const FRAME_PREFIX_LEN: u64 = 8;
/// Larger length prefixes are treated as corruption rather than allocated.
const MAX_FRAME_LEN: u32 = 1 << 20;
/// Commands drained per wakeup of the writer task.
const BATCH_LIMIT: usize = 512;

fn header() -> [u8; HEADER_LEN as usize] {
    let mut out = [0u8; HEADER_LEN as usize];
    out[..4].copy_from_slice(&MAGIC);
    out[4..].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
    out
}

fn encode_frame(record: &Record) -> io::Result<Vec<u8>> {
    let payload =
        bincode::serialize(record).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= MAX_FRAME_LEN)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "record too large for journal"))?;
    let mut frame = Vec::with_capacity(FRAME_PREFIX_LEN as usize + payload.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Read one frame. `None` means clean end of file or a torn/corrupt frame;
/// either way nothing after it is trusted.
fn decode_frame(reader: &mut impl Read) -> io::Result<Option<(Record, u64)>> {
    let mut prefix = [0u8; FRAME_PREFIX_LEN as usize];
    if !read_full(reader, &mut prefix)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);
    let crc = u32::from_le_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]);
    if len > MAX_FRAME_LEN {
        return Ok(None);
    }
    let mut payload = vec![0u8; len as usize];
    if !read_full(reader, &mut payload)? || crc32fast::hash(&payload) != crc {
        return Ok(None);
    }
    Ok(bincode::deserialize(&payload)
        .ok()
        .map(|record| (record, FRAME_PREFIX_LEN + len as u64)))
}

/// `read_exact` that reports a short read as `false` instead of an error.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// What a journal file holds.
#[derive(Debug, Default)]
pub struct Replay {
    pub records: Vec<Record>,
    /// Byte length of the header plus every intact frame.
    pub valid_len: u64,
    /// Bytes past `valid_len` that will be cut off on open.
    pub torn_bytes: u64,
}

/// Read every intact record of the journal at `path`. A missing or empty
/// file is an empty journal; a file with a foreign header is an error.
pub fn replay(path: &Path) -> io::Result<Replay> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
        Err(e) => return Err(e),
    };
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);

    let mut head = [0u8; HEADER_LEN as usize];
    if !read_full(&mut reader, &mut head)? {
        // Crashed while creating the file.
        return Ok(Replay { torn_bytes: file_len, ..Replay::default() });
    }
    if head[..4] != MAGIC {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "not a quadra journal"));
    }
    let version = u32::from_le_bytes([head[4], head[5], head[6], head[7]]);
    if version != FORMAT_VERSION {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unsupported journal version {version}"),
        ));
    }

    let mut replay = Replay { valid_len: HEADER_LEN, ..Replay::default() };
    while let Some((record, frame_len)) = decode_frame(&mut reader)? {
        replay.records.push(record);
        replay.valid_len += frame_len;
    }
    replay.torn_bytes = file_len.saturating_sub(replay.valid_len);
    if replay.torn_bytes > 0 {
        warn!(
            "journal {}: dropping {} bytes after the last intact record",
            path.display(),
            replay.torn_bytes
        );
    }
    Ok(replay)
}

/// Synchronous owner of the journal file. Lives inside the writer task.
struct JournalFile {
    path: PathBuf,
    out: BufWriter<File>,
}

impl JournalFile {
    /// Open for appending after `valid_len` bytes, writing a fresh header if
    /// the file holds none.
    fn open(path: &Path, valid_len: u64) -> io::Result<Self> {
        let mut file = OpenOptions::new().read(true).write(true).create(true).truncate(false).open(path)?;
        if valid_len < HEADER_LEN {
            file.set_len(0)?;
            file.write_all(&header())?;
        } else {
            file.set_len(valid_len)?;
            file.seek(SeekFrom::End(0))?;
        }
        file.sync_all()?;
        Ok(Self { path: path.to_path_buf(), out: BufWriter::new(file) })
    }

    fn write(&mut self, record: &Record) -> io::Result<()> {
        let frame = encode_frame(record)?;
        self.out.write_all(&frame)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.out.flush()?;
        self.out.get_ref().sync_data()
    }

    /// Replace the whole file with `records` via a synced temp file and rename.
    fn rewrite(&mut self, records: &[Record]) -> io::Result<()> {
        self.sync()?;
        let tmp = self.path.with_extension("wal.tmp");
        {
            let mut out = BufWriter::new(File::create(&tmp)?);
            out.write_all(&header())?;
            for record in records {
                out.write_all(&encode_frame(record)?)?;
            }
            out.flush()?;
            out.get_ref().sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        let file = OpenOptions::new().append(true).open(&self.path)?;
        self.out = BufWriter::new(file);
        Ok(())
    }
}

type Ack = oneshot::Sender<Result<(), StorageError>>;

enum Command {
    Append(Record, Ack),
    Rewrite(Vec<Record>, Ack),
    Backlog(oneshot::Sender<u64>),
}

/// Handle to the journal writer task. Cheap to clone.
#[derive(Clone)]
pub struct JournalHandle {
    tx: mpsc::Sender<Command>,
}

impl JournalHandle {
    /// Replay the journal at `path`, trim any torn tail and start the writer
    /// task. Must be called inside a tokio runtime.
    pub fn open(path: &Path) -> io::Result<(Self, Vec<Record>)> {
        let Replay { records, valid_len, .. } = replay(path)?;
        let file = JournalFile::open(path, valid_len)?;
        info!("journal {} opened with {} records", path.display(), records.len());

        let (tx, rx) = mpsc::channel(4096);
        let backlog = records.len() as u64;
        tokio::spawn(run_writer(file, rx, backlog));
        Ok((Self { tx }, records))
    }

    async fn request<T>(&self, command: Command, reply: oneshot::Receiver<T>) -> Result<T, StorageError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| StorageError::Journal("writer stopped".into()))?;
        reply
            .await
            .map_err(|_| StorageError::Journal("writer dropped the request".into()))
    }

    /// Resolves once `record` is durable.
    pub async fn append(&self, record: Record) -> Result<(), StorageError> {
        let (ack, done) = oneshot::channel();
        self.request(Command::Append(record, ack), done).await?
    }

    /// Replace the journal with `records`. Appends sent before this call are
    /// synced first and then superseded.
    pub async fn rewrite(&self, records: Vec<Record>) -> Result<(), StorageError> {
        let (ack, done) = oneshot::channel();
        self.request(Command::Rewrite(records, ack), done).await?
    }

    /// Records in the file beyond the last rewrite (or since open, counting
    /// the replayed ones).
    pub async fn backlog(&self) -> Result<u64, StorageError> {
        let (reply, answer) = oneshot::channel();
        self.request(Command::Backlog(reply), answer).await
    }
}

/// Writer state. After any write or sync failure the file's tail is unknown,
/// so every later request fails instead of appending behind it.
struct Writer {
    file: JournalFile,
    backlog: u64,
    waiting: Vec<Ack>,
    failed: Option<String>,
}

impl Writer {
    fn append(&mut self, record: Record, ack: Ack) {
        if let Some(reason) = &self.failed {
            let _ = ack.send(Err(StorageError::Journal(reason.clone())));
            return;
        }
        match self.file.write(&record) {
            Ok(()) => {
                self.backlog += 1;
                self.waiting.push(ack);
            }
            Err(e) => {
                self.fail(&e);
                let _ = ack.send(Err(StorageError::Journal(e.to_string())));
            }
        }
    }

    /// Fsync everything written since the last commit and answer its senders.
    fn commit(&mut self) {
        if self.waiting.is_empty() {
            return;
        }
        metrics::histogram!(WAL_FLUSH_BATCH_SIZE).record(self.waiting.len() as f64);
        let started = Instant::now();
        let synced = match self.failed.clone() {
            Some(reason) => Err(reason),
            None => match self.file.sync() {
                Ok(()) => Ok(()),
                Err(e) => {
                    self.fail(&e);
                    Err(e.to_string())
                }
            },
        };
        metrics::histogram!(WAL_FLUSH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        for ack in self.waiting.drain(..) {
            let _ = ack.send(synced.clone().map_err(StorageError::Journal));
        }
    }

    fn rewrite(&mut self, records: Vec<Record>, ack: Ack) {
        self.commit();
        let result = match self.failed.clone() {
            Some(reason) => Err(StorageError::Journal(reason)),
            None => match self.file.rewrite(&records) {
                Ok(()) => {
                    info!("journal rewritten: {} -> {} records", self.backlog, records.len());
                    self.backlog = 0;
                    Ok(())
                }
                Err(e) => {
                    self.fail(&e);
                    Err(StorageError::Journal(e.to_string()))
                }
            },
        };
        let _ = ack.send(result);
    }

    fn fail(&mut self, e: &io::Error) {
        error!("journal {} failed: {e}", self.file.path.display());
        self.failed = Some(format!("journal unavailable after write failure: {e}"));
    }
}

async fn run_writer(file: JournalFile, mut rx: mpsc::Receiver<Command>, backlog: u64) {
    let mut writer = Writer { file, backlog, waiting: Vec::new(), failed: None };
    let mut inbox = Vec::with_capacity(BATCH_LIMIT);
    while rx.recv_many(&mut inbox, BATCH_LIMIT).await > 0 {
        for command in inbox.drain(..) {
            match command {
                Command::Append(record, ack) => writer.append(record, ack),
                Command::Rewrite(records, ack) => writer.rewrite(records, ack),
                Command::Backlog(reply) => {
                    let _ = reply.send(writer.backlog);
                }
            }
        }
        writer.commit();
    }
}
