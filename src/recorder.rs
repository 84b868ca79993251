//! # Recording Module
//!
//! Batched persistence of heart rate samples through an external sink.
//!
//! ## Architecture
//! - **SampleRecorder**: front end, cheap to call from the processing thread
//! - **Writer Thread**: owns the sink and the batch buffer, fed over a
//!   crossbeam channel
//! - **PendingStore**: JSON file holding batches the sink rejected
//!
//! ## Flow
//! ```text
//! record() ─► channel ─► buffer ──(max_batch_size / flush / drop)──► sink
//!                                                        │ failure
//!                                                        ▼
//!                                                  pending store ──► retried before next batch
//! ```

use crate::error::RecorderError;
use crate::samples::Timestamp;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartRateRecord {
    pub id: Uuid,
    pub session_id: Uuid,
    pub athlete_id: Uuid,
    pub timestamp: Timestamp,
    pub heart_rate: i32,
}

impl HeartRateRecord {
    pub fn new(session_id: Uuid, athlete_id: Uuid, timestamp: Timestamp, heart_rate: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            athlete_id,
            timestamp,
            heart_rate,
        }
    }
}

/// External storage for heart rate records
pub trait RecordSink: Send + 'static {
    fn write_batch(&mut self, records: &[HeartRateRecord]) -> Result<(), RecorderError>;
}

/// File backed holding area for batches the sink could not take.
///
/// The file is removed once it holds nothing.
#[derive(Debug, Clone)]
pub struct PendingStore {
    path: PathBuf,
}

impl PendingStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Vec<HeartRateRecord>, RecorderError> {
        match fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(RecorderError::Encoding),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(RecorderError::PendingStore(e)),
        }
    }

    pub fn store(&self, records: &[HeartRateRecord]) -> Result<(), RecorderError> {
        if records.is_empty() {
            return match fs::remove_file(&self.path) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(RecorderError::PendingStore(e)),
                _ => Ok(()),
            };
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(RecorderError::PendingStore)?;
        }
        let bytes = serde_json::to_vec(records).map_err(RecorderError::Encoding)?;
        fs::write(&self.path, bytes).map_err(RecorderError::PendingStore)
    }

    /// Moves an unreadable file out of the way, next to the original as
    /// `<name>.corrupt`, so new batches can be parked again
    pub fn set_aside(&self) -> Result<PathBuf, RecorderError> {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".corrupt");
        let target = self.path.with_file_name(name);
        fs::rename(&self.path, &target).map_err(RecorderError::PendingStore)?;
        Ok(target)
    }

    pub fn append(&self, records: &[HeartRateRecord]) -> Result<(), RecorderError> {
        let mut pending = self.load()?;
        pending.extend_from_slice(records);
        self.store(&pending)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecorderOptions {
    pub max_batch_size: usize,
    pub pending_store_path: Option<PathBuf>,
}

impl Default for RecorderOptions {
    fn default() -> Self {
        Self {
            max_batch_size: 120,
            pending_store_path: None,
        }
    }
}

/// Command sent from the recorder to the writer thread
#[derive(Debug)]
enum RecorderCommand {
    Record(HeartRateRecord),
    /// Flush, then acknowledge
    Flush(Sender<()>),
    Stop,
}

struct Writer {
    sink: Box<dyn RecordSink>,
    buffer: Vec<HeartRateRecord>,
    max_batch_size: usize,
    pending: Option<PendingStore>,
}

impl Writer {
    fn run(mut self, commands: Receiver<RecorderCommand>) {
        loop {
            match commands.recv() {
                Ok(RecorderCommand::Record(record)) => {
                    self.buffer.push(record);
                    if self.buffer.len() >= self.max_batch_size {
                        self.flush();
                    }
                }
                Ok(RecorderCommand::Flush(ack)) => {
                    self.flush();
                    let _ = ack.send(());
                }
                Ok(RecorderCommand::Stop) => {
                    self.flush();
                    log::info!("Recorder writer thread stopped");
                    break;
                }
                Err(_) => {
                    self.flush();
                    log::info!("Recorder writer thread: command channel closed");
                    break;
                }
            }
        }
    }

    fn flush(&mut self) {
        let replayed = self.replay_pending();
        if self.buffer.is_empty() {
            return;
        }

        let batch = std::mem::take(&mut self.buffer);
        if !replayed {
            self.park(&batch);
            return;
        }

        match self.sink.write_batch(&batch) {
            Ok(()) => log::debug!("Persisted {} heart rate records", batch.len()),
            Err(e) => {
                log::error!("{}", e);
                self.park(&batch);
            }
        }
    }

    /// Retries parked records. Returns false while records remain parked.
    fn replay_pending(&mut self) -> bool {
        let Some(store) = &self.pending else {
            return true;
        };

        let parked = match store.load() {
            Ok(parked) => parked,
            Err(e) => {
                log::error!("Unreadable pending store {}: {}", store.path().display(), e);
                match store.set_aside() {
                    Ok(target) => log::warn!("Moved pending store to {}", target.display()),
                    Err(e) => log::error!("{}", e),
                }
                return true;
            }
        };
        if parked.is_empty() {
            return true;
        }

        match self.sink.write_batch(&parked) {
            Ok(()) => {
                log::info!("Replayed {} pending heart rate records", parked.len());
                if let Err(e) = store.store(&[]) {
                    log::error!("{}", e);
                }
                true
            }
            Err(e) => {
                log::warn!("Pending heart rate records still not accepted: {}", e);
                false
            }
        }
    }

    fn park(&self, batch: &[HeartRateRecord]) {
        match &self.pending {
            Some(store) => match store.append(batch) {
                Ok(()) => log::warn!("Parked {} heart rate records in {}", batch.len(), store.path().display()),
                Err(e) => log::error!("Dropping {} heart rate records: {}", batch.len(), e),
            },
            None => log::error!("Dropping {} heart rate records, no pending store configured", batch.len()),
        }
    }
}

/// Batches records onto a background writer thread.
///
/// Dropping the recorder flushes what is buffered and joins the thread.
pub struct SampleRecorder {
    command_tx: Sender<RecorderCommand>,
    writer_thread: Option<thread::JoinHandle<()>>,
}

impl SampleRecorder {
    pub fn new(sink: impl RecordSink, options: RecorderOptions) -> Self {
        let (command_tx, command_rx) = unbounded();
        let writer = Writer {
            sink: Box::new(sink),
            buffer: Vec::with_capacity(options.max_batch_size),
            max_batch_size: options.max_batch_size.max(1),
            pending: options.pending_store_path.map(PendingStore::new),
        };

        let writer_thread = thread::spawn(move || writer.run(command_rx));

        SampleRecorder {
            command_tx,
            writer_thread: Some(writer_thread),
        }
    }

    /// Queues a record without blocking
    pub fn record(&self, record: HeartRateRecord) -> Result<(), RecorderError> {
        self.command_tx
            .send(RecorderCommand::Record(record))
            .map_err(|_| RecorderError::WriterStopped)
    }

    /// Writes everything buffered and waits until the writer is done
    pub fn flush(&self) -> Result<(), RecorderError> {
        let (ack_tx, ack_rx) = bounded(1);
        self.command_tx
            .send(RecorderCommand::Flush(ack_tx))
            .map_err(|_| RecorderError::WriterStopped)?;
        ack_rx.recv().map_err(|_| RecorderError::WriterStopped)
    }
}

impl Drop for SampleRecorder {
    fn drop(&mut self) {
        let _ = self.command_tx.send(RecorderCommand::Stop);

        if let Some(handle) = self.writer_thread.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;

    #[derive(Clone, Default)]
    struct MemorySink {
        batches: Arc<Mutex<Vec<Vec<HeartRateRecord>>>>,
        failing: Arc<AtomicBool>,
    }

    impl RecordSink for MemorySink {
        fn write_batch(&mut self, records: &[HeartRateRecord]) -> Result<(), RecorderError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(RecorderError::Sink("store offline".into()));
            }
            self.batches.lock().unwrap().push(records.to_vec());
            Ok(())
        }
    }

    impl MemorySink {
        fn batch_sizes(&self) -> Vec<usize> {
            self.batches.lock().unwrap().iter().map(Vec::len).collect()
        }
    }

    fn record(second: i64, bpm: i32) -> HeartRateRecord {
        HeartRateRecord::new(Uuid::nil(), Uuid::nil(), Utc.timestamp_opt(second, 0).unwrap(), bpm)
    }

    fn options(max_batch_size: usize, pending: Option<PathBuf>) -> RecorderOptions {
        RecorderOptions {
            max_batch_size,
            pending_store_path: pending,
        }
    }

    #[test]
    fn test_batches_flush_at_max_size() {
        let sink = MemorySink::default();
        let recorder = SampleRecorder::new(sink.clone(), options(3, None));
        for second in 0..7 {
            recorder.record(record(second, 100)).unwrap();
        }
        recorder.flush().unwrap();
        assert_eq!(sink.batch_sizes(), vec![3, 3, 1]);
    }

    #[test]
    fn test_drop_flushes_remaining() {
        let sink = MemorySink::default();
        {
            let recorder = SampleRecorder::new(sink.clone(), options(10, None));
            recorder.record(record(0, 90)).unwrap();
            recorder.record(record(1, 91)).unwrap();
        }
        assert_eq!(sink.batch_sizes(), vec![2]);
        assert_eq!(sink.batches.lock().unwrap()[0][1].heart_rate, 91);
    }

    #[test]
    fn test_failed_batch_is_parked_then_replayed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pending").join("hr.json");
        let sink = MemorySink::default();
        sink.failing.store(true, Ordering::SeqCst);

        let recorder = SampleRecorder::new(sink.clone(), options(2, Some(path.clone())));
        recorder.record(record(0, 120)).unwrap();
        recorder.record(record(1, 121)).unwrap();
        recorder.flush().unwrap();

        let parked = PendingStore::new(&path).load().unwrap();
        assert_eq!(parked.len(), 2);
        assert!(sink.batch_sizes().is_empty());

        // Still failing: new records queue up behind the parked ones
        recorder.record(record(2, 122)).unwrap();
        recorder.flush().unwrap();
        assert_eq!(PendingStore::new(&path).load().unwrap().len(), 3);

        sink.failing.store(false, Ordering::SeqCst);
        recorder.record(record(3, 123)).unwrap();
        recorder.flush().unwrap();

        assert_eq!(sink.batch_sizes(), vec![3, 1]);
        assert!(!path.exists());
        let replayed: Vec<i32> = sink.batches.lock().unwrap()[0].iter().map(|r| r.heart_rate).collect();
        assert_eq!(replayed, vec![120, 121, 122]);
    }

    #[test]
    fn test_pending_store_round_trip_and_cleanup() {
        let dir = tempdir().unwrap();
        let store = PendingStore::new(dir.path().join("hr.json"));
        assert!(store.load().unwrap().is_empty());

        store.append(&[record(0, 80)]).unwrap();
        store.append(&[record(1, 81)]).unwrap();
        assert_eq!(store.load().unwrap().len(), 2);

        store.store(&[]).unwrap();
        assert!(!store.path().exists());
        store.store(&[]).unwrap();
    }

    #[test]
    fn test_corrupt_pending_store_reports_encoding_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hr.json");
        fs::write(&path, b"{broken").unwrap();
        assert!(matches!(PendingStore::new(&path).load(), Err(RecorderError::Encoding(_))));
    }

    #[test]
    fn test_corrupt_pending_store_does_not_block_new_batches() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hr.json");
        fs::write(&path, b"not json at all").unwrap();
        let sink = MemorySink::default();

        let recorder = SampleRecorder::new(sink.clone(), options(10, Some(path.clone())));
        recorder.record(record(0, 110)).unwrap();
        recorder.flush().unwrap();
        assert_eq!(sink.batch_sizes(), vec![1]);

        let moved = dir.path().join("hr.json.corrupt");
        assert_eq!(fs::read(&moved).unwrap(), b"not json at all");
        assert!(!path.exists());

        // The store is usable again for parking
        sink.failing.store(true, Ordering::SeqCst);
        recorder.record(record(1, 111)).unwrap();
        recorder.flush().unwrap();
        assert_eq!(PendingStore::new(&path).load().unwrap().len(), 1);
    }
}
