#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread::{self, JoinHandle};
    use std::time::Duration;

    use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
    use parking_lot::Mutex;

    use pennant::document::{Document, Field, FieldValue};
    use pennant::error::{PennantError, Result};
    use pennant::index::consumer::{
        DocConsumer, DocConsumerPerThread, DocState, DocWriter, SegmentWriteState,
    };
    use pennant::index::{DocumentsWriter, DocumentsWriterConfig};
    use pennant::storage::memory::MemoryStorage;

    type Log = Arc<Mutex<Vec<u32>>>;

    /// A chain that records the order documents reach the doc store.
    ///
    /// Fields named `wait` block processing until the gate opens, `fail`
    /// fails the document, and `explode` fails it with an aborting error.
    struct Recording {
        written: Log,
        started: Sender<u32>,
        gate: Receiver<()>,
    }

    struct RecordingThread {
        written: Log,
        started: Sender<u32>,
        gate: Receiver<()>,
    }

    struct Written {
        doc_id: u32,
        written: Log,
    }

    impl DocWriter for Written {
        fn doc_id(&self) -> u32 {
            self.doc_id
        }

        fn finish(self: Box<Self>) -> Result<()> {
            self.written.lock().push(self.doc_id);
            Ok(())
        }

        fn abort(self: Box<Self>) {}

        fn size_in_bytes(&self) -> usize {
            64
        }
    }

    impl DocConsumer for Recording {
        type PerThread = RecordingThread;

        fn add_thread(&self) -> Result<RecordingThread> {
            Ok(RecordingThread {
                written: Arc::clone(&self.written),
                started: self.started.clone(),
                gate: self.gate.clone(),
            })
        }

        fn flush(&self, _threads: &mut [&mut RecordingThread], state: &mut SegmentWriteState) -> Result<()> {
            state.flushed_files.insert(state.segment_file_name("rec"));
            Ok(())
        }

        fn close_doc_store(&self, _state: &mut SegmentWriteState) -> Result<()> {
            Ok(())
        }

        fn abort(&self) {}

        fn free_ram(&self) -> bool {
            false
        }
    }

    impl DocConsumerPerThread for RecordingThread {
        fn start_document(&mut self, _doc_state: &DocState) {}

        fn process_fields(&mut self, doc_state: &mut DocState, fields: &mut [Field]) -> Result<()> {
            for field in fields.iter() {
                match field.name() {
                    "wait" => {
                        let _ = self.started.send(doc_state.doc_id);
                        self.gate
                            .recv()
                            .map_err(|e| PennantError::other(e.to_string()))?;
                    }
                    "fail" => return Err(PennantError::analysis("bad document")),
                    "explode" => return Err(PennantError::aborting("corrupted buffer")),
                    _ => {}
                }
            }
            Ok(())
        }

        fn finish_document(&mut self, doc_state: &DocState) -> Result<Option<Box<dyn DocWriter>>> {
            Ok(Some(Box::new(Written {
                doc_id: doc_state.doc_id,
                written: Arc::clone(&self.written),
            })))
        }

        fn abort_document(&mut self, _doc_state: &DocState) {}

        fn abort(&mut self) {}
    }

    struct Fixture {
        writer: Arc<DocumentsWriter<Recording>>,
        written: Log,
        started: Receiver<u32>,
        gate: Sender<()>,
    }

    fn fixture() -> Fixture {
        fixture_with(DocumentsWriterConfig::default())
    }

    /// A writer whose producers pause as soon as any document waits.
    fn paused_fixture() -> Fixture {
        fixture_with(DocumentsWriterConfig::default().with_wait_queue_fractions(0.0, 0.0))
    }

    fn fixture_with(config: DocumentsWriterConfig) -> Fixture {
        let written: Log = Arc::new(Mutex::new(Vec::new()));
        let (started_tx, started_rx) = unbounded();
        let (gate_tx, gate_rx) = bounded(0);
        let storage = Arc::new(MemoryStorage::new_default());
        let writer = DocumentsWriter::with_consumer(storage, config, |_| {
            Ok(Recording {
                written: Arc::clone(&written),
                started: started_tx,
                gate: gate_rx,
            })
        })
        .unwrap();
        Fixture {
            writer: Arc::new(writer),
            written,
            started: started_rx,
            gate: gate_tx,
        }
    }

    fn marked(name: &str) -> Document {
        Document::builder()
            .add_field(Field::stored(name, FieldValue::from("x")))
            .build()
    }

    fn plain() -> Document {
        marked("plain")
    }

    fn spawn_add(writer: &Arc<DocumentsWriter<Recording>>, doc: Document) -> JoinHandle<Result<bool>> {
        let writer = Arc::clone(writer);
        thread::spawn(move || {
            let session = writer.session();
            writer.add_document(&session, doc)
        })
    }

    #[test]
    fn test_late_finisher_holds_back_later_docs() {
        let f = fixture();

        // 1. Doc 0 blocks mid-processing on its own thread.
        let slow = {
            let writer = Arc::clone(&f.writer);
            thread::spawn(move || {
                let session = writer.session();
                writer.add_document(&session, marked("wait"))
            })
        };
        assert_eq!(f.started.recv().unwrap(), 0);

        // 2. Doc 1 finishes first but must wait for doc 0.
        let session = f.writer.session();
        f.writer.add_document(&session, plain()).unwrap();
        assert!(f.written.lock().is_empty());
        assert_eq!(f.writer.num_docs_in_store(), 0);

        // 3. Releasing doc 0 writes both, in order.
        f.gate.send(()).unwrap();
        slow.join().unwrap().unwrap();
        assert_eq!(*f.written.lock(), vec![0, 1]);
        assert_eq!(f.writer.num_docs_in_store(), 2);
        assert_eq!(f.writer.flush(false).unwrap(), 2);
    }

    #[test]
    fn test_non_aborting_failure_deletes_only_that_doc() {
        let f = fixture();
        let session = f.writer.session();

        f.writer.add_document(&session, plain()).unwrap();
        let err = f.writer.add_document(&session, marked("fail")).unwrap_err();
        assert!(!err.is_aborting());
        f.writer.add_document(&session, plain()).unwrap();

        assert_eq!(f.writer.num_docs_in_ram(), 3);
        assert_eq!(*f.written.lock(), vec![0, 2]);
        f.writer
            .with_deletes_in_ram(|deletes| assert_eq!(deletes.doc_ids(), &[1]));

        assert_eq!(f.writer.flush(false).unwrap(), 3);
        f.writer
            .with_deletes_flushed(|deletes| assert_eq!(deletes.doc_ids(), &[1]));
    }

    #[test]
    fn test_aborting_failure_discards_buffer() {
        let f = fixture();
        let session = f.writer.session();

        f.writer.add_document(&session, plain()).unwrap();
        f.writer.add_document(&session, plain()).unwrap();
        let err = f.writer.add_document(&session, marked("explode")).unwrap_err();
        assert!(err.is_aborting());

        assert_eq!(f.writer.num_docs_in_ram(), 0);
        assert_eq!(f.writer.segment(), None);
        f.writer.with_deletes_in_ram(|deletes| assert!(!deletes.any()));

        // The writer keeps working with a fresh segment.
        f.writer.add_document(&session, plain()).unwrap();
        assert_eq!(f.writer.segment().as_deref(), Some("_1"));
        assert_eq!(f.writer.flush(true).unwrap(), 1);
    }

    #[test]
    fn test_abort_discards_in_flight_document() {
        let f = fixture();

        let slow = {
            let writer = Arc::clone(&f.writer);
            thread::spawn(move || {
                let session = writer.session();
                writer.add_document(&session, marked("wait"))
            })
        };
        assert_eq!(f.started.recv().unwrap(), 0);

        let aborter = {
            let writer = Arc::clone(&f.writer);
            thread::spawn(move || writer.abort())
        };
        while !f.writer.is_aborting() {
            thread::sleep(Duration::from_millis(1));
        }

        f.gate.send(()).unwrap();
        let result = slow.join().unwrap();
        assert!(matches!(result, Err(PennantError::Aborted)));
        aborter.join().unwrap();

        assert!(f.written.lock().is_empty());
        assert_eq!(f.writer.num_docs_in_ram(), 0);
        assert!(!f.writer.is_aborting());
    }

    #[test]
    fn test_flush_waits_for_in_flight_document() {
        let f = fixture();

        let slow = {
            let writer = Arc::clone(&f.writer);
            thread::spawn(move || {
                let session = writer.session();
                writer.add_document(&session, marked("wait"))
            })
        };
        assert_eq!(f.started.recv().unwrap(), 0);

        let flusher = {
            let writer = Arc::clone(&f.writer);
            thread::spawn(move || writer.flush(false))
        };
        thread::sleep(Duration::from_millis(20));
        assert_eq!(f.writer.flushed_doc_count(), 0);

        f.gate.send(()).unwrap();
        slow.join().unwrap().unwrap();
        assert_eq!(flusher.join().unwrap().unwrap(), 1);
        assert_eq!(*f.written.lock(), vec![0]);

        let segments = f.writer.take_flushed_segments();
        assert!(segments[0].files.contains("_0.rec"));
    }

    #[test]
    fn test_waiting_document_pauses_its_producer() {
        let f = paused_fixture();

        // 1. Doc 0 blocks mid-processing.
        let slow = spawn_add(&f.writer, marked("wait"));
        assert_eq!(f.started.recv().unwrap(), 0);

        // 2. Doc 1 finishes first, waits in the queue and pauses its producer.
        let paused = spawn_add(&f.writer, plain());
        thread::sleep(Duration::from_millis(50));
        assert!(!paused.is_finished());
        assert_eq!(f.writer.num_docs_in_ram(), 2);
        assert!(f.written.lock().is_empty());

        // 3. Writing doc 0 drains the queue and releases the producer.
        f.gate.send(()).unwrap();
        slow.join().unwrap().unwrap();
        paused.join().unwrap().unwrap();
        assert_eq!(*f.written.lock(), vec![0, 1]);
        assert_eq!(f.writer.num_docs_in_store(), 2);
    }

    #[test]
    fn test_paused_producer_sees_abort_of_its_document() {
        let f = paused_fixture();

        // 1. Doc 0 blocks, then fails with an aborting error once released.
        let exploding = Document::builder()
            .add_field(Field::stored("wait", FieldValue::from("x")))
            .add_field(Field::stored("explode", FieldValue::from("x")))
            .build();
        let slow = spawn_add(&f.writer, exploding);
        assert_eq!(f.started.recv().unwrap(), 0);

        // 2. Doc 1 is held in the queue behind doc 0.
        let paused = spawn_add(&f.writer, plain());
        thread::sleep(Duration::from_millis(50));
        assert!(!paused.is_finished());

        // 3. The abort discards doc 1, and its producer is told so.
        f.gate.send(()).unwrap();
        let err = slow.join().unwrap().unwrap_err();
        assert!(err.is_aborting());
        let result = paused.join().unwrap();
        assert!(matches!(result, Err(PennantError::Aborted)), "{result:?}");

        assert!(f.written.lock().is_empty());
        assert_eq!(f.writer.num_docs_in_ram(), 0);
        assert!(!f.writer.is_aborting());

        // 4. The writer keeps accepting documents.
        let session = f.writer.session();
        f.writer.add_document(&session, plain()).unwrap();
        assert_eq!(*f.written.lock(), vec![0]);
    }
}
