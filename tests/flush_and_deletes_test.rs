#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::TempDir;

    use pennant::document::{Document, Term};
    use pennant::index::deletes::{BitmapDeleteTarget, DeleteTarget, TermsDeleteQuery};
    use pennant::index::stored_fields::read_stored_fields;
    use pennant::index::{DocumentsWriter, DocumentsWriterConfig};
    use pennant::storage::Storage;
    use pennant::storage::file::{FileStorage, FileStorageConfig};

    fn file_writer(dir: &TempDir, config: DocumentsWriterConfig) -> (Arc<dyn Storage>, DocumentsWriter) {
        let storage: Arc<dyn Storage> = Arc::new(
            FileStorage::new(dir.path(), FileStorageConfig::new(dir.path())).unwrap(),
        );
        let writer = DocumentsWriter::new(Arc::clone(&storage), config).unwrap();
        (storage, writer)
    }

    fn doc(id: &str, color: &str) -> Document {
        Document::builder()
            .add_text("id", id, true)
            .add_text("color", color, false)
            .build()
    }

    #[test]
    fn test_count_threshold_with_file_storage() {
        let dir = TempDir::new().unwrap();
        let config = DocumentsWriterConfig::default()
            .with_ram_buffer_size(None)
            .with_max_buffered_docs(Some(2));
        let (storage, writer) = file_writer(&dir, config);
        let session = writer.session();

        // 1. The second document commits the writer to a flush.
        let mut flushes = Vec::new();
        for i in 0..3 {
            if writer.add_document(&session, doc(&i.to_string(), "red")).unwrap() {
                flushes.push(i);
                writer.flush(false).unwrap();
            }
        }
        assert_eq!(flushes, vec![1]);
        assert_eq!(writer.num_docs_in_ram(), 1);

        // 2. Closing the doc store makes both segments readable from disk.
        writer.flush(true).unwrap();
        let segments = writer.take_flushed_segments();
        assert_eq!(
            segments.iter().map(|s| s.num_docs).collect::<Vec<_>>(),
            vec![2, 1]
        );
        for segment in &segments {
            for file in &segment.files {
                assert!(storage.file_exists(file), "{file} missing");
            }
        }
        assert!(dir.path().join("_0.fdt").exists());
        let stored = read_stored_fields(&*storage, "_0").unwrap();
        assert_eq!(stored.len(), 3);
    }

    #[test]
    fn test_deletes_apply_across_segments() {
        let dir = TempDir::new().unwrap();
        let (storage, writer) = file_writer(&dir, DocumentsWriterConfig::default());
        let session = writer.session();

        // Segment _0: docs a, b. Segment _1: doc c and an update of a.
        writer.add_document(&session, doc("a", "red")).unwrap();
        writer.add_document(&session, doc("b", "blue")).unwrap();
        writer.flush(false).unwrap();
        writer.add_document(&session, doc("c", "red")).unwrap();
        writer
            .update_document(&session, doc("a", "green"), Term::new("id", "a"))
            .unwrap();
        writer
            .buffer_delete_query(Arc::new(TermsDeleteQuery::new(vec![Term::new("color", "blue")])))
            .unwrap();
        writer.flush(true).unwrap();
        assert!(writer.has_deletes());

        let mut first = BitmapDeleteTarget::from_segment(&*storage, "_0", 2).unwrap();
        let mut second = BitmapDeleteTarget::from_segment(&*storage, "_1", 2).unwrap();
        {
            let mut targets: [&mut dyn DeleteTarget; 2] = [&mut first, &mut second];
            assert!(writer.apply_deletes(&mut targets).unwrap());
        }

        // The update deletes the old a, not itself; the query deletes b.
        assert_eq!(first.live_docs(), Vec::<u32>::new());
        assert_eq!(second.live_docs(), vec![0, 1]);
        assert!(!writer.has_deletes());
    }

    #[test]
    fn test_deletes_buffered_then_aborted_are_dropped() {
        let dir = TempDir::new().unwrap();
        let (_, writer) = file_writer(&dir, DocumentsWriterConfig::default());
        let session = writer.session();

        writer.add_document(&session, doc("a", "red")).unwrap();
        writer.buffer_delete_term(Term::new("id", "a")).unwrap();
        let aborted = writer.abort();

        let mut aborted = aborted;
        aborted.sort();
        assert_eq!(aborted, vec!["_0.fdt".to_string(), "_0.fdx".to_string()]);
        assert!(!writer.has_deletes());
        assert_eq!(writer.deletes_ram_used(), 0);
        assert_eq!(writer.ram_used(), 0);
    }

    #[test]
    fn test_deletes_flushed_without_documents() {
        let dir = TempDir::new().unwrap();
        let (_, writer) = file_writer(&dir, DocumentsWriterConfig::default());

        writer.buffer_delete_term(Term::new("id", "a")).unwrap();
        assert!(!writer.has_deletes());
        assert_eq!(writer.flush(false).unwrap(), 0);
        assert!(writer.has_deletes());
        assert!(writer.take_flushed_segments().is_empty());
        writer.with_deletes_flushed(|deletes| {
            assert_eq!(deletes.term_limit(&Term::new("id", "a")), Some(0));
        });
    }

    #[test]
    fn test_delete_term_count_requests_flush() {
        let dir = TempDir::new().unwrap();
        let config = DocumentsWriterConfig::default().with_max_buffered_delete_terms(Some(2));
        let (_, writer) = file_writer(&dir, config);

        assert!(!writer.buffer_delete_term(Term::new("id", "a")).unwrap());
        // Repeats of the same term count toward the limit.
        assert!(writer.buffer_delete_term(Term::new("id", "a")).unwrap());
        assert!(writer.should_apply_deletes());
        writer.flush(false).unwrap();
        assert!(!writer.should_apply_deletes());
    }
}
