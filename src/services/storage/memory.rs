use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::{ChunkStream, ObjectSink, ObjectSource, ObjectWriter, UploadCompletion, write_channel};
use crate::models::{ObjectRef, UploadResult};
use crate::services::error::PipelineError;
use crate::utils::hash::ChunkHasher;

const DEFAULT_READ_CHUNK: usize = 16 * 1024;
const WRITE_CAPACITY: usize = 4;

/// Process-local object store. Uploads commit atomically on finish.
pub struct InMemoryStorage {
    objects: Arc<Mutex<HashMap<ObjectRef, Bytes>>>,
    read_chunk_size: usize,
    reads: AtomicUsize,
    writes: AtomicUsize,
    removes: AtomicUsize,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            objects: Arc::new(Mutex::new(HashMap::new())),
            read_chunk_size: DEFAULT_READ_CHUNK,
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            removes: AtomicUsize::new(0),
        }
    }

    /// Size of the chunks handed out by [`ObjectSource::open_read`].
    pub fn with_read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size.max(1);
        self
    }

    pub fn insert(&self, object: ObjectRef, data: impl Into<Bytes>) {
        self.lock().insert(object, data.into());
    }

    pub fn get(&self, object: &ObjectRef) -> Option<Bytes> {
        self.lock().get(object).cloned()
    }

    pub fn contains(&self, object: &ObjectRef) -> bool {
        self.lock().contains_key(object)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of `open_read` calls served.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of `open_write` calls served.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn remove_count(&self) -> usize {
        self.removes.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ObjectRef, Bytes>> {
        // A poisoned map still holds consistent entries: inserts are single calls.
        self.objects.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ObjectSource for InMemoryStorage {
    async fn open_read(&self, object: &ObjectRef) -> Result<ChunkStream, PipelineError> {
        self.reads.fetch_add(1, Ordering::SeqCst);

        let data = self
            .get(object)
            .ok_or_else(|| PipelineError::NotFound(object.to_string()))?;

        let chunk_size = self.read_chunk_size;
        let chunks = (0..data.len())
            .step_by(chunk_size)
            .map(move |start| {
                let end = (start + chunk_size).min(data.len());
                Ok(data.slice(start..end))
            })
            .collect::<Vec<Result<Bytes, PipelineError>>>();

        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

#[async_trait]
impl ObjectSink for InMemoryStorage {
    fn open_write(&self, object: &ObjectRef) -> (ObjectWriter, UploadCompletion) {
        self.writes.fetch_add(1, Ordering::SeqCst);

        let (writer, mut receiver) = write_channel(WRITE_CAPACITY);
        let objects = self.objects.clone();
        let object = object.clone();

        let completion: UploadCompletion = Box::pin(async move {
            let mut buffer = BytesMut::new();
            let mut hasher = ChunkHasher::new();
            let mut parts = 0u32;

            while let Some(chunk) = receiver.next_chunk().await? {
                hasher.update(&chunk);
                buffer.extend_from_slice(&chunk);
                parts += 1;
            }

            let (checksum, size) = hasher.finalize();
            objects
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(object.clone(), buffer.freeze());

            Ok::<_, PipelineError>(UploadResult {
                bucket: object.bucket,
                key: object.key,
                size,
                parts,
                checksum,
                e_tag: None,
            })
        });

        (writer, completion)
    }

    async fn remove(&self, object: &ObjectRef) -> Result<(), PipelineError> {
        self.removes.fetch_add(1, Ordering::SeqCst);
        self.lock().remove(object);
        Ok(())
    }
}
