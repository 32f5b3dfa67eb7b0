//! Object source and sink interfaces.
//!
//! Sources hand out a pull-based [`ChunkStream`]. Sinks hand out an
//! [`ObjectWriter`] plus an [`UploadCompletion`] future. The writer side is
//! an explicit protocol: data chunks, then [`ObjectWriter::finish`]. A writer
//! dropped without finishing aborts the upload, so an upstream failure can
//! never be committed as a truncated object.

pub mod memory;
pub mod s3;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use tokio::sync::mpsc;

use crate::models::{ObjectRef, UploadResult};
use crate::services::error::PipelineError;

pub use memory::InMemoryStorage;
pub use s3::S3Storage;

/// Readable object body, yielded chunk by chunk.
pub type ChunkStream = BoxStream<'static, Result<Bytes, PipelineError>>;

/// Resolves once the sink has durably stored (or given up on) the object.
pub type UploadCompletion = BoxFuture<'static, Result<UploadResult, PipelineError>>;

#[async_trait]
pub trait ObjectSource: Send + Sync {
    /// Open a read stream. Fails with `NotFound`, `AccessDenied` or `Transient`.
    async fn open_read(&self, object: &ObjectRef) -> Result<ChunkStream, PipelineError>;
}

#[async_trait]
pub trait ObjectSink: Send + Sync {
    /// Open a write stream; nothing becomes visible until the writer finishes
    /// and the completion resolves.
    fn open_write(&self, object: &ObjectRef) -> (ObjectWriter, UploadCompletion);

    /// Remove an object. Removing a missing object is not an error.
    async fn remove(&self, object: &ObjectRef) -> Result<(), PipelineError>;
}

enum WriteMessage {
    Chunk(Bytes),
    Finish,
}

/// Sending half handed to the producer of an upload.
pub struct ObjectWriter {
    tx: mpsc::Sender<WriteMessage>,
}

/// Receiving half owned by a sink's completion future.
pub struct WriteReceiver {
    rx: mpsc::Receiver<WriteMessage>,
    finished: bool,
}

/// Bounded writer channel; `capacity` chunks may be in flight before
/// [`ObjectWriter::write`] waits for the sink.
pub fn write_channel(capacity: usize) -> (ObjectWriter, WriteReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        ObjectWriter { tx },
        WriteReceiver {
            rx,
            finished: false,
        },
    )
}

impl ObjectWriter {
    /// Queue a chunk, waiting while the sink is behind.
    pub async fn write(&mut self, chunk: Bytes) -> Result<(), PipelineError> {
        if chunk.is_empty() {
            return Ok(());
        }
        self.tx
            .send(WriteMessage::Chunk(chunk))
            .await
            .map_err(|_| PipelineError::SinkClosed)
    }

    /// Mark the stream complete. Only a finished stream is committed.
    pub async fn finish(self) -> Result<(), PipelineError> {
        self.tx
            .send(WriteMessage::Finish)
            .await
            .map_err(|_| PipelineError::SinkClosed)
    }
}

impl WriteReceiver {
    /// Next chunk, `Ok(None)` once the writer finished, `Err(Aborted)` when the
    /// writer went away without finishing.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, PipelineError> {
        if self.finished {
            return Ok(None);
        }
        match self.rx.recv().await {
            Some(WriteMessage::Chunk(chunk)) => Ok(Some(chunk)),
            Some(WriteMessage::Finish) => {
                self.finished = true;
                Ok(None)
            }
            None => Err(PipelineError::Aborted),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_finished_stream_ends_cleanly() {
        let (mut writer, mut receiver) = write_channel(4);
        writer.write(Bytes::from_static(b"abc")).await.unwrap();
        writer.finish().await.unwrap();

        assert_eq!(receiver.next_chunk().await.unwrap().unwrap(), "abc");
        assert!(receiver.next_chunk().await.unwrap().is_none());
        assert!(receiver.next_chunk().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dropped_writer_aborts() {
        let (mut writer, mut receiver) = write_channel(4);
        writer.write(Bytes::from_static(b"partial")).await.unwrap();
        drop(writer);

        assert!(receiver.next_chunk().await.unwrap().is_some());
        assert!(matches!(
            receiver.next_chunk().await,
            Err(PipelineError::Aborted)
        ));
    }

    #[tokio::test]
    async fn test_dropped_receiver_closes_writer() {
        let (mut writer, receiver) = write_channel(1);
        drop(receiver);
        assert!(matches!(
            writer.write(Bytes::from_static(b"x")).await,
            Err(PipelineError::SinkClosed)
        ));
    }

    #[tokio::test]
    async fn test_writer_applies_backpressure() {
        let (mut writer, mut receiver) = write_channel(2);
        writer.write(Bytes::from_static(b"1")).await.unwrap();
        writer.write(Bytes::from_static(b"2")).await.unwrap();

        // Channel is full: the third write must wait for the sink.
        let blocked =
            tokio::time::timeout(Duration::from_millis(50), writer.write(Bytes::from_static(b"3")))
                .await;
        assert!(blocked.is_err());

        assert!(receiver.next_chunk().await.unwrap().is_some());
        tokio::time::timeout(Duration::from_millis(500), writer.write(Bytes::from_static(b"3")))
            .await
            .expect("write should proceed once the sink drained a chunk")
            .unwrap();
    }
}
