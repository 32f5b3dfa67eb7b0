use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use image::ImageFormat;
use tokio_util::io::ReaderStream;

use super::{ChunkStream, ObjectSink, ObjectSource, ObjectWriter, UploadCompletion, WriteReceiver, write_channel};
use crate::config::MIN_PART_SIZE;
use crate::models::{ObjectRef, UploadResult};
use crate::services::error::PipelineError;
use crate::utils::hash::ChunkHasher;

/// S3 (or MinIO) backed source and sink.
///
/// Outputs smaller than one part go up with a single `PutObject`; larger ones
/// use a multipart upload that is aborted on any failure, so a failed
/// invocation never leaves a visible partial object.
#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    part_size: usize,
    write_capacity: usize,
}

impl S3Storage {
    pub fn new(client: Client, part_size: usize, write_capacity: usize) -> Self {
        Self {
            client,
            part_size: part_size.max(MIN_PART_SIZE),
            write_capacity: write_capacity.max(1),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl ObjectSource for S3Storage {
    async fn open_read(&self, object: &ObjectRef) -> Result<ChunkStream, PipelineError> {
        let output = self
            .client
            .get_object()
            .bucket(&object.bucket)
            .key(&object.key)
            .send()
            .await
            .map_err(|e| classify_get_error(e, object))?;

        let stream = ReaderStream::new(output.body.into_async_read())
            .map(|chunk| chunk.map_err(PipelineError::from));

        Ok(Box::pin(stream))
    }
}

#[async_trait]
impl ObjectSink for S3Storage {
    fn open_write(&self, object: &ObjectRef) -> (ObjectWriter, UploadCompletion) {
        let (writer, receiver) = write_channel(self.write_capacity);
        let upload = Upload {
            client: self.client.clone(),
            bucket: object.bucket.clone(),
            key: object.key.clone(),
            part_size: self.part_size,
        };
        let completion: UploadCompletion = Box::pin(upload.run(receiver));
        (writer, completion)
    }

    async fn remove(&self, object: &ObjectRef) -> Result<(), PipelineError> {
        self.client
            .delete_object()
            .bucket(&object.bucket)
            .key(&object.key)
            .send()
            .await
            .map_err(|e| PipelineError::Upload(DisplayErrorContext(&e).to_string()))?;
        Ok(())
    }
}

fn classify_get_error<R>(err: SdkError<GetObjectError, R>, object: &ObjectRef) -> PipelineError
where
    R: std::fmt::Debug,
{
    let message = format!("{}: {}", object, DisplayErrorContext(&err));
    match &err {
        SdkError::ServiceError(service) => {
            let service_error = service.err();
            if service_error.is_no_such_key() {
                return PipelineError::NotFound(message);
            }
            match service_error.code() {
                Some("NoSuchBucket") | Some("NotFound") => PipelineError::NotFound(message),
                Some("AccessDenied") | Some("Forbidden") => PipelineError::AccessDenied(message),
                _ => PipelineError::Transient(message),
            }
        }
        _ => PipelineError::Transient(message),
    }
}

/// Content type announced for an uploaded derivative.
///
/// `head` is the start of the body. Its magic bytes decide, since the
/// encoder keeps the sniffed source format even when the key's extension
/// disagrees. The extension is the fallback.
pub fn content_type_for(key: &str, head: &[u8]) -> String {
    let format = image::guess_format(head).ok().or_else(|| {
        key.rsplit_once('.')
            .and_then(|(_, ext)| ImageFormat::from_extension(ext))
    });

    match format {
        Some(ImageFormat::Jpeg) => mime::IMAGE_JPEG.to_string(),
        Some(ImageFormat::Png) => mime::IMAGE_PNG.to_string(),
        Some(ImageFormat::Gif) => mime::IMAGE_GIF.to_string(),
        Some(ImageFormat::Bmp) => mime::IMAGE_BMP.to_string(),
        Some(ImageFormat::WebP) => "image/webp".to_string(),
        _ => mime::APPLICATION_OCTET_STREAM.to_string(),
    }
}

struct Upload {
    client: Client,
    bucket: String,
    key: String,
    part_size: usize,
}

impl Upload {
    async fn run(self, mut receiver: WriteReceiver) -> Result<UploadResult, PipelineError> {
        let mut buffer = BytesMut::with_capacity(self.part_size);
        let mut hasher = ChunkHasher::new();
        let mut multipart: Option<Multipart> = None;

        loop {
            let chunk = match receiver.next_chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => {
                    if let Some(upload) = multipart.take() {
                        upload.abort().await;
                    }
                    return Err(e);
                }
            };

            hasher.update(&chunk);
            buffer.extend_from_slice(&chunk);

            if buffer.len() >= self.part_size {
                let part = buffer.split_to(self.part_size).freeze();
                if multipart.is_none() {
                    multipart = Some(self.create_multipart(&part).await?);
                }
                if let Some(upload) = multipart.as_mut() {
                    if let Err(e) = upload.upload_part(part).await {
                        if let Some(upload) = multipart.take() {
                            upload.abort().await;
                        }
                        return Err(e);
                    }
                }
            }
        }

        let (checksum, size) = hasher.finalize();

        let (e_tag, parts) = match multipart {
            None => (self.put_whole(buffer.freeze()).await?, 1),
            Some(mut upload) => {
                if !buffer.is_empty() {
                    if let Err(e) = upload.upload_part(buffer.freeze()).await {
                        upload.abort().await;
                        return Err(e);
                    }
                }
                let parts = upload.parts.len() as u32;
                (upload.complete().await?, parts)
            }
        };

        tracing::debug!(
            "Stored s3://{}/{} ({} bytes, {} part(s))",
            self.bucket,
            self.key,
            size,
            parts
        );

        Ok(UploadResult {
            bucket: self.bucket,
            key: self.key,
            size,
            parts,
            checksum,
            e_tag,
        })
    }

    async fn put_whole(&self, data: Bytes) -> Result<Option<String>, PipelineError> {
        let output = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .content_type(content_type_for(&self.key, &data))
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| PipelineError::Upload(DisplayErrorContext(&e).to_string()))?;
        Ok(output.e_tag().map(str::to_string))
    }

    async fn create_multipart(&self, first_part: &[u8]) -> Result<Multipart, PipelineError> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .content_type(content_type_for(&self.key, first_part))
            .send()
            .await
            .map_err(|e| PipelineError::Upload(DisplayErrorContext(&e).to_string()))?;

        let upload_id = output
            .upload_id()
            .ok_or_else(|| PipelineError::Upload("No upload ID".to_string()))?
            .to_string();

        Ok(Multipart {
            client: self.client.clone(),
            bucket: self.bucket.clone(),
            key: self.key.clone(),
            upload_id: Some(upload_id),
            parts: Vec::new(),
        })
    }
}

/// An open multipart upload. Dropping it unfinished schedules an abort.
struct Multipart {
    client: Client,
    bucket: String,
    key: String,
    upload_id: Option<String>,
    parts: Vec<CompletedPart>,
}

impl Multipart {
    fn upload_id(&self) -> Result<&str, PipelineError> {
        self.upload_id
            .as_deref()
            .ok_or_else(|| PipelineError::Upload("multipart upload already closed".to_string()))
    }

    async fn upload_part(&mut self, data: Bytes) -> Result<(), PipelineError> {
        let part_number = self.parts.len() as i32 + 1;
        let output = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(self.upload_id()?)
            .body(ByteStream::from(data))
            .part_number(part_number)
            .send()
            .await
            .map_err(|e| PipelineError::Upload(DisplayErrorContext(&e).to_string()))?;

        self.parts.push(
            CompletedPart::builder()
                .e_tag(output.e_tag().unwrap_or_default())
                .part_number(part_number)
                .build(),
        );
        Ok(())
    }

    async fn complete(mut self) -> Result<Option<String>, PipelineError> {
        let upload_id = self.upload_id()?.to_string();
        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(std::mem::take(&mut self.parts)))
            .build();

        let result = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&upload_id)
            .multipart_upload(completed)
            .send()
            .await;

        match result {
            Ok(output) => {
                self.upload_id = None;
                Ok(output.e_tag().map(str::to_string))
            }
            Err(e) => {
                let err = PipelineError::Upload(DisplayErrorContext(&e).to_string());
                self.abort().await;
                Err(err)
            }
        }
    }

    async fn abort(mut self) {
        let Some(upload_id) = self.upload_id.take() else {
            return;
        };
        abort_upload(&self.client, &self.bucket, &self.key, &upload_id).await;
    }
}

impl Drop for Multipart {
    fn drop(&mut self) {
        let Some(upload_id) = self.upload_id.take() else {
            return;
        };
        // Cancelled mid-upload (deadline or caller gone): abort in the background.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let client = self.client.clone();
            let bucket = self.bucket.clone();
            let key = self.key.clone();
            handle.spawn(async move {
                abort_upload(&client, &bucket, &key, &upload_id).await;
            });
        } else {
            tracing::warn!(
                "Multipart upload {} for {}/{} left open: no runtime to abort it",
                upload_id,
                self.bucket,
                self.key
            );
        }
    }
}

async fn abort_upload(client: &Client, bucket: &str, key: &str, upload_id: &str) {
    match client
        .abort_multipart_upload()
        .bucket(bucket)
        .key(key)
        .upload_id(upload_id)
        .send()
        .await
    {
        Ok(_) => tracing::info!("Aborted multipart upload for {}/{}", bucket, key),
        Err(e) => tracing::error!(
            "Failed to abort multipart upload {} for {}/{}: {}",
            upload_id,
            bucket,
            key,
            DisplayErrorContext(&e)
        ),
    }
}
