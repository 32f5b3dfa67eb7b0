//! Round trips against a local MinIO (`minioadmin`/`minioadmin` on :9000).
//! Run with `cargo test -- --ignored`.

use bytes::Bytes;
use futures::StreamExt;
use rust_image_resizer::config::{MIN_PART_SIZE, StorageConfig};
use rust_image_resizer::infrastructure::storage::setup_storage;
use rust_image_resizer::models::ObjectRef;
use rust_image_resizer::services::error::PipelineError;
use rust_image_resizer::services::storage::{ObjectSink, ObjectSource, S3Storage};
use std::sync::Arc;

const BUCKET: &str = "uploads";

async fn minio() -> Arc<S3Storage> {
    let config = StorageConfig {
        endpoint_url: Some("http://127.0.0.1:9000".to_string()),
        access_key: Some("minioadmin".to_string()),
        secret_key: Some("minioadmin".to_string()),
        force_path_style: true,
        ..StorageConfig::default()
    };
    let storage = setup_storage(&config).await;
    let _ = storage.client().create_bucket().bucket(BUCKET).send().await;
    storage
}

async fn read_all(storage: &S3Storage, object: &ObjectRef) -> Vec<u8> {
    let mut stream = storage.open_read(object).await.unwrap();
    let mut data = Vec::new();
    while let Some(chunk) = stream.next().await {
        data.extend_from_slice(&chunk.unwrap());
    }
    data
}

#[tokio::test]
#[ignore = "requires MinIO"]
async fn test_small_object_single_put() {
    let storage = minio().await;
    let object = ObjectRef::new(BUCKET, format!("it/{}_500w.jpg", uuid::Uuid::new_v4()));

    let (mut writer, completion) = storage.open_write(&object);
    let produce = async move {
        writer.write(Bytes::from_static(b"hello ")).await?;
        writer.write(Bytes::from_static(b"world")).await?;
        writer.finish().await
    };
    let (produced, uploaded) = tokio::join!(produce, completion);
    produced.unwrap();

    let uploaded = uploaded.unwrap();
    assert_eq!(uploaded.size, 11);
    assert_eq!(uploaded.parts, 1);
    assert_eq!(read_all(&storage, &object).await, b"hello world");

    storage.remove(&object).await.unwrap();
}

#[tokio::test]
#[ignore = "requires MinIO"]
async fn test_large_object_multipart() {
    let storage = minio().await;
    let object = ObjectRef::new(BUCKET, format!("it/{}_500w.png", uuid::Uuid::new_v4()));
    let total = 2 * MIN_PART_SIZE + 1234;

    let (mut writer, completion) = storage.open_write(&object);
    let produce = async move {
        let chunk = Bytes::from(vec![7u8; 256 * 1024]);
        let mut sent = 0;
        while sent < total {
            let len = chunk.len().min(total - sent);
            writer.write(chunk.slice(..len)).await?;
            sent += len;
        }
        writer.finish().await
    };
    let (produced, uploaded) = tokio::join!(produce, completion);
    produced.unwrap();

    let uploaded = uploaded.unwrap();
    assert_eq!(uploaded.size, total as u64);
    assert!(uploaded.parts >= 2);
    assert_eq!(read_all(&storage, &object).await.len(), total);

    storage.remove(&object).await.unwrap();
}

#[tokio::test]
#[ignore = "requires MinIO"]
async fn test_unfinished_writer_leaves_no_object() {
    let storage = minio().await;
    let object = ObjectRef::new(BUCKET, format!("it/{}_500w.gif", uuid::Uuid::new_v4()));

    let (mut writer, completion) = storage.open_write(&object);
    let produce = async move {
        writer.write(Bytes::from(vec![1u8; 1024])).await?;
        // Dropped without finish.
        Ok::<_, PipelineError>(())
    };
    let (produced, uploaded) = tokio::join!(produce, completion);
    produced.unwrap();

    assert!(matches!(uploaded, Err(PipelineError::Aborted)));
    assert!(matches!(
        storage.open_read(&object).await,
        Err(PipelineError::NotFound(_))
    ));
}

#[tokio::test]
#[ignore = "requires MinIO"]
async fn test_missing_object_is_not_found() {
    let storage = minio().await;
    let object = ObjectRef::new(BUCKET, "it/definitely-missing.jpg");

    assert!(matches!(
        storage.open_read(&object).await,
        Err(PipelineError::NotFound(_))
    ));
}
