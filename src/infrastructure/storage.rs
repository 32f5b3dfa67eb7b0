use crate::config::StorageConfig;
use crate::services::storage::S3Storage;
use aws_sdk_s3::config::Region;
use std::sync::Arc;
use tracing::info;

pub async fn setup_storage(config: &StorageConfig) -> Arc<S3Storage> {
    let mut loader = aws_config::from_env().region(Region::new(config.region.clone()));

    match &config.endpoint_url {
        Some(endpoint_url) => {
            info!("☁️  S3 Storage: {} (Region: {})", endpoint_url, config.region);
            loader = loader.endpoint_url(endpoint_url);
        }
        None => info!("☁️  S3 Storage: AWS (Region: {})", config.region),
    }

    if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
        loader = loader.credentials_provider(aws_sdk_s3::config::Credentials::new(
            access_key.clone(),
            secret_key.clone(),
            None,
            None,
            "static",
        ));
    }

    let aws_config = loader.load().await;

    let s3_config = aws_sdk_s3::config::Builder::from(&aws_config)
        .force_path_style(config.force_path_style)
        .build();

    let s3_client = aws_sdk_s3::Client::from_conf(s3_config);

    Arc::new(S3Storage::new(
        s3_client,
        config.part_size,
        config.write_capacity,
    ))
}
