use std::env;
use std::time::Duration;

/// Smallest part size S3 accepts for every part but the last.
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Resize pipeline configuration
#[derive(Debug, Clone)]
pub struct ResizeConfig {
    /// Width of the derivative in pixels (default: 500)
    pub target_width: u32,

    /// Marker embedded in derived keys (default: "<target_width>w")
    pub size_tag: String,

    /// JPEG encoder quality, 1-100 (default: 80)
    pub jpeg_quality: u8,

    /// Largest encoded source accepted in bytes (default: 64 MB)
    pub max_source_bytes: usize,

    /// Largest decoded image accepted, in pixels (default: 100 megapixels)
    pub max_pixels: u64,

    /// Size of chunks handed to the sink in bytes (default: 64 KB)
    pub chunk_size: usize,

    /// Upper bound for the streaming phase of one invocation (default: 60s)
    pub deadline: Duration,

    /// Delete the destination key after a failed upload (default: false).
    ///
    /// The key is the same on every run, so a failed re-run also deletes a
    /// valid derivative stored by an earlier successful run.
    pub cleanup_on_failure: bool,
}

impl Default for ResizeConfig {
    fn default() -> Self {
        Self::with_width(500)
    }
}

impl ResizeConfig {
    /// Defaults for a given width; the size tag follows the width.
    pub fn with_width(target_width: u32) -> Self {
        Self {
            target_width,
            size_tag: format!("{}w", target_width),
            jpeg_quality: 80,
            max_source_bytes: 64 * 1024 * 1024, // 64 MB
            max_pixels: 100_000_000,
            chunk_size: 64 * 1024, // 64 KB
            deadline: Duration::from_secs(60),
            cleanup_on_failure: false,
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let target_width = env::var("RESIZE_TARGET_WIDTH")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|w: &u32| *w > 0)
            .unwrap_or(500);

        let default = Self::with_width(target_width);

        Self {
            target_width,

            size_tag: env::var("RESIZE_SIZE_TAG")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(default.size_tag),

            jpeg_quality: env::var("RESIZE_JPEG_QUALITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(|q: u8| q.clamp(1, 100))
                .unwrap_or(default.jpeg_quality),

            max_source_bytes: env::var("RESIZE_MAX_SOURCE_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_source_bytes),

            max_pixels: env::var("RESIZE_MAX_PIXELS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_pixels),

            chunk_size: env::var("RESIZE_CHUNK_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|v: &usize| *v > 0)
                .unwrap_or(default.chunk_size),

            deadline: env::var("RESIZE_DEADLINE_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.deadline),

            cleanup_on_failure: env::var("RESIZE_CLEANUP_ON_FAILURE")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(default.cleanup_on_failure),
        }
    }
}

/// S3-compatible storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Custom endpoint, e.g. a MinIO server. `None` uses AWS.
    pub endpoint_url: Option<String>,

    /// Region (default: "us-east-1")
    pub region: String,

    /// Static credentials; `None` falls back to the default provider chain
    pub access_key: Option<String>,
    pub secret_key: Option<String>,

    /// Path-style addressing, required by MinIO (default: false)
    pub force_path_style: bool,

    /// Multipart upload part size in bytes (default: 8 MB, min 5 MB)
    pub part_size: usize,

    /// Chunks buffered between transform and uploader (default: 8)
    pub write_capacity: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint_url: None,
            region: "us-east-1".to_string(),
            access_key: None,
            secret_key: None,
            force_path_style: false,
            part_size: 8 * 1024 * 1024, // 8 MB
            write_capacity: 8,
        }
    }
}

impl StorageConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            endpoint_url: env::var("S3_ENDPOINT").ok().filter(|v| !v.is_empty()),

            region: env::var("S3_REGION").unwrap_or(default.region),

            access_key: env::var("S3_ACCESS_KEY").ok(),
            secret_key: env::var("S3_SECRET_KEY").ok(),

            force_path_style: env::var("S3_FORCE_PATH_STYLE")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(default.force_path_style),

            part_size: env::var("S3_PART_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(|v: usize| v.max(MIN_PART_SIZE))
                .unwrap_or(default.part_size),

            write_capacity: env::var("S3_WRITE_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|v: &usize| *v > 0)
                .unwrap_or(default.write_capacity),
        }
    }
}
