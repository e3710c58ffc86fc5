/// Service configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Cosine similarity threshold for a positive match.
    pub match_threshold: f32,
    /// Minimum composite quality score accepted at enrollment.
    pub quality_threshold: f32,
    /// Input resolution handed to the detector collaborator at construction.
    pub detector_resolution: u32,
    /// Whether the detector collaborator should run on GPU.
    pub use_gpu: bool,
    /// Connection string of the durable gallery backend.
    pub redis_url: String,
    /// Hash key under which the gallery lives in the durable backend.
    pub gallery_key: String,
    /// Dial timeout for the durable backend, in seconds.
    pub connect_timeout_secs: u64,
    /// Number of matches returned by search/identify when the caller does
    /// not ask for a specific count.
    pub default_top_k: usize,
    /// Maximum number of images accepted in one batch-embed request.
    pub batch_limit: usize,
    /// Maximum accepted size of a submitted image, in bytes.
    pub max_image_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            match_threshold: 0.45,
            quality_threshold: 0.3,
            detector_resolution: 640,
            use_gpu: false,
            redis_url: "redis://127.0.0.1:6379/".to_string(),
            gallery_key: "veriface:gallery".to_string(),
            connect_timeout_secs: 2,
            default_top_k: 5,
            batch_limit: 32,
            max_image_bytes: 10 * 1024 * 1024,
        }
    }
}

impl Config {
    /// Load configuration from `VERIFACE_*` environment variables with
    /// defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            match_threshold: env_f32("VERIFACE_MATCH_THRESHOLD", defaults.match_threshold),
            quality_threshold: env_f32("VERIFACE_QUALITY_THRESHOLD", defaults.quality_threshold),
            detector_resolution: env_u32(
                "VERIFACE_DETECTOR_RESOLUTION",
                defaults.detector_resolution,
            ),
            use_gpu: std::env::var("VERIFACE_USE_GPU")
                .map(|v| v != "0")
                .unwrap_or(defaults.use_gpu),
            redis_url: std::env::var("VERIFACE_REDIS_URL").unwrap_or(defaults.redis_url),
            gallery_key: std::env::var("VERIFACE_GALLERY_KEY").unwrap_or(defaults.gallery_key),
            connect_timeout_secs: env_u64(
                "VERIFACE_CONNECT_TIMEOUT_SECS",
                defaults.connect_timeout_secs,
            ),
            default_top_k: env_usize("VERIFACE_TOP_K", defaults.default_top_k),
            batch_limit: env_usize("VERIFACE_BATCH_LIMIT", defaults.batch_limit),
            max_image_bytes: env_usize("VERIFACE_MAX_IMAGE_BYTES", defaults.max_image_bytes),
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
