use tracing::warn;

/// 1 GiB, the largest segment most object stores accept in one request.
pub const DEFAULT_SEGMENT_SIZE: u64 = 1024 * 1024 * 1024;
pub const DEFAULT_SEGMENT_THRESHOLD: u64 = 2 * DEFAULT_SEGMENT_SIZE;
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Tuning of segmented uploads.
///
/// Every field can be overridden from the environment with
/// [`UploadConfig::from_env`]:
///
/// | Variable | Field |
/// |---|---|
/// | `OXCRYPT_UPLOAD_SEGMENT_SIZE` | `segment_size` |
/// | `OXCRYPT_UPLOAD_THRESHOLD` | `threshold` |
/// | `OXCRYPT_UPLOAD_CONCURRENCY` | `concurrency` |
/// | `OXCRYPT_UPLOAD_VERIFY_CHECKSUM` | `verify_checksum` |
/// | `OXCRYPT_UPLOAD_VERIFY_RESUMED` | `verify_resumed_segments` |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadConfig {
    pub segment_size: u64,
    /// Objects at least this large are uploaded in segments
    pub threshold: u64,
    /// Segment uploads in flight at once
    pub concurrency: usize,
    /// Compare each segment's local SHA-256 with the backend's reply
    pub verify_checksum: bool,
    /// Re-hash the local slice of resumed segments instead of trusting the
    /// segment name
    pub verify_resumed_segments: bool,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            segment_size: DEFAULT_SEGMENT_SIZE,
            threshold: DEFAULT_SEGMENT_THRESHOLD,
            concurrency: DEFAULT_CONCURRENCY,
            verify_checksum: true,
            verify_resumed_segments: false,
        }
    }
}

impl UploadConfig {
    /// Defaults with `OXCRYPT_UPLOAD_*` overrides applied.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(size) = parse(&lookup, "OXCRYPT_UPLOAD_SEGMENT_SIZE") {
            config = config.segment_size(size);
        }
        if let Some(threshold) = parse(&lookup, "OXCRYPT_UPLOAD_THRESHOLD") {
            config = config.threshold(threshold);
        }
        if let Some(concurrency) = parse(&lookup, "OXCRYPT_UPLOAD_CONCURRENCY") {
            config = config.concurrency(concurrency);
        }
        if let Some(verify) = parse_flag(&lookup, "OXCRYPT_UPLOAD_VERIFY_CHECKSUM") {
            config = config.verify_checksum(verify);
        }
        if let Some(verify) = parse_flag(&lookup, "OXCRYPT_UPLOAD_VERIFY_RESUMED") {
            config = config.verify_resumed_segments(verify);
        }
        config
    }

    /// Segment size in bytes, at least 1.
    #[must_use]
    pub fn segment_size(mut self, size: u64) -> Self {
        self.segment_size = size.max(1);
        self
    }

    #[must_use]
    pub fn threshold(mut self, threshold: u64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Worker pool size, at least 1.
    #[must_use]
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    #[must_use]
    pub fn verify_checksum(mut self, verify: bool) -> Self {
        self.verify_checksum = verify;
        self
    }

    #[must_use]
    pub fn verify_resumed_segments(mut self, verify: bool) -> Self {
        self.verify_resumed_segments = verify;
        self
    }

    /// Whether an object of `length` bytes goes through the segmented path.
    pub fn is_segmented(&self, length: u64) -> bool {
        length >= self.threshold && length > self.segment_size
    }
}

fn parse<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparsable environment override");
            None
        }
    }
}

fn parse_flag(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<bool> {
    let raw = lookup(key)?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            warn!(key, value = %raw, "Ignoring unparsable environment override");
            None
        }
    }
}
