//! Shared constants for launching and driving the browser

/// Chrome user agent string for stealth mode
///
/// Chrome releases new stable versions about every 4 weeks; bump quarterly.
pub const CHROME_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.6834.160 Safari/537.36";

/// URL patterns refused in unattended mode (images, media, fonts)
pub const BLOCKED_RESOURCE_PATTERNS: &[&str] = &[
    "*.png", "*.jpg", "*.jpeg", "*.gif", "*.webp", "*.svg", "*.ico", "*.bmp", "*.avif",
    "*.mp4", "*.webm", "*.mp3", "*.m4a", "*.ogg", "*.woff", "*.woff2", "*.ttf", "*.otf",
    "*.eot",
];

/// Progress messages repeated within this window are dropped
pub const PROGRESS_DEDUP_WINDOW_MS: u64 = 300;
