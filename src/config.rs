use crate::selector::ScreenMetrics;
use std::time::Duration;

pub const DEFAULT_MAX_HOPS: usize = 10;
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(3);
pub const MIN_COMPANION_WIDTH: u32 = 300;
pub const MIN_COMPANION_HEIGHT: u32 = 250;

/// Settings for one resolution engine
#[derive(Debug, Clone, PartialEq)]
pub struct ResolverConfig {
    /// Wrapper chains of this length or longer are abandoned
    pub max_hops: usize,
    /// Accepted media MIME prefixes
    pub supported_mime_types: Vec<String>,
    pub screen: ScreenMetrics,
    pub fetch_timeout: Duration,
    pub min_companion_width: u32,
    pub min_companion_height: u32,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_hops: DEFAULT_MAX_HOPS,
            supported_mime_types: vec!["video/mp4".to_string(), "video/3gpp".to_string()],
            screen: ScreenMetrics::default(),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            min_companion_width: MIN_COMPANION_WIDTH,
            min_companion_height: MIN_COMPANION_HEIGHT,
        }
    }
}

impl ResolverConfig {
    pub fn with_max_hops(mut self, max_hops: usize) -> Self {
        self.max_hops = max_hops;
        self
    }

    pub fn with_screen(mut self, screen: ScreenMetrics) -> Self {
        self.screen = screen;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_supported_mime_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.supported_mime_types = types.into_iter().map(Into::into).collect();
        self
    }
}
