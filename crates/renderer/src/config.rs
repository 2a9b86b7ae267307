//! Configuration for the hardware rasterizer.
//!
//! Controls offscreen cache capacity, frame throttling, opacity-group
//! composition and the fallback rasterizer's scratch memory. Configuration
//! can be loaded from environment variables or constructed programmatically.

use core::time::Duration;
use render_tree::ColorRGBA;
use std::env;

/// Default number of offscreen atlases kept alive per rasterizer.
pub const DEFAULT_MAX_OFFSCREEN_ATLASES: usize = 2;

/// Default byte budget for the fallback rasterizer's scratch pixmaps.
pub const DEFAULT_FALLBACK_SCRATCH_BYTES: usize = 8 * 1024 * 1024;

/// Runtime configuration for a `HardwareRasterizer`.
#[derive(Clone, Debug, PartialEq)]
pub struct RasterizerConfig {
    /// Maximum number of atlases the offscreen target cache may hold
    pub max_offscreen_atlases: usize,
    /// Minimum time between presented frames, if throttling is enabled
    pub min_frame_time_ms: Option<u64>,
    /// Whether opacity groups are composed with hardware offscreen passes
    /// instead of the fallback rasterizer
    pub offscreen_composition: bool,
    /// Byte budget for the fallback rasterizer's cached scratch pixmaps
    pub fallback_scratch_bytes: usize,
    /// Color the dirty region is cleared to before drawing
    pub clear_color: ColorRGBA,
}

impl Default for RasterizerConfig {
    fn default() -> Self {
        Self {
            max_offscreen_atlases: DEFAULT_MAX_OFFSCREEN_ATLASES,
            min_frame_time_ms: None,
            offscreen_composition: true,
            fallback_scratch_bytes: DEFAULT_FALLBACK_SCRATCH_BYTES,
            clear_color: ColorRGBA::TRANSPARENT,
        }
    }
}

impl RasterizerConfig {
    /// Load configuration from environment variables.
    ///
    /// Reads the following environment variables:
    /// - `RENDERER_MAX_OFFSCREEN_ATLASES`: atlas count (default: 2, minimum 1)
    /// - `RENDERER_MIN_FRAME_TIME_MS`: minimum frame time (default: unthrottled)
    /// - `RENDERER_OFFSCREEN_COMPOSITION`: set to "0" to send opacity groups
    ///   to the fallback rasterizer (default: enabled)
    /// - `RENDERER_FALLBACK_SCRATCH_BYTES`: scratch pixmap budget (default: 8 MiB)
    #[inline]
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build a configuration from an arbitrary variable source.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let max_offscreen_atlases = lookup("RENDERER_MAX_OFFSCREEN_ATLASES")
            .and_then(|val| val.parse::<usize>().ok())
            .unwrap_or(DEFAULT_MAX_OFFSCREEN_ATLASES)
            .max(1);
        let min_frame_time_ms = lookup("RENDERER_MIN_FRAME_TIME_MS")
            .and_then(|val| val.parse::<u64>().ok())
            .and_then(|millis| (millis > 0).then_some(millis));
        let offscreen_composition =
            lookup("RENDERER_OFFSCREEN_COMPOSITION").as_deref() != Some("0");
        let fallback_scratch_bytes = lookup("RENDERER_FALLBACK_SCRATCH_BYTES")
            .and_then(|val| val.parse::<usize>().ok())
            .unwrap_or(DEFAULT_FALLBACK_SCRATCH_BYTES);
        Self {
            max_offscreen_atlases,
            min_frame_time_ms,
            offscreen_composition,
            fallback_scratch_bytes,
            ..Self::default()
        }
    }

    /// Minimum frame time as a `Duration`, if throttling is enabled.
    #[inline]
    #[must_use]
    pub fn min_frame_time(&self) -> Option<Duration> {
        self.min_frame_time_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = RasterizerConfig::from_lookup(|_| None);
        assert_eq!(config, RasterizerConfig::default());
        assert_eq!(config.min_frame_time(), None);
    }

    #[test]
    fn reads_every_variable() {
        let config = RasterizerConfig::from_lookup(lookup_from(&[
            ("RENDERER_MAX_OFFSCREEN_ATLASES", "4"),
            ("RENDERER_MIN_FRAME_TIME_MS", "16"),
            ("RENDERER_OFFSCREEN_COMPOSITION", "0"),
            ("RENDERER_FALLBACK_SCRATCH_BYTES", "1024"),
        ]));
        assert_eq!(config.max_offscreen_atlases, 4);
        assert_eq!(config.min_frame_time(), Some(Duration::from_millis(16)));
        assert!(!config.offscreen_composition);
        assert_eq!(config.fallback_scratch_bytes, 1024);
    }

    #[test]
    fn rejects_out_of_range_values() {
        let config = RasterizerConfig::from_lookup(lookup_from(&[
            ("RENDERER_MAX_OFFSCREEN_ATLASES", "0"),
            ("RENDERER_MIN_FRAME_TIME_MS", "0"),
            ("RENDERER_FALLBACK_SCRATCH_BYTES", "lots"),
        ]));
        assert_eq!(config.max_offscreen_atlases, 1);
        assert_eq!(config.min_frame_time_ms, None);
        assert_eq!(
            config.fallback_scratch_bytes,
            DEFAULT_FALLBACK_SCRATCH_BYTES
        );
    }
}
