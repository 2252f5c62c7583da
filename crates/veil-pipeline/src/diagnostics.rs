//! Per-stage diagnostics for a single mask run: timing and counts.
//!
//! Stage clocks come from `web-time`, so the numbers are meaningful in
//! a browser worker as well as natively. Every [`Duration`] goes over
//! the wire as fractional seconds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::coloring::ColorMode;
use crate::types::ElementType;

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "stage duration must be a finite, non-negative number of seconds",
            )
        })
    }
}

/// Diagnostics collected from one decode, paint and bitmap run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDiagnostics {
    /// Payload or image decoding.
    pub decode: StageDiagnostics,
    /// Colorization.
    pub paint: StageDiagnostics,
    /// Bitmap generation.
    pub bitmap: StageDiagnostics,
    /// Total wall-clock duration (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
}

/// Diagnostics for a single stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics.
    pub metrics: StageMetrics,
}

/// Stage-specific metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StageMetrics {
    Decode {
        /// Size of the input bytes.
        input_bytes: usize,
        /// Mask width in pixels.
        width: u32,
        /// Mask height in pixels.
        height: u32,
        /// Channels per pixel.
        channels: u32,
        /// Decoded element type.
        element_type: ElementType,
    },
    Paint {
        /// Coloring mode in effect.
        mode: ColorMode,
        /// Pixels that received a color.
        painted_pixels: u64,
        /// Total pixel count.
        total_pixels: u64,
    },
    Bitmap {
        /// Bitmap width in pixels.
        width: u32,
        /// Bitmap height in pixels.
        height: u32,
    },
}

impl PipelineDiagnostics {
    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Overlay Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());
        lines.push(format!(
            "{:<12} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(72));

        let total_ms = duration_ms(self.total_duration);
        for (name, diag) in [
            ("Decode", &self.decode),
            ("Paint", &self.paint),
            ("Bitmap", &self.bitmap),
        ] {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{name:<12} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        lines.join("\n")
    }
}

fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Decode {
            input_bytes,
            width,
            height,
            channels,
            element_type,
        } => format!("{input_bytes} bytes -> {width}x{height}x{channels} {element_type:?}"),
        StageMetrics::Paint {
            mode,
            painted_pixels,
            total_pixels,
        } => {
            #[allow(clippy::cast_precision_loss)]
            let coverage = if *total_pixels > 0 {
                *painted_pixels as f64 / *total_pixels as f64 * 100.0
            } else {
                0.0
            };
            format!("{mode:?} {painted_pixels}/{total_pixels} px ({coverage:.1}%)")
        }
        StageMetrics::Bitmap { width, height } => format!("{width}x{height}"),
    }
}

/// Count pixels with non-zero alpha in an RGBA buffer.
pub(crate) fn count_painted(rgba: &[u8]) -> u64 {
    rgba.chunks_exact(4).map(|p| u64::from(p[3] != 0)).sum()
}
