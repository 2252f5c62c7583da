//! RGB colors, CSS color parsing and deterministic palette picks.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use siphasher::sip::SipHasher13;

use crate::types::PaintError;

/// An opaque RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Color(pub [u8; 3]);

impl Color {
    /// Used when a palette is empty.
    pub const FALLBACK: Self = Self([255, 109, 4]);

    /// Parse a CSS color string.
    ///
    /// Accepts `#rgb`, `#rgba`, `#rrggbb`, `#rrggbbaa`, `rgb(r, g, b)` and
    /// `rgba(r, g, b, a)` (alpha is ignored).
    ///
    /// # Errors
    ///
    /// Returns [`PaintError::InvalidColor`] for anything else.
    pub fn parse(s: &str) -> Result<Self, PaintError> {
        let s = s.trim();
        if let Some(hex) = s.strip_prefix('#') {
            return parse_hex(hex).ok_or_else(|| PaintError::InvalidColor(s.to_owned()));
        }
        let body = s
            .strip_prefix("rgba(")
            .or_else(|| s.strip_prefix("rgb("))
            .and_then(|rest| rest.strip_suffix(')'))
            .ok_or_else(|| PaintError::InvalidColor(s.to_owned()))?;

        let mut rgb = [0u8; 3];
        let mut parts = body.split(',').map(str::trim);
        for slot in &mut rgb {
            *slot = parts
                .next()
                .and_then(|p| p.parse::<u8>().ok())
                .ok_or_else(|| PaintError::InvalidColor(s.to_owned()))?;
        }
        Ok(Self(rgb))
    }

    /// Pack as a little-endian RGBA pixel word.
    ///
    /// Writing the result with `to_le_bytes` yields `[r, g, b, alpha]`.
    #[must_use]
    pub const fn pack(self, alpha: u8) -> u32 {
        let [r, g, b] = self.0;
        u32::from_le_bytes([r, g, b, alpha])
    }

    /// Lowercase `#rrggbb`.
    #[must_use]
    pub fn hex(self) -> String {
        let [r, g, b] = self.0;
        format!("#{r:02x}{g:02x}{b:02x}")
    }

    /// Hex key for three raw RGB bytes, as used by RGB mask target tables.
    #[must_use]
    pub fn hex_key(rgb: [u8; 3]) -> String {
        Self(rgb).hex()
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex())
    }
}

/// Alpha digits of `#rgba` and `#rrggbbaa` are validated, then dropped.
fn parse_hex(hex: &str) -> Option<Color> {
    if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    match hex.len() {
        3 | 4 => {
            let mut rgb = [0u8; 3];
            for (slot, ch) in rgb.iter_mut().zip(hex.chars()) {
                let n = ch.to_digit(16)?;
                #[expect(clippy::cast_possible_truncation)]
                {
                    *slot = (n * 17) as u8;
                }
            }
            Some(Color(rgb))
        }
        6 | 8 => {
            let r = u8::from_str_radix(hex.get(0..2)?, 16).ok()?;
            let g = u8::from_str_radix(hex.get(2..4)?, 16).ok()?;
            let b = u8::from_str_radix(hex.get(4..6)?, 16).ok()?;
            Some(Color([r, g, b]))
        }
        _ => None,
    }
}

/// Deterministically pick a pool entry for `key` under `seed`.
///
/// The same `(seed, key)` always lands on the same entry; a different
/// seed reshuffles assignments. Returns [`Color::FALLBACK`] for an empty
/// pool.
#[must_use]
pub fn pick<K: Hash + ?Sized>(pool: &[Color], seed: u64, key: &K) -> Color {
    if pool.is_empty() {
        return Color::FALLBACK;
    }
    let mut hasher = SipHasher13::new_with_keys(seed, 0);
    key.hash(&mut hasher);
    #[expect(clippy::cast_possible_truncation)]
    let index = (hasher.finish() % pool.len() as u64) as usize;
    pool[index]
}

/// Parse a list of CSS color strings, skipping unparsable entries.
#[must_use]
pub fn parse_pool(pool: &[String]) -> Vec<Color> {
    pool.iter()
        .filter_map(|s| match Color::parse(s) {
            Ok(c) => Some(c),
            Err(e) => {
                tracing::debug!(color = %s, "skipping palette entry: {e}");
                None
            }
        })
        .collect()
}
