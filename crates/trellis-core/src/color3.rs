//! RGB color data type

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Div, Mul, Sub};

/// A color in RGB space, each component in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Color3 {
    /// Red component.
    pub r: f64,
    /// Green component.
    pub g: f64,
    /// Blue component.
    pub b: f64,
}

impl Color3 {
    /// Construct from components in `[0, 1]`.
    pub const fn new(r: f64, g: f64, b: f64) -> Self {
        Self { r, g, b }
    }

    /// Construct from 8-bit channel values.
    pub fn from_rgb(r: u8, g: u8, b: u8) -> Self {
        Self::new(r as f64 / 255.0, g as f64 / 255.0, b as f64 / 255.0)
    }

    /// Construct from hue/saturation/value, each in `[0, 1]`.
    pub fn from_hsv(h: f64, s: f64, v: f64) -> Self {
        let i = (h * 6.0).floor();
        let f = h * 6.0 - i;
        let p = v * (1.0 - s);
        let q = v * (1.0 - f * s);
        let t = v * (1.0 - (1.0 - f) * s);

        match (i as i64).rem_euclid(6) {
            0 => Self::new(v, t, p),
            1 => Self::new(q, v, p),
            2 => Self::new(p, v, t),
            3 => Self::new(p, q, v),
            4 => Self::new(t, p, v),
            _ => Self::new(v, p, q),
        }
    }

    /// Parse a `#RRGGBB` or `RRGGBB` hex string.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.strip_prefix('#').unwrap_or(hex);
        if hex.len() != 6 {
            return None;
        }

        let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
        let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
        let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
        Some(Self::from_rgb(r, g, b))
    }

    /// Convert to hue/saturation/value, each in `[0, 1]`.
    pub fn to_hsv(&self) -> (f64, f64, f64) {
        let max = self.r.max(self.g).max(self.b);
        let min = self.r.min(self.g).min(self.b);
        let delta = max - min;

        let h = if delta == 0.0 {
            0.0
        } else if max == self.r {
            (((self.g - self.b) / delta).rem_euclid(6.0)) / 6.0
        } else if max == self.g {
            ((self.b - self.r) / delta + 2.0) / 6.0
        } else {
            ((self.r - self.g) / delta + 4.0) / 6.0
        };
        let s = if max == 0.0 { 0.0 } else { delta / max };

        (h, s, max)
    }

    /// Render as `RRGGBB`.
    pub fn to_hex(&self) -> String {
        fn channel(v: f64) -> u8 {
            (v.clamp(0.0, 1.0) * 255.0).round() as u8
        }
        format!(
            "{:02X}{:02X}{:02X}",
            channel(self.r),
            channel(self.g),
            channel(self.b)
        )
    }

    /// Linear interpolation toward `goal` by `alpha`.
    pub fn lerp(&self, goal: &Color3, alpha: f64) -> Color3 {
        *self + (*goal - *self) * alpha
    }
}

impl Add for Color3 {
    type Output = Color3;
    fn add(self, rhs: Color3) -> Color3 {
        Color3::new(self.r + rhs.r, self.g + rhs.g, self.b + rhs.b)
    }
}

impl Sub for Color3 {
    type Output = Color3;
    fn sub(self, rhs: Color3) -> Color3 {
        Color3::new(self.r - rhs.r, self.g - rhs.g, self.b - rhs.b)
    }
}

impl Mul for Color3 {
    type Output = Color3;
    fn mul(self, rhs: Color3) -> Color3 {
        Color3::new(self.r * rhs.r, self.g * rhs.g, self.b * rhs.b)
    }
}

impl Mul<f64> for Color3 {
    type Output = Color3;
    fn mul(self, rhs: f64) -> Color3 {
        Color3::new(self.r * rhs, self.g * rhs, self.b * rhs)
    }
}

impl Mul<Color3> for f64 {
    type Output = Color3;
    fn mul(self, rhs: Color3) -> Color3 {
        rhs * self
    }
}

impl Div<f64> for Color3 {
    type Output = Color3;
    fn div(self, rhs: f64) -> Color3 {
        Color3::new(self.r / rhs, self.g / rhs, self.b / rhs)
    }
}

impl fmt::Display for Color3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}, {}", self.r, self.g, self.b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_rgb() {
        let c = Color3::from_rgb(255, 0, 128);
        assert_eq!(c.r, 1.0);
        assert_eq!(c.g, 0.0);
        assert!((c.b - 128.0 / 255.0).abs() < 1e-12);
    }

    #[test]
    fn test_hex_round_trip() {
        let c = Color3::from_hex("#FF8000").unwrap();
        assert_eq!(c.to_hex(), "FF8000");
        assert!(Color3::from_hex("nope").is_none());
        assert!(Color3::from_hex("FFF").is_none());
    }

    #[test]
    fn test_hsv_round_trip() {
        let c = Color3::from_rgb(64, 200, 32);
        let (h, s, v) = c.to_hsv();
        let back = Color3::from_hsv(h, s, v);
        assert!((back.r - c.r).abs() < 1e-9);
        assert!((back.g - c.g).abs() < 1e-9);
        assert!((back.b - c.b).abs() < 1e-9);
    }

    #[test]
    fn test_lerp() {
        let black = Color3::default();
        let white = Color3::new(1.0, 1.0, 1.0);
        assert_eq!(black.lerp(&white, 0.5), Color3::new(0.5, 0.5, 0.5));
    }
}
