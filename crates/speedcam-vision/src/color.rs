//! Dominant-color classification of vehicle crops.
//!
//! The crop is reduced to its mean color, converted to 8-bit HSV (hue in
//! 0..180, saturation and value in 0..255) and bucketed into the fixed
//! palette the dashboard offers to drivers.

use image::RgbImage;
use speedcam_proto::VehicleColor;

/// Maps an image region to a color. Implementations must be pure.
pub trait ColorClassifier: Send + Sync {
    fn classify(&self, crop: &RgbImage) -> VehicleColor;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MeanHsvClassifier;

impl ColorClassifier for MeanHsvClassifier {
    fn classify(&self, crop: &RgbImage) -> VehicleColor {
        match mean_rgb(crop) {
            Some([r, g, b]) => {
                let (h, s, v) = rgb_to_hsv8(r, g, b);
                bucket(h, s, v)
            }
            None => VehicleColor::Unknown,
        }
    }
}

fn mean_rgb(img: &RgbImage) -> Option<[u8; 3]> {
    let n = u64::from(img.width()) * u64::from(img.height());
    if n == 0 {
        return None;
    }
    let mut sum = [0u64; 3];
    for px in img.pixels() {
        for c in 0..3 {
            sum[c] += u64::from(px.0[c]);
        }
    }
    Some(sum.map(|s| ((s as f64 / n as f64).round()).min(255.0) as u8))
}

/// 8-bit HSV: H in 0..180, S and V in 0..255.
pub fn rgb_to_hsv8(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (rf, gf, bf) = (f32::from(r), f32::from(g), f32::from(b));
    let max = rf.max(gf).max(bf);
    let min = rf.min(gf).min(bf);
    let delta = max - min;

    let s = if max <= 0.0 { 0.0 } else { delta / max * 255.0 };

    let h_deg = if delta <= 0.0 {
        0.0
    } else if max == rf {
        60.0 * (gf - bf) / delta
    } else if max == gf {
        120.0 + 60.0 * (bf - rf) / delta
    } else {
        240.0 + 60.0 * (rf - gf) / delta
    };
    let h_deg = if h_deg < 0.0 { h_deg + 360.0 } else { h_deg };

    let h = (h_deg / 2.0).round() as u16 % 180;
    (h as u8, s.round() as u8, max as u8)
}

fn bucket(h: u8, s: u8, v: u8) -> VehicleColor {
    if s < 50 {
        return if v < 50 {
            VehicleColor::Black
        } else if v > 100 {
            VehicleColor::White
        } else {
            VehicleColor::Gray
        };
    }
    match h {
        0..=9 | 170..=u8::MAX => VehicleColor::Red,
        10..=24 => VehicleColor::Orange,
        25..=34 => VehicleColor::Yellow,
        35..=84 => VehicleColor::Green,
        85..=129 => VehicleColor::Blue,
        130..=169 => VehicleColor::Purple,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn solid(r: u8, g: u8, b: u8) -> RgbImage {
        RgbImage::from_pixel(8, 6, Rgb([r, g, b]))
    }

    #[test]
    fn hsv_primaries() {
        assert_eq!(rgb_to_hsv8(255, 0, 0), (0, 255, 255));
        assert_eq!(rgb_to_hsv8(0, 255, 0), (60, 255, 255));
        assert_eq!(rgb_to_hsv8(0, 0, 255), (120, 255, 255));
        assert_eq!(rgb_to_hsv8(0, 0, 0), (0, 0, 0));
    }

    #[test]
    fn palette() {
        let c = MeanHsvClassifier;
        assert_eq!(c.classify(&solid(200, 20, 20)), VehicleColor::Red);
        assert_eq!(c.classify(&solid(20, 40, 200)), VehicleColor::Blue);
        assert_eq!(c.classify(&solid(30, 180, 40)), VehicleColor::Green);
        assert_eq!(c.classify(&solid(230, 220, 30)), VehicleColor::Yellow);
        assert_eq!(c.classify(&solid(240, 240, 240)), VehicleColor::White);
        assert_eq!(c.classify(&solid(20, 20, 20)), VehicleColor::Black);
        assert_eq!(c.classify(&solid(80, 80, 80)), VehicleColor::Gray);
    }

    #[test]
    fn mean_of_mixed_crop() {
        // half white, half black averages to mid gray
        let mut img = solid(0, 0, 0);
        for y in 0..3 {
            for x in 0..8 {
                img.put_pixel(x, y, Rgb([180, 180, 180]));
            }
        }
        assert_eq!(MeanHsvClassifier.classify(&img), VehicleColor::Gray);
    }

    #[test]
    fn empty_crop_is_unknown() {
        assert_eq!(MeanHsvClassifier.classify(&RgbImage::new(0, 0)), VehicleColor::Unknown);
    }
}
