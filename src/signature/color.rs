//! Display colour for a wavelength.
//!
//! Dan Bruton's piecewise-linear approximation of the visible spectrum, with
//! intensity attenuated towards the UV and IR edges and a gamma of 0.8.

use serde::{Deserialize, Serialize};

const GAMMA: f64 = 0.80;
const INTENSITY_MAX: f64 = 255.0;

/// 8-bit RGB triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb(pub [u8; 3]);

impl Rgb {
    /// Components scaled to `0.0..=1.0`.
    pub fn normalized(&self) -> [f64; 3] {
        self.0.map(|c| f64::from(c) / INTENSITY_MAX)
    }
}

/// Map a wavelength in nm to a display colour.
pub fn wavelength_to_rgb(wavelength_nm: f64) -> Rgb {
    let w = wavelength_nm;
    let (red, green, blue) = if w < 380.0 {
        (1.0, 0.0, 1.0)
    } else if w < 440.0 {
        (-(w - 440.0) / (440.0 - 380.0), 0.0, 1.0)
    } else if w < 490.0 {
        (0.0, (w - 440.0) / (490.0 - 440.0), 1.0)
    } else if w < 510.0 {
        (0.0, 1.0, -(w - 510.0) / (510.0 - 490.0))
    } else if w < 580.0 {
        ((w - 510.0) / (580.0 - 510.0), 1.0, 0.0)
    } else if w < 645.0 {
        (1.0, -(w - 645.0) / (645.0 - 580.0), 0.0)
    } else {
        (1.0, 0.0, 0.0)
    };

    let attenuation = if (380.0..420.0).contains(&w) {
        0.3 + 0.7 * (w - 380.0) / (420.0 - 380.0)
    } else if (420.0..701.0).contains(&w) {
        1.0
    } else if (701.0..781.0).contains(&w) {
        0.3 + 0.7 * (780.0 - w) / (780.0 - 700.0)
    } else {
        0.2
    };

    Rgb([
        channel(red, attenuation),
        channel(green, attenuation),
        channel(blue, attenuation),
    ])
}

fn channel(value: f64, attenuation: f64) -> u8 {
    if value == 0.0 {
        0
    } else {
        (INTENSITY_MAX * (value * attenuation).powf(GAMMA))
            .round()
            .clamp(0.0, INTENSITY_MAX) as u8
    }
}
