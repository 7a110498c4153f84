//! Pixel encodings of texture entries
//!
//! Every entry in a texture pack carries a one-byte format tag. Overrides are
//! DDS files, so their encoding is read from the DDS header and compared
//! against the tag before injection.

use std::fmt;
use std::io::Cursor;
use std::str::FromStr;

use ddsfile::{D3DFormat, Dds, DxgiFormat};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Block-compressed and uncompressed encodings understood by TPUP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// BC1/DXT1
    Bc1,
    /// BC2/DXT3
    Bc2,
    /// BC3/DXT5
    Bc3,
    /// BC4 (single channel)
    Bc4,
    /// BC5 (two channel, normal maps)
    Bc5,
    /// BC7
    Bc7,
    /// Uncompressed R8G8B8A8
    Rgba8,
    /// Uncompressed B8G8R8A8
    Bgra8,
}

impl PixelFormat {
    /// Formats front ends should offer first.
    pub const COMMON: [PixelFormat; 5] = [
        PixelFormat::Bc1,
        PixelFormat::Bc2,
        PixelFormat::Bc3,
        PixelFormat::Bc5,
        PixelFormat::Bc7,
    ];

    /// Every known format, common ones first.
    pub const ALL: [PixelFormat; 8] = [
        PixelFormat::Bc1,
        PixelFormat::Bc2,
        PixelFormat::Bc3,
        PixelFormat::Bc5,
        PixelFormat::Bc7,
        PixelFormat::Bc4,
        PixelFormat::Bgra8,
        PixelFormat::Rgba8,
    ];

    /// Parse the format tag stored in a container entry.
    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 | 1 => Some(PixelFormat::Bc1),
            3 => Some(PixelFormat::Bc2),
            5 => Some(PixelFormat::Bc3),
            9 => Some(PixelFormat::Bgra8),
            10 => Some(PixelFormat::Rgba8),
            24 => Some(PixelFormat::Bc4),
            25 => Some(PixelFormat::Bc5),
            26 => Some(PixelFormat::Bc7),
            _ => None,
        }
    }

    /// Format tag to store in a container entry.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            PixelFormat::Bc1 => 0,
            PixelFormat::Bc2 => 3,
            PixelFormat::Bc3 => 5,
            PixelFormat::Bgra8 => 9,
            PixelFormat::Rgba8 => 10,
            PixelFormat::Bc4 => 24,
            PixelFormat::Bc5 => 25,
            PixelFormat::Bc7 => 26,
        }
    }

    /// Name understood by `texconv -f`.
    #[must_use]
    pub fn texconv_name(self) -> &'static str {
        match self {
            PixelFormat::Bc1 => "BC1_UNORM",
            PixelFormat::Bc2 => "BC2_UNORM",
            PixelFormat::Bc3 => "BC3_UNORM",
            PixelFormat::Bc4 => "BC4_UNORM",
            PixelFormat::Bc5 => "BC5_UNORM",
            PixelFormat::Bc7 => "BC7_UNORM",
            PixelFormat::Rgba8 => "R8G8B8A8_UNORM",
            PixelFormat::Bgra8 => "B8G8R8A8_UNORM",
        }
    }

    /// Short lowercase name (`bc1`, `rgba8`, ...).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PixelFormat::Bc1 => "bc1",
            PixelFormat::Bc2 => "bc2",
            PixelFormat::Bc3 => "bc3",
            PixelFormat::Bc4 => "bc4",
            PixelFormat::Bc5 => "bc5",
            PixelFormat::Bc7 => "bc7",
            PixelFormat::Rgba8 => "rgba8",
            PixelFormat::Bgra8 => "bgra8",
        }
    }

    fn from_dxgi(format: DxgiFormat) -> Option<Self> {
        match format {
            DxgiFormat::BC1_Typeless | DxgiFormat::BC1_UNorm | DxgiFormat::BC1_UNorm_sRGB => {
                Some(PixelFormat::Bc1)
            }
            DxgiFormat::BC2_Typeless | DxgiFormat::BC2_UNorm | DxgiFormat::BC2_UNorm_sRGB => {
                Some(PixelFormat::Bc2)
            }
            DxgiFormat::BC3_Typeless | DxgiFormat::BC3_UNorm | DxgiFormat::BC3_UNorm_sRGB => {
                Some(PixelFormat::Bc3)
            }
            DxgiFormat::BC4_Typeless | DxgiFormat::BC4_UNorm | DxgiFormat::BC4_SNorm => {
                Some(PixelFormat::Bc4)
            }
            DxgiFormat::BC5_Typeless | DxgiFormat::BC5_UNorm | DxgiFormat::BC5_SNorm => {
                Some(PixelFormat::Bc5)
            }
            DxgiFormat::BC7_Typeless | DxgiFormat::BC7_UNorm | DxgiFormat::BC7_UNorm_sRGB => {
                Some(PixelFormat::Bc7)
            }
            DxgiFormat::R8G8B8A8_Typeless
            | DxgiFormat::R8G8B8A8_UNorm
            | DxgiFormat::R8G8B8A8_UNorm_sRGB => Some(PixelFormat::Rgba8),
            DxgiFormat::B8G8R8A8_Typeless
            | DxgiFormat::B8G8R8A8_UNorm
            | DxgiFormat::B8G8R8A8_UNorm_sRGB => Some(PixelFormat::Bgra8),
            _ => None,
        }
    }

    fn from_d3d(format: D3DFormat) -> Option<Self> {
        match format {
            D3DFormat::DXT1 => Some(PixelFormat::Bc1),
            D3DFormat::DXT2 | D3DFormat::DXT3 => Some(PixelFormat::Bc2),
            D3DFormat::DXT4 | D3DFormat::DXT5 => Some(PixelFormat::Bc3),
            D3DFormat::A8B8G8R8 => Some(PixelFormat::Rgba8),
            D3DFormat::A8R8G8B8 => Some(PixelFormat::Bgra8),
            _ => None,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.texconv_name())
    }
}

impl FromStr for PixelFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        let name = lower
            .strip_suffix("_unorm")
            .or_else(|| lower.strip_suffix("_unorm_srgb"))
            .unwrap_or(&lower);
        match name {
            "bc1" | "dxt1" => Ok(PixelFormat::Bc1),
            "bc2" | "dxt3" => Ok(PixelFormat::Bc2),
            "bc3" | "dxt5" => Ok(PixelFormat::Bc3),
            "bc4" | "ati1" => Ok(PixelFormat::Bc4),
            "bc5" | "ati2" => Ok(PixelFormat::Bc5),
            "bc7" => Ok(PixelFormat::Bc7),
            "rgba8" | "r8g8b8a8" => Ok(PixelFormat::Rgba8),
            "bgra8" | "b8g8r8a8" => Ok(PixelFormat::Bgra8),
            _ => Err(format!(
                "Invalid format '{s}'. Valid values: {}",
                PixelFormat::ALL
                    .iter()
                    .map(|f| f.texconv_name())
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
        }
    }
}

/// Detect the pixel format of DDS file contents.
///
/// # Errors
/// Returns [`Error::InvalidTexture`] if the header cannot be parsed and
/// [`Error::UnsupportedFormat`] if it names a format TPUP does not handle.
pub fn detect_dds_format(data: &[u8]) -> Result<PixelFormat> {
    let dds = Dds::read(&mut Cursor::new(data))
        .map_err(|e| Error::InvalidTexture(format!("failed to parse DDS header: {e}")))?;

    if let Some(dxgi) = dds.get_dxgi_format() {
        return PixelFormat::from_dxgi(dxgi)
            .ok_or_else(|| Error::UnsupportedFormat(format!("{dxgi:?} (DXGI)")));
    }
    if let Some(d3d) = dds.get_d3d_format() {
        return PixelFormat::from_d3d(d3d)
            .ok_or_else(|| Error::UnsupportedFormat(format!("{d3d:?} (D3D)")));
    }
    Err(Error::UnsupportedFormat("unknown".to_string()))
}
