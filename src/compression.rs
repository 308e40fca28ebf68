//! Chunk compression descriptors and override resolution.

use serde::{Deserialize, Serialize};

/// The default gzip level, meaning "implementation default".
pub const DEFAULT_GZIP_LEVEL: i32 = -1;
/// The default bzip2 block size.
pub const DEFAULT_BZIP2_BLOCK_SIZE: u32 = 9;
/// The default lz4 block size.
pub const DEFAULT_LZ4_BLOCK_SIZE: u32 = 65536;
/// The default xz preset.
pub const DEFAULT_XZ_PRESET: u32 = 6;
/// The default jpeg quality.
pub const DEFAULT_JPEG_QUALITY: u32 = 100;

/// A chunk compression codec descriptor.
///
/// Serialised in the N5 `compression` attribute form, e.g. `{"type": "gzip", "level": -1, "useZlib": false}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Compression {
    /// Uncompressed.
    #[default]
    Raw,
    Gzip {
        /// Compression level, -1 for the implementation default.
        #[serde(default = "default_gzip_level")]
        level: i32,
        /// Use zlib framing rather than a gzip container (the `zip` codec name).
        #[serde(default, rename = "useZlib")]
        use_zlib: bool,
    },
    Bzip2 {
        #[serde(default = "default_bzip2_block_size", rename = "blockSize")]
        block_size: u32,
    },
    Lz4 {
        #[serde(default = "default_lz4_block_size", rename = "blockSize")]
        block_size: u32,
    },
    Xz {
        #[serde(default = "default_xz_preset")]
        preset: u32,
    },
    Jpeg {
        #[serde(default = "default_jpeg_quality")]
        quality: u32,
    },
}

fn default_gzip_level() -> i32 {
    DEFAULT_GZIP_LEVEL
}

fn default_bzip2_block_size() -> u32 {
    DEFAULT_BZIP2_BLOCK_SIZE
}

fn default_lz4_block_size() -> u32 {
    DEFAULT_LZ4_BLOCK_SIZE
}

fn default_xz_preset() -> u32 {
    DEFAULT_XZ_PRESET
}

fn default_jpeg_quality() -> u32 {
    DEFAULT_JPEG_QUALITY
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Raw => write!(f, "raw"),
            Self::Gzip {
                level,
                use_zlib: false,
            } => write!(f, "gzip(level={level})"),
            Self::Gzip {
                level,
                use_zlib: true,
            } => write!(f, "zip(level={level})"),
            Self::Bzip2 { block_size } => write!(f, "bzip2(blockSize={block_size})"),
            Self::Lz4 { block_size } => write!(f, "lz4(blockSize={block_size})"),
            Self::Xz { preset } => write!(f, "xz(preset={preset})"),
            Self::Jpeg { quality } => write!(f, "jpeg(quality={quality})"),
        }
    }
}

/// A requested compression override.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CompressionOverride {
    /// No codec name was supplied.
    #[default]
    Unset,
    /// The codec name was not recognised. The source codec is kept.
    Unrecognized(String),
    /// An explicit codec, including an explicit [`Compression::Raw`].
    Codec(Compression),
}

impl CompressionOverride {
    /// Resolve a codec name and optional parameter.
    ///
    /// Names are case insensitive.
    /// A positive `parameter` sets the codec specific level or block size knob.
    /// For `xz`, zero is also accepted since preset 0 is a valid fast setting.
    /// Otherwise, the codec default is used.
    #[must_use]
    pub fn resolve(name: Option<&str>, parameter: Option<i32>) -> Self {
        let Some(name) = name else {
            return Self::Unset;
        };
        let positive = parameter
            .filter(|parameter| *parameter > 0)
            .and_then(|parameter| u32::try_from(parameter).ok());
        let compression = match name.to_lowercase().as_str() {
            "raw" => Compression::Raw,
            "bzip2" => Compression::Bzip2 {
                block_size: positive.unwrap_or(DEFAULT_BZIP2_BLOCK_SIZE),
            },
            "lz4" => Compression::Lz4 {
                block_size: positive.unwrap_or(DEFAULT_LZ4_BLOCK_SIZE),
            },
            "xz" => Compression::Xz {
                preset: parameter
                    .and_then(|parameter| u32::try_from(parameter).ok())
                    .unwrap_or(DEFAULT_XZ_PRESET),
            },
            "gzip" => Compression::Gzip {
                level: parameter
                    .filter(|parameter| *parameter > 0)
                    .unwrap_or(DEFAULT_GZIP_LEVEL),
                use_zlib: false,
            },
            "zip" => Compression::Gzip {
                level: parameter
                    .filter(|parameter| *parameter > 0)
                    .unwrap_or(DEFAULT_GZIP_LEVEL),
                use_zlib: true,
            },
            "jpeg" => Compression::Jpeg {
                quality: positive.unwrap_or(DEFAULT_JPEG_QUALITY),
            },
            _ => return Self::Unrecognized(name.to_string()),
        };
        Self::Codec(compression)
    }

    /// The explicit codec, if any.
    #[must_use]
    pub fn codec(&self) -> Option<&Compression> {
        match self {
            Self::Codec(compression) => Some(compression),
            Self::Unset | Self::Unrecognized(_) => None,
        }
    }

    /// The codec to write given the codec of the source dataset.
    #[must_use]
    pub fn effective(&self, source: &Compression) -> Compression {
        self.codec().copied().unwrap_or(*source)
    }
}
