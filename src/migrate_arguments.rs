use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::{
    compression::CompressionOverride,
    migrate::{MigrationError, MigrationOptions},
};

/// Migrate a hierarchy of groups and datasets between containers.
///
/// Datasets are re-chunked and re-compressed on the way.
/// Per-axis spatial attributes are reversed if the containers use different axis conventions.
#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(author, version)]
#[serde(rename_all = "camelCase")]
pub struct MigrateArguments {
    /// The path to the source container.
    #[arg(short = 'i', long = "inputContainer")]
    pub input_container: String,

    /// The path to the destination container. Created if it does not exist.
    ///
    /// A new container is written as N5 if its name ends in `.n5`, and as a Zarr V3 hierarchy otherwise.
    #[arg(short = 'o', long = "outputContainer")]
    pub output_container: String,

    /// A group or dataset to migrate. Can be repeated.
    ///
    /// If unset, the whole hierarchy is migrated.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[arg(short = 'd', long = "group")]
    pub groups: Vec<String>,

    /// Block size of the destination datasets. A comma separated list of positive integers.
    ///
    /// Only applies to datasets with the same number of dimensions.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(short, long = "blockSize")]
    pub block_size: Option<String>,

    /// Compression of the destination datasets.
    ///
    /// Valid codecs:
    ///   - raw
    ///   - gzip, zip
    ///   - bzip2
    ///   - lz4
    ///   - xz
    ///   - jpeg
    ///
    /// Unrecognised codecs are ignored and the source compression is kept.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(short, long, verbatim_doc_comment)]
    pub compression: Option<String>,

    /// The compression level, block size, preset or quality of the destination codec.
    ///
    /// Non-positive values select the codec default.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(short = 'p', long = "compressionParameter", allow_hyphen_values(true))]
    pub compression_parameter: Option<i32>,

    /// Attributes holding one value per axis. A comma separated list.
    #[arg(long, default_value = "resolution,offset")]
    pub spatial_attributes: String,

    /// The maximum number of chunks concurrently written per dataset.
    ///
    /// Defaults to the number of available threads.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    pub concurrent_chunks: Option<usize>,

    /// Print verbose information, such as the parsed arguments.
    #[serde(skip)]
    #[arg(short, long)]
    pub verbose: bool,
}

fn parse_block_size(block_size: &str) -> Result<Vec<u64>, MigrationError> {
    block_size
        .split(',')
        .map(|size| {
            size.trim().parse::<u64>().map_err(|err| {
                MigrationError::Configuration(format!("invalid block size {block_size:?}: {err}"))
            })
        })
        .collect()
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

impl MigrateArguments {
    /// Convert the arguments to validated [`MigrationOptions`].
    ///
    /// # Errors
    /// Returns [`MigrationError::Configuration`] if the block size cannot be parsed or the options are invalid.
    pub fn migration_options(&self) -> Result<MigrationOptions, MigrationError> {
        let block_size = self
            .block_size
            .as_deref()
            .map(parse_block_size)
            .transpose()?;
        let options = MigrationOptions {
            root_paths: (!self.groups.is_empty()).then(|| self.groups.clone()),
            block_size,
            compression: CompressionOverride::resolve(
                self.compression.as_deref(),
                self.compression_parameter,
            ),
            spatial_attribute_keys: split_list(&self.spatial_attributes),
            concurrent_chunks: self.concurrent_chunks,
        };
        options.validate()?;
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use crate::compression::Compression;

    use super::*;

    #[test]
    fn arguments_to_options() {
        let arguments = MigrateArguments::parse_from([
            "zarrs_migrate",
            "-i",
            "in.zarr",
            "-o",
            "out.zarr",
            "-d",
            "/volumes/raw",
            "--group",
            "volumes/labels",
            "-b",
            "64, 64,32",
            "-c",
            "gzip",
            "-p",
            "-1",
        ]);
        let options = arguments.migration_options().unwrap();
        assert_eq!(
            options.root_paths,
            Some(vec!["/volumes/raw".to_string(), "volumes/labels".to_string()])
        );
        assert_eq!(options.block_size, Some(vec![64, 64, 32]));
        assert_eq!(
            options.compression,
            CompressionOverride::Codec(Compression::Gzip {
                level: -1,
                use_zlib: false
            })
        );
        assert_eq!(options.spatial_attribute_keys, vec!["resolution", "offset"]);
        assert_eq!(options.concurrent_chunks, None);
    }

    #[test]
    fn arguments_defaults() {
        let arguments = MigrateArguments::parse_from([
            "zarrs_migrate",
            "--inputContainer",
            "in.zarr",
            "--outputContainer",
            "out.zarr",
            "--spatial-attributes",
            "pixelResolution",
        ]);
        let options = arguments.migration_options().unwrap();
        assert_eq!(options.root_paths, None);
        assert_eq!(options.block_size, None);
        assert_eq!(options.compression, CompressionOverride::Unset);
        assert_eq!(options.spatial_attribute_keys, vec!["pixelResolution"]);
    }

    #[test]
    fn arguments_invalid_block_size() {
        for block_size in ["64,x", "64,,64", "0,64"] {
            let arguments = MigrateArguments::parse_from([
                "zarrs_migrate",
                "-i",
                "in.zarr",
                "-o",
                "out.zarr",
                "--blockSize",
                block_size,
            ]);
            assert!(matches!(
                arguments.migration_options(),
                Err(MigrationError::Configuration(_))
            ));
        }
    }

    #[test]
    fn arguments_serialize() {
        let arguments = MigrateArguments::parse_from([
            "zarrs_migrate",
            "-i",
            "in.zarr",
            "-o",
            "out.zarr",
            "-c",
            "raw",
        ]);
        let json = serde_json::to_value(&arguments).unwrap();
        assert_eq!(json["inputContainer"], "in.zarr");
        assert_eq!(json["compression"], "raw");
        assert!(json.get("blockSize").is_none());
    }
}
