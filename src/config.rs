//! Configuration module.
//!
//! Handles loading, validating, and merging `cuticle.toml`. Stock defaults
//! are overridden by the user's file, which in turn is overridden by CLI
//! flags.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [thumbnail]
//! size = "128"              # WIDTH[xHEIGHT][^]; ^ fills the box
//! output = "tn_%s.jpg"      # %s = source name without extension
//! interpolator = "bilinear" # nearest, bilinear, bicubic, lanczos3
//! sharpen = "mild"          # none, mild, or a matrix file
//! # export_profile = "srgb" # builtin srgb or an ICC file
//! # import_profile = "..."  # for sources without an embedded profile
//! linear = false
//! crop = false
//! rotate = false
//! delete_profile = false
//!
//! [processing]
//! # max_processes = 4       # omit for one worker per core
//! ```
//!
//! Unknown keys are rejected everywhere, so a typo is an error rather than a
//! silently ignored setting.

use crate::imaging::ColourProfile;
use crate::request::{RequestError, SharpenMask, SizeSpec, ThumbnailRequest};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the config file looked up in the working directory.
pub const CONFIG_FILE: &str = "cuticle.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid setting: {0}")]
    Invalid(String),
}

impl From<RequestError> for ConfigError {
    fn from(err: RequestError) -> Self {
        Self::Invalid(err.to_string())
    }
}

/// Tool configuration loaded from `cuticle.toml`.
///
/// All fields have defaults; a user file need only name what it changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CuticleConfig {
    /// Defaults for every thumbnail request.
    pub thumbnail: ThumbnailConfig,
    pub processing: ProcessingConfig,
}

impl CuticleConfig {
    /// Check that every stored string parses and every count is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.thumbnail.to_request()?.validate()?;
        if self.processing.max_processes == Some(0) {
            return Err(ConfigError::Invalid(
                "processing.max_processes must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Lay `user` over the stock defaults, then deserialize and validate.
    pub fn from_layers(user: Option<toml::Table>) -> Result<Self, ConfigError> {
        let mut table = stock_table();
        if let Some(user) = user {
            overlay(&mut table, user);
        }
        let config: Self = toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Invalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

/// Thumbnail defaults, stored as the strings a user would type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThumbnailConfig {
    pub size: String,
    pub output: String,
    pub interpolator: String,
    pub sharpen: String,
    pub export_profile: Option<String>,
    pub import_profile: Option<String>,
    pub linear: bool,
    pub crop: bool,
    pub rotate: bool,
    pub delete_profile: bool,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            size: "128".to_string(),
            output: "tn_%s.jpg".to_string(),
            interpolator: "bilinear".to_string(),
            sharpen: "mild".to_string(),
            export_profile: None,
            import_profile: None,
            linear: false,
            crop: false,
            rotate: false,
            delete_profile: false,
        }
    }
}

impl ThumbnailConfig {
    /// Parse the stored strings into a request.
    pub fn to_request(&self) -> Result<ThumbnailRequest, RequestError> {
        let size: SizeSpec = self.size.parse()?;
        let Ok(sharpen) = self.sharpen.parse::<SharpenMask>();
        let parse_profile = |name: &Option<String>| {
            name.as_deref().map(|p| {
                let Ok(profile) = p.parse::<ColourProfile>();
                profile
            })
        };
        Ok(ThumbnailRequest {
            crop: self.crop,
            auto_rotate: self.rotate,
            linear: self.linear,
            sharpen,
            kernel: self.interpolator.parse()?,
            import_profile: parse_profile(&self.import_profile),
            export_profile: parse_profile(&self.export_profile),
            delete_profile: self.delete_profile,
            output: self.output.clone(),
            ..ThumbnailRequest::default()
        }
        .with_size(size))
    }
}

/// Batch parallelism.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Upper bound on concurrent thumbnails; one per core when absent.
    pub max_processes: Option<usize>,
}

impl ProcessingConfig {
    /// Worker count for the global pool, never more than the core count.
    pub fn worker_threads(&self) -> usize {
        let cores = std::thread::available_parallelism().map_or(1, |n| n.get());
        match self.max_processes {
            Some(n) => n.clamp(1, cores),
            None => cores,
        }
    }
}

/// The stock defaults as a TOML table, the bottom layer of every load.
pub fn stock_table() -> toml::Table {
    toml::Table::try_from(CuticleConfig::default()).expect("stock config is always serializable")
}

/// Merge `top` into `base`: sub-tables merge per key, anything else replaces.
pub fn overlay(base: &mut toml::Table, top: toml::Table) {
    for (key, value) in top {
        let toml::Value::Table(above) = value else {
            base.insert(key, value);
            continue;
        };
        if let Some(toml::Value::Table(below)) = base.get_mut(&key) {
            overlay(below, above);
            continue;
        }
        base.insert(key, toml::Value::Table(above));
    }
}

/// The user's file as a table, or `None` when there is no such file.
pub fn read_user_layer(path: &Path) -> Result<Option<toml::Table>, ConfigError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    text.parse::<toml::Table>()
        .map(Some)
        .map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
}

/// Stock defaults overridden by `path` if it exists.
pub fn load_config(path: &Path) -> Result<CuticleConfig, ConfigError> {
    CuticleConfig::from_layers(read_user_layer(path)?)
}

/// Returns a fully-commented stock `cuticle.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# Cuticle Configuration
# =====================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults. Command-line flags override them.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Thumbnail defaults
# ---------------------------------------------------------------------------
[thumbnail]
# Box to fit the thumbnail into: WIDTH, WIDTHxHEIGHT, with a trailing ^ to
# fill the box (enlarging if needed) instead of only shrinking larger images.
size = "128"

# Destination template. %s is the source name without its extension.
# Relative templates are placed beside the source; absolute ones are not.
output = "tn_%s.jpg"

# Interpolation for the final fractional resize:
# nearest, bilinear, bicubic or lanczos3. Enlarging always uses nearest.
interpolator = "bilinear"

# Sharpening after shrinking: none, mild, or the path of a matrix file.
sharpen = "mild"

# Output colour profile: "srgb" or the path of an ICC file.
# export_profile = "srgb"

# Profile assumed for sources without an embedded one.
# import_profile = "srgb"

# Resample in linear light. Slower; disables shrink-on-load.
linear = false

# Centre-crop to exactly the requested box.
crop = false

# Rotate upright from the EXIF orientation and drop the tag.
rotate = false

# Strip the colour profile from the thumbnail.
delete_profile = false

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel thumbnail workers.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_processes = 4
"##
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::{Kernel, ResizeConstraint};
    use tempfile::TempDir;

    fn user(text: &str) -> Option<toml::Table> {
        Some(text.parse().unwrap())
    }

    fn write_config(text: &str) -> (TempDir, PathBuf) {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILE);
        fs::write(&path, text).unwrap();
        (tmp, path)
    }

    #[test]
    fn stock_config_builds_the_default_request() {
        let request = CuticleConfig::default().thumbnail.to_request().unwrap();
        assert_eq!(request, ThumbnailRequest::default());
    }

    #[test]
    fn user_layer_changes_only_what_it_names() {
        let config = CuticleConfig::from_layers(user(
            r#"
[thumbnail]
size = "200x100^"
crop = true
"#,
        ))
        .unwrap();
        let request = config.thumbnail.to_request().unwrap();

        assert_eq!(request.target(), (200, 100));
        assert_eq!(request.constraint, ResizeConstraint::FillArea);
        assert!(request.crop);
        assert_eq!(request.output, "tn_%s.jpg");
        assert_eq!(request.kernel, Kernel::Bilinear);
        assert_eq!(config.processing, ProcessingConfig::default());
    }

    #[test]
    fn profile_strings_become_profiles() {
        let config = ThumbnailConfig {
            export_profile: Some("srgb".into()),
            import_profile: Some("/profiles/adobe.icc".into()),
            ..ThumbnailConfig::default()
        };
        let request = config.to_request().unwrap();
        assert_eq!(request.export_profile, Some(ColourProfile::Srgb));
        assert_eq!(
            request.import_profile,
            Some(ColourProfile::File("/profiles/adobe.icc".into()))
        );
    }

    #[test]
    fn missing_file_means_stock_config() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(&tmp.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config, CuticleConfig::default());
    }

    #[test]
    fn file_values_override_stock() {
        let (_tmp, path) = write_config(
            r#"
[thumbnail]
interpolator = "lanczos3"
linear = true

[processing]
max_processes = 2
"#,
        );
        let config = load_config(&path).unwrap();

        assert_eq!(config.thumbnail.interpolator, "lanczos3");
        assert!(config.thumbnail.linear);
        assert_eq!(config.thumbnail.size, "128");
        assert_eq!(config.processing.max_processes, Some(2));
    }

    #[test]
    fn broken_toml_names_the_file() {
        let (_tmp, path) = write_config("size = [[[");
        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains(CONFIG_FILE));
    }

    #[test]
    fn unreadable_path_is_a_read_error() {
        let tmp = TempDir::new().unwrap();
        // A directory exists but cannot be read as a file.
        let err = load_config(tmp.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn workers_default_to_core_count() {
        let cores = std::thread::available_parallelism().map_or(1, |n| n.get());
        assert_eq!(ProcessingConfig::default().worker_threads(), cores);
        let greedy = ProcessingConfig {
            max_processes: Some(10_000),
        };
        assert_eq!(greedy.worker_threads(), cores);
    }

    #[test]
    fn workers_can_be_limited() {
        let single = ProcessingConfig {
            max_processes: Some(1),
        };
        assert_eq!(single.worker_threads(), 1);
    }

    #[test]
    fn overlay_merges_nested_tables() {
        let mut base = stock_table();
        overlay(
            &mut base,
            "[thumbnail]\ncrop = true\n".parse::<toml::Table>().unwrap(),
        );
        let thumbnail = base["thumbnail"].as_table().unwrap();

        assert_eq!(thumbnail["crop"].as_bool(), Some(true));
        assert_eq!(thumbnail["size"].as_str(), Some("128"));
        assert_eq!(thumbnail["interpolator"].as_str(), Some("bilinear"));
    }

    #[test]
    fn overlay_replaces_scalars_and_adds_keys() {
        let mut base: toml::Table = "size = \"128\"".parse().unwrap();
        overlay(&mut base, "size = \"64\"\nextra = 1".parse().unwrap());
        assert_eq!(base["size"].as_str(), Some("64"));
        assert_eq!(base["extra"].as_integer(), Some(1));
    }

    #[test]
    fn misspelt_key_is_rejected() {
        let err = CuticleConfig::from_layers(user("[thumbnail]\nsise = \"100\"\n")).unwrap_err();
        assert!(err.to_string().contains("sise"));
    }

    #[test]
    fn misspelt_section_is_rejected() {
        assert!(CuticleConfig::from_layers(user("[thumbnails]\nsize = \"100\"\n")).is_err());
    }

    #[test]
    fn bad_values_fail_validation() {
        for layer in [
            "[thumbnail]\nsize = \"wide\"\n",
            "[thumbnail]\nsize = \"0\"\n",
            "[thumbnail]\ninterpolator = \"spline\"\n",
            "[processing]\nmax_processes = 0\n",
        ] {
            let err = CuticleConfig::from_layers(user(layer)).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)), "{layer}: {err}");
        }
    }

    #[test]
    fn unknown_interpolator_is_named() {
        let mut config = CuticleConfig::default();
        config.thumbnail.interpolator = "spline".into();
        assert!(config.validate().unwrap_err().to_string().contains("spline"));
    }

    #[test]
    fn generated_config_parses_back_to_stock() {
        let config: CuticleConfig = toml::from_str(stock_config_toml()).unwrap();
        assert_eq!(config, CuticleConfig::default());
        assert!(stock_config_toml().contains("[thumbnail]"));
        assert!(stock_config_toml().contains("[processing]"));
    }
}
