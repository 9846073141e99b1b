//! Configuration loading
//!
//! The compiled-in defaults (`config/default.toml`) are merged with an
//! optional user file, user values winning. Nested tables merge key by
//! key; arrays and scalars are replaced wholesale.

use crate::error::{Error, Result};
use chrono_tz::Tz;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

/// Attributes that must match between a target frame and a calibration frame,
/// and the image types that need this calibration.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CalibrationRequirement {
    #[serde(default)]
    pub attrs: Vec<String>,
    #[serde(default)]
    pub targets: Vec<String>,
}

/// Path and name attributes for one image type
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct Template {
    #[serde(default)]
    pub path: Vec<String>,
    #[serde(default)]
    pub name: Vec<String>,
}

/// A set of reorganize templates keyed by image type, with shared prefixes
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct TemplateSet {
    #[serde(rename = "_base_path", default)]
    pub base_path: Vec<String>,
    #[serde(rename = "_base_name", default)]
    pub base_name: Vec<String>,
    #[serde(flatten)]
    pub types: BTreeMap<String, Template>,
}

impl TemplateSet {
    /// Full template for an image type: shared prefixes followed by the type's own lists
    pub fn resolve(&self, image_type: &str) -> Option<Template> {
        let own = self.types.get(image_type)?;
        Some(Template {
            path: self.base_path.iter().chain(&own.path).cloned().collect(),
            name: self.base_name.iter().chain(&own.name).cloned().collect(),
        })
    }
}

/// Which template set drives a reorganize
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Catalog,
    Siril,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    timezone: String,
    missing_label: String,
    cache_name: String,
    mask_history: usize,
    required: Vec<String>,
    mutable: Vec<String>,
    defaults: Vec<String>,
    #[serde(default)]
    calibration: BTreeMap<String, CalibrationRequirement>,
    #[serde(default)]
    catalog: TemplateSet,
    #[serde(default)]
    siril: TemplateSet,
}

/// Resolved application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub timezone: Tz,
    pub missing_label: String,
    pub cache_name: String,
    pub mask_history: usize,
    pub required: Vec<String>,
    pub mutable: Vec<String>,
    pub defaults: Vec<String>,
    pub calibration: BTreeMap<String, CalibrationRequirement>,
    pub catalog: TemplateSet,
    pub siril: TemplateSet,
}

impl Config {
    /// Load the defaults merged with the user file.
    ///
    /// `user_file` overrides the platform location
    /// (`<config dir>/fitsdex/config.toml`). A missing user file is not an error.
    pub fn load(user_file: Option<&Path>) -> Result<Self> {
        let mut value: toml::Value = toml::from_str(DEFAULT_CONFIG)?;

        let user_file = user_file.map(Path::to_path_buf).or_else(user_config_path);
        if let Some(path) = user_file.filter(|p| p.exists()) {
            tracing::info!("Loading user config from {}", path.display());
            let content = std::fs::read_to_string(&path)?;
            let user: toml::Value = toml::from_str(&content)?;
            merge(&mut value, user);
        }

        Self::from_value(value)
    }

    /// The compiled-in defaults only
    pub fn builtin() -> Result<Self> {
        Self::from_value(toml::from_str(DEFAULT_CONFIG)?)
    }

    /// Parse a complete configuration from a TOML string merged over the defaults
    pub fn from_toml_str(overrides: &str) -> Result<Self> {
        let mut value: toml::Value = toml::from_str(DEFAULT_CONFIG)?;
        merge(&mut value, toml::from_str(overrides)?);
        Self::from_value(value)
    }

    fn from_value(value: toml::Value) -> Result<Self> {
        let raw: RawConfig = value.try_into()?;

        let timezone: Tz = raw
            .timezone
            .parse()
            .map_err(|e| Error::Config(format!("unknown time zone '{}': {}", raw.timezone, e)))?;

        let calibration = raw
            .calibration
            .into_iter()
            .map(|(kind, req)| {
                let req = CalibrationRequirement {
                    attrs: upper(req.attrs),
                    targets: req.targets.into_iter().map(|t| t.to_lowercase()).collect(),
                };
                (kind.to_lowercase(), req)
            })
            .collect();

        Ok(Config {
            timezone,
            missing_label: raw.missing_label,
            cache_name: raw.cache_name,
            mask_history: raw.mask_history.max(1),
            required: upper(raw.required),
            mutable: upper(raw.mutable),
            defaults: upper(raw.defaults),
            calibration,
            catalog: normalize_templates(raw.catalog),
            siril: normalize_templates(raw.siril),
        })
    }

    pub fn templates(&self, layout: Layout) -> &TemplateSet {
        match layout {
            Layout::Catalog => &self.catalog,
            Layout::Siril => &self.siril,
        }
    }

    /// Look up a calibration requirement by type label ("Dark Frame" and "dark" both work)
    pub fn calibration_for(&self, kind: &str) -> Result<&CalibrationRequirement> {
        let label = image_type_label(kind);
        self.calibration
            .get(&label)
            .ok_or(Error::UnknownCalibrationType(label))
    }
}

/// Normalized lowercase image-type label ("Dark Frame" -> "dark")
pub fn image_type_label(raw: &str) -> String {
    raw.replace(" Frame", "").trim().to_lowercase()
}

fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("fitsdex").join("config.toml"))
}

fn upper(attrs: Vec<String>) -> Vec<String> {
    attrs.into_iter().map(|a| a.to_uppercase()).collect()
}

fn normalize_templates(set: TemplateSet) -> TemplateSet {
    TemplateSet {
        base_path: upper(set.base_path),
        base_name: upper(set.base_name),
        types: set
            .types
            .into_iter()
            .map(|(kind, t)| {
                let t = Template {
                    path: upper(t.path),
                    name: upper(t.name),
                };
                (kind.to_lowercase(), t)
            })
            .collect(),
    }
}

fn merge(target: &mut toml::Value, source: toml::Value) {
    match (target, source) {
        (toml::Value::Table(target), toml::Value::Table(source)) => {
            for (key, value) in source {
                match target.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (target, source) => *target = source,
    }
}
