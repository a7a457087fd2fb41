use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::classify::BufferTable;
use crate::clip::{ClipProfile, DEFAULT_MICRO_BUFFER};
use crate::error::Error;
use crate::io::ColumnSchema;
use crate::models::GeometryKind;
use crate::validate::CountLimits;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub global: GlobalConfig,
    #[serde(default)]
    pub items: BTreeMap<String, ItemConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GlobalConfig {
    /// Finished layers are also written here as `<item>.geojson`
    pub output_dir: PathBuf,
    /// Root of the directory sink holding the deployed tables
    pub sink_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ItemConfig {
    pub input: PathBuf,
    pub table: String,
    #[serde(default)]
    pub target: GeometryKind,
    pub category_attr: Option<String>,
    #[serde(default)]
    pub buffer_classes: BTreeMap<String, f64>,
    /// Guards against a silently truncated buffer class table
    pub expected_buffer_classes: Option<usize>,
    /// Assign a 1-based id column with this name before clipping
    pub synthetic_id: Option<String>,
    pub tag: Option<TagConfig>,
    /// Clip passes, run in order
    #[serde(default)]
    pub clip: Vec<ClipConfig>,
    /// Final plain clip to this area layer, e.g. the city boundary
    pub region: Option<PathBuf>,
    #[serde(default)]
    pub final_group_attrs: Vec<String>,
    #[serde(default)]
    pub sum_attrs: Vec<String>,
    pub min_area: Option<f64>,
    #[serde(default)]
    pub drop_columns: Vec<String>,
    #[serde(default)]
    pub columns: ColumnSchema,
    pub count_limits: Option<CountLimits>,
}

/// Mark rows with the attributes of the mask group they lie within
#[derive(Debug, Deserialize, Clone)]
pub struct TagConfig {
    pub layer: PathBuf,
    pub attrs: Vec<String>,
    #[serde(default)]
    pub buffer: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClipConfig {
    pub mask: PathBuf,
    pub merge_id: String,
    #[serde(default)]
    pub mask_group_attrs: Vec<String>,
    #[serde(default)]
    pub result_group_attrs: Vec<String>,
    pub eligibility_attr: Option<String>,
    #[serde(default)]
    pub mask_pre_buffer: f64,
    #[serde(default = "default_micro_buffer")]
    pub micro_buffer: f64,
    #[serde(default)]
    pub dissolve_before_remainder_check: bool,
    #[serde(default = "default_true")]
    pub reinstate_remainder: bool,
}

fn default_micro_buffer() -> f64 {
    DEFAULT_MICRO_BUFFER
}

fn default_true() -> bool {
    true
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path).context("Failed to read config file")?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Check every item up front so that a bad item fails before any work
    pub fn validate(&self) -> crate::error::Result<()> {
        for (name, item) in &self.items {
            item.validate(name)?;
        }
        Ok(())
    }

    pub fn item(&self, name: &str) -> crate::error::Result<&ItemConfig> {
        self.items
            .get(name)
            .ok_or_else(|| Error::config(name, "no such item in configuration"))
    }
}

impl ItemConfig {
    pub fn validate(&self, name: &str) -> crate::error::Result<()> {
        if self.table.trim().is_empty() {
            return Err(Error::config(name, "table name is empty"));
        }
        if !self.buffer_classes.is_empty() {
            self.buffer_table(name)?;
        }
        if let Some(tag) = &self.tag {
            if tag.attrs.is_empty() {
                return Err(Error::config(name, "tag needs at least one attribute"));
            }
            if !tag.buffer.is_finite() {
                return Err(Error::config(name, "tag buffer must be finite"));
            }
        }
        for clip in &self.clip {
            if clip.merge_id.trim().is_empty() {
                return Err(Error::config(name, "merge_id is empty"));
            }
            if !clip.mask_pre_buffer.is_finite() || !clip.micro_buffer.is_finite() {
                return Err(Error::config(name, "clip epsilons must be finite"));
            }
        }
        if let Some(min_area) = self.min_area {
            if !min_area.is_finite() {
                return Err(Error::config(name, "min_area must be finite"));
            }
        }
        if let Some(limits) = &self.count_limits {
            if limits.min_ratio < 0.0 || limits.min_ratio > limits.max_ratio {
                return Err(Error::config(
                    name,
                    format!(
                        "count limits {}..{} are not an ascending range",
                        limits.min_ratio, limits.max_ratio
                    ),
                ));
            }
        }
        Ok(())
    }

    /// The item's buffer table, `None` when it buffers nothing
    pub fn buffer_table(&self, name: &str) -> crate::error::Result<Option<BufferTable>> {
        if self.buffer_classes.is_empty() {
            return Ok(None);
        }
        let expected = self
            .expected_buffer_classes
            .unwrap_or(self.buffer_classes.len());
        BufferTable::new(name, self.buffer_classes.clone(), expected).map(Some)
    }

    /// One profile per clip pass. Sum columns are aggregated by the final
    /// item dissolve only, so that clipped pieces are not summed per pass.
    pub fn clip_profiles(&self) -> Vec<ClipProfile> {
        self.clip
            .iter()
            .map(|clip| {
                let mut profile = ClipProfile::new(clip.merge_id.clone());
                profile.mask_group_attrs = clip.mask_group_attrs.clone();
                profile.result_group_attrs = clip.result_group_attrs.clone();
                profile.eligibility_attr = clip.eligibility_attr.clone();
                profile.mask_pre_buffer = clip.mask_pre_buffer;
                profile.micro_buffer = clip.micro_buffer;
                profile.dissolve_before_remainder_check = clip.dissolve_before_remainder_check;
                profile.reinstate_remainder = clip.reinstate_remainder;
                profile.target = self.target;
                profile
            })
            .collect()
    }

    /// Layer files that must exist before the item starts
    pub fn required_inputs(&self) -> Vec<&Path> {
        let mut paths = vec![self.input.as_path()];
        if let Some(tag) = &self.tag {
            paths.push(tag.layer.as_path());
        }
        paths.extend(self.clip.iter().map(|clip| clip.mask.as_path()));
        if let Some(region) = &self.region {
            paths.push(region.as_path());
        }
        paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[global]
output_dir = "out"
sink_dir = "db"

[items.cycle_infra]
input = "lines.geojson"
table = "cycle_infra_polys"
category_attr = "infra_type"
expected_buffer_classes = 2
synthetic_id = "id"
region = "city.geojson"
final_group_attrs = ["ylre_class"]
sum_attrs = ["length"]
min_area = 7.0
drop_columns = ["infra_type"]

[items.cycle_infra.buffer_classes]
lane = 5.0
path = 3.0

[[items.cycle_infra.clip]]
mask = "street_parts.geojson"
merge_id = "id"
mask_group_attrs = ["ylre_street_area"]
result_group_attrs = ["ylre_class", "infra_type"]
eligibility_attr = "ylre_street_area"

[[items.cycle_infra.clip]]
mask = "street_areas.geojson"
merge_id = "id"
mask_group_attrs = ["ylre_class"]
result_group_attrs = ["ylre_class", "infra_type"]
eligibility_attr = "ylre_class"
mask_pre_buffer = 0.5
reinstate_remainder = false

[items.cycle_infra.columns]
length = "int32"

[items.cycle_infra.count_limits]
min_ratio = 0.9
max_ratio = 1.1
"#;

    #[test]
    fn test_parse_sample() {
        let config = Config::from_toml_str(SAMPLE).unwrap();
        let item = config.item("cycle_infra").unwrap();
        assert_eq!(item.target, GeometryKind::Polygon);
        assert_eq!(item.buffer_table("cycle_infra").unwrap().unwrap().len(), 2);

        let profiles = item.clip_profiles();
        assert_eq!(profiles.len(), 2);
        assert_eq!(profiles[0].merge_id, "id");
        assert_eq!(profiles[0].eligibility_attr.as_deref(), Some("ylre_street_area"));
        assert_eq!(profiles[0].micro_buffer, DEFAULT_MICRO_BUFFER);
        assert!(profiles[0].reinstate_remainder);
        assert!(!profiles[1].reinstate_remainder);
        assert_eq!(profiles[1].mask_pre_buffer, 0.5);
        assert!(profiles.iter().all(|p| p.sum_attrs.is_empty()));

        let inputs = item.required_inputs();
        assert_eq!(inputs.len(), 4);
        assert_eq!(inputs[3], Path::new("city.geojson"));
    }

    #[test]
    fn test_buffer_class_count_mismatch() {
        let broken = SAMPLE.replace("expected_buffer_classes = 2", "expected_buffer_classes = 3");
        let err = Config::from_toml_str(&broken).unwrap_err();
        let err = err.downcast::<Error>().unwrap();
        assert!(matches!(err, Error::Configuration { ref item, .. } if item == "cycle_infra"));
    }

    #[test]
    fn test_unknown_item() {
        let config = Config::from_toml_str(SAMPLE).unwrap();
        assert!(matches!(
            config.item("nope"),
            Err(Error::Configuration { .. })
        ));
    }

    #[test]
    fn test_unknown_column_type_rejected() {
        let broken = SAMPLE.replace("length = \"int32\"", "length = \"decimal\"");
        assert!(Config::from_toml_str(&broken).is_err());
    }

    #[test]
    fn test_one_item_per_buffer_size() {
        let config = Config::from_toml_str(
            r#"
[global]
output_dir = "out"
sink_dir = "db"

[items.traffic_5m]
input = "traffic_volumes.geojson"
table = "traffic_volumes_5m"
buffer_classes = { all = 5.0 }

[items.traffic_15m]
input = "traffic_volumes.geojson"
table = "traffic_volumes_15m"
buffer_classes = { all = 15.0 }
"#,
        )
        .unwrap();

        for (name, distance) in [("traffic_5m", 5.0), ("traffic_15m", 15.0)] {
            let item = config.item(name).unwrap();
            assert!(item.category_attr.is_none());
            let table = item.buffer_table(name).unwrap().unwrap();
            assert_eq!(table.distance("all"), Some(distance));
        }
        assert_eq!(
            config.item("traffic_5m").unwrap().input,
            config.item("traffic_15m").unwrap().input
        );
    }
}
