//! One thematic item from input layers to a deployed table.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use geo::Area;
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info};

use crate::classify::tag_within_mask;
use crate::clip::{clip_to_region, dissolve, ClipEngine, ClipStats, DissolveSpec};
use crate::config::ItemConfig;
use crate::error::Error;
use crate::geometry::{drop_degenerate, drop_empty};
use crate::io::{read_geojson, write_geojson};
use crate::models::{FeatureCollection, GeometryKind};
use crate::sink::FeatureSink;

/// Primary key column written by the sink
pub const PRIMARY_KEY: &str = "fid";

#[derive(Debug, Clone, Serialize)]
pub struct ItemReport {
    pub item: String,
    pub input: usize,
    pub buffered: usize,
    /// Stats of each clip pass, in run order
    pub clip_passes: Vec<ClipStats>,
    pub output: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ItemReport {
    pub fn remainder(&self) -> usize {
        self.clip_passes.iter().map(|s| s.remainder).sum()
    }

    pub fn repair_dropped(&self) -> usize {
        self.clip_passes.iter().map(|s| s.repair_dropped).sum()
    }
}

/// Counts gathered while processing, before anything is persisted
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerCounts {
    pub input: usize,
    pub buffered: usize,
    pub clip_passes: Vec<ClipStats>,
}

/// Loaded layers of one item
#[derive(Debug, Clone, Default)]
pub struct ItemLayers {
    pub input: FeatureCollection,
    pub tag_mask: Option<FeatureCollection>,
    /// One mask per clip pass
    pub clip_masks: Vec<FeatureCollection>,
    pub region: Option<FeatureCollection>,
}

fn read_layer(path: &Path, what: &str) -> Result<FeatureCollection> {
    read_geojson(path).with_context(|| format!("Failed to read {} {}", what, path.display()))
}

pub struct ItemPipeline<'a> {
    name: &'a str,
    item: &'a ItemConfig,
}

impl<'a> ItemPipeline<'a> {
    pub fn new(name: &'a str, item: &'a ItemConfig) -> Self {
        Self { name, item }
    }

    /// Fail with `MissingInput` before any layer is read
    pub fn check_inputs(&self) -> crate::error::Result<()> {
        for path in self.item.required_inputs() {
            if !path.exists() {
                return Err(Error::MissingInput {
                    path: path.to_path_buf(),
                });
            }
        }
        Ok(())
    }

    pub fn load_layers(&self) -> Result<ItemLayers> {
        let item = self.item;
        let tag_mask = match &item.tag {
            Some(tag) => Some(read_layer(&tag.layer, "tag layer")?),
            None => None,
        };
        let clip_masks = item
            .clip
            .iter()
            .map(|clip| read_layer(&clip.mask, "mask"))
            .collect::<Result<Vec<_>>>()?;
        let region = match &item.region {
            Some(path) => Some(read_layer(path, "region")?),
            None => None,
        };
        Ok(ItemLayers {
            input: read_layer(&item.input, "input")?,
            tag_mask,
            clip_masks,
            region,
        })
    }

    /// Tag, buffer, clip and aggregate the loaded layers. Touches no files.
    pub fn process_layers(
        &self,
        layers: &ItemLayers,
    ) -> crate::error::Result<(FeatureCollection, LayerCounts)> {
        let item = self.item;
        let mut counts = LayerCounts {
            input: layers.input.len(),
            ..Default::default()
        };

        let mut features = layers.input.clone();

        if let (Some(tag), Some(mask)) = (&item.tag, &layers.tag_mask) {
            features = tag_within_mask(&features, mask, &tag.attrs, tag.buffer);
        }

        if let Some(table) = item.buffer_table(self.name)? {
            features = table.apply(&features, item.category_attr.as_deref());
        }
        counts.buffered = features.len();

        if let Some(column) = &item.synthetic_id {
            features = features.with_sequential_ids(column);
        }

        for (pass, (profile, mask)) in item
            .clip_profiles()
            .iter()
            .zip(&layers.clip_masks)
            .enumerate()
        {
            if pass > 0 {
                // the previous pass merged rows, so ids repeat and the
                // grouping coalesce turned null eligibility values into ""
                features = features.with_sequential_ids(&profile.merge_id);
                if let Some(attr) = &profile.eligibility_attr {
                    features = features.blank_to_null(attr);
                }
            }
            let outcome = ClipEngine::new(profile).run(&features, mask)?;
            counts.clip_passes.push(outcome.stats);
            features = outcome.features;
        }

        if !item.final_group_attrs.is_empty() {
            let spec = DissolveSpec::by(&item.final_group_attrs).with_sum(&item.sum_attrs);
            features = drop_degenerate(&dissolve(&features, &spec, item.target), item.target);
        }

        if let Some(region) = &layers.region {
            features = clip_to_region(&features, region, item.target);
        }

        if let Some(min_area) = item.min_area {
            features = above_area(&features, min_area, item.target);
        }

        if !item.drop_columns.is_empty() {
            features = features.drop_columns(&item.drop_columns);
        }

        Ok((drop_empty(&features), counts))
    }

    /// Run the item end to end: validate, write the output file and replace
    /// the sink table. The table replacement is the last step, so the sink
    /// is untouched when any earlier step fails.
    pub fn run(&self, sink: &mut dyn FeatureSink, output_dir: &Path) -> Result<ItemReport> {
        let started_at = Utc::now();
        info!("Processing item '{}'", self.name);

        self.check_inputs()?;
        let layers = self.load_layers()?;
        let (features, counts) = self.process_layers(&layers)?;

        if let Some(limits) = &self.item.count_limits {
            let previous = sink
                .row_count(&self.item.table)
                .with_context(|| format!("Failed to count rows of '{}'", self.item.table))?;
            limits.check(&self.item.table, previous, features.len())?;
        }

        let output = output_dir.join(format!("{}.geojson", self.name));
        write_geojson(&output, &features, &self.item.columns)
            .with_context(|| format!("Failed to write {}", output.display()))?;

        sink.replace_table(&self.item.table, PRIMARY_KEY, &features, &self.item.columns)
            .with_context(|| format!("Failed to replace table '{}'", self.item.table))?;

        let report = ItemReport {
            item: self.name.to_string(),
            input: counts.input,
            buffered: counts.buffered,
            clip_passes: counts.clip_passes,
            output: features.len(),
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            "Item '{}' done: {} in, {} out ({} clip passes, {} remainder) in {}ms",
            report.item,
            report.input,
            report.output,
            report.clip_passes.len(),
            report.remainder(),
            (report.finished_at - report.started_at).num_milliseconds()
        );
        Ok(report)
    }
}

/// Keep pieces strictly larger than `min_area`; lines are never filtered
fn above_area(features: &FeatureCollection, min_area: f64, kind: GeometryKind) -> FeatureCollection {
    if kind == GeometryKind::Line {
        return features.clone();
    }
    let kept: Vec<_> = features
        .iter()
        .filter(|f| f.geometry.unsigned_area() > min_area)
        .cloned()
        .collect();
    debug!(
        "Area threshold {} dropped {} pieces",
        min_area,
        features.len() - kept.len()
    );
    features.with_features(kept)
}
