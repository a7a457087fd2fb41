//! The clip engine: clip eligible features against a mask without losing
//! the ones that miss it.

use hashbrown::HashSet;
use serde::Serialize;
use tracing::{debug, info};

use super::dissolve::{dissolve, DissolveSpec};
use super::mask::MaskIndex;
use super::merge::assemble;
use crate::error::{Error, Result};
use crate::geometry::ops::explode_features;
use crate::geometry::{
    drop_degenerate, drop_empty, micro_buffer_pass, normalize_and_dedupe, repair_features,
};
use crate::models::{AttrValue, Feature, FeatureCollection, GeometryKind};

pub const DEFAULT_MICRO_BUFFER: f64 = 0.1;

/// Merge id compared by type and value, so `1` and `"1"` are different ids
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum MergeKey {
    Bool(bool),
    Int(i64),
    Float(u64),
    Text(String),
}

impl MergeKey {
    fn of(value: &AttrValue) -> Option<Self> {
        match value {
            AttrValue::Null => None,
            AttrValue::Bool(b) => Some(MergeKey::Bool(*b)),
            AttrValue::Int(i) => Some(MergeKey::Int(*i)),
            // +0.0 and -0.0 are one id
            AttrValue::Float(f) => Some(MergeKey::Float((f + 0.0).to_bits())),
            AttrValue::Text(s) => Some(MergeKey::Text(s.clone())),
        }
    }
}

/// Per-layer clip parameters.
///
/// Layers differ in mask pre-buffer, micro-buffer epsilon and in whether the
/// remainder step runs at all; these stay separate knobs per layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipProfile {
    /// Field holding a stable, unique row id
    pub merge_id: String,
    pub mask_group_attrs: Vec<String>,
    pub result_group_attrs: Vec<String>,
    /// Rows where this attribute is null bypass clipping
    pub eligibility_attr: Option<String>,
    /// Summed per group in the final dissolve
    pub sum_attrs: Vec<String>,
    pub mask_pre_buffer: f64,
    pub micro_buffer: f64,
    pub dissolve_before_remainder_check: bool,
    pub reinstate_remainder: bool,
    pub target: GeometryKind,
}

impl ClipProfile {
    pub fn new(merge_id: impl Into<String>) -> Self {
        Self {
            merge_id: merge_id.into(),
            mask_group_attrs: Vec::new(),
            result_group_attrs: Vec::new(),
            eligibility_attr: None,
            sum_attrs: Vec::new(),
            mask_pre_buffer: 0.0,
            micro_buffer: DEFAULT_MICRO_BUFFER,
            dissolve_before_remainder_check: false,
            reinstate_remainder: true,
            target: GeometryKind::Polygon,
        }
    }
}

/// Row counts at each stage of one clip run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClipStats {
    pub eligible: usize,
    pub bypass: usize,
    pub clipped: usize,
    pub remainder: usize,
    pub repair_dropped: usize,
    pub output: usize,
}

#[derive(Debug, Clone)]
pub struct ClipOutcome {
    pub features: FeatureCollection,
    pub stats: ClipStats,
}

pub struct ClipEngine<'a> {
    profile: &'a ClipProfile,
}

impl<'a> ClipEngine<'a> {
    pub fn new(profile: &'a ClipProfile) -> Self {
        Self { profile }
    }

    /// Split rows into (eligible, bypass) on the eligibility attribute
    fn partition(&self, features: &FeatureCollection) -> (FeatureCollection, FeatureCollection) {
        match &self.profile.eligibility_attr {
            Some(attr) => {
                let (eligible, bypass): (Vec<Feature>, Vec<Feature>) = features
                    .iter()
                    .cloned()
                    .partition(|f| !f.get(attr).is_null());
                (features.with_features(eligible), features.with_features(bypass))
            }
            None => (features.clone(), features.with_features(Vec::new())),
        }
    }

    /// Merge ids of `features`; every row must carry one and none may repeat
    fn unique_ids(&self, features: &FeatureCollection) -> Result<HashSet<MergeKey>> {
        let field = &self.profile.merge_id;
        let mut ids = HashSet::with_capacity(features.len());
        for feature in features.iter() {
            let value = feature.get(field);
            let Some(key) = MergeKey::of(value) else {
                return Err(Error::MissingMergeId {
                    field: field.clone(),
                });
            };
            if !ids.insert(key) {
                return Err(Error::DuplicateMergeId {
                    field: field.clone(),
                    value: value.to_string(),
                });
            }
        }
        Ok(ids)
    }

    fn clip_one(&self, feature: &Feature, mask: &MaskIndex) -> Option<Feature> {
        mask.clip(&feature.geometry)
            .map(|geometry| feature.with_geometry(geometry))
    }

    /// Run the full clip-and-merge on `features` against `mask`.
    ///
    /// Every eligible feature ends up either as clipped fragments inside the
    /// mask or, when it misses the mask entirely, verbatim as remainder.
    pub fn run(&self, features: &FeatureCollection, mask: &FeatureCollection) -> Result<ClipOutcome> {
        let profile = self.profile;
        let mut stats = ClipStats::default();

        let features = drop_empty(features);
        let (eligible, bypass) = self.partition(&features);
        let eligible_ids = self.unique_ids(&eligible)?;
        stats.eligible = eligible.len();
        stats.bypass = bypass.len();

        // Prepare
        let (eligible, dropped) = repair_features(&explode_features(&eligible));
        stats.repair_dropped += dropped;
        let eligible = normalize_and_dedupe(&eligible);
        let mask_index =
            MaskIndex::from_mask(mask, &profile.mask_group_attrs, profile.mask_pre_buffer);

        // Clip
        let clipped = eligible.with_features(
            eligible
                .iter()
                .filter_map(|f| self.clip_one(f, &mask_index))
                .collect(),
        );
        let (clipped, dropped) = repair_features(&explode_features(&clipped));
        stats.repair_dropped += dropped;
        let clipped = drop_empty(&drop_degenerate(&clipped, profile.target));

        let clipped = if profile.dissolve_before_remainder_check {
            dissolve(
                &clipped,
                &DissolveSpec::by(&profile.result_group_attrs),
                profile.target,
            )
        } else {
            clipped
        };
        stats.clipped = clipped.len();

        // Remainder: eligible ids never seen in the clipped set
        let remainder = if profile.reinstate_remainder {
            let clipped_ids: HashSet<MergeKey> = clipped
                .iter()
                .filter_map(|f| MergeKey::of(f.get(&profile.merge_id)))
                .collect();
            let remainder_ids: HashSet<MergeKey> =
                eligible_ids.difference(&clipped_ids).cloned().collect();

            let common: Vec<String> = eligible
                .columns
                .iter()
                .filter(|c| clipped.has_column(c))
                .cloned()
                .collect();
            let rows = eligible
                .iter()
                .filter(|f| {
                    MergeKey::of(f.get(&profile.merge_id))
                        .is_some_and(|key| remainder_ids.contains(&key))
                })
                .map(|f| f.project(&common))
                .collect();
            FeatureCollection {
                columns: common,
                features: rows,
            }
        } else {
            eligible.with_features(Vec::new())
        };
        stats.remainder = remainder.len();

        debug!(
            "Clip: {} eligible, {} bypass, {} clipped, {} remainder",
            stats.eligible, stats.bypass, stats.clipped, stats.remainder
        );

        // Assemble and post-repair
        let assembled = assemble(&[&bypass, &clipped, &remainder]);
        let (assembled, dropped) = repair_features(&assembled);
        stats.repair_dropped += dropped;
        let assembled = micro_buffer_pass(&normalize_and_dedupe(&assembled), profile.micro_buffer);

        // Final dissolve
        let spec = DissolveSpec::by(&profile.result_group_attrs).with_sum(&profile.sum_attrs);
        let result = drop_degenerate(&dissolve(&assembled, &spec, profile.target), profile.target);
        stats.output = result.len();

        info!(
            "Clipped {} features into {} output pieces ({} reinstated, {} dropped by repair)",
            stats.eligible + stats.bypass,
            stats.output,
            stats.remainder,
            stats.repair_dropped
        );

        Ok(ClipOutcome {
            features: result,
            stats,
        })
    }
}
