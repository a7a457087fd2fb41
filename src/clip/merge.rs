//! Schema-reconciled concatenation of feature sets.

use tracing::debug;

use crate::models::FeatureCollection;

/// Concatenate feature sets whose schemas may have diverged.
///
/// The result schema is the intersection of the schemas of every set that
/// contributes rows, in the column order of the first such set. Columns
/// missing from any contributing set are dropped, never defaulted. Sets
/// without rows do not narrow the schema.
pub fn assemble(parts: &[&FeatureCollection]) -> FeatureCollection {
    let contributing: Vec<&FeatureCollection> =
        parts.iter().copied().filter(|p| !p.is_empty()).collect();
    let schema_sources = if contributing.is_empty() {
        parts.to_vec()
    } else {
        contributing
    };

    let columns: Vec<String> = match schema_sources.first() {
        Some(first) => first
            .columns
            .iter()
            .filter(|c| schema_sources.iter().all(|p| p.has_column(c)))
            .cloned()
            .collect(),
        None => Vec::new(),
    };

    for part in &schema_sources {
        let dropped: Vec<&String> = part.columns.iter().filter(|c| !columns.contains(c)).collect();
        if !dropped.is_empty() {
            debug!("Schema mismatch, dropping columns {:?}", dropped);
        }
    }

    let features = parts
        .iter()
        .flat_map(|part| part.iter().map(|f| f.project(&columns)))
        .collect();

    FeatureCollection { columns, features }
}
