//! In-memory project descriptor, serialized once at the end of a run.

mod xml;

use std::collections::HashSet;

use crate::error::{ExportError, Result};
use crate::model::OutputArtifact;

pub use self::xml::render;

/// Artifacts keyed by id, in insertion order. Ids are unique.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArtifactSet {
    items: Vec<OutputArtifact>,
}

impl ArtifactSet {
    pub fn insert(&mut self, artifact: OutputArtifact) -> Result<()> {
        if self.get(&artifact.id).is_some() {
            return Err(ExportError::Manifest(format!(
                "dataset id '{}' already recorded",
                artifact.id
            )));
        }
        self.items.push(artifact);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&OutputArtifact> {
        self.items.iter().find(|a| a.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &OutputArtifact> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.items.iter().map(|a| a.id.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RealizationKind {
    SurveyData {
        projected: bool,
        datasets: ArtifactSet,
        survey_extents: ArtifactSet,
    },
    Topography {
        tin: OutputArtifact,
        stages: ArtifactSet,
        topography: ArtifactSet,
        assoc_surfaces: ArtifactSet,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Realization {
    pub id: String,
    pub name: String,
    pub product_version: String,
    pub promoted: bool,
    pub kind: RealizationKind,
}

impl Realization {
    pub fn survey_data(id: &str, name: &str, version: &str, projected: bool) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            product_version: version.to_string(),
            promoted: false,
            kind: RealizationKind::SurveyData {
                projected,
                datasets: ArtifactSet::default(),
                survey_extents: ArtifactSet::default(),
            },
        }
    }

    pub fn topography(id: &str, name: &str, version: &str, tin: OutputArtifact) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            product_version: version.to_string(),
            promoted: false,
            kind: RealizationKind::Topography {
                tin,
                stages: ArtifactSet::default(),
                topography: ArtifactSet::default(),
                assoc_surfaces: ArtifactSet::default(),
            },
        }
    }

    /// Every artifact owned by this realization, collection by collection.
    pub fn artifacts(&self) -> Vec<&OutputArtifact> {
        match &self.kind {
            RealizationKind::SurveyData {
                datasets,
                survey_extents,
                ..
            } => datasets.iter().chain(survey_extents.iter()).collect(),
            RealizationKind::Topography {
                tin,
                stages,
                topography,
                assoc_surfaces,
            } => std::iter::once(tin)
                .chain(stages.iter())
                .chain(topography.iter())
                .chain(assoc_surfaces.iter())
                .collect(),
        }
    }

    pub fn find(&self, id: &str) -> Option<&OutputArtifact> {
        self.artifacts().into_iter().find(|a| a.id == id)
    }

    fn check_unique_ids(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for artifact in self.artifacts() {
            if !seen.insert(artifact.id.as_str()) {
                return Err(ExportError::Manifest(format!(
                    "dataset id '{}' appears twice in realization '{}'",
                    artifact.id, self.id
                )));
            }
        }
        Ok(())
    }
}

/// Which collection of a realization an artifact belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Datasets,
    SurveyExtents,
    Stages,
    Topography,
    AssocSurfaces,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectManifest {
    pub name: String,
    pub project_type: String,
    pub version: String,
    /// Project level `name -> value`, insertion ordered, names unique.
    pub metadata: Vec<(String, String)>,
    pub inputs: Vec<OutputArtifact>,
    pub realizations: Vec<Realization>,
}

impl ProjectManifest {
    pub fn new(name: &str, project_type: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            project_type: project_type.to_string(),
            version: version.to_string(),
            metadata: Vec::new(),
            inputs: Vec::new(),
            realizations: Vec::new(),
        }
    }

    /// Sets a metadata entry, replacing an earlier value of the same name.
    pub fn set_metadata(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.metadata.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.metadata.push((name, value)),
        }
    }

    pub fn metadata_value(&self, name: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn add_input_dataset(&mut self, artifact: OutputArtifact) -> Result<()> {
        if self.inputs.iter().any(|a| a.id == artifact.id) {
            return Err(ExportError::Manifest(format!(
                "input '{}' already recorded",
                artifact.id
            )));
        }
        self.inputs.push(artifact);
        Ok(())
    }

    /// Adds (or replaces) the realization stored under `key`.
    pub fn add_realization(&mut self, mut realization: Realization, key: &str) {
        realization.id = key.to_string();
        match self.realizations.iter_mut().find(|r| r.id == key) {
            Some(existing) => *existing = realization,
            None => self.realizations.push(realization),
        }
    }

    pub fn realization(&self, key: &str) -> Option<&Realization> {
        self.realizations.iter().find(|r| r.id == key)
    }

    /// Checks the cross-cutting invariants: ids unique per realization,
    /// relative paths unique across the whole project.
    pub fn validate(&self) -> Result<()> {
        let mut paths = HashSet::new();
        for realization in &self.realizations {
            realization.check_unique_ids()?;
        }
        let all = self
            .inputs
            .iter()
            .chain(self.realizations.iter().flat_map(|r| r.artifacts()));
        for artifact in all {
            if !paths.insert(artifact.manifest_path()) {
                return Err(ExportError::Manifest(format!(
                    "path '{}' is used by more than one dataset",
                    artifact.manifest_path()
                )));
            }
        }
        Ok(())
    }
}

/// Files an artifact under one collection of a realization.
pub fn add_artifact(realization: &mut Realization, slot: Slot, artifact: OutputArtifact) -> Result<()> {
    let target = match (&mut realization.kind, slot) {
        (RealizationKind::SurveyData { datasets, .. }, Slot::Datasets) => datasets,
        (RealizationKind::SurveyData { survey_extents, .. }, Slot::SurveyExtents) => survey_extents,
        (RealizationKind::Topography { stages, .. }, Slot::Stages) => stages,
        (RealizationKind::Topography { topography, .. }, Slot::Topography) => topography,
        (RealizationKind::Topography { assoc_surfaces, .. }, Slot::AssocSurfaces) => assoc_surfaces,
        (_, slot) => {
            return Err(ExportError::Manifest(format!(
                "realization '{}' has no {:?} collection",
                realization.id, slot
            )))
        }
    };
    target.insert(artifact)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(id: &str, path: &str) -> OutputArtifact {
        OutputArtifact::new(id, id, path, "Vector")
    }

    #[test]
    fn test_artifact_ids_unique_within_realization() {
        let mut r = Realization::survey_data("survey_data_projected", "Survey Data Projected", "1", true);
        add_artifact(&mut r, Slot::Datasets, artifact("topo_points", "SurveyData/Topo_Points.shp"))
            .unwrap();
        let err = add_artifact(&mut r, Slot::Datasets, artifact("topo_points", "SurveyData/Other.shp"))
            .unwrap_err();
        assert!(matches!(err, ExportError::Manifest(_)));
    }

    #[test]
    fn test_same_id_allowed_across_realizations() {
        let mut manifest = ProjectManifest::new("site", "Topo", "1");
        let mut projected = Realization::survey_data("p", "P", "1", true);
        let mut unprojected = Realization::survey_data("u", "U", "1", false);
        add_artifact(&mut projected, Slot::Datasets, artifact("topo_points", "SurveyData/Topo_Points.shp"))
            .unwrap();
        add_artifact(
            &mut unprojected,
            Slot::Datasets,
            artifact("topo_points", "SurveyDataUnProjected/Topo_Points.shp"),
        )
        .unwrap();
        manifest.add_realization(projected, "survey_data_projected");
        manifest.add_realization(unprojected, "survey_data_unprojected");
        manifest.validate().unwrap();
        assert_eq!(manifest.realizations.len(), 2);
    }

    #[test]
    fn test_duplicate_paths_fail_validation() {
        let mut manifest = ProjectManifest::new("site", "Topo", "1");
        manifest
            .add_input_dataset(artifact("a", "Inputs/x.csv"))
            .unwrap();
        manifest
            .add_input_dataset(artifact("b", "Inputs/x.csv"))
            .unwrap();
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_wrong_slot_is_rejected() {
        let mut r = Realization::survey_data("p", "P", "1", true);
        assert!(add_artifact(&mut r, Slot::Stages, artifact("x", "x.shp")).is_err());
    }

    #[test]
    fn test_set_metadata_replaces() {
        let mut manifest = ProjectManifest::new("site", "Topo", "1");
        manifest.set_metadata("Year", "2014");
        manifest.set_metadata("Site", "CBW05583");
        manifest.set_metadata("Year", "2015");
        assert_eq!(manifest.metadata_value("Year"), Some("2015"));
        assert_eq!(manifest.metadata[0].0, "Year");
        assert_eq!(manifest.metadata.len(), 2);
    }

    #[test]
    fn test_add_realization_replaces_same_key() {
        let mut manifest = ProjectManifest::new("site", "Topo", "1");
        manifest.add_realization(Realization::survey_data("", "A", "1", true), "k");
        manifest.add_realization(Realization::survey_data("", "B", "1", true), "k");
        assert_eq!(manifest.realizations.len(), 1);
        assert_eq!(manifest.realization("k").unwrap().name, "B");
    }
}
