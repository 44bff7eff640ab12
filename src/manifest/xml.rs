use chrono::{DateTime, Utc};

use super::{ProjectManifest, Realization, RealizationKind};
use crate::error::Result;
use crate::model::OutputArtifact;
use crate::xml::XmlDoc;

/// Renders the project descriptor. `created` is the only value that varies
/// between two runs over the same archive.
pub fn render(manifest: &ProjectManifest, created: DateTime<Utc>) -> Result<String> {
    let stamp = created.format("%Y-%m-%dT%H:%M:%S").to_string();
    let mut doc = XmlDoc::new();

    doc.start("Project", &[])?;
    doc.text_element("Name", &[], &manifest.name)?;
    doc.text_element("ProjectType", &[], &manifest.project_type)?;
    doc.text_element("Version", &[], &manifest.version)?;

    doc.start("MetaData", &[])?;
    for (name, value) in &manifest.metadata {
        doc.text_element("Meta", &[("name", name.as_str())], value)?;
    }
    doc.end("MetaData")?;

    doc.start("Inputs", &[])?;
    for input in &manifest.inputs {
        write_dataset(&mut doc, input, &stamp)?;
    }
    doc.end("Inputs")?;

    doc.start("Realizations", &[])?;
    for realization in &manifest.realizations {
        write_realization(&mut doc, realization, &manifest.version, &stamp)?;
    }
    doc.end("Realizations")?;

    doc.end("Project")?;
    Ok(doc.into_string())
}

fn write_realization(
    doc: &mut XmlDoc,
    realization: &Realization,
    project_version: &str,
    stamp: &str,
) -> Result<()> {
    let promoted = if realization.promoted { "true" } else { "false" };
    let version = if realization.product_version.is_empty() {
        project_version
    } else {
        realization.product_version.as_str()
    };

    match &realization.kind {
        RealizationKind::SurveyData {
            projected,
            datasets,
            survey_extents,
        } => {
            let projected = if *projected { "true" } else { "false" };
            let attrs = [
                ("id", realization.id.as_str()),
                ("projected", projected),
                ("promoted", promoted),
                ("productVersion", version),
                ("dateCreated", stamp),
            ];
            doc.start("SurveyData", &attrs)?;
            doc.text_element("Name", &[], &realization.name)?;
            doc.start("Datasets", &[])?;
            for artifact in datasets.iter() {
                write_dataset(doc, artifact, stamp)?;
            }
            doc.end("Datasets")?;
            if !survey_extents.is_empty() {
                doc.start("SurveyExtents", &[])?;
                for artifact in survey_extents.iter() {
                    write_dataset(doc, artifact, stamp)?;
                }
                doc.end("SurveyExtents")?;
            }
            doc.end("SurveyData")
        }
        RealizationKind::Topography {
            tin,
            stages,
            topography,
            assoc_surfaces,
        } => {
            let attrs = [
                ("id", realization.id.as_str()),
                ("promoted", promoted),
                ("productVersion", version),
                ("dateCreated", stamp),
            ];
            doc.start("Topography", &attrs)?;
            doc.text_element("Name", &[], &realization.name)?;
            write_dataset(doc, tin, stamp)?;

            doc.start("Stages", &[])?;
            for artifact in stages.iter() {
                write_dataset(doc, artifact, stamp)?;
            }
            doc.end("Stages")?;

            doc.start("Topography", &[])?;
            for artifact in topography.iter() {
                write_dataset(doc, artifact, stamp)?;
            }
            doc.end("Topography")?;

            doc.start("AssocSurfaces", &[])?;
            for artifact in assoc_surfaces.iter() {
                write_dataset(doc, artifact, stamp)?;
            }
            doc.end("AssocSurfaces")?;
            doc.end("Topography")
        }
    }
}

fn write_dataset(doc: &mut XmlDoc, artifact: &OutputArtifact, stamp: &str) -> Result<()> {
    let mut attrs: Vec<(&str, &str)> = vec![("id", artifact.id.as_str())];
    attrs.extend(
        artifact
            .attributes
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str())),
    );
    if !artifact.attributes.contains_key("dateCreated") {
        attrs.push(("dateCreated", stamp));
    }

    doc.start(&artifact.dataset_type, &attrs)?;
    doc.text_element("Name", &[], &artifact.display_name)?;
    doc.text_element("Path", &[], &artifact.manifest_path())?;
    if !artifact.metadata.is_empty() {
        doc.start("MetaData", &[])?;
        for (name, value) in &artifact.metadata {
            doc.text_element("Meta", &[("name", name.as_str())], value)?;
        }
        doc.end("MetaData")?;
    }
    doc.end(&artifact.dataset_type)
}
