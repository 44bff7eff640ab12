use std::fs::{self, File};
use std::io;
use std::path::Path;

use tracing::info;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::Result;
use crate::model::manifest_path;

/// Zips every file under `source` into `target`, entries relative to
/// `source`. Returns the number of files written.
pub fn zip_directory(source: &Path, target: &Path) -> Result<usize> {
    let file = File::create(target)?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut count = 0;
    add_dir(&mut zip, source, source, options, &mut count)?;
    zip.finish()?;

    info!(target = %target.display(), files = count, "project packaged");
    Ok(count)
}

fn add_dir(
    zip: &mut ZipWriter<File>,
    root: &Path,
    dir: &Path,
    options: SimpleFileOptions,
    count: &mut usize,
) -> Result<()> {
    let mut entries: Vec<_> = fs::read_dir(dir)?.collect::<io::Result<_>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        let name = path
            .strip_prefix(root)
            .map(manifest_path)
            .unwrap_or_else(|_| entry.file_name().to_string_lossy().into_owned());
        if path.is_dir() {
            zip.add_directory(format!("{name}/"), options)?;
            add_dir(zip, root, &path, options, count)?;
        } else {
            zip.start_file(name, options)?;
            let mut reader = File::open(&path)?;
            io::copy(&mut reader, zip)?;
            *count += 1;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    #[test]
    fn test_zip_directory() {
        let temp = TempDir::new().unwrap();
        let project = temp.path().join("project");
        fs::create_dir_all(project.join("Inputs")).unwrap();
        fs::write(project.join("project.rs.xml"), b"<Project/>").unwrap();
        fs::write(project.join("Inputs").join("ChannelUnits.csv"), b"a,b").unwrap();

        let target = temp.path().join("project.zip");
        assert_eq!(zip_directory(&project, &target).unwrap(), 2);

        let mut archive = zip::ZipArchive::new(File::open(&target).unwrap()).unwrap();
        let mut csv = String::new();
        archive
            .by_name("Inputs/ChannelUnits.csv")
            .unwrap()
            .read_to_string(&mut csv)
            .unwrap();
        assert_eq!(csv, "a,b");
    }
}
