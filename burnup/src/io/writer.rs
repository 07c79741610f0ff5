//! Library writers.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::library::{Library, LibrarySet};
use crate::io::config::OutputFormat;
use crate::io::layout::ensure_dir;

/// Serializes one Library into a file body.
pub trait LibraryWriter {
    fn extension(&self) -> &'static str;
    fn render(&self, library: &Library) -> Result<String>;
}

/// Space-separated series, one per line: `TIME`, `NEUT_PROD`, `NEUT_DEST`,
/// `BUd`, then one upper-cased line per tracked nuclide.
pub struct BrightliteWriter;

impl LibraryWriter for BrightliteWriter {
    fn extension(&self) -> &'static str {
        "txt"
    }

    fn render(&self, library: &Library) -> Result<String> {
        let header = [
            ("TIME", &library.time),
            ("NEUT_PROD", &library.neutron_production),
            ("NEUT_DEST", &library.neutron_destruction),
            ("BUd", &library.burnup),
        ];
        let nuclides = library
            .nuclide_mass
            .iter()
            .map(|(nuc, series)| (nuc.to_uppercase(), series));
        let lines = header
            .into_iter()
            .map(|(key, series)| (key.to_string(), series))
            .chain(nuclides);
        Ok(lines
            .map(|(key, series)| {
                let fields: Vec<String> = std::iter::once(key)
                    .chain(series.iter().map(f64::to_string))
                    .collect();
                fields.join(" ") + "\n"
            })
            .collect())
    }
}

/// The Library as pretty JSON.
pub struct JsonWriter;

impl LibraryWriter for JsonWriter {
    fn extension(&self) -> &'static str {
        "json"
    }

    fn render(&self, library: &Library) -> Result<String> {
        let mut buf = serde_json::to_string_pretty(library).context("serialize library")?;
        buf.push('\n');
        Ok(buf)
    }
}

pub fn writer_for(format: OutputFormat) -> Box<dyn LibraryWriter> {
    match format {
        OutputFormat::Brightlite => Box::new(BrightliteWriter),
        OutputFormat::Json => Box::new(JsonWriter),
    }
}

/// Write every Library of `set` into `dir` as `<material>.<ext>` for each format.
pub fn write_library_set(
    dir: &Path,
    set: &LibrarySet,
    formats: &[OutputFormat],
) -> Result<Vec<PathBuf>> {
    ensure_dir(dir)?;
    let mut written = Vec::new();
    for format in formats {
        let writer = writer_for(*format);
        for (id, library) in set.iter() {
            let path = dir.join(format!("{id}.{}", writer.extension()));
            let body = writer.render(library)?;
            fs::write(&path, body).with_context(|| format!("write {}", path.display()))?;
            written.push(path);
        }
    }
    debug!(dir = %dir.display(), files = written.len(), "wrote libraries");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::library::StepResult;
    use crate::core::material::{Material, MaterialId};
    use std::collections::BTreeMap;

    fn library() -> Library {
        let mut lib = Library::new(
            MaterialId::Fuel,
            Material::new(
                BTreeMap::from([("U235".to_string(), 0.5), ("U238".to_string(), 0.5)]),
                100.0,
            ),
            &["U235".to_string()],
        );
        lib.append(&StepResult {
            elapsed: 10.0,
            neutron_production: 2.5,
            neutron_destruction: 2.0,
            burnup: 0.5,
            material: Material::from_masses(&BTreeMap::from([("U235".to_string(), 40.0)])),
        });
        lib
    }

    #[test]
    fn brightlite_lists_header_then_nuclides() {
        let body = BrightliteWriter.render(&library()).expect("render");
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(
            lines,
            vec![
                "TIME 0 10",
                "NEUT_PROD 0 2.5",
                "NEUT_DEST 0 2",
                "BUd 0 0.5",
                "U235 50 40",
            ]
        );
    }

    #[test]
    fn write_library_set_names_files_by_material() {
        let temp = tempfile::tempdir().expect("tempdir");
        let set = LibrarySet::new(
            BTreeMap::from([
                (MaterialId::Fuel, Material::pure("U235", 1.0)),
                (MaterialId::Nuclide("U235".into()), Material::pure("U235", 1000.0)),
            ]),
            &["U235".to_string()],
        );
        let written = write_library_set(
            temp.path(),
            &set,
            &[OutputFormat::Brightlite, OutputFormat::Json],
        )
        .expect("write");
        let names: Vec<String> = written
            .iter()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        assert_eq!(names, vec!["fuel.txt", "U235.txt", "fuel.json", "U235.json"]);

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&written[2]).expect("read")).expect("json");
        assert_eq!(json["material"], "fuel");
    }
}
