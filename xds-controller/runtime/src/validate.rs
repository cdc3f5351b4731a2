//! Offline checks over a directory of manifests.

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::{
    collections::BTreeMap,
    fmt,
    io::{self, Write},
    path::{Path, PathBuf},
};

#[cfg(test)]
mod tests;

const DEFAULT_NAMESPACE: &str = "default";

#[derive(Debug, Parser)]
#[clap(
    name = "validate",
    about = "Validate configurations by scanning for YAML files and running validation checks"
)]
pub struct ValidateArgs {
    /// Path to directory to validate.
    #[clap(short, long)]
    path: PathBuf,

    /// Recursively validate directory.
    #[clap(short, long)]
    recursive: bool,
}

/// Identifies a manifest: `apiVersion/kind`, namespace, name.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ManifestKey {
    api_kind: String,
    namespace: String,
    name: String,
}

/// A manifest key found in more than one place.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Duplicate {
    pub key: ManifestKey,
    pub paths: Vec<PathBuf>,
}

#[derive(Debug, Default)]
pub struct Report {
    pub files: Vec<PathBuf>,
    pub duplicates: Vec<Duplicate>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    #[serde(default)]
    api_version: String,
    #[serde(default)]
    kind: String,
    #[serde(default)]
    metadata: Metadata,
}

#[derive(Debug, Default, Deserialize)]
struct Metadata {
    #[serde(default)]
    name: String,
    #[serde(default)]
    namespace: Option<String>,
}

// === impl ValidateArgs ===

impl ValidateArgs {
    /// Parses arguments that follow the `validate` command and runs it, returning the process
    /// exit code.
    pub fn parse_and_run<I, T>(args: I) -> i32
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Self::parse_from(args).run()
    }

    pub fn run(self) -> i32 {
        self.run_with(&mut io::stdout().lock(), &mut io::stderr().lock())
    }

    /// Lists the scanned files on `out`; duplicates and errors go to `err`.
    fn run_with(&self, out: &mut impl Write, err: &mut impl Write) -> i32 {
        let report = match scan(&self.path, self.recursive) {
            Ok(report) => report,
            Err(error) => {
                let _ = writeln!(err, "Validation error: {error:#}");
                return 1;
            }
        };

        for file in &report.files {
            let rel = file.strip_prefix(&self.path).unwrap_or(file);
            let _ = writeln!(out, "{}", rel.display());
        }
        if report.duplicates.is_empty() {
            return 0;
        }
        for dup in &report.duplicates {
            let _ = writeln!(err, "{dup}");
        }
        1
    }
}

// === impl ManifestKey ===

impl fmt::Display for ManifestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.api_kind, self.namespace, self.name)
    }
}

impl fmt::Display for Duplicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error: duplicate manifest found for {}:", self.key)?;
        for path in &self.paths {
            write!(f, "\n- {}", path.display())?;
        }
        Ok(())
    }
}

/// Reads every `*.yaml` file in `dir` (and its subdirectories, if `recursive`) and reports the
/// manifests that are defined more than once.
pub fn scan(dir: &Path, recursive: bool) -> Result<Report> {
    let base = dir
        .to_str()
        .with_context(|| format!("path {} is not valid UTF-8", dir.display()))?;
    let base = glob::Pattern::escape(base.trim_end_matches('/'));
    let pattern = if recursive {
        format!("{base}/**/*.yaml")
    } else {
        format!("{base}/*.yaml")
    };

    let mut files = glob::glob(&pattern)
        .with_context(|| format!("invalid path {}", dir.display()))?
        .collect::<Result<Vec<_>, _>>()?;
    files.retain(|f| f.is_file());
    files.sort();

    let mut seen = BTreeMap::<ManifestKey, Vec<PathBuf>>::new();
    for file in &files {
        let data = std::fs::read_to_string(file)
            .with_context(|| format!("error reading {}", file.display()))?;
        for key in manifest_keys(&data).with_context(|| format!("error parsing {}", file.display()))? {
            seen.entry(key).or_default().push(file.clone());
        }
    }

    let duplicates = seen
        .into_iter()
        .filter(|(_, paths)| paths.len() > 1)
        .map(|(key, paths)| Duplicate { key, paths })
        .collect::<Vec<_>>();
    tracing::debug!(files = files.len(), duplicates = duplicates.len(), "scanned");
    Ok(Report { files, duplicates })
}

/// The keys of the documents in a multi-document YAML file. Documents without an `apiVersion`
/// are skipped.
fn manifest_keys(data: &str) -> Result<Vec<ManifestKey>> {
    let mut keys = Vec::new();
    for doc in serde_yaml::Deserializer::from_str(data) {
        let manifest = Option::<Manifest>::deserialize(doc)?.unwrap_or_default();
        if manifest.api_version.is_empty() {
            continue;
        }
        let namespace = manifest
            .metadata
            .namespace
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
        keys.push(ManifestKey {
            api_kind: format!("{}/{}", manifest.api_version, manifest.kind),
            namespace,
            name: manifest.metadata.name,
        });
    }
    Ok(keys)
}
