use super::*;
use pretty_assertions::assert_eq;
use std::fs;

fn mk_manifest(kind: &str, ns: Option<&str>, name: &str) -> String {
    let ns = ns.map(|ns| format!("\n  namespace: {ns}")).unwrap_or_default();
    format!("apiVersion: envoy.kaasops.io/v1alpha1\nkind: {kind}\nmetadata:\n  name: {name}{ns}\n")
}

fn mk_key(kind: &str, ns: &str, name: &str) -> ManifestKey {
    ManifestKey {
        api_kind: format!("envoy.kaasops.io/v1alpha1/{kind}"),
        namespace: ns.to_string(),
        name: name.to_string(),
    }
}

fn write(dir: &Path, rel: &str, docs: &[String]) -> PathBuf {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, docs.join("---\n")).unwrap();
    path
}

#[test]
fn reports_duplicates_with_every_path() {
    let dir = tempfile::tempdir().unwrap();
    let a = write(dir.path(), "a.yaml", &[mk_manifest("Listener", None, "http")]);
    let b = write(
        dir.path(),
        "b.yaml",
        &[
            mk_manifest("Listener", Some("default"), "http"),
            mk_manifest("Cluster", None, "http"),
        ],
    );

    let report = scan(dir.path(), false).unwrap();
    assert_eq!(report.files, vec![a.clone(), b.clone()]);
    assert_eq!(
        report.duplicates,
        vec![Duplicate {
            key: mk_key("Listener", "default", "http"),
            paths: vec![a, b],
        }]
    );
    assert_eq!(
        report.duplicates[0].key.to_string(),
        "envoy.kaasops.io/v1alpha1/Listener/default/http"
    );
}

#[test]
fn duplicates_within_one_file() {
    let dir = tempfile::tempdir().unwrap();
    let a = write(
        dir.path(),
        "a.yaml",
        &[
            mk_manifest("VirtualService", Some("prod"), "web"),
            mk_manifest("VirtualService", Some("prod"), "web"),
            mk_manifest("VirtualService", Some("dev"), "web"),
        ],
    );

    let report = scan(dir.path(), false).unwrap();
    assert_eq!(
        report.duplicates,
        vec![Duplicate {
            key: mk_key("VirtualService", "prod", "web"),
            paths: vec![a.clone(), a],
        }]
    );
}

#[test]
fn subdirectories_only_when_recursive() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.yaml", &[mk_manifest("Route", None, "r")]);
    write(dir.path(), "nested/b.yaml", &[mk_manifest("Route", None, "r")]);
    write(dir.path(), "nested/c.yml", &[mk_manifest("Route", None, "r")]);

    let flat = scan(dir.path(), false).unwrap();
    assert_eq!(flat.files.len(), 1);
    assert!(flat.duplicates.is_empty());

    let recursive = scan(dir.path(), true).unwrap();
    assert_eq!(recursive.files.len(), 2);
    assert_eq!(recursive.duplicates.len(), 1);
}

#[test]
fn skips_documents_without_api_version() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "a.yaml",
        &[
            "kind: Listener\nmetadata:\n  name: http\n".to_string(),
            "kind: Listener\nmetadata:\n  name: http\n".to_string(),
            String::new(),
        ],
    );

    let report = scan(dir.path(), false).unwrap();
    assert!(report.duplicates.is_empty());
}

#[test]
fn parse_errors_fail() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "bad.yaml", &["apiVersion: [\n".to_string()]);

    let error = scan(dir.path(), false).unwrap_err();
    assert!(format!("{error:#}").starts_with("error parsing "), "{error:#}");
}

#[test]
fn exit_codes() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.yaml", &[mk_manifest("Listener", None, "http")]);
    let path = dir.path().to_str().unwrap();
    assert_eq!(ValidateArgs::parse_and_run(["validate", "--path", path]), 0);

    write(dir.path(), "b.yaml", &[mk_manifest("Listener", None, "http")]);
    assert_eq!(ValidateArgs::parse_and_run(["validate", "-p", path, "-r"]), 1);
}

#[test]
fn duplicates_are_reported_on_stderr() {
    let dir = tempfile::tempdir().unwrap();
    let a = write(dir.path(), "a.yaml", &[mk_manifest("Cluster", Some("prod"), "c1")]);
    let b = write(dir.path(), "b.yaml", &[mk_manifest("Cluster", Some("prod"), "c1")]);
    let args = ValidateArgs::parse_from(["validate", "--path", dir.path().to_str().unwrap()]);

    let (mut out, mut err) = (Vec::new(), Vec::new());
    assert_eq!(args.run_with(&mut out, &mut err), 1);

    assert_eq!(String::from_utf8(out).unwrap(), "a.yaml\nb.yaml\n");
    assert_eq!(
        String::from_utf8(err).unwrap(),
        format!(
            "Error: duplicate manifest found for envoy.kaasops.io/v1alpha1/Cluster/prod/c1:\n- {}\n- {}\n",
            a.display(),
            b.display()
        )
    );
}

#[test]
fn scan_errors_are_reported_on_stderr() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "bad.yaml", &["apiVersion: [\n".to_string()]);
    let args = ValidateArgs::parse_from(["validate", "--path", dir.path().to_str().unwrap()]);

    let (mut out, mut err) = (Vec::new(), Vec::new());
    assert_eq!(args.run_with(&mut out, &mut err), 1);
    assert!(out.is_empty());
    assert!(String::from_utf8(err).unwrap().starts_with("Validation error: error parsing "));
}
