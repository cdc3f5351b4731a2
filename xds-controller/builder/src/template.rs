//! Applies a virtual service template.
//!
//! The template and the virtual service are merged as JSON documents: the template is the base
//! and the virtual service the overlay. Objects merge key by key, arrays are concatenated without
//! repeating equal elements and any other overlay value wins. `templateOptions` adjust this per
//! dotted field path: `replace` makes the virtual service's value win outright and `delete` drops
//! the field from the result.

use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use anyhow::{anyhow, bail, ensure, Context, Result};
use envoy_xds_controller_k8s_api::{
    ExtraField, Modifier, TemplateOption, VirtualService, VirtualServiceCommonSpec,
    VirtualServiceTemplate,
};
use envoy_xds_controller_k8s_store::Store;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::BTreeMap;

/// Matches `{{ .Name }}` placeholders.
static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*\.([A-Za-z0-9_]+)\s*\}\}").expect("placeholder regex must compile"));

/// Reference fields that inherit the template's namespace, as dotted paths. A trailing `[]`
/// marks a list of references.
const REFERENCE_PATHS: &[&str] = &[
    "listener",
    "accessLogConfig",
    "accessLogConfigs[]",
    "tracingRef",
    "additionalHttpFilters[]",
    "additionalRoutes[]",
    "rbac.additionalPolicies[]",
    "tlsConfig.secretRef",
];

/// Returns the virtual service's spec with its template, if any, applied.
pub fn apply(vs: &VirtualService, store: &Store) -> Result<VirtualServiceCommonSpec> {
    let Some(tref) = vs.spec.template.as_ref() else {
        return Ok(vs.spec.common.clone());
    };
    let vs_ns = vs.metadata.namespace.as_deref().unwrap_or_default();
    let tid = tref.id(vs_ns);
    let template = store
        .get::<VirtualServiceTemplate>(&tid)
        .ok_or_else(|| anyhow!("virtual service template {tid} not found"))?;

    let values = extra_field_values(&template.spec.extra_fields, &vs.spec.extra_fields)?;

    let mut base = serde_json::to_value(&template.spec.common)?;
    if *tid.namespace != *vs_ns {
        for path in REFERENCE_PATHS {
            inherit_namespace(&mut base, path, &tid.namespace);
        }
    }
    substitute(&mut base, &values);

    let overlay = serde_json::to_value(&vs.spec.common)?;
    let merged = merge(base, overlay, &vs.spec.template_options)?;
    serde_json::from_value(merged).context("failed to decode merged virtual service")
}

/// Merges `overlay` onto `base` as directed by `options`.
pub(crate) fn merge(base: Value, overlay: Value, options: &[TemplateOption]) -> Result<Value> {
    let mut replace = HashSet::new();
    let mut delete = Vec::new();
    for opt in options {
        ensure!(!opt.field.is_empty(), "template option field is empty");
        match opt.modifier {
            Modifier::Merge => {}
            Modifier::Replace => {
                replace.insert(opt.field.as_str());
            }
            Modifier::Delete => delete.push(opt.field.as_str()),
        }
    }

    let mut merged = merge_at(base, overlay, "", &replace);
    for path in delete {
        remove_path(&mut merged, path);
    }
    Ok(merged)
}

fn merge_at(base: Value, overlay: Value, path: &str, replace: &HashSet<&str>) -> Value {
    if replace.contains(path) {
        return overlay;
    }
    match (base, overlay) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (k, v) in overlay {
                let p = if path.is_empty() {
                    k.clone()
                } else {
                    format!("{path}.{k}")
                };
                let merged = match base.remove(&k) {
                    Some(b) => merge_at(b, v, &p, replace),
                    None => v,
                };
                base.insert(k, merged);
            }
            Value::Object(base)
        }
        (Value::Array(mut base), Value::Array(overlay)) => {
            for v in overlay {
                if !base.contains(&v) {
                    base.push(v);
                }
            }
            Value::Array(base)
        }
        (base, Value::Null) => base,
        (_, overlay) => overlay,
    }
}

fn remove_path(value: &mut Value, path: &str) {
    let mut parts = path.split('.').peekable();
    let mut cur = value;
    while let Some(part) = parts.next() {
        let Value::Object(map) = cur else {
            return;
        };
        if parts.peek().is_none() {
            map.remove(part);
            return;
        }
        match map.get_mut(part) {
            Some(next) => cur = next,
            None => return,
        }
    }
}

fn inherit_namespace(value: &mut Value, path: &str, ns: &str) {
    fn set(obj: &mut Value, ns: &str) {
        if let Value::Object(map) = obj {
            let missing = map
                .get("namespace")
                .and_then(Value::as_str)
                .map_or(true, str::is_empty);
            if missing {
                map.insert("namespace".to_string(), Value::String(ns.to_string()));
            }
        }
    }

    let (path, is_list) = match path.strip_suffix("[]") {
        Some(p) => (p, true),
        None => (path, false),
    };
    let mut cur = value;
    for part in path.split('.') {
        match cur.get_mut(part) {
            Some(next) => cur = next,
            None => return,
        }
    }
    if is_list {
        if let Value::Array(items) = cur {
            items.iter_mut().for_each(|item| set(item, ns));
        }
    } else {
        set(cur, ns);
    }
}

/// Resolves the value of every extra field the template declares.
fn extra_field_values(
    declared: &[ExtraField],
    supplied: &BTreeMap<String, String>,
) -> Result<HashMap<String, String>> {
    let known = declared.iter().map(|f| f.name.as_str()).collect::<HashSet<_>>();
    if let Some(name) = supplied.keys().find(|k| !known.contains(k.as_str())) {
        bail!("extra field {name} is not declared by the template");
    }

    let mut values = HashMap::with_capacity(declared.len());
    for field in declared {
        let value = match supplied.get(&field.name).or(field.default.as_ref()) {
            Some(v) => v.clone(),
            None if field.required => bail!("extra field {} is required", field.name),
            None => String::new(),
        };
        if !field.values.is_empty() && !value.is_empty() && !field.values.contains(&value) {
            bail!(
                "extra field {} value {value} is not one of: {}",
                field.name,
                field.values.join(", ")
            );
        }
        values.insert(field.name.clone(), value);
    }
    Ok(values)
}

/// Replaces placeholders naming a known field in every string of the document.
fn substitute(value: &mut Value, values: &HashMap<String, String>) {
    if values.is_empty() {
        return;
    }
    match value {
        Value::String(s) if s.contains("{{") => {
            let replaced = PLACEHOLDER
                .replace_all(s.as_str(), |caps: &Captures<'_>| match values.get(&caps[1]) {
                    Some(v) => v.clone(),
                    None => caps[0].to_string(),
                })
                .into_owned();
            *s = replaced;
        }
        Value::Array(items) => items.iter_mut().for_each(|v| substitute(v, values)),
        Value::Object(map) => map.values_mut().for_each(|v| substitute(v, values)),
        _ => {}
    }
}

/// Checks a template's extra field declarations, requiring each declared field to be used by a
/// placeholder somewhere in the template.
pub fn check_extra_fields(template: &VirtualServiceTemplate) -> Result<()> {
    let fields = &template.spec.extra_fields;
    if fields.is_empty() {
        return Ok(());
    }
    for field in fields {
        ensure!(!field.name.is_empty(), "extraField name cannot be empty");
        match field.field_type.as_str() {
            "" => bail!("extraField '{}' type cannot be empty", field.name),
            "string" => {}
            "enum" => ensure!(
                !field.values.is_empty(),
                "extraField '{}' type is 'enum' but no enum values are defined",
                field.name
            ),
            t => bail!(
                "extraField '{}' has unknown type '{t}', valid types are: string, enum",
                field.name
            ),
        }
    }

    let encoded = serde_json::to_string(&template.spec.common)?;
    let used = PLACEHOLDER
        .captures_iter(&encoded)
        .map(|caps| caps[1].to_string())
        .collect::<HashSet<_>>();
    let mut unused = fields
        .iter()
        .map(|f| f.name.as_str())
        .filter(|n| !used.contains(*n))
        .collect::<Vec<_>>();
    if !unused.is_empty() {
        unused.sort_unstable();
        bail!(
            "the following extraFields are defined but not used in the template: {}",
            unused.join(", ")
        );
    }
    Ok(())
}
