//! Scenario: Config hash stability and layer precedence
//!
//! GREEN when:
//! - Loading the same layers twice yields the same `config_hash`.
//! - Reordering keys inside a layer does not change the hash.
//! - A later layer overrides single keys and leaves siblings intact.
//! - Different values produce different hashes.
//! - The built-in defaults parse into the default `KitchenSettings`.

use ckd_config::{
    load_kitchen_config, load_layered_yaml, load_layered_yaml_from_strings, KitchenSettings,
    DEFAULTS_YAML,
};

const BASE_YAML: &str = r#"
resources:
  Oven: 1
  Chef: 2
simulation:
  tick_ms: 3000
  request_fraction: 0.5
"#;

const BASE_YAML_REORDERED: &str = r#"
simulation:
  request_fraction: 0.5
  tick_ms: 3000
resources:
  Chef: 2
  Oven: 1
"#;

const OVERLAY_YAML: &str = r#"
resources:
  Oven: 3
simulation:
  tick_ms: 500
"#;

#[test]
fn same_input_same_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    assert_eq!(a.config_hash, b.config_hash);
    assert_eq!(a.config_hash.len(), 64);
}

#[test]
fn key_order_does_not_change_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML_REORDERED]).unwrap();
    assert_eq!(a.config_hash, b.config_hash);
    assert_eq!(a.canonical_json, b.canonical_json);
}

#[test]
fn overlay_overrides_single_keys() {
    let loaded = load_layered_yaml_from_strings(&[BASE_YAML, OVERLAY_YAML]).unwrap();
    let v = &loaded.config_json;
    assert_eq!(v.pointer("/resources/Oven").unwrap(), 3);
    assert_eq!(v.pointer("/resources/Chef").unwrap(), 2);
    assert_eq!(v.pointer("/simulation/tick_ms").unwrap(), 500);
    assert_eq!(v.pointer("/simulation/request_fraction").unwrap(), 0.5);

    let base = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    assert_ne!(base.config_hash, loaded.config_hash);
}

#[test]
fn defaults_layer_matches_default_settings() {
    let loaded = load_layered_yaml_from_strings(&[DEFAULTS_YAML]).unwrap();
    assert_eq!(loaded.settings().unwrap(), KitchenSettings::default());
}

#[test]
fn kitchen_config_applies_file_layers_over_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("local.yaml");
    std::fs::write(&path, "resources:\n  Grill: 2\ndefault_priority: 3\n").unwrap();
    let path = path.to_string_lossy().to_string();

    let loaded = load_kitchen_config(&[path.as_str()]).unwrap();
    let s = loaded.settings().unwrap();
    assert_eq!(s.resources.get("Grill"), Some(&2));
    assert_eq!(s.resources.get("Oven"), Some(&1));
    assert_eq!(s.default_priority, 3);

    let direct = load_layered_yaml(&[path.as_str()]).unwrap();
    assert!(direct.config_json.pointer("/resources/Oven").is_none());
}

#[test]
fn missing_file_is_an_error() {
    let err = load_kitchen_config(&["/definitely/not/here.yaml"]).unwrap_err();
    assert!(format!("{err:#}").contains("failed to read yaml path"));
}
