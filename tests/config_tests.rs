use dialup::config::{Configuration, ModeKind};
use dialup::indexer::{BoundaryPolicy, InteractionMode};
use std::io::Write;
use std::time::Duration;

#[test]
fn parse_kebab_case_config() {
    let yaml = r#"
endpoint:
  base-url: "http://34.192.150.36"
upload:
  max-dimension: 800
  jpeg-quality: 0.6
  timeout: 10s
generate:
  default-target: portrait
  timeout: 2m
selection:
  mode: drag
  boundary: clamp
  neutral-tolerance: 0.05
"#;
    let cfg: Configuration = serde_yaml::from_str(yaml).unwrap();
    let cfg = cfg.validated().unwrap();
    assert_eq!(cfg.endpoint.base_url, "http://34.192.150.36");
    assert_eq!(cfg.endpoint.generate_path, "/api/v1/generate");
    assert_eq!(cfg.upload.max_dimension, 800);
    assert!((cfg.upload.jpeg_quality - 0.6).abs() < f32::EPSILON);
    assert_eq!(cfg.upload.timeout, Duration::from_secs(10));
    assert_eq!(cfg.generate.default_target, "portrait");
    assert_eq!(cfg.generate.timeout, Duration::from_secs(120));
    assert_eq!(
        cfg.selection.interaction_mode(),
        InteractionMode::drag(BoundaryPolicy::Clamp)
    );
    assert!((cfg.selection.neutral_tolerance - 0.05).abs() < f64::EPSILON);
}

#[test]
fn generate_url_is_built_from_endpoint() {
    let cfg: Configuration = serde_yaml::from_str("{}").unwrap();
    let url = cfg.endpoint.generate_url("abc123", "abc").unwrap();
    assert_eq!(
        url.as_str(),
        "https://tools.qrplus.ai/api/v1/generate/abc123/abc"
    );
    assert_eq!(
        cfg.endpoint.upload_url().unwrap().as_str(),
        "https://tools.qrplus.ai/api/v1/uploadFile"
    );
}

#[test]
fn unknown_keys_are_rejected() {
    let parsed: Result<Configuration, _> = serde_yaml::from_str("upload:\n  max-dim: 10\n");
    assert!(parsed.is_err());
}

#[test]
fn mode_names_are_kebab_case() {
    let cfg: Configuration = serde_yaml::from_str("selection:\n  mode: orbit\n").unwrap();
    assert_eq!(cfg.selection.mode, ModeKind::Orbit);
    assert!(serde_yaml::from_str::<Configuration>("selection:\n  mode: Orbit\n").is_err());
}

#[test]
fn invalid_values_fail_validation() {
    let cases = [
        "upload:\n  jpeg-quality: 1.5\n",
        "upload:\n  jpeg-quality: 0\n",
        "upload:\n  max-dimension: 0\n",
        "upload:\n  timeout: 0s\n",
        "generate:\n  default-target: \"  \"\n",
        "selection:\n  neutral-tolerance: -0.1\n",
        "endpoint:\n  base-url: ftp://example.com\n",
        "endpoint:\n  upload-path: api/v1/uploadFile\n",
    ];
    for yaml in cases {
        let cfg: Configuration = serde_yaml::from_str(yaml).unwrap();
        assert!(cfg.validated().is_err(), "accepted invalid config: {yaml}");
    }
}

#[test]
fn loads_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "generate:\n  default-target: landscape").unwrap();
    let cfg = Configuration::from_yaml_file(file.path())
        .unwrap()
        .validated()
        .unwrap();
    assert_eq!(cfg.generate.default_target, "landscape");
    assert!(Configuration::from_yaml_file(file.path().with_extension("missing")).is_err());
}
