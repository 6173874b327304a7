use std::fs;
use std::path::Path;

use serde_json::json;

use twinrisk::config::AnalysisConfig;
use twinrisk::economics::ProfileOverride;
use twinrisk::engine::{NoticeKind, RiskEngine};
use twinrisk::severity::Severity;
use twinrisk::source::JsonLinesSource;

const STORE: &str = "digitalTwinsTelemetryDB";

/// Write `<dir>/<STORE>/<group>.jsonl`, newest line first like a bulk export.
fn write_group(dir: &Path, group: &str, lines: &[serde_json::Value]) {
    let store = dir.join(STORE);
    fs::create_dir_all(&store).unwrap();
    let body: Vec<String> = lines.iter().rev().map(|l| l.to_string()).collect();
    fs::write(store.join(format!("{group}.jsonl")), body.join("\n") + "\n").unwrap();
}

/// Two twins of 50 rows. Twin `t2` has a temperature spike on its last two
/// rows; `t1` only wobbles.
fn turbine_lines() -> Vec<serde_json::Value> {
    let mut lines = Vec::new();
    for i in 0..50 {
        for twin in ["t1", "t2"] {
            let spike = twin == "t2" && i >= 48;
            lines.push(json!({
                "_id": format!("{twin}-{i}"),
                "twinId": twin,
                "ts": format!("2025-06-01T{:02}:{:02}:00Z", i / 60, i % 60),
                "temperature": if spike { 400.0 } else { 70.0 + (i % 5) as f64 },
                "rpm": 3000 + (i % 7) * 10,
                "status": "ok",
                "mode": "auto",
                "sales": 12345.0,
            }));
        }
    }
    lines
}

fn config(dir: &Path, groups: &[&str]) -> AnalysisConfig {
    AnalysisConfig {
        source: dir.to_path_buf(),
        store: STORE.to_string(),
        groups: groups.iter().map(|g| g.to_string()).collect(),
        ..Default::default()
    }
}

#[test]
fn end_to_end_pass() {
    let dir = tempfile::tempdir().unwrap();
    write_group(dir.path(), "turbine1", &turbine_lines());
    fs::write(dir.path().join(STORE).join("retail1.jsonl"), "").unwrap();

    let cfg = config(dir.path(), &["turbine1", "retail1", "wellhead1"]);
    let source = JsonLinesSource::for_store(&cfg.source, &cfg.store);
    let engine = RiskEngine::new(cfg).unwrap();
    let report = engine.run(&source);

    // t2: 2 of 50 rows have 1 of 2 columns out of band.
    assert_eq!(report.assessments.len(), 2);
    let top = &report.assessments[0];
    assert_eq!(top.unit.as_deref(), Some("t2"));
    assert!((top.risk - 0.02).abs() < 1e-12);
    assert_eq!(top.severity, Severity::Low);
    assert_eq!(top.rows, 50);
    assert_eq!(top.horizon_hours, 72);
    // 72 * 0.02 * 0.25 = 0.36 h at 124,500/h.
    assert_eq!(top.costs.expected_downtime_hours, 0.36);
    assert!((top.costs.revenue_loss - 44_820.0).abs() < 1e-6);

    assert_eq!(report.assessments[1].risk, 0.0);
    assert_eq!(report.trends.len(), 1);
    assert_eq!(report.trends[0].units.len(), 2);

    let kinds: Vec<_> = report.notices.iter().map(|n| (&n.group[..], &n.kind)).collect();
    assert_eq!(kinds.len(), 2);
    assert_eq!(kinds[0], ("retail1", &NoticeKind::NoData));
    assert!(matches!(kinds[1], ("wellhead1", NoticeKind::FetchFailed { .. })));
}

#[test]
fn limit_keeps_most_recent_rows() {
    let dir = tempfile::tempdir().unwrap();
    // 150 rows without unit ids; only the newest 100 are scored.
    let lines: Vec<_> = (0..150)
        .map(|i| {
            json!({
                "ts": format!("2025-06-01T{:02}:{:02}:00Z", i / 60, i % 60),
                "pressure": if i < 50 { 1000.0 } else { 10.0 + (i % 3) as f64 },
            })
        })
        .collect();
    write_group(dir.path(), "pipeline1", &lines);

    let mut cfg = config(dir.path(), &["pipeline1"]);
    cfg.limit = 100;
    let source = JsonLinesSource::for_store(&cfg.source, &cfg.store);
    let report = RiskEngine::new(cfg).unwrap().run(&source);

    assert_eq!(report.assessments.len(), 1);
    let a = &report.assessments[0];
    assert_eq!(a.unit, None);
    assert_eq!(a.rows, 100);
    // The old 1000.0 plateau is outside the window, so nothing stands out.
    assert_eq!(a.risk, 0.0);
    let points = &report.trends[0].units[0].points;
    assert!(points.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
}

#[test]
fn overrides_persist_across_passes() {
    let dir = tempfile::tempdir().unwrap();
    write_group(dir.path(), "turbine1", &turbine_lines());
    let cfg = config(dir.path(), &["turbine1"]);
    let source = JsonLinesSource::for_store(&cfg.source, &cfg.store);
    let mut engine = RiskEngine::new(cfg).unwrap();

    let first = engine.run(&source);
    engine
        .apply_overrides(&[
            ProfileOverride::parse("turbine1.revenue_per_hour=1000").unwrap(),
            ProfileOverride::parse("turbine1.maintenance_base=0").unwrap(),
        ])
        .unwrap();
    let second = engine.run(&source);
    let third = engine.run(&source);

    assert_ne!(first, second);
    assert_eq!(second, third);
    assert!((second.assessments[0].costs.revenue_loss - 360.0).abs() < 1e-6);
    assert_eq!(second.assessments[0].costs.maintenance_cost, 0.0);
    assert_eq!(first.assessments[0].risk, second.assessments[0].risk);
}

#[test]
fn json_report_shape() {
    let dir = tempfile::tempdir().unwrap();
    write_group(dir.path(), "turbine1", &turbine_lines());
    let mut cfg = config(dir.path(), &["turbine1"]);
    cfg.train_classifier = true;
    let source = JsonLinesSource::for_store(&cfg.source, &cfg.store);
    let report = RiskEngine::new(cfg).unwrap().run(&source);

    let v = serde_json::to_value(&report).unwrap();
    let first = &v["assessments"][0];
    assert_eq!(first["group"], json!("turbine1"));
    assert_eq!(first["risk"], json!(0.02));
    assert_eq!(first["severity"], json!("low"));
    assert!(first.get("expected_downtime_hours").is_some());
    assert_eq!(v["classifiers"][0]["feature_names"], json!(["temperature", "rpm"]));
    assert!(v["trends"][0]["units"][0]["points"][0].get("timestamp").is_some());
}
