use std::io::Write;

use phasecc::{
    congestion_control::CongestionControlAlgorithm,
    simulation::{Link, SenderLoop},
    Config, ConfigError, ControlMode,
};
use testresult::TestResult;

#[test]
fn load_file_and_run_simulation() -> TestResult {
    let mut file = tempfile::NamedTempFile::new()?;
    write!(
        file,
        r#"
algorithm = "phase"

[phase]
mode = "window"
seed = 17

[link]
one-way-delay-ms = 10
service-time-ms = 0.5
queue-capacity = 32
jitter = 0.0
seed = 17
"#
    )?;

    let config = Config::load(file.path())?;
    assert_eq!(config.phase.mode, ControlMode::Window);
    assert_eq!(config.link.base_rtt_ms(), 20.5);

    let controller = config.congestion_config().try_build()?;
    let mut sim = SenderLoop::new(controller, Link::new(config.link.clone()));
    let report = sim.run_for(2_000).report();

    assert_eq!(report.algorithm, CongestionControlAlgorithm::Phase);
    assert!(report.delivered > 0);
    assert!(report.mean_rtt_ms >= 20.0);
    assert_eq!(report.duration_ms, 2_000);
    Ok(())
}

#[test]
fn invalid_file_reports_field() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("phasecc.toml");
    std::fs::write(&path, "[aimd]\nbeta = 0.0\n")?;

    match Config::load(&path) {
        Err(ConfigError::Invalid { field, .. }) => assert!(field.contains("beta")),
        other => panic!("expected invalid beta, got {other:?}"),
    }
    Ok(())
}

#[test]
fn malformed_file_is_parse_error() -> TestResult {
    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(file, "[phase\nalpha = ")?;
    assert!(matches!(Config::load(file.path()), Err(ConfigError::Parse(_))));
    Ok(())
}
