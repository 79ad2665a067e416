mod common;
use crate::common::init_tracing;

use std::error::Error;
use std::io::Write;

use latticeflow::config::{PluginKind, load_and_validate};
use latticeflow::errors::DispatchError;

type TestResult = Result<(), Box<dyn Error>>;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

#[test]
fn full_config_file_is_loaded() -> TestResult {
    init_tracing();
    let file = write_config(
        r#"
[server]
node_event_queue_capacity = 16
export_wait_secs = 5

[storage]
asset_dir = "/tmp/latticeflow-test-assets"

[executors]
default = "bash"
workflow_executor = "local"

[executors.plugins.bash]
kind = "process"
shell = "bash"
"#,
    );

    let cfg = load_and_validate(file.path())?;
    assert_eq!(cfg.server.node_event_queue_capacity, 16);
    assert_eq!(cfg.server.job_event_queue_capacity, 256);
    assert_eq!(cfg.server.export_wait_secs, 5);
    assert_eq!(cfg.executors.default, "bash");

    let bash = &cfg.executors.plugins["bash"];
    assert_eq!(bash.kind, PluginKind::Process);
    assert_eq!(bash.defaults()["shell"], "bash");

    // Built-in plugins are always available.
    assert!(cfg.executors.plugins.contains_key("local"));
    assert!(cfg.executors.plugins.contains_key("process"));
    Ok(())
}

#[test]
fn undeclared_default_executor_is_rejected() {
    init_tracing();
    let file = write_config(
        r#"
[executors]
default = "slurm"
"#,
    );
    assert!(matches!(
        load_and_validate(file.path()),
        Err(DispatchError::ConfigError(_))
    ));
}

#[test]
fn client_cannot_be_declared_as_a_plugin() {
    init_tracing();
    let file = write_config(
        r#"
[executors.plugins.client]
kind = "local"
"#,
    );
    assert!(matches!(
        load_and_validate(file.path()),
        Err(DispatchError::ConfigError(_))
    ));
}

#[test]
fn malformed_toml_is_a_parse_error() {
    init_tracing();
    let file = write_config("[server\nnode_event_queue_capacity = ");
    assert!(matches!(
        load_and_validate(file.path()),
        Err(DispatchError::TomlError(_))
    ));
}
