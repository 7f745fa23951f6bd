use std::fs;
use std::path::Path;
use std::process::{Command, Output};

const CONFIG: &str = r#"
database = "warehouse.db"
marker_dir = "logs/update"
update_log = "logs/update_log.txt"

[[tables]]
name = "ppts"
primary_key = ["member_id"]

[tables.columns]
member_id = "integer"

[[tables]]
name = "teams"
primary_key = ["member_id", "team", "start_date"]
preserve_columns = ["end_date"]

[tables.columns]
member_id = "integer"
team = "text"

[[tables.foreign_keys]]
column = "member_id"
references = "ppts"

[[tables.rules]]
kind = "close_open_range"
start_column = "start_date"
end_column = "end_date"
"#;

fn run(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_warehouse-loader"))
        .arg("--config")
        .arg(dir.join("warehouse-loader.toml"))
        .args(args)
        .env_remove("RUST_LOG")
        .env_remove("WAREHOUSE_LOADER_CONFIG")
        .output()
        .expect("failed to run warehouse-loader")
}

fn setup() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("warehouse-loader.toml"), CONFIG).unwrap();
    fs::write(
        dir.path().join("ppts.csv"),
        "member_id,first,last\n1001,Ann,Lee\n1002,Bo,Diaz\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("teams.csv"),
        "member_id,team,start_date,end_date\n1001,North,01/04/2021,\n1002,North,2021-01-04,\n9999,East,2021-01-04,\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("teams_update.csv"),
        "member_id,team,start_date,end_date\n1001,South,07/01/2021,\n",
    )
    .unwrap();
    dir
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

#[test]
fn test_load_verify_and_flush() {
    let dir = setup();
    let root = dir.path();

    let ppts = root.join("ppts.csv");
    let output = run(
        root,
        &["load", "--table", "ppts", "--input", ppts.to_str().unwrap(), "--update", "false"],
    );
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let teams = root.join("teams.csv");
    let output = run(
        root,
        &["load", "--table", "teams", "--input", teams.to_str().unwrap(), "--update", "false"],
    );
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(stdout(&output).contains("teams created: 2 inserted"));

    let update = root.join("teams_update.csv");
    let output = run(
        root,
        &["load", "--table", "teams", "--input", update.to_str().unwrap(), "--json"],
    );
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(stdout(&output).contains("\"rows_inserted\": 1"));

    let output = run(root, &["verify", "--table", "teams"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("teams: 3 rows, 0 duplicated keys"));

    let markers: Vec<String> = fs::read_dir(root.join("logs/update"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    assert_eq!(markers.len(), 2);
    assert!(markers.iter().any(|m| m.starts_with("teams_")));
    assert!(markers.iter().any(|m| m.starts_with("ppts_")));

    let output = run(root, &["flush-markers"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("Flushed 2 markers"));

    let log = fs::read_to_string(root.join("logs/update_log.txt")).unwrap();
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("ppts,"));
    assert!(lines[1].starts_with("teams,"));
}

#[test]
fn test_tables_lists_configuration() {
    let dir = setup();
    let output = run(dir.path(), &["tables"]);
    assert!(output.status.success());

    let out = stdout(&output);
    assert!(out.contains("ppts (member_id)"));
    assert!(out.contains("teams (member_id, team, start_date) [member_id -> ppts.member_id]"));
}

#[test]
fn test_update_of_missing_table_fails() {
    let dir = setup();
    let teams = dir.path().join("teams.csv");
    let output = run(
        dir.path(),
        &["load", "--table", "teams", "--input", teams.to_str().unwrap(), "--no-marker"],
    );
    assert!(!output.status.success());
    assert!(!dir.path().join("logs/update").exists());
}

#[test]
fn test_unknown_table_is_rejected() {
    let dir = setup();
    let output = run(dir.path(), &["verify", "--table", "nope"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("is not configured"));
}
