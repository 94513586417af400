#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use sitebak_core::StepOutcome;
use sitebak_mysql::*;
use tokio_util::sync::CancellationToken;

const SCHEMA: &str = "CREATE TABLE posts (id int);\n";

/// Write an executable shell script standing in for a database tool.
fn script(dir: &Path, name: &str, body: &str) -> String {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().into_owned()
}

fn dumper(base: &Path, dump: &str, client: &str) -> MysqlDumper {
    MysqlDumper::new(
        MysqlConnectionConfig::new("shop", "backup", SecretString::new("s3cret".into()))
            .with_local_base_path(base)
            .with_programs(dump, client),
    )
}

fn out_dir(root: &Path) -> PathBuf {
    root.join("out")
}

#[tokio::test]
async fn dump_streams_stdout_into_the_sql_file() {
    let tmp = tempfile::tempdir().unwrap();
    let fake = script(
        tmp.path(),
        "fake-mysqldump",
        r#"printf 'pwd=%s\n' "$MYSQL_PWD"; printf 'arg=%s\n' "$@""#,
    );
    let d = dumper(&out_dir(tmp.path()), &fake, "false");

    assert_eq!(d.dump(Some("nightly.sql")).await, StepOutcome::Completed);

    let dump = std::fs::read_to_string(out_dir(tmp.path()).join("nightly.sql")).unwrap();
    assert!(dump.starts_with("pwd=s3cret\n"));
    assert!(dump.contains("arg=--single-transaction\n"));
    assert!(dump.contains("arg=--max-allowed-packet=512M\n"));
    assert!(dump.ends_with("arg=shop\n"));
    assert!(!dump.contains("arg=-ps3cret"));
}

#[tokio::test]
async fn failing_dump_reports_stderr() {
    let tmp = tempfile::tempdir().unwrap();
    let fake = script(
        tmp.path(),
        "broken-mysqldump",
        "echo \"mysqldump: Got error: 1045: Access denied\" >&2; exit 2",
    );
    let d = dumper(tmp.path(), &fake, "false");

    match d.dump(None).await {
        StepOutcome::Failed(reason) => assert!(reason.contains("Access denied"), "{}", reason),
        other => panic!("expected failure, got {:?}", other),
    }
}

#[tokio::test]
async fn missing_dump_program_is_a_failure() {
    let tmp = tempfile::tempdir().unwrap();
    let d = dumper(tmp.path(), "/nonexistent/mysqldump", "false");
    assert!(matches!(d.dump(None).await, StepOutcome::Failed(_)));
}

#[tokio::test]
async fn cancelled_dump_is_interrupted() {
    let tmp = tempfile::tempdir().unwrap();
    let fake = script(tmp.path(), "slow-mysqldump", "sleep 30");
    let token = CancellationToken::new();
    let d = dumper(tmp.path(), &fake, "false").with_shutdown(token.clone());

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        token.cancel();
    });
    let outcome = tokio::time::timeout(std::time::Duration::from_secs(10), d.dump(None))
        .await
        .expect("dump should stop once cancelled");
    canceller.await.unwrap();
    assert_eq!(outcome, StepOutcome::Interrupted);
}

#[tokio::test]
async fn estimate_adds_schema_and_data_length() {
    let tmp = tempfile::tempdir().unwrap();
    let dump = script(tmp.path(), "schema-mysqldump", &format!("printf '{}'", SCHEMA.replace('\n', "\\n")));
    let client = script(
        tmp.path(),
        "status-mysql",
        r"printf 'Name\tEngine\tVersion\tRow_format\tRows\tAvg_row_length\tData_length\n'
printf 'posts\tInnoDB\t10\tDynamic\t5\t100\t16384\n'
printf 'recent\tNULL\tNULL\tNULL\tNULL\tNULL\tNULL\n'",
    );
    let d = dumper(tmp.path(), &dump, &client);

    assert_eq!(d.estimate_size().await, SCHEMA.len() as u64 + 16384);
}

#[tokio::test]
async fn estimate_is_zero_when_tools_fail() {
    let tmp = tempfile::tempdir().unwrap();
    assert_eq!(dumper(tmp.path(), "false", "false").estimate_size().await, 0);
    assert_eq!(
        dumper(tmp.path(), "/nonexistent/mysqldump", "true")
            .estimate_size()
            .await,
        0
    );
}

#[tokio::test]
async fn connection_check() {
    let tmp = tempfile::tempdir().unwrap();
    assert!(dumper(tmp.path(), "true", "true").test_connection().await.is_ok());

    let err = dumper(tmp.path(), "true", "false")
        .test_connection()
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Connection(ref m) if m.contains("MySQL 'shop'")));
}
