use migrate_kernel::protocol::{Payload, Scalar, ToolCall, ToolDispatcher, ToolResult};
use migrate_test_utils::{InMemoryDatabase, StaticSecrets};
use migrate_tools::prelude::*;
use pretty_assertions::assert_eq;
use std::io::Write;
use std::sync::Arc;

const GB: u64 = 1024 * 1024 * 1024;

fn employees_db() -> Arc<InMemoryDatabase> {
    Arc::new(
        InMemoryDatabase::new("employees")
            .with_table("employees", 300_024, Some(2_941_522_931), GB + GB / 2)
            .with_table("salaries", 2_844_047, None, GB / 2),
    )
}

fn server_over(db: Arc<InMemoryDatabase>, export: ExportSettings) -> ToolServer {
    ToolServer::builder(db, Arc::new(StaticSecrets::for_database("employees")))
        .with_export(export)
        .build()
}

#[tokio::test]
async fn test_db_metadata_reports_size_tables_and_version() {
    let db = employees_db();
    let server = server_over(db.clone(), ExportSettings::default());

    let result = server.dispatch(&ToolCall::new("db_metadata")).await;
    let map = result.payload().and_then(Payload::as_map).unwrap();

    assert_eq!(map["name"], Scalar::Text("employees".into()));
    assert_eq!(map["size_gb"], Scalar::Float(2.0));
    assert_eq!(map["table_count"], Scalar::Int(2));
    assert_eq!(
        map["tables"],
        Scalar::List(vec![Scalar::Text("employees".into()), Scalar::Text("salaries".into())])
    );
    assert_eq!(map["version"], Scalar::Text("8.0.36".into()));
    assert_eq!(db.statements().len(), 3);
}

#[tokio::test]
async fn test_injection_attempt_issues_no_statement() {
    let db = employees_db();
    let server = server_over(db.clone(), ExportSettings::default());

    for tool in ["table_schema", "table_row_count", "checksum"] {
        let call = ToolCall::new(tool).with_param("table_name", "employees; DROP TABLE users;");
        assert_eq!(server.dispatch(&call).await, ToolResult::error("invalid identifier"));
    }
    let call = ToolCall::new("table_row_count").with_param("table_name", "emp`loyees");
    assert_eq!(server.dispatch(&call).await, ToolResult::error("invalid identifier"));

    assert!(db.statements().is_empty());
}

#[tokio::test]
async fn test_row_count_and_schema_for_known_table() {
    let server = server_over(employees_db(), ExportSettings::default());

    let call = ToolCall::new("table_row_count").with_param("table_name", "salaries");
    assert_eq!(server.dispatch(&call).await, ToolResult::ok(Payload::int(2_844_047)));

    let call = ToolCall::new("table_schema").with_param("table_name", "employees");
    let result = server.dispatch(&call).await;
    let rows = result.payload().and_then(Payload::as_rows).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["Field"], Scalar::Text("id".into()));
}

#[tokio::test]
async fn test_missing_table_and_null_checksum_are_errors() {
    let server = server_over(employees_db(), ExportSettings::default());

    let call = ToolCall::new("table_row_count").with_param("table_name", "departments");
    let result = server.dispatch(&call).await;
    assert!(result.error_message().unwrap().contains("doesn't exist"));

    let call = ToolCall::new("checksum").with_param("table_name", "salaries");
    let result = server.dispatch(&call).await;
    assert_eq!(result.error_message(), Some("checksum unavailable for salaries"));

    let call = ToolCall::new("checksum").with_param("table_name", "employees");
    assert_eq!(
        server.dispatch(&call).await,
        ToolResult::ok(Payload::int(2_941_522_931))
    );
}

#[tokio::test]
async fn test_unreachable_database_is_an_error_envelope() {
    let db = Arc::new(InMemoryDatabase::new("employees").unreachable());
    let server = server_over(db, ExportSettings::default());

    let result = server.dispatch(&ToolCall::new("db_metadata")).await;
    assert!(result.error_message().unwrap().contains("Can't connect"));
}

#[tokio::test]
async fn test_parse_log_position_from_metadata_file() {
    let server = server_over(employees_db(), ExportSettings::default());
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "Started dump at: 2024-03-01 10:00:00").unwrap();
    writeln!(file, "SHOW MASTER STATUS:").unwrap();
    writeln!(file, "\tLog: mysql-bin.000042").unwrap();
    writeln!(file, "\tPos: 157").unwrap();

    let call = ToolCall::new("parse_log_position")
        .with_param("metadata_file_path", file.path().display().to_string());
    let result = server.dispatch(&call).await;
    let map = result.payload().and_then(Payload::as_map).unwrap();
    assert_eq!(map["log_file"], Scalar::Text("mysql-bin.000042".into()));
    assert_eq!(map["log_position"], Scalar::Int(157));
}

#[tokio::test]
async fn test_parse_log_position_missing_file() {
    let server = server_over(employees_db(), ExportSettings::default());
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("metadata");

    let call = ToolCall::new("parse_log_position")
        .with_param("metadata_file_path", path.display().to_string());
    let result = server.dispatch(&call).await;
    assert!(result.error_message().unwrap().contains("cannot read"));
}

#[cfg(unix)]
fn stub_export() -> ExportSettings {
    ExportSettings {
        bulk_binary: "true".into(),
        timeout_secs: 30,
        ..ExportSettings::default()
    }
}

#[cfg(unix)]
#[tokio::test]
async fn test_bulk_export_without_marker_may_have_failed() {
    let server = server_over(employees_db(), stub_export());
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("dump");

    let call = ToolCall::new("bulk_export")
        .with_param("database", "employees")
        .with_param("output_path", out.display().to_string());
    let result = server.dispatch(&call).await;

    let text = result.payload().and_then(Payload::as_str).unwrap();
    assert!(text.contains("may have failed"));
    assert!(text.contains("'metadata' not found"));
    assert!(out.is_dir());
}

#[cfg(unix)]
#[tokio::test]
async fn test_bulk_export_with_marker_completes() {
    let server = server_over(employees_db(), stub_export());
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(COMPLETION_MARKER), "Log: mysql-bin.000001\nPos: 4\n").unwrap();

    let call = ToolCall::new("bulk_export")
        .with_param("database", "employees")
        .with_param("output_path", dir.path().display().to_string())
        .with_param("threads", 8_i64);
    let result = server.dispatch(&call).await;

    let text = result.payload().and_then(Payload::as_str).unwrap();
    assert!(text.starts_with("Bulk export of employees completed successfully"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_bulk_export_nonzero_exit_is_error() {
    let export = ExportSettings {
        bulk_binary: "false".into(),
        ..stub_export()
    };
    let server = server_over(employees_db(), export);
    let dir = tempfile::tempdir().unwrap();

    let call = ToolCall::new("bulk_export")
        .with_param("database", "employees")
        .with_param("output_path", dir.path().display().to_string());
    let result = server.dispatch(&call).await;
    assert!(result.error_message().unwrap().contains("exited 1"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_object_store_export_reports_pipeline_failure() {
    let export = ExportSettings {
        dump_binary: "true".into(),
        upload_binary: "false".into(),
        timeout_secs: 30,
        ..ExportSettings::default()
    };
    let server = server_over(employees_db(), export);

    let call = ToolCall::new("export_to_object_store")
        .with_param("database", "employees")
        .with_param("table", "salaries")
        .with_param("bucket", "migration-bucket")
        .with_param("path", "dumps");
    let result = server.dispatch(&call).await;
    let message = result.error_message().unwrap();
    assert!(message.contains("gs://migration-bucket/dumps/salaries.sql"));
}

#[test]
fn test_describe_is_available_through_dispatcher() {
    let server = server_over(employees_db(), ExportSettings::default());
    let dispatcher: &dyn ToolDispatcher = &server;
    let described = dispatcher.describe();
    assert_eq!(described.len(), 7);
    assert_eq!(described[0].name, "db_metadata");
    assert!(described[0].parameters.is_empty());
}
