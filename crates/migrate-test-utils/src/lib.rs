//! Testing utilities for the migration pipeline workspace
//!
//! Shared fixtures: scripted stages and graphs for the kernel, an
//! in-memory database and static secrets for the tool server, and a
//! scripted language model for agent stages.

#![allow(missing_docs)]

use async_trait::async_trait;
use indexmap::IndexMap;
use migrate_core::model::{ChatRequest, LanguageModel, ModelError};
use migrate_kernel::error::{GraphError, StageFailure};
use migrate_kernel::graph::PipelineGraph;
use migrate_kernel::protocol::{Row, Scalar, ToolCall};
use migrate_kernel::stage::{Stage, StageContext};
use migrate_kernel::state::SharedState;
use migrate_kernel::types::{Capability, Reply};
use migrate_tools::database::{ConnectionConfig, SecretProvider, SourceDatabase};
use migrate_tools::error::{DatabaseError, SecretError};
use migrate_tools::tools::inspect::sql;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// Stage returning fixed replies and counting its invocations
pub struct ScriptedStage {
    name: String,
    replies: Vec<String>,
    capabilities: Vec<Capability>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedStage {
    /// One reply per invocation
    pub fn says(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(name, vec![text.into()])
    }

    /// Several replies per invocation, appended as one batch
    pub fn new(name: impl Into<String>, replies: Vec<String>) -> Self {
        Self {
            name: name.into(),
            replies,
            capabilities: Vec::new(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_capabilities(mut self, capabilities: Vec<Capability>) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Shared invocation counter
    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl Stage for ScriptedStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    async fn run(
        &self,
        _state: &SharedState,
        _ctx: &StageContext<'_>,
    ) -> Result<Vec<Reply>, StageFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.replies.iter().map(Reply::text).collect())
    }
}

/// Stage that always fails
pub struct FailingStage {
    name: String,
    failure: StageFailure,
}

impl FailingStage {
    pub fn new(name: impl Into<String>, failure: StageFailure) -> Self {
        Self {
            name: name.into(),
            failure,
        }
    }
}

#[async_trait]
impl Stage for FailingStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(
        &self,
        _state: &SharedState,
        _ctx: &StageContext<'_>,
    ) -> Result<Vec<Reply>, StageFailure> {
        Err(self.failure.clone())
    }
}

/// Stage issuing one tool call and reporting the envelope
pub struct ToolCallingStage {
    name: String,
    call: ToolCall,
    capabilities: Vec<Capability>,
}

impl ToolCallingStage {
    /// Stage declaring tool access
    pub fn new(name: impl Into<String>, call: ToolCall) -> Self {
        Self {
            name: name.into(),
            call,
            capabilities: vec![Capability::ToolAccess],
        }
    }

    /// Stage that does not declare tool access
    pub fn undeclared(name: impl Into<String>, call: ToolCall) -> Self {
        Self {
            capabilities: Vec::new(),
            ..Self::new(name, call)
        }
    }
}

#[async_trait]
impl Stage for ToolCallingStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    async fn run(
        &self,
        _state: &SharedState,
        ctx: &StageContext<'_>,
    ) -> Result<Vec<Reply>, StageFailure> {
        let record = ctx.call_tool(self.call.clone()).await?;
        let text = match &record.result {
            migrate_kernel::protocol::ToolResult::Ok { .. } => format!("{} ok", record.call.tool),
            migrate_kernel::protocol::ToolResult::Error { message } => {
                format!("{} error: {message}", record.call.tool)
            }
        };
        Ok(vec![Reply::text(text).with_tool_records(vec![record])])
    }
}

/// Chain stages in the given order
pub fn linear_graph(stages: Vec<Arc<dyn Stage>>) -> Result<PipelineGraph, GraphError> {
    let names: Vec<String> = stages.iter().map(|s| s.name().to_string()).collect();
    let mut builder = PipelineGraph::builder();
    for stage in stages {
        builder.add_shared_stage(stage);
    }
    for pair in names.windows(2) {
        builder.add_edge(pair[0].clone(), pair[1].clone());
    }
    builder.build()
}

/// `n` scripted stages named `stage_0..` each replying `text`
pub fn scripted_chain(n: usize, text: &str) -> Result<PipelineGraph, GraphError> {
    linear_graph(
        (0..n)
            .map(|i| Arc::new(ScriptedStage::says(format!("stage_{i}"), text)) as Arc<dyn Stage>)
            .collect(),
    )
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

/// Fixed connection configuration
#[derive(Debug, Clone)]
pub struct StaticSecrets(pub ConnectionConfig);

impl StaticSecrets {
    pub fn for_database(database: &str) -> Self {
        Self(ConnectionConfig {
            host: "127.0.0.1".into(),
            port: 3306,
            user: "root".into(),
            password: "password".into(),
            database: database.into(),
        })
    }
}

impl SecretProvider for StaticSecrets {
    fn connection(&self) -> Result<ConnectionConfig, SecretError> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Clone)]
struct FakeTable {
    rows: u64,
    checksum: Option<u64>,
    bytes: u64,
    columns: Vec<(String, String)>,
}

/// Database answering the statements the built-in tools issue
///
/// Every statement is recorded; unknown statements and missing tables
/// fail like a real server would.
pub struct InMemoryDatabase {
    database: String,
    version: String,
    tables: IndexMap<String, FakeTable>,
    unreachable: bool,
    log: Mutex<Vec<String>>,
}

impl InMemoryDatabase {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            version: "8.0.36".into(),
            tables: IndexMap::new(),
            unreachable: false,
            log: Mutex::new(Vec::new()),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_table(mut self, name: &str, rows: u64, checksum: Option<u64>, bytes: u64) -> Self {
        self.tables.insert(
            name.to_string(),
            FakeTable {
                rows,
                checksum,
                bytes,
                columns: vec![
                    ("id".into(), "int".into()),
                    ("payload".into(), "varchar(255)".into()),
                ],
            },
        );
        self
    }

    /// Every query fails as if the server refused the connection
    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    /// Statements received so far
    pub fn statements(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    fn table(&self, name: &str) -> Result<&FakeTable, DatabaseError> {
        self.tables.get(name).ok_or_else(|| {
            DatabaseError::Query(format!(
                "Table '{}.{name}' doesn't exist",
                self.database
            ))
        })
    }

    fn answer(&self, statement: &str) -> Result<Vec<Row>, DatabaseError> {
        if statement == sql::version() {
            return Ok(vec![row(&[("version", Scalar::Text(self.version.clone()))])]);
        }
        if statement == sql::show_tables() {
            let column = format!("Tables_in_{}", self.database);
            return Ok(self
                .tables
                .keys()
                .map(|t| row(&[(column.as_str(), Scalar::Text(t.clone()))]))
                .collect());
        }
        if statement == sql::schema_size(&self.database) {
            let bytes: u64 = self.tables.values().map(|t| t.bytes).sum();
            return Ok(vec![row(&[(
                "size_bytes",
                Scalar::Int(i64::try_from(bytes).unwrap_or(i64::MAX)),
            )])]);
        }
        for (name, table) in &self.tables {
            if statement == sql::row_count(name) {
                return Ok(vec![row(&[(
                    "row_count",
                    Scalar::Int(i64::try_from(table.rows).unwrap_or(i64::MAX)),
                )])]);
            }
            if statement == sql::checksum(name) {
                let value = table
                    .checksum
                    .map_or(Scalar::Null, |c| Scalar::Int(i64::try_from(c).unwrap_or(i64::MAX)));
                return Ok(vec![row(&[
                    ("Table", Scalar::Text(format!("{}.{name}", self.database))),
                    ("Checksum", value),
                ])]);
            }
            if statement == sql::describe(name) {
                return Ok(table
                    .columns
                    .iter()
                    .map(|(field, ty)| {
                        row(&[
                            ("Field", Scalar::Text(field.clone())),
                            ("Type", Scalar::Text(ty.clone())),
                            ("Null", Scalar::Text("NO".into())),
                            ("Key", Scalar::Text(String::new())),
                            ("Default", Scalar::Null),
                            ("Extra", Scalar::Text(String::new())),
                        ])
                    })
                    .collect());
            }
        }
        // statement names a table we don't have
        if let Some(name) = statement.split('`').nth(1) {
            self.table(name)?;
        }
        Err(DatabaseError::Query(format!("unsupported statement: {statement}")))
    }
}

fn row(cells: &[(&str, Scalar)]) -> Row {
    cells
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

#[async_trait]
impl SourceDatabase for InMemoryDatabase {
    async fn query(
        &self,
        _connection: &ConnectionConfig,
        statement: &str,
    ) -> Result<Vec<Row>, DatabaseError> {
        self.log.lock().push(statement.to_string());
        if self.unreachable {
            return Err(DatabaseError::Query(
                "Can't connect to MySQL server on '127.0.0.1:3306'".into(),
            ));
        }
        self.answer(statement)
    }
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// Language model replaying queued responses
pub struct ScriptedModel {
    responses: Mutex<VecDeque<Result<String, ModelError>>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedModel {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(|r| Ok(r.into())).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push_error(&self, error: ModelError) {
        self.responses.lock().push_back(Err(error));
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().len()
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String, ModelError> {
        self.requests.lock().push(request.clone());
        self.responses.lock().pop_front().unwrap_or_else(|| {
            Err(ModelError::InvalidResponse(
                "scripted model has no more responses".into(),
            ))
        })
    }
}
