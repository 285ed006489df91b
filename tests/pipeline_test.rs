use async_trait::async_trait;
use nlq_engine::execution::Cell;
use nlq_engine::llm::{ChatMessage, LlmProvider, ResponseFormat};
use nlq_engine::{
    ColumnRef, ConnectionConfig, DataColumn, DataSourceDescriptor, DataTable, Dialect,
    ExecutionError, ForeignKey, InMemoryRequestStore, MetadataSnapshot, NlqError,
    PipelineComponents, PipelineSettings, QueryExecutor, QueryPipeline, Record, Request,
    RequestStatus, RequestStore, StaticWorkspace, WorkspaceRateLimiter,
};
use nlq_engine::request::TerminalUpdate;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const OWNER: i64 = 1;
const WORKSPACE: i64 = 7;

/// Answers by stage, recognised from the system message. `None` fails the call.
#[derive(Default)]
struct ScriptedLlm {
    sql: Option<String>,
    repair: Option<String>,
    text: Option<String>,
    graph: Option<String>,
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        _max_tokens: u32,
        _format: ResponseFormat,
    ) -> nlq_engine::Result<String> {
        let system = messages.first().map(|m| m.content.as_str()).unwrap_or("");
        let (stage, answer) = if system.contains("fixing a query") {
            ("repair", &self.repair)
        } else if system.contains("SQL assistant") {
            ("sql", &self.sql)
        } else if system.contains("formatter") {
            ("text", &self.text)
        } else {
            ("graph", &self.graph)
        };
        self.calls.lock().unwrap().push(stage.to_string());
        answer
            .clone()
            .ok_or_else(|| NlqError::Llm(format!("{} unavailable", stage)))
    }
}

/// Returns fixed rows, or an engine error for SQL containing `fail_on`.
struct ScriptedExecutor {
    rows: Vec<Record>,
    fail_on: Option<String>,
    executed: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    fn new(rows: Vec<Record>) -> Self {
        Self {
            rows,
            fail_on: None,
            executed: Mutex::new(Vec::new()),
        }
    }

    fn failing_on(mut self, needle: &str) -> Self {
        self.fail_on = Some(needle.to_string());
        self
    }
}

#[async_trait]
impl QueryExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        config: &ConnectionConfig,
        sql: &str,
        _timeout: Duration,
    ) -> Result<Vec<Record>, ExecutionError> {
        self.executed.lock().unwrap().push(sql.to_string());
        match &self.fail_on {
            Some(needle) if sql.contains(needle.as_str()) => Err(ExecutionError::new(
                config.dialect,
                format!("column \"{}\" does not exist", needle),
            )),
            _ => Ok(self.rows.clone()),
        }
    }
}

fn column(name: &str, business_name: Option<&str>) -> DataColumn {
    DataColumn {
        column_name: name.to_string(),
        data_type: "text".to_string(),
        is_nullable: true,
        is_primary_key: name == "id",
        business_name: business_name.map(str::to_string),
        description: None,
    }
}

fn shop_snapshot() -> MetadataSnapshot {
    MetadataSnapshot::new(
        WORKSPACE,
        vec![
            DataTable {
                schema_name: "public".into(),
                table_name: "orders".into(),
                business_name: Some("Orders".into()),
                description: None,
                columns: vec![
                    column("id", None),
                    column("customer_id", None),
                    column("total", Some("Order Total")),
                ],
            },
            DataTable {
                schema_name: "public".into(),
                table_name: "customers".into(),
                business_name: None,
                description: None,
                columns: vec![column("id", None), column("email", None)],
            },
        ],
        vec![ForeignKey {
            constraint_name: Some("orders_customer_fk".into()),
            from: ColumnRef::new("public", "orders", "customer_id"),
            to: ColumnRef::new("public", "customers", "id"),
        }],
    )
}

fn data_source() -> DataSourceDescriptor {
    DataSourceDescriptor {
        dialect: Dialect::Postgres,
        config: json!({
            "host": "localhost",
            "port": 5432,
            "database": "shop",
            "user": "reader",
            "password": "secret"
        }),
    }
}

fn rows() -> Vec<Record> {
    let mut row = Record::new();
    row.insert("id".into(), Cell::from(1i64));
    row.insert("email".into(), Cell::from("john.doe@example.com"));
    row.insert("total".into(), Cell::from(json!(42.5)));
    vec![row]
}

struct Harness {
    pipeline: QueryPipeline,
    store: Arc<InMemoryRequestStore>,
    llm: Arc<ScriptedLlm>,
    executor: Arc<ScriptedExecutor>,
}

fn harness_with(
    llm: ScriptedLlm,
    executor: ScriptedExecutor,
    workspace: StaticWorkspace,
    settings: PipelineSettings,
) -> Harness {
    let workspace = Arc::new(workspace);
    let store = Arc::new(InMemoryRequestStore::new());
    let llm = Arc::new(llm);
    let executor = Arc::new(executor);
    let components = PipelineComponents {
        workspaces: workspace.clone(),
        metadata: workspace.clone(),
        connections: workspace,
        requests: store.clone(),
        llm: llm.clone(),
        executor: executor.clone(),
        limiter: Arc::new(WorkspaceRateLimiter::new(30, Duration::from_secs(60))),
    };
    Harness {
        pipeline: QueryPipeline::new(components, settings),
        store,
        llm,
        executor,
    }
}

fn harness(llm: ScriptedLlm, executor: ScriptedExecutor) -> Harness {
    harness_with(
        llm,
        executor,
        StaticWorkspace::new(OWNER, shop_snapshot(), Some(data_source())),
        PipelineSettings::default(),
    )
}

fn happy_llm() -> ScriptedLlm {
    ScriptedLlm {
        sql: Some(
            "```json\n{\"sql\": \"SELECT o.id, c.email, o.total FROM public.orders o JOIN public.customers c ON o.customer_id = c.id\"}\n```"
                .into(),
        ),
        text: Some("  One order worth 42.5.  ".into()),
        graph: Some("```json\n{\"type\": \"BAR_CHART\", \"x\": \"id\", \"y\": \"Order Total\"}\n```".into()),
        ..ScriptedLlm::default()
    }
}

#[tokio::test]
async fn test_create_and_execute_success() {
    let h = harness(happy_llm(), ScriptedExecutor::new(rows()));
    let result = h
        .pipeline
        .create_and_execute(OWNER, WORKSPACE, "Orders with customer emails")
        .await
        .unwrap();

    assert_eq!(result.status, RequestStatus::Succeeded);
    assert!(result.response_id.is_some());
    assert!(result.prompt.is_none());
    let sql = result.sql_script.clone().unwrap();
    assert!(sql.ends_with("ON o.customer_id = c.id LIMIT 101"));
    assert_eq!(h.executor.executed.lock().unwrap().as_slice(), &[sql.clone()]);
    assert_eq!(result.result_text.as_deref(), Some("One order worth 42.5."));
    assert_eq!(result.graph_config.as_ref().unwrap()["type"], "BAR_CHART");

    let table = serde_json::to_value(result.result_table.as_ref().unwrap()).unwrap();
    assert_eq!(table["email"], json!(["jo***om"]));
    assert_eq!(table["Order Total"], json!([42.5]));
    assert!(table.get("total").is_none());

    let stored = h.store.find(WORKSPACE, result.request_id).await.unwrap().unwrap();
    assert_eq!(stored.status, RequestStatus::Succeeded);
    assert_eq!(stored.sql_script.as_deref(), Some(sql.as_str()));
    assert_eq!(stored.result_table, Some(table));
}

#[tokio::test]
async fn test_llm_outage_uses_stub_and_degrades() {
    let h = harness(ScriptedLlm::default(), ScriptedExecutor::new(rows()));
    let result = h
        .pipeline
        .create_and_execute(OWNER, WORKSPACE, "Anything")
        .await
        .unwrap();

    assert_eq!(result.status, RequestStatus::Succeeded);
    assert_eq!(
        result.sql_script.as_deref(),
        Some("SELECT public.orders.id, public.orders.customer_id, public.orders.total FROM public.orders LIMIT 101")
    );
    assert!(result.result_text.is_none());
    assert!(result.graph_config.is_none());
    assert!(result.result_table.is_some());
}

#[tokio::test]
async fn test_non_object_graph_config_is_dropped() {
    let llm = ScriptedLlm {
        graph: Some("[1, 2, 3]".into()),
        text: Some("   ".into()),
        ..happy_llm()
    };
    let h = harness(llm, ScriptedExecutor::new(rows()));
    let result = h
        .pipeline
        .create_and_execute(OWNER, WORKSPACE, "Orders")
        .await
        .unwrap();
    assert!(result.graph_config.is_none());
    assert!(result.result_text.is_none());
}

#[tokio::test]
async fn test_guard_rejection_marks_request_failed() {
    let llm = ScriptedLlm {
        sql: Some("{\"sql\": \"DELETE FROM public.orders\"}".into()),
        ..ScriptedLlm::default()
    };
    let h = harness(llm, ScriptedExecutor::new(rows()));
    let err = h
        .pipeline
        .create_and_execute(OWNER, WORKSPACE, "Remove all orders")
        .await
        .unwrap_err();

    assert!(matches!(err, NlqError::Guard(_)));
    assert_eq!(err.user_message(), "Only SELECT queries are allowed");
    assert!(h.executor.executed.lock().unwrap().is_empty());

    let stored = h.store.latest(WORKSPACE).await.unwrap().unwrap();
    assert_eq!(stored.status, RequestStatus::Failed);
    assert!(stored.sql_script.is_none());
}

#[tokio::test]
async fn test_execution_failure_keeps_guarded_sql() {
    let llm = ScriptedLlm {
        sql: Some("SELECT missing FROM public.orders".into()),
        ..ScriptedLlm::default()
    };
    let h = harness(llm, ScriptedExecutor::new(rows()).failing_on("missing"));
    let err = h
        .pipeline
        .create_and_execute(OWNER, WORKSPACE, "Missing column")
        .await
        .unwrap_err();

    assert!(matches!(err, NlqError::Execution(_)));
    assert_eq!(err.user_message(), "Query execution failed");

    let stored = h.store.latest(WORKSPACE).await.unwrap().unwrap();
    assert_eq!(stored.status, RequestStatus::Failed);
    assert_eq!(
        stored.sql_script.as_deref(),
        Some("SELECT missing FROM public.orders LIMIT 101")
    );
    assert!(stored.result_table.is_none());
}

#[tokio::test]
async fn test_repair_recovers_from_execution_error() {
    let llm = ScriptedLlm {
        sql: Some("SELECT missing FROM public.orders".into()),
        repair: Some("{\"sql\": \"SELECT id FROM public.orders\"}".into()),
        ..ScriptedLlm::default()
    };
    let settings = PipelineSettings {
        sql_repair_enabled: true,
        ..PipelineSettings::default()
    };
    let h = harness_with(
        llm,
        ScriptedExecutor::new(rows()).failing_on("missing"),
        StaticWorkspace::new(OWNER, shop_snapshot(), Some(data_source())),
        settings,
    );
    let result = h
        .pipeline
        .create_and_execute(OWNER, WORKSPACE, "Order ids")
        .await
        .unwrap();

    assert_eq!(
        result.sql_script.as_deref(),
        Some("SELECT id FROM public.orders LIMIT 101")
    );
    assert_eq!(h.executor.executed.lock().unwrap().len(), 2);
    assert!(h.llm.calls.lock().unwrap().contains(&"repair".to_string()));
}

#[tokio::test]
async fn test_repair_disabled_by_default() {
    let llm = ScriptedLlm {
        sql: Some("SELECT * FROM secret.salaries".into()),
        repair: Some("{\"sql\": \"SELECT id FROM public.orders\"}".into()),
        ..ScriptedLlm::default()
    };
    let h = harness(llm, ScriptedExecutor::new(rows()));
    let err = h
        .pipeline
        .create_and_execute(OWNER, WORKSPACE, "Salaries")
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "Access to schemas not allowed: secret");
    assert!(!h.llm.calls.lock().unwrap().contains(&"repair".to_string()));
}

#[tokio::test]
async fn test_preconditions_leave_no_request() {
    let h = harness(happy_llm(), ScriptedExecutor::new(rows()));

    let err = h
        .pipeline
        .create_and_execute(99, WORKSPACE, "Orders")
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Workspace not found");

    let err = h
        .pipeline
        .create_and_execute(OWNER, WORKSPACE, "   ")
        .await
        .unwrap_err();
    assert!(matches!(err, NlqError::InvalidInput(_)));

    assert!(h.store.list(WORKSPACE, 50).await.unwrap().is_empty());

    let no_source = harness_with(
        happy_llm(),
        ScriptedExecutor::new(rows()),
        StaticWorkspace::new(OWNER, shop_snapshot(), None),
        PipelineSettings::default(),
    );
    let err = no_source
        .pipeline
        .create_and_execute(OWNER, WORKSPACE, "Orders")
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Data source not configured");
    assert!(no_source.store.list(WORKSPACE, 50).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_reads() {
    let h = harness(happy_llm(), ScriptedExecutor::new(rows()));

    let err = h.pipeline.get_latest(OWNER, WORKSPACE).await.unwrap_err();
    assert_eq!(err.to_string(), "No requests yet");
    let err = h.pipeline.get_one(OWNER, WORKSPACE, 12345).await.unwrap_err();
    assert_eq!(err.to_string(), "Request not found");

    let first = h
        .pipeline
        .create_and_execute(OWNER, WORKSPACE, "First")
        .await
        .unwrap();
    let second = h
        .pipeline
        .create_and_execute(OWNER, WORKSPACE, "Second")
        .await
        .unwrap();

    let one = h
        .pipeline
        .get_one(OWNER, WORKSPACE, first.request_id)
        .await
        .unwrap();
    assert_eq!(one.sql_script, first.sql_script);
    assert_eq!(one.result_table, first.result_table);
    assert!(one.prompt.is_none());
    assert!(one.response_id.is_none());

    let latest = h.pipeline.get_latest(OWNER, WORKSPACE).await.unwrap();
    assert_eq!(latest.request_id, second.request_id);

    let all = h.pipeline.get_all(OWNER, WORKSPACE).await.unwrap();
    let prompts: Vec<_> = all.iter().filter_map(|r| r.prompt.clone()).collect();
    assert_eq!(prompts, vec!["Second".to_string(), "First".to_string()]);

    let err = h.pipeline.get_all(99, WORKSPACE).await.unwrap_err();
    assert_eq!(err.to_string(), "Workspace not found");
}

#[tokio::test]
async fn test_serialized_result_uses_camel_case() {
    let h = harness(happy_llm(), ScriptedExecutor::new(rows()));
    let result = h
        .pipeline
        .create_and_execute(OWNER, WORKSPACE, "Orders")
        .await
        .unwrap();
    let body: Value = serde_json::to_value(&result).unwrap();
    assert_eq!(body["status"], "SUCCEEDED");
    assert!(body.get("requestId").is_some());
    assert!(body.get("sqlScript").is_some());
    assert!(body.get("resultTable").is_some());
    assert!(body.get("prompt").is_none());
}

#[tokio::test]
async fn test_rate_limit_per_workspace() {
    let workspace = Arc::new(StaticWorkspace::new(OWNER, shop_snapshot(), Some(data_source())));
    let components = PipelineComponents {
        workspaces: workspace.clone(),
        metadata: workspace.clone(),
        connections: workspace,
        requests: Arc::new(InMemoryRequestStore::new()),
        llm: Arc::new(happy_llm()),
        executor: Arc::new(ScriptedExecutor::new(rows())),
        limiter: Arc::new(WorkspaceRateLimiter::new(2, Duration::from_secs(60))),
    };
    let pipeline = QueryPipeline::new(components, PipelineSettings::default());

    pipeline.create_and_execute(OWNER, WORKSPACE, "One").await.unwrap();
    pipeline.get_latest(OWNER, WORKSPACE).await.unwrap();
    let err = pipeline
        .create_and_execute(OWNER, WORKSPACE, "Three")
        .await
        .unwrap_err();
    assert!(matches!(err, NlqError::RateLimited { workspace_id: WORKSPACE }));
}

/// Accepts everything except a SUCCEEDED terminal update.
#[derive(Default)]
struct SuccessRejectingStore {
    inner: InMemoryRequestStore,
}

#[async_trait]
impl RequestStore for SuccessRejectingStore {
    async fn create(
        &self,
        user_id: i64,
        workspace_id: i64,
        prompt: &str,
    ) -> nlq_engine::Result<Request> {
        self.inner.create(user_id, workspace_id, prompt).await
    }

    async fn complete(&self, id: i64, update: TerminalUpdate) -> nlq_engine::Result<()> {
        if update.status == RequestStatus::Succeeded {
            return Err(NlqError::Database("result column too large".into()));
        }
        self.inner.complete(id, update).await
    }

    async fn find(&self, workspace_id: i64, id: i64) -> nlq_engine::Result<Option<Request>> {
        self.inner.find(workspace_id, id).await
    }

    async fn latest(&self, workspace_id: i64) -> nlq_engine::Result<Option<Request>> {
        self.inner.latest(workspace_id).await
    }

    async fn list(&self, workspace_id: i64, limit: usize) -> nlq_engine::Result<Vec<Request>> {
        self.inner.list(workspace_id, limit).await
    }
}

#[tokio::test]
async fn test_unstorable_success_falls_back_to_failed() {
    let workspace = Arc::new(StaticWorkspace::new(OWNER, shop_snapshot(), Some(data_source())));
    let store = Arc::new(SuccessRejectingStore::default());
    let components = PipelineComponents {
        workspaces: workspace.clone(),
        metadata: workspace.clone(),
        connections: workspace,
        requests: store.clone(),
        llm: Arc::new(happy_llm()),
        executor: Arc::new(ScriptedExecutor::new(rows())),
        limiter: Arc::new(WorkspaceRateLimiter::new(30, Duration::from_secs(60))),
    };
    let pipeline = QueryPipeline::new(components, PipelineSettings::default());

    let err = pipeline
        .create_and_execute(OWNER, WORKSPACE, "Orders with customer emails")
        .await
        .unwrap_err();
    assert!(matches!(err, NlqError::Database(_)));

    let stored = store.latest(WORKSPACE).await.unwrap().unwrap();
    assert_eq!(stored.status, RequestStatus::Failed);
    assert!(stored
        .sql_script
        .as_deref()
        .is_some_and(|sql| sql.ends_with("LIMIT 101")));
    assert!(stored.result_table.is_none());
}
