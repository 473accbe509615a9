//! Host side of the capability bridge.
//!
//! Every call a script makes into a capability arrives here as
//! `(script, capability, op, args)` with JSON arguments, and leaves as a JSON
//! envelope: `{"ok": value}` or `{"err": {"kind", "message"}}`. Engine errors
//! keep their kind across the crossing so the script can rethrow them
//! unchanged.

use std::sync::{Arc, Mutex, MutexGuard};

use pubdev_core::{ClientId, ErrorKind, ScriptPath, WorkspaceId};
use pubdev_db::{
    row_from_json, row_to_json, DbError, Document, DocumentStore, Predicate, RelationalStore, Row, Schema,
    Selection, SqlValue,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::{Capability, CapabilityInstance, Gateway, HostError, WorkspaceCapabilities};

/// Wire form of a bridge or script result.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Envelope {
    Ok(Value),
    Err(Fault),
}

/// Wire form of an error crossing the bridge.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Fault {
    #[serde(default)]
    pub kind: Option<String>,
    pub message: String,
}

impl Fault {
    /// The taxonomy kind named by the fault, if it names a known one.
    pub(crate) fn error_kind(&self) -> Option<ErrorKind> {
        let kind = self.kind.clone()?;
        serde_json::from_value(Value::String(kind)).ok()
    }
}

impl Envelope {
    pub(crate) fn from_result(result: Result<Value, HostError>) -> Self {
        match result {
            Ok(value) => Envelope::Ok(value),
            Err(e) => Envelope::Err(Fault { kind: Some(e.kind().as_str().to_owned()), message: e.to_string() }),
        }
    }

    fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            json!({ "err": { "kind": ErrorKind::Internal.as_str(), "message": e.to_string() } }).to_string()
        })
    }
}

/// Capability bridge for one workspace. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Bridge {
    capabilities: Arc<WorkspaceCapabilities>,
}

impl Bridge {
    #[must_use]
    pub fn new(capabilities: Arc<WorkspaceCapabilities>) -> Self {
        Self { capabilities }
    }

    #[must_use]
    pub fn workspace(&self) -> &WorkspaceId {
        self.capabilities.workspace()
    }

    /// String-in, string-out form used by script engines.
    #[must_use]
    pub fn call_json(&self, script: &str, capability: &str, op: &str, args: &str) -> String {
        let result = ScriptPath::new(script).map_err(HostError::from).and_then(|script| {
            let args: Value = serde_json::from_str(args).map_err(|e| invalid(capability, op, e))?;
            self.call(&script, capability, op, args)
        });
        Envelope::from_result(result).encode()
    }

    /// Run `op` on `capability` on behalf of the script at `script`.
    ///
    /// The `resolve` op only materialises the capability; `require` issues it
    /// so unknown names and gateway conflicts fail at the `require` site.
    ///
    /// # Errors
    /// [`HostError::CapabilityNotFound`], [`HostError::InvalidArguments`],
    /// [`HostError::GatewayConflict`], or the store engine's error.
    pub fn call(&self, script: &ScriptPath, capability: &str, op: &str, args: Value) -> Result<Value, HostError> {
        let capability = Capability::parse(capability)?;
        let instance = self.capabilities.resolve(capability, script)?;
        tracing::trace!(workspace = %self.workspace(), script = %script, %capability, op, "capability call");
        if op == "resolve" {
            return Ok(Value::Null);
        }
        match instance {
            CapabilityInstance::Sql(store) => sql(&mut lock(&store), op, args),
            CapabilityInstance::NoSql(store) => nosql(&mut lock(&store), op, args),
            CapabilityInstance::Gateway(gateway) => gateway_op(&gateway, op, args),
        }
    }

    /// Forward a script's `console` output to the host log.
    pub fn log(&self, script: &str, level: &str, message: &str) {
        let workspace = self.workspace();
        match level {
            "error" => tracing::error!(target: "pubdev::script", %workspace, script, "{message}"),
            "warn" => tracing::warn!(target: "pubdev::script", %workspace, script, "{message}"),
            "debug" => tracing::debug!(target: "pubdev::script", %workspace, script, "{message}"),
            _ => tracing::info!(target: "pubdev::script", %workspace, script, "{message}"),
        }
    }
}

fn lock<T>(store: &Arc<Mutex<T>>) -> MutexGuard<'_, T> {
    #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
    store.lock().expect("store lock poisoned")
}

fn invalid(capability: impl ToString, op: &str, reason: impl ToString) -> HostError {
    HostError::InvalidArguments {
        capability: capability.to_string(),
        op: op.to_owned(),
        reason: reason.to_string(),
    }
}

fn decode<T: DeserializeOwned>(capability: Capability, op: &str, args: Value) -> Result<T, HostError> {
    let args = if args.is_null() { Value::Object(Map::new()) } else { args };
    serde_json::from_value(args).map_err(|e| invalid(capability, op, e))
}

fn rows_to_json(rows: Vec<Row>) -> Value {
    Value::Array(rows.into_iter().map(|row| Value::Object(row_to_json(row))).collect())
}

fn row(table: Option<&str>, object: Map<String, Value>) -> Result<Row, HostError> {
    row_from_json(object).map_err(|e| {
        HostError::Db(DbError::SchemaValidation {
            table: table.unwrap_or_default().to_owned(),
            reason: e.to_string(),
        })
    })
}

#[derive(Deserialize)]
struct TableArgs {
    table: Option<String>,
}

#[derive(Deserialize)]
struct CreateArgs {
    table: String,
    schema: Map<String, Value>,
}

#[derive(Deserialize)]
struct InsertArgs {
    table: Option<String>,
    row: Option<Map<String, Value>>,
}

#[derive(Deserialize)]
struct SelectArgs {
    table: Option<String>,
    #[serde(default)]
    columns: Option<Value>,
    #[serde(default, rename = "where")]
    predicate: Predicate,
}

#[derive(Deserialize)]
struct UpdateArgs {
    table: Option<String>,
    #[serde(default)]
    set: Map<String, Value>,
    #[serde(default, rename = "where")]
    predicate: Predicate,
}

#[derive(Deserialize)]
struct DeleteArgs {
    table: Option<String>,
    #[serde(default, rename = "where")]
    predicate: Predicate,
}

fn selection(columns: Option<Value>) -> Result<Selection, HostError> {
    match columns {
        None => Ok(Selection::All),
        Some(Value::String(s)) if s == "*" => Ok(Selection::All),
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(s),
                other => Err(invalid(Capability::Sql, "select", format!("column names must be strings, got {other}"))),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Selection::Columns),
        Some(other) => Err(invalid(Capability::Sql, "select", format!("unsupported column list {other}"))),
    }
}

fn sql(store: &mut RelationalStore, op: &str, args: Value) -> Result<Value, HostError> {
    let cap = Capability::Sql;
    match op {
        "create" => {
            let args: CreateArgs = decode(cap, op, args)?;
            let mut tags = Vec::with_capacity(args.schema.len());
            for (column, tag) in &args.schema {
                let tag = tag.as_str().ok_or_else(|| {
                    DbError::InvalidSchema(format!("column '{column}' has unsupported type {tag}"))
                })?;
                tags.push((column.as_str(), tag));
            }
            let schema = Schema::from_tags(tags)?;
            store.create_with_schema(&args.table, schema)?;
            Ok(Value::Null)
        }
        "drop" => {
            let args: TableArgs = decode(cap, op, args)?;
            let table = args.table.ok_or_else(|| DbError::MissingInput("drop needs a table".into()))?;
            Ok(Value::Bool(store.drop_table(&table)))
        }
        "tables" => Ok(json!(store.tables().collect::<Vec<_>>())),
        "schema" => {
            let args: TableArgs = decode(cap, op, args)?;
            let name = args.table.ok_or_else(|| DbError::MissingInput("schema needs a table".into()))?;
            let table = store.table(&name).ok_or(DbError::TableNotFound(name))?;
            let schema: Map<String, Value> = table
                .schema()
                .columns()
                .map(|(column, ty)| (column.to_owned(), Value::String(ty.tag().to_owned())))
                .collect();
            Ok(Value::Object(schema))
        }
        "insert" => {
            let args: InsertArgs = decode(cap, op, args)?;
            let mut builder = store.insert();
            if let Some(values) = args.row {
                builder = builder.values(row(args.table.as_deref(), values)?);
            }
            if let Some(table) = args.table {
                builder = builder.into(table);
            }
            Ok(Value::Object(row_to_json(builder.exec()?)))
        }
        "select" => {
            let args: SelectArgs = decode(cap, op, args)?;
            let mut builder = store.select(selection(args.columns)?).filter(args.predicate);
            if let Some(table) = args.table {
                builder = builder.from(table);
            }
            Ok(rows_to_json(builder.exec()?))
        }
        "update" => {
            let args: UpdateArgs = decode(cap, op, args)?;
            let table = args.table.ok_or_else(|| DbError::MissingInput("update needs a table".into()))?;
            let changes = row(Some(&table), args.set)?;
            let mut builder = store.update(table).filter(args.predicate);
            for (column, value) in changes {
                builder = builder.set(column, value);
            }
            Ok(rows_to_json(builder.exec()?))
        }
        "delete" => {
            let args: DeleteArgs = decode(cap, op, args)?;
            let mut builder = store.delete().filter(args.predicate);
            if let Some(table) = args.table {
                builder = builder.from(table);
            }
            Ok(rows_to_json(builder.exec()?))
        }
        other => Err(invalid(cap, other, "unknown operation")),
    }
}

#[derive(Deserialize)]
struct CollectionArgs {
    collection: String,
    #[serde(default)]
    query: Document,
}

#[derive(Deserialize)]
struct InsertDocArgs {
    collection: String,
    doc: Value,
}

#[derive(Deserialize)]
struct UpdateDocArgs {
    collection: String,
    #[serde(default)]
    query: Document,
    #[serde(default)]
    patch: Document,
}

fn document(value: Option<Document>) -> Value {
    value.map_or(Value::Null, Value::Object)
}

fn documents(values: Vec<Document>) -> Value {
    Value::Array(values.into_iter().map(Value::Object).collect())
}

fn nosql(store: &mut DocumentStore, op: &str, args: Value) -> Result<Value, HostError> {
    let cap = Capability::NoSql;
    match op {
        "collections" => Ok(json!(store.collections().collect::<Vec<_>>())),
        "insert" => {
            let args: InsertDocArgs = decode(cap, op, args)?;
            let Value::Object(doc) = args.doc else {
                return Err(invalid(cap, op, "documents must be objects"));
            };
            Ok(Value::Object(store.collection(&args.collection).insert(doc)))
        }
        "update" => {
            let args: UpdateDocArgs = decode(cap, op, args)?;
            Ok(document(store.collection(&args.collection).update(&args.query, args.patch)))
        }
        "find" | "findOne" | "count" | "remove" | "removeAll" => {
            let args: CollectionArgs = decode(cap, op, args)?;
            let collection = store.collection(&args.collection);
            Ok(match op {
                "find" => documents(collection.find(&args.query)),
                "findOne" => document(collection.find_one(&args.query)),
                "count" => json!(collection.count(&args.query)),
                "remove" => document(collection.remove(&args.query)),
                _ => documents(collection.remove_all(&args.query)),
            })
        }
        other => Err(invalid(cap, other, "unknown operation")),
    }
}

#[derive(Deserialize)]
struct BroadcastArgs {
    message: String,
}

#[derive(Deserialize)]
struct SendArgs {
    client: String,
    message: String,
}

fn gateway_op(gateway: &Gateway, op: &str, args: Value) -> Result<Value, HostError> {
    let cap = Capability::Gateway;
    match op {
        "hasServer" => Ok(Value::Bool(gateway.has_server())),
        "clients" => Ok(json!(gateway.clients().iter().map(ToString::to_string).collect::<Vec<_>>())),
        "broadcast" => {
            let args: BroadcastArgs = decode(cap, op, args)?;
            Ok(json!(gateway.broadcast(&args.message)))
        }
        "send" => {
            let args: SendArgs = decode(cap, op, args)?;
            let client = Uuid::parse_str(&args.client).map_err(|e| invalid(cap, op, e))?;
            Ok(Value::Bool(gateway.send(ClientId::from(client), &args.message)))
        }
        other => Err(invalid(cap, other, "unknown operation")),
    }
}
