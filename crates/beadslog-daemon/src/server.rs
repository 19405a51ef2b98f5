//! The daemon: socket server, request dispatch, auto-flush ownership.

use std::collections::HashSet;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info};

use beadslog_core::dependency::Dependency;
use beadslog_core::enums::{DependencyType, EventType, IssueType, Status};
use beadslog_core::filter::{IssueFilter, WorkFilter};
use beadslog_core::idgen::{self, adaptive_defaults};
use beadslog_core::issue::Issue;
use beadslog_storage::sqlite::schema::{config_keys, metadata_keys};
use beadslog_storage::{IssueUpdates, SqliteStore};
use beadslog_sync::export::export_to_jsonl;
use beadslog_sync::flush::FlushScheduler;
use beadslog_sync::freshness::ensure_fresh;

use crate::error::{DaemonError, Result};
use crate::events::{EventBroker, EventFilter, MutationEvent};
use crate::lifecycle::{DaemonGuard, DaemonPaths};
use crate::wire::{Request, Response, read_frame, write_frame};

/// Poll interval of the nonblocking accept loop.
const ACCEPT_POLL: Duration = Duration::from_millis(100);

/// Health payload returned by the `health` operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthData {
    pub version: String,
    pub uptime_secs: u64,
    pub pid: u32,
}

/// The daemon server state shared across connection threads.
pub struct Daemon {
    store: Arc<SqliteStore>,
    broker: Arc<EventBroker>,
    scheduler: FlushScheduler,
    jsonl_path: PathBuf,
    version: String,
    started_at: Instant,
    shutdown: Arc<AtomicBool>,
}

impl Daemon {
    /// Builds a daemon over an open store.
    ///
    /// The daemon owns the dirty/flush scheduler: mutations mark the store
    /// dirty and the debounced flush exports to `jsonl_path`.
    pub fn new(
        store: Arc<SqliteStore>,
        jsonl_path: PathBuf,
        version: impl Into<String>,
        flush_debounce: Duration,
    ) -> Arc<Self> {
        let flush_store = Arc::clone(&store);
        let flush_jsonl = jsonl_path.clone();
        let scheduler = FlushScheduler::new(
            flush_debounce,
            Box::new(move |full| {
                if full {
                    flush_store.clear_metadata_impl(metadata_keys::JSONL_CONTENT_HASH)?;
                    flush_store.clear_metadata_impl(metadata_keys::EXPORT_HASHES)?;
                }
                export_to_jsonl(&flush_store, &flush_jsonl)?;
                Ok(())
            }),
        );

        Arc::new(Self {
            store,
            broker: Arc::new(EventBroker::default()),
            scheduler,
            jsonl_path,
            version: version.into(),
            started_at: Instant::now(),
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The shutdown flag, for signal handlers.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Full daemon lifecycle for a workspace: acquire the daemon lock,
    /// bind the socket, serve until shutdown.
    pub fn run(self: &Arc<Self>, paths: &DaemonPaths) -> Result<()> {
        let _guard = DaemonGuard::acquire(paths.clone(), &self.version)?;

        let socket = paths.socket_path();
        if let Some(parent) = socket.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DaemonError::io(parent, e))?;
        }
        // A previous daemon that died uncleanly leaves the socket file; the
        // lock proves nobody is serving it.
        let _ = std::fs::remove_file(&socket);

        let listener = UnixListener::bind(&socket).map_err(|e| DaemonError::io(&socket, e))?;
        info!(socket = %socket.display(), version = %self.version, "daemon listening");

        self.serve(listener)
    }

    /// Accept loop. Each connection is handled on its own thread.
    pub fn serve(self: &Arc<Self>, listener: UnixListener) -> Result<()> {
        listener
            .set_nonblocking(true)
            .map_err(|e| DaemonError::Wire(e.to_string()))?;

        while !self.shutdown.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, _)) => {
                    let daemon = Arc::clone(self);
                    std::thread::spawn(move || {
                        if let Err(e) = daemon.handle_connection(stream) {
                            debug!(error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(ACCEPT_POLL);
                }
                Err(e) => {
                    error!(error = %e, "accept failed");
                    std::thread::sleep(ACCEPT_POLL);
                }
            }
        }

        // Final flush so nothing dirty is lost on shutdown.
        self.scheduler.flush_now()?;
        info!("daemon stopped");
        Ok(())
    }

    fn handle_connection(self: &Arc<Self>, mut stream: UnixStream) -> Result<()> {
        stream
            .set_nonblocking(false)
            .map_err(|e| DaemonError::Wire(e.to_string()))?;

        while let Some(request) = read_frame::<_, Request>(&mut stream)? {
            debug!(op = %request.op, "dispatching");

            if request.op == "events.subscribe" {
                return self.stream_events(stream, request);
            }

            let response = match self.dispatch(&request) {
                Ok(response) => response,
                Err(e) => Response::err(e.to_string()),
            };
            write_frame(&mut stream, &response)?;

            if request.op == "shutdown" {
                self.shutdown.store(true, Ordering::SeqCst);
                break;
            }
        }
        Ok(())
    }

    /// Server-streaming path: acknowledge the subscription, replay history,
    /// then forward matching events until the client disconnects.
    fn stream_events(self: &Arc<Self>, mut stream: UnixStream, request: Request) -> Result<()> {
        #[derive(Deserialize, Default)]
        struct SubscribeArgs {
            #[serde(default)]
            filter: EventFilter,
            #[serde(default)]
            history: usize,
        }
        let args: SubscribeArgs = serde_json::from_value(request.args).unwrap_or_default();

        let (receiver, replay) = self.broker.subscribe(args.filter, args.history);
        write_frame(&mut stream, &Response::ok(Value::Null))?;
        for event in replay {
            write_frame(&mut stream, &event)?;
        }

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return Ok(());
            }
            match receiver.recv_timeout(Duration::from_millis(200)) {
                Ok(event) => {
                    if write_frame(&mut stream, &event).is_err() {
                        return Ok(()); // client went away
                    }
                }
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => return Ok(()),
            }
        }
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    fn dispatch(&self, request: &Request) -> Result<Response> {
        match request.op.as_str() {
            "health" => Ok(Response::ok(HealthData {
                version: self.version.clone(),
                uptime_secs: self.started_at.elapsed().as_secs(),
                pid: std::process::id(),
            })),
            "resolve_id" => self.op_resolve_id(&request.args),
            "show" => self.op_show(&request.args),
            "list" => self.op_list(&request.args),
            "count" => self.op_count(&request.args),
            "ready" => self.op_ready(&request.args),
            "blocked" => self.op_blocked(),
            "create" => self.op_create(&request.args),
            "update" => self.op_update(&request.args),
            "close" => self.op_close(&request.args),
            "delete" => self.op_delete(&request.args),
            "dep.add" => self.op_dep_add(&request.args),
            "dep.remove" => self.op_dep_remove(&request.args),
            "label.add" => self.op_label(&request.args, true),
            "label.remove" => self.op_label(&request.args, false),
            "comment.add" => self.op_comment_add(&request.args),
            "comment.list" => self.op_comment_list(&request.args),
            "config.get" => self.op_config_get(&request.args),
            "config.set" => self.op_config_set(&request.args),
            "flush" => {
                self.scheduler.flush_now()?;
                Ok(Response::ok(Value::Null))
            }
            "shutdown" => Ok(Response::ok(Value::Null)),
            other => Ok(Response::unknown_operation(other)),
        }
    }

    fn mark_mutation(&self, event: MutationEvent) {
        self.broker.publish(event);
        self.scheduler.mark_dirty(false);
    }

    /// Runs the freshness gate before serving a read.
    fn refresh(&self) -> Result<()> {
        ensure_fresh(&self.store, &self.jsonl_path)?;
        Ok(())
    }

    fn op_resolve_id(&self, args: &Value) -> Result<Response> {
        #[derive(Deserialize)]
        struct Args {
            partial: String,
        }
        let args: Args = serde_json::from_value(args.clone())?;
        let id = self.store.resolve_id_impl(&args.partial)?;
        Ok(Response::ok(serde_json::json!({ "id": id })))
    }

    fn op_show(&self, args: &Value) -> Result<Response> {
        #[derive(Deserialize)]
        struct Args {
            id: String,
        }
        self.refresh()?;
        let args: Args = serde_json::from_value(args.clone())?;
        let id = self.store.resolve_id_impl(&args.id)?;
        let mut issue = self.store.get_issue_impl(&id)?;
        issue.dependencies = self.store.get_dependency_records_impl(&id)?;
        issue.labels = self.store.get_labels_impl(&id)?;
        issue.comments = self.store.get_comments_impl(&id)?;
        Ok(Response::ok(issue))
    }

    fn op_list(&self, args: &Value) -> Result<Response> {
        self.refresh()?;
        let filter = parse_issue_filter(args);
        let query = args
            .get("query")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let issues = self.store.search_issues_impl(query, &filter)?;
        Ok(Response::ok(issues))
    }

    fn op_count(&self, args: &Value) -> Result<Response> {
        self.refresh()?;
        let filter = parse_issue_filter(args);
        let query = args
            .get("query")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let issues = self.store.search_issues_impl(query, &filter)?;
        Ok(Response::ok(serde_json::json!({ "count": issues.len() })))
    }

    fn op_ready(&self, args: &Value) -> Result<Response> {
        self.refresh()?;
        let mut filter = WorkFilter::default();
        if let Some(limit) = args.get("limit").and_then(Value::as_i64) {
            filter.limit = Some(limit as i32);
        }
        if let Some(assignee) = args.get("assignee").and_then(Value::as_str) {
            filter.assignee = Some(assignee.to_owned());
        }
        let issues = self.store.get_ready_work_impl(&filter)?;
        Ok(Response::ok(issues))
    }

    fn op_blocked(&self) -> Result<Response> {
        self.refresh()?;
        let blocked = self.store.get_blocked_issues_impl(&WorkFilter::default())?;
        let rows: Vec<Value> = blocked
            .into_iter()
            .map(|b| {
                serde_json::json!({
                    "issue": b.issue,
                    "blocked_by_count": b.blocked_by_count,
                })
            })
            .collect();
        Ok(Response::ok(rows))
    }

    fn op_create(&self, args: &Value) -> Result<Response> {
        #[derive(Deserialize)]
        struct Args {
            issue: Issue,
            #[serde(default)]
            actor: String,
        }
        let Args { mut issue, actor } = serde_json::from_value(args.clone())?;

        if issue.id.is_empty() {
            let prefix = self
                .store
                .get_config_impl(config_keys::ISSUE_PREFIX)
                .unwrap_or_else(|_| "bd".to_owned());
            let count = self.store.get_all_issues_impl()?.len();
            let length = idgen::compute_adaptive_length(
                count + 1,
                adaptive_defaults::MIN_LENGTH,
                adaptive_defaults::MAX_LENGTH,
                adaptive_defaults::MAX_COLLISION_PROB,
            );
            let mut used = HashSet::new();
            issue.id = idgen::mint_id(
                &prefix,
                &issue.title,
                issue.issue_type.as_str(),
                &actor,
                issue.created_at,
                length,
                |candidate| self.store.get_issue_impl(candidate).is_ok(),
                &mut used,
            )
            .map_err(beadslog_storage::StorageError::from)?;
        }

        self.store.create_issue_impl(&issue, &actor)?;
        for label in &issue.labels {
            self.store.add_label_impl(&issue.id, label, &actor)?;
        }
        self.mark_mutation(MutationEvent::new(EventType::Created, issue.id.clone()));
        Ok(Response::ok(serde_json::json!({ "id": issue.id })))
    }

    fn op_update(&self, args: &Value) -> Result<Response> {
        #[derive(Deserialize)]
        struct Args {
            id: String,
            #[serde(default)]
            actor: String,
            patch: PatchArgs,
        }
        let args: Args = serde_json::from_value(args.clone())?;
        let id = self.store.resolve_id_impl(&args.id)?;

        let old_status = self.store.get_issue_impl(&id)?.status;
        let updates = args.patch.into_updates();
        self.store.update_issue_impl(&id, &updates, &args.actor)?;

        let new_status = self.store.get_issue_impl(&id)?.status;
        let mut event = if old_status != new_status {
            MutationEvent::new(EventType::StatusChanged, id.clone())
        } else {
            MutationEvent::new(EventType::Updated, id.clone())
        };
        event.old_status = Some(old_status.as_str().to_owned());
        event.new_status = Some(new_status.as_str().to_owned());
        self.mark_mutation(event);

        Ok(Response::ok(serde_json::json!({ "id": id })))
    }

    fn op_close(&self, args: &Value) -> Result<Response> {
        #[derive(Deserialize)]
        struct Args {
            id: String,
            #[serde(default)]
            reason: String,
            #[serde(default)]
            actor: String,
            #[serde(default)]
            session: String,
        }
        let args: Args = serde_json::from_value(args.clone())?;
        let id = self.store.resolve_id_impl(&args.id)?;

        let unblocked = self
            .store
            .close_issue_impl(&id, &args.reason, &args.actor, &args.session)?;

        let mut event = MutationEvent::new(EventType::Closed, id.clone());
        event.new_status = Some(Status::Closed.as_str().to_owned());
        self.mark_mutation(event);

        let unblocked_ids: Vec<&str> = unblocked.iter().map(|i| i.id.as_str()).collect();
        Ok(Response::ok(serde_json::json!({
            "id": id,
            "unblocked": unblocked_ids,
        })))
    }

    fn op_delete(&self, args: &Value) -> Result<Response> {
        #[derive(Deserialize)]
        struct Args {
            id: String,
            #[serde(default)]
            reason: String,
            #[serde(default)]
            actor: String,
        }
        let args: Args = serde_json::from_value(args.clone())?;
        let id = self.store.resolve_id_impl(&args.id)?;
        self.store.delete_issue_impl(&id, &args.reason, &args.actor)?;
        self.mark_mutation(MutationEvent::new(EventType::Deleted, id.clone()));
        Ok(Response::ok(serde_json::json!({ "id": id })))
    }

    fn op_dep_add(&self, args: &Value) -> Result<Response> {
        #[derive(Deserialize)]
        struct Args {
            from: String,
            to: String,
            #[serde(default, rename = "type")]
            dep_type: Option<String>,
            #[serde(default)]
            actor: String,
        }
        let args: Args = serde_json::from_value(args.clone())?;
        let from = self.store.resolve_id_impl(&args.from)?;
        let dep_type = args
            .dep_type
            .map(|t| DependencyType::from(t.as_str()))
            .unwrap_or_default();

        let mut dep = Dependency::new(from.clone(), args.to, dep_type);
        dep.created_by = args.actor.clone();
        self.store.add_dependency_impl(&dep, &args.actor)?;
        self.mark_mutation(MutationEvent::new(EventType::DependencyAdded, from));
        Ok(Response::ok(Value::Null))
    }

    fn op_dep_remove(&self, args: &Value) -> Result<Response> {
        #[derive(Deserialize)]
        struct Args {
            from: String,
            to: String,
            #[serde(default)]
            actor: String,
        }
        let args: Args = serde_json::from_value(args.clone())?;
        let from = self.store.resolve_id_impl(&args.from)?;
        self.store
            .remove_dependency_impl(&from, &args.to, &args.actor)?;
        self.mark_mutation(MutationEvent::new(EventType::DependencyRemoved, from));
        Ok(Response::ok(Value::Null))
    }

    fn op_label(&self, args: &Value, add: bool) -> Result<Response> {
        #[derive(Deserialize)]
        struct Args {
            id: String,
            label: String,
            #[serde(default)]
            actor: String,
        }
        let args: Args = serde_json::from_value(args.clone())?;
        let id = self.store.resolve_id_impl(&args.id)?;
        if add {
            self.store.add_label_impl(&id, &args.label, &args.actor)?;
            self.mark_mutation(MutationEvent::new(EventType::LabelAdded, id));
        } else {
            self.store.remove_label_impl(&id, &args.label, &args.actor)?;
            self.mark_mutation(MutationEvent::new(EventType::LabelRemoved, id));
        }
        Ok(Response::ok(Value::Null))
    }

    fn op_comment_add(&self, args: &Value) -> Result<Response> {
        #[derive(Deserialize)]
        struct Args {
            id: String,
            text: String,
            #[serde(default)]
            author: String,
        }
        let args: Args = serde_json::from_value(args.clone())?;
        let id = self.store.resolve_id_impl(&args.id)?;
        let comment = self.store.add_comment_impl(&id, &args.author, &args.text)?;
        self.mark_mutation(MutationEvent::new(EventType::Commented, id));
        Ok(Response::ok(comment))
    }

    fn op_comment_list(&self, args: &Value) -> Result<Response> {
        #[derive(Deserialize)]
        struct Args {
            id: String,
        }
        self.refresh()?;
        let args: Args = serde_json::from_value(args.clone())?;
        let id = self.store.resolve_id_impl(&args.id)?;
        Ok(Response::ok(self.store.get_comments_impl(&id)?))
    }

    fn op_config_get(&self, args: &Value) -> Result<Response> {
        #[derive(Deserialize)]
        struct Args {
            key: String,
        }
        let args: Args = serde_json::from_value(args.clone())?;
        let value = self.store.get_config_impl(&args.key)?;
        Ok(Response::ok(serde_json::json!({ "value": value })))
    }

    fn op_config_set(&self, args: &Value) -> Result<Response> {
        #[derive(Deserialize)]
        struct Args {
            key: String,
            value: String,
        }
        let args: Args = serde_json::from_value(args.clone())?;
        self.store.set_config_impl(&args.key, &args.value)?;
        self.scheduler.mark_dirty(false);
        Ok(Response::ok(Value::Null))
    }
}

/// Wire-level partial update, converted into typed [`IssueUpdates`].
#[derive(Debug, Default, Deserialize)]
struct PatchArgs {
    title: Option<String>,
    description: Option<String>,
    design: Option<String>,
    acceptance_criteria: Option<String>,
    notes: Option<String>,
    status: Option<String>,
    priority: Option<i32>,
    #[serde(rename = "type")]
    issue_type: Option<String>,
    assignee: Option<String>,
}

impl PatchArgs {
    fn into_updates(self) -> IssueUpdates {
        IssueUpdates {
            title: self.title,
            description: self.description,
            design: self.design,
            acceptance_criteria: self.acceptance_criteria,
            notes: self.notes,
            status: self.status.map(|s| Status::from(s.as_str())),
            priority: self.priority,
            issue_type: self.issue_type.map(|t| IssueType::from(t.as_str())),
            assignee: self.assignee,
            ..Default::default()
        }
    }
}

fn parse_issue_filter(args: &Value) -> IssueFilter {
    let mut filter = IssueFilter::default();
    if let Some(status) = args.get("status").and_then(Value::as_str) {
        filter.status = Some(Status::from(status));
    }
    if let Some(priority) = args.get("priority").and_then(Value::as_i64) {
        filter.priority = Some(priority as i32);
    }
    if let Some(assignee) = args.get("assignee").and_then(Value::as_str) {
        filter.assignee = Some(assignee.to_owned());
    }
    if let Some(limit) = args.get("limit").and_then(Value::as_i64) {
        filter.limit = Some(limit as i32);
    }
    if let Some(labels) = args.get("labels").and_then(Value::as_array) {
        filter.labels = labels
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_owned)
            .collect();
    }
    filter
}
