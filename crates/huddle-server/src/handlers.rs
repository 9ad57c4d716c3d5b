//! RPC method handlers organized by domain.

use std::sync::Arc;

use huddle_core::events::{ChatEvent, HistoryMessage};
use huddle_core::ids::{AccountId, GroupId};
use huddle_store::active_sessions::ActiveSessionRepo;
use huddle_store::messages::{MessageRepo, HISTORY_PAGE_SIZE};
use huddle_store::Database;
use huddle_telemetry::{MetricsRecorder, TelemetryGuard};

use crate::client::{ClientId, ClientRegistry};
use crate::event_bridge;
use crate::groups::{GroupRegistry, MatchOutcome};
use crate::lifecycle::LifecycleManager;
use crate::rpc::{self, RpcResponse};
use crate::wire;

/// Shared state available to all RPC handlers.
pub struct HandlerState {
    pub db: Database,
    pub groups: Arc<GroupRegistry>,
    pub lifecycle: Arc<LifecycleManager>,
    pub clients: Arc<ClientRegistry>,
    pub telemetry: Option<Arc<TelemetryGuard>>,
}

impl HandlerState {
    pub fn new(
        db: Database,
        groups: Arc<GroupRegistry>,
        lifecycle: Arc<LifecycleManager>,
        clients: Arc<ClientRegistry>,
    ) -> Self {
        Self {
            db,
            groups,
            lifecycle,
            clients,
            telemetry: None,
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<TelemetryGuard>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub(crate) fn metrics(&self) -> Option<&MetricsRecorder> {
        self.telemetry.as_ref().and_then(|t| t.metrics())
    }
}

/// Dispatch an RPC method to the appropriate handler.
///
/// Normalizes camelCase params to snake_case before routing, so all
/// handlers receive consistent snake_case keys. `client_id` is the
/// originating connection; it is None for transport-less calls (the HTTP
/// health probe), which can only reach connection-free methods.
pub async fn dispatch(
    state: &Arc<HandlerState>,
    client_id: Option<&ClientId>,
    method: &str,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let params = wire::normalize_params(params);

    match method {
        // Chat
        "discoverAndJoin" => discover_and_join(state, client_id, &params, id).await,
        "joinById" => join_by_id(state, client_id, &params, id).await,
        "sendMessage" => send_message(state, client_id, &params, id).await,
        "checkGroupExists" => check_group_exists(state, &params, id),

        // System
        "system.ping" | "health" => health(state, id),
        "system.getInfo" => system_get_info(id),

        // Telemetry
        "telemetry.logs" => telemetry_logs(state, &params, id),
        "telemetry.metrics" => telemetry_metrics(state, &params, id),

        _ => RpcResponse::method_not_found(id, method),
    }
}

/// Serialize an event and push it straight to one connection.
async fn push_event(state: &Arc<HandlerState>, client_id: &ClientId, event: &ChatEvent) {
    if let Some(json) = event_bridge::serialize_event(event) {
        state.clients.send_to(client_id, json).await;
    }
}

// ── Chat handlers ──

async fn discover_and_join(
    state: &Arc<HandlerState>,
    client_id: Option<&ClientId>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let Some(client_id) = client_id else {
        return RpcResponse::invalid_params(id, "Method requires a WebSocket connection");
    };

    let interests = match rpc::require_str_array(params, "interests") {
        Ok(list) if !list.is_empty() => list,
        Ok(_) => return RpcResponse::invalid_params(id, "interests must not be empty"),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let account_id = rpc::optional_str(params, "account_id").map(AccountId::from_raw);

    match state.groups.match_or_create(client_id, &interests) {
        MatchOutcome::Full => {
            if let Some(m) = state.metrics() {
                m.counter_inc("match.admitted.total", &[("outcome", "full")], 1);
            }
            push_event(state, client_id, &ChatEvent::GroupFull).await;
            RpcResponse::success(id, serde_json::json!({}))
        }
        MatchOutcome::Admitted {
            group_id,
            display_name,
            shared_tags,
            expires_at,
        } => {
            state.clients.join_group(client_id, group_id.clone()).await;
            if let Some(ref account) = account_id {
                state.clients.set_account(client_id, account.clone()).await;
                state.groups.record_account(&group_id, account);
                persist_active_session(
                    state,
                    account,
                    &group_id,
                    &display_name,
                    &shared_tags,
                    expires_at,
                );
            }

            if let Some(m) = state.metrics() {
                m.counter_inc("match.admitted.total", &[("outcome", "admitted")], 1);
                m.gauge_set("groups.active", &[], state.groups.count() as f64);
            }
            tracing::info!(
                client_id = %client_id,
                group_id = %group_id,
                display_name = %display_name,
                "Matched into group"
            );

            push_event(
                state,
                client_id,
                &ChatEvent::Matched {
                    group_id,
                    display_name,
                    shared_tags,
                    expires_at,
                },
            )
            .await;
            RpcResponse::success(id, serde_json::json!({}))
        }
    }
}

async fn join_by_id(
    state: &Arc<HandlerState>,
    client_id: Option<&ClientId>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let Some(client_id) = client_id else {
        return RpcResponse::invalid_params(id, "Method requires a WebSocket connection");
    };

    let group_id = match rpc::require_str(params, "group_id") {
        Ok(s) => GroupId::from_raw(s),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let account_id = rpc::optional_str(params, "account_id").map(AccountId::from_raw);

    // Subscribe unconditionally. Unknown group ids are tolerated; the
    // connection just never sees events for them.
    state.clients.join_group(client_id, group_id.clone()).await;
    if let Some(ref account) = account_id {
        state.clients.set_account(client_id, account.clone()).await;
    }

    let expires_at = if state.groups.contains(&group_id) {
        if let Some(ref account) = account_id {
            state.groups.record_account(&group_id, account);
        }
        state.lifecycle.reset(&group_id)
    } else {
        None
    };

    tracing::info!(client_id = %client_id, group_id = %group_id, "Client joined group");

    // The history read completes (or fails into an empty page) before
    // anything is pushed, so joiners always see history before `joined`.
    let repo = MessageRepo::new(state.db.clone());
    let messages = match repo.list_for_group(&group_id, HISTORY_PAGE_SIZE) {
        Ok(rows) => rows
            .into_iter()
            .map(|row| HistoryMessage {
                group_id: row.group_id,
                sender: row.sender,
                text: row.text,
                timestamp: row.timestamp,
            })
            .collect(),
        Err(e) => {
            tracing::warn!(group_id = %group_id, error = %e, "Could not load chat history");
            Vec::new()
        }
    };

    push_event(
        state,
        client_id,
        &ChatEvent::ChatHistory {
            group_id: group_id.clone(),
            messages,
        },
    )
    .await;
    push_event(
        state,
        client_id,
        &ChatEvent::Joined {
            group_id,
            expires_at,
        },
    )
    .await;
    RpcResponse::success(id, serde_json::json!({}))
}

async fn send_message(
    state: &Arc<HandlerState>,
    client_id: Option<&ClientId>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let Some(client_id) = client_id else {
        return RpcResponse::invalid_params(id, "Method requires a WebSocket connection");
    };

    let group_id = match rpc::require_str(params, "group_id") {
        Ok(s) => GroupId::from_raw(s),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let sender = match rpc::require_str(params, "sender") {
        Ok(s) => s.to_string(),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let text = match rpc::require_str(params, "text") {
        Ok(t) => t.to_string(),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };

    let open = state
        .groups
        .get(&group_id)
        .map(|g| !g.locked)
        .unwrap_or(false);
    if !open {
        // Unknown or locked group: the sender alone learns the chat is gone.
        push_event(state, client_id, &ChatEvent::ChatExpired { group_id }).await;
        return RpcResponse::success(id, serde_json::json!({}));
    }

    // Persistence is fire-and-forget: relay never waits on the store and
    // never learns about its failures.
    let repo = MessageRepo::new(state.db.clone());
    let stored_group = group_id.clone();
    let stored_sender = sender.clone();
    let stored_text = text.clone();
    tokio::spawn(async move {
        if let Err(e) = repo.append(&stored_group, &stored_sender, &stored_text) {
            tracing::warn!(group_id = %stored_group, error = %e, "Could not save message");
        }
    });

    let event = ChatEvent::ReceiveMessage {
        group_id: group_id.clone(),
        sender,
        text,
    };
    if let Some(json) = event_bridge::serialize_event(&event) {
        state
            .clients
            .broadcast_to_group(&group_id, &json, Some(client_id));
    }
    if let Some(m) = state.metrics() {
        m.counter_inc("messages.relayed.total", &[], 1);
    }
    RpcResponse::success(id, serde_json::json!({}))
}

fn check_group_exists(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let group_id = match rpc::require_str(params, "group_id") {
        Ok(s) => GroupId::from_raw(s),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };

    let exists = state.groups.contains(&group_id);
    RpcResponse::success(id, serde_json::json!({"exists": exists}))
}

/// Connection teardown: strip the connection from every group's member
/// list. Groups left with zero members are deleted on the spot, with their
/// pending timers cancelled.
pub fn handle_disconnect(state: &Arc<HandlerState>, client_id: &ClientId) {
    let emptied = state.groups.remove_member(client_id);
    for group_id in &emptied {
        state.lifecycle.cancel(group_id);
        tracing::info!(group_id = %group_id, "Deleted empty group");
    }
    if !emptied.is_empty() {
        if let Some(m) = state.metrics() {
            m.gauge_set("groups.active", &[], state.groups.count() as f64);
        }
    }
}

fn persist_active_session(
    state: &Arc<HandlerState>,
    account: &AccountId,
    group_id: &GroupId,
    display_name: &str,
    shared_tags: &[String],
    expires_at: Option<i64>,
) {
    let repo = ActiveSessionRepo::new(state.db.clone());
    let account = account.clone();
    let group_id = group_id.clone();
    let display_name = display_name.to_string();
    let shared_tags = shared_tags.to_vec();
    tokio::spawn(async move {
        if let Err(e) = repo.set(&account, &group_id, &display_name, &shared_tags, expires_at) {
            tracing::warn!(account_id = %account, error = %e, "Could not save active session");
        }
    });
}

// ── System handlers ──

fn system_get_info(id: Option<serde_json::Value>) -> RpcResponse {
    RpcResponse::success(
        id,
        serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "name": "huddle",
        }),
    )
}

// ── Telemetry handlers ──

fn telemetry_logs(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let Some(ref telemetry) = state.telemetry else {
        return RpcResponse::success(
            id,
            serde_json::json!({
                "logs": [],
                "totalCount": 0,
                "enabled": false,
            }),
        );
    };

    let Some(log_sink) = telemetry.logs() else {
        return RpcResponse::success(
            id,
            serde_json::json!({
                "logs": [],
                "totalCount": 0,
                "enabled": false,
            }),
        );
    };

    let query = huddle_telemetry::LogQuery {
        level: rpc::optional_str(params, "level").map(|s| s.to_string()),
        target: rpc::optional_str(params, "target").map(|s| s.to_string()),
        group_id: rpc::optional_str(params, "group_id").map(|s| s.to_string()),
        since: rpc::optional_str(params, "since").map(|s| s.to_string()),
        limit: rpc::optional_i64(params, "limit").map(|v| v as u32),
    };

    match log_sink.query(&query) {
        Ok(records) => {
            let count = records.len();
            let logs: Vec<serde_json::Value> = records
                .into_iter()
                .map(|r| {
                    serde_json::json!({
                        "id": r.id,
                        "timestamp": r.timestamp,
                        "level": r.level,
                        "target": r.target,
                        "message": r.message,
                        "fields": r.fields,
                        "group_id": r.group_id,
                        "account_id": r.account_id,
                    })
                })
                .collect();
            RpcResponse::success(
                id,
                serde_json::json!({
                    "logs": logs,
                    "totalCount": count,
                    "enabled": true,
                }),
            )
        }
        Err(e) => RpcResponse::internal_error(id, format!("Failed to query logs: {e}")),
    }
}

fn telemetry_metrics(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let Some(ref telemetry) = state.telemetry else {
        return RpcResponse::success(
            id,
            serde_json::json!({
                "metrics": [],
                "totalCount": 0,
                "enabled": false,
            }),
        );
    };

    let Some(metrics) = telemetry.metrics() else {
        return RpcResponse::success(
            id,
            serde_json::json!({
                "metrics": [],
                "totalCount": 0,
                "enabled": false,
            }),
        );
    };

    let query = huddle_telemetry::MetricsQuery {
        name: rpc::optional_str(params, "name").map(|s| s.to_string()),
        since: rpc::optional_str(params, "since").map(|s| s.to_string()),
        labels: None,
        limit: rpc::optional_i64(params, "limit").map(|v| v as u32),
    };

    match metrics.query(&query) {
        Ok(snapshots) => {
            let count = snapshots.len();
            let items: Vec<serde_json::Value> = snapshots
                .into_iter()
                .map(|s| {
                    serde_json::json!({
                        "id": s.id,
                        "timestamp": s.timestamp,
                        "name": s.name,
                        "value": s.value,
                        "labels": s.labels,
                        "metric_type": format!("{:?}", s.metric_type),
                    })
                })
                .collect();
            RpcResponse::success(
                id,
                serde_json::json!({
                    "metrics": items,
                    "totalCount": count,
                    "enabled": true,
                }),
            )
        }
        Err(e) => RpcResponse::internal_error(id, format!("Failed to query metrics: {e}")),
    }
}

// ── Health handlers ──

fn health(state: &Arc<HandlerState>, id: Option<serde_json::Value>) -> RpcResponse {
    let db_ok = state
        .db
        .with_conn(|conn| {
            conn.execute_batch("SELECT 1")?;
            Ok(true)
        })
        .unwrap_or(false);

    RpcResponse::success(
        id,
        serde_json::json!({
            "status": if db_ok { "healthy" } else { "degraded" },
            "components": {
                "database": if db_ok { "ok" } else { "error" },
            },
        }),
    )
}
