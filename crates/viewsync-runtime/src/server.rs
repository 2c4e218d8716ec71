//! UDS JSON-RPC inspection server.
//! Connection-per-request, newline-delimited JSON.

use std::path::Path;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use viewsync_core::Scope;

use crate::engine::Engine;

const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;

/// A JSON-RPC error object.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: INVALID_PARAMS,
            message: message.into(),
        }
    }
}

/// Run the inspection server until the listener fails.
pub async fn run_server(socket_path: &str, engine: Engine) -> anyhow::Result<()> {
    let socket_dir = Path::new(socket_path)
        .parent()
        .ok_or_else(|| anyhow::anyhow!("invalid socket path"))?;

    std::fs::create_dir_all(socket_dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_dir, std::fs::Permissions::from_mode(0o700))?;
    }

    // Check for stale socket
    if Path::new(socket_path).exists() {
        if UnixStream::connect(socket_path).await.is_err() {
            std::fs::remove_file(socket_path)?;
            tracing::info!("removed stale socket at {socket_path}");
        } else {
            anyhow::bail!("another viewsync server is already running at {socket_path}");
        }
    }

    let listener = UnixListener::bind(socket_path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
    }

    tracing::info!("inspection server listening on {socket_path}");
    serve(listener, engine).await
}

/// Accept loop on a pre-bound listener.
pub async fn serve(listener: UnixListener, engine: Engine) -> anyhow::Result<()> {
    loop {
        let (stream, _) = listener.accept().await?;
        let engine = engine.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, &engine).await {
                tracing::debug!("connection error: {e}");
            }
        });
    }
}

async fn handle_connection(stream: UnixStream, engine: &Engine) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let request: Value = serde_json::from_str(line.trim())?;
    let method = request["method"].as_str().unwrap_or("");
    let id = request["id"].clone();

    let response = match dispatch(engine, method, &request["params"]) {
        Ok(result) => json!({
            "jsonrpc": "2.0",
            "result": result,
            "id": id,
        }),
        Err(err) => json!({
            "jsonrpc": "2.0",
            "error": {"code": err.code, "message": err.message},
            "id": id,
        }),
    };
    let mut resp = serde_json::to_string(&response)?;
    resp.push('\n');
    writer.write_all(resp.as_bytes()).await?;

    Ok(())
}

fn scope_param(params: &Value) -> Result<Scope, RpcError> {
    params["scope"]
        .as_str()
        .map(Scope::from)
        .ok_or_else(|| RpcError::invalid_params("missing string param: scope"))
}

fn key_param(params: &Value) -> Result<&str, RpcError> {
    params["key"]
        .as_str()
        .ok_or_else(|| RpcError::invalid_params("missing string param: key"))
}

/// Execute one method against the engine.
pub fn dispatch(engine: &Engine, method: &str, params: &Value) -> Result<Value, RpcError> {
    let lifecycle = engine.lifecycle();
    let coordinator = engine.coordinator();
    let result = match method {
        "list_contexts" => json!({
            "contexts": lifecycle.summaries(),
            "pending_cleanups": lifecycle.pending_cleanups(),
        }),
        "list_clients" => json!(lifecycle.clients()),
        "cache_stats" => json!(coordinator.cache_stats()),
        "render_stats" => json!(coordinator.render_summary()),
        "list_scopes" => {
            let scopes: Vec<Value> = engine
                .scopes()
                .active_scopes()
                .into_iter()
                .map(|scope| {
                    json!({
                        "members": engine.scopes().member_count(&scope),
                        "scope": scope,
                    })
                })
                .collect();
            json!(scopes)
        }
        "invalidate_scope" => {
            let scope = scope_param(params)?;
            json!({"invalidated": coordinator.invalidate(&scope)})
        }
        "clear_cache" => {
            coordinator.clear();
            json!({"cleared": true})
        }
        "get_global" => {
            let key = key_param(params)?;
            lifecycle.get_global_state(key).unwrap_or(Value::Null)
        }
        "set_global" => {
            let key = key_param(params)?;
            let previous = lifecycle.set_global_state(key, params["value"].clone());
            json!({"previous": previous})
        }
        _ => {
            return Err(RpcError {
                code: METHOD_NOT_FOUND,
                message: "method not found".to_owned(),
            });
        }
    };
    Ok(result)
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use viewsync_core::{ClientRecord, Context, RenderKind};

    use super::*;
    use crate::config::EngineConfig;

    fn engine() -> Engine {
        Engine::new(&EngineConfig::default())
    }

    #[test]
    fn unknown_method_is_rejected() {
        let err = dispatch(&engine(), "drop_tables", &Value::Null).unwrap_err();
        assert_eq!(err.code, METHOD_NOT_FOUND);
    }

    #[test]
    fn list_contexts_reports_registered() {
        let engine = engine();
        engine.lifecycle().register_context(Context::new("c1", "/home", "s1"));
        let result = dispatch(&engine, "list_contexts", &Value::Null).unwrap();
        assert_eq!(result["contexts"][0]["id"], "c1");
        assert_eq!(result["contexts"][0]["route"], "/home");
        assert_eq!(result["pending_cleanups"], json!([]));
    }

    #[test]
    fn list_clients_reports_records() {
        let engine = engine();
        engine.connect(ClientRecord::new("c1", "ab12"));
        let result = dispatch(&engine, "list_clients", &Value::Null).unwrap();
        assert_eq!(result[0]["identicon"], "ab12");
    }

    #[test]
    fn list_scopes_counts_members() {
        let engine = engine();
        engine.lifecycle().register_context(Context::new("a", "/home", "s1"));
        engine.lifecycle().register_context(Context::new("b", "/home", "s2"));
        let result = dispatch(&engine, "list_scopes", &Value::Null).unwrap();
        let home = result
            .as_array()
            .unwrap()
            .iter()
            .find(|s| s["scope"] == "ROUTE:/home")
            .unwrap();
        assert_eq!(home["members"], 2);
    }

    #[tokio::test]
    async fn invalidate_scope_via_rpc() {
        let engine = engine();
        let ctx = Context::new("c1", "/home", "s1");
        let home = Scope::route("/home");
        engine
            .coordinator()
            .render_view(
                || async { Ok::<_, Infallible>("<p/>".to_owned()) },
                RenderKind::Update,
                &home,
                &ctx,
            )
            .await
            .unwrap();

        let stats = dispatch(&engine, "cache_stats", &Value::Null).unwrap();
        assert_eq!(stats["entries"], 1);

        let result = dispatch(&engine, "invalidate_scope", &json!({"scope": "ROUTE:/home"})).unwrap();
        assert_eq!(result["invalidated"], true);
        assert_eq!(engine.coordinator().cache_stats().entries, 0);

        let render = dispatch(&engine, "render_stats", &Value::Null).unwrap();
        assert_eq!(render["render_count"], 1);
    }

    #[test]
    fn invalidate_requires_scope() {
        let err = dispatch(&engine(), "invalidate_scope", &json!({})).unwrap_err();
        assert_eq!(err.code, INVALID_PARAMS);
    }

    #[test]
    fn global_state_round_trip() {
        let engine = engine();
        let set = dispatch(&engine, "set_global", &json!({"key": "motd", "value": "hi"})).unwrap();
        assert_eq!(set["previous"], Value::Null);
        let got = dispatch(&engine, "get_global", &json!({"key": "motd"})).unwrap();
        assert_eq!(got, "hi");
    }

    #[tokio::test]
    async fn serves_request_over_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("viewsync.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let engine = engine();
        engine.lifecycle().set_global_state("motd", json!("hello"));
        let server = tokio::spawn(serve(listener, engine));

        let stream = UnixStream::connect(&path).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        writer
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":7,\"method\":\"get_global\",\"params\":{\"key\":\"motd\"}}\n")
            .await
            .unwrap();
        let mut line = String::new();
        BufReader::new(reader).read_line(&mut line).await.unwrap();
        let response: Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(response["id"], 7);
        assert_eq!(response["result"], "hello");

        server.abort();
    }
}
