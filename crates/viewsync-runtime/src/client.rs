//! UDS JSON-RPC client for CLI subcommands.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

pub(crate) async fn rpc_call(
    socket_path: &str,
    method: &str,
    params: serde_json::Value,
) -> anyhow::Result<serde_json::Value> {
    let stream = UnixStream::connect(socket_path)
        .await
        .map_err(|e| anyhow::anyhow!("cannot connect to viewsync at {socket_path}: {e}"))?;

    let (reader, mut writer) = stream.into_split();

    let request = serde_json::json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
        "id": 1,
    });
    let mut req = serde_json::to_string(&request)?;
    req.push('\n');
    writer.write_all(req.as_bytes()).await?;
    writer.shutdown().await?;

    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let response: serde_json::Value = serde_json::from_str(line.trim())?;

    if let Some(error) = response.get("error") {
        anyhow::bail!("RPC error: {error}");
    }

    Ok(response["result"].clone())
}

/// `viewsync stats`: render summary followed by cache occupancy.
pub async fn cmd_stats(socket_path: &str) -> anyhow::Result<()> {
    let render = rpc_call(socket_path, "render_stats", serde_json::Value::Null).await?;
    let cache = rpc_call(socket_path, "cache_stats", serde_json::Value::Null).await?;
    print!("{}", format_stats(&render, &cache));
    Ok(())
}

/// Print the result of a parameterless method as pretty JSON.
pub async fn cmd_print(socket_path: &str, method: &str) -> anyhow::Result<()> {
    let result = rpc_call(socket_path, method, serde_json::Value::Null).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

pub async fn cmd_invalidate(socket_path: &str, scope: &str) -> anyhow::Result<()> {
    let result = rpc_call(
        socket_path,
        "invalidate_scope",
        serde_json::json!({"scope": scope}),
    )
    .await?;
    if result["invalidated"].as_bool() == Some(true) {
        println!("invalidated {scope}");
    } else {
        println!("nothing cached for {scope}");
    }
    Ok(())
}

/// Pure formatting logic for stats output, separated for testability.
pub(crate) fn format_stats(render: &serde_json::Value, cache: &serde_json::Value) -> String {
    let ms = |key: &str| render[key].as_f64().unwrap_or(0.0) * 1000.0;
    let mut out = format!(
        "renders: {}  avg {:.2}ms  min {:.2}ms  max {:.2}ms  total {:.2}ms\n",
        render["render_count"].as_u64().unwrap_or(0),
        ms("avg_time"),
        ms("min_time"),
        ms("max_time"),
        ms("total_time"),
    );
    out.push_str(&format!(
        "cache: {} entries ({} update, {} initial)\n",
        cache["entries"].as_u64().unwrap_or(0),
        cache["update_entries"].as_u64().unwrap_or(0),
        cache["initial_entries"].as_u64().unwrap_or(0),
    ));
    if let Some(scopes) = cache["scopes"].as_array() {
        for scope in scopes.iter().filter_map(|s| s.as_str()) {
            out.push_str(&format!("  {scope}\n"));
        }
    }
    if let Some(rendering) = cache["rendering"].as_array() {
        for scope in rendering.iter().filter_map(|s| s.as_str()) {
            out.push_str(&format!("  {scope} (rendering)\n"));
        }
    }
    out
}
