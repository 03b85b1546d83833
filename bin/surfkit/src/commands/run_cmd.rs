use std::path::PathBuf;

use base64::Engine;
use serde_json::Value;
use surfkit_core::{Config, Paths};
use surfkit_tools::{Tool, ToolContext};

/// Run a single browser action, bypassing the gateway.
pub async fn run(action: &str, args_json: &str, output: Option<PathBuf>) -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;

    let mut params: Value = serde_json::from_str(args_json)
        .map_err(|e| anyhow::anyhow!("Failed to parse JSON args: {}\nInput: {}", e, args_json))?;
    let Some(map) = params.as_object_mut() else {
        anyhow::bail!("--args must be a JSON object");
    };
    map.insert("action".into(), Value::String(action.to_string()));

    let (dispatcher, _store) = super::build_dispatcher(&config, &paths);
    let registry = super::build_registry(dispatcher);

    let tool = registry
        .get("browser")
        .ok_or_else(|| anyhow::anyhow!("browser tool not registered"))?;

    if let Err(e) = tool.validate(&params) {
        anyhow::bail!("Argument validation failed: {}", e);
    }

    let ctx = ToolContext {
        config,
        paths,
    };
    let result = tool.execute(ctx, params).await?;

    // Screenshot payloads can optionally be decoded to a file.
    if let Some(path) = output {
        if let Some(data) = result.get("screenshot").and_then(|v| v.as_str()) {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(data)
                .map_err(|e| anyhow::anyhow!("base64 decode: {}", e))?;
            std::fs::write(&path, &bytes)?;
            println!("saved {} bytes to {}", bytes.len(), path.display());
        }
    }

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
