use surfkit_core::{Config, Paths};
use surfkit_tools::browser::find_browser_binary;

/// Run environment diagnostics.
pub async fn run() -> anyhow::Result<()> {
    let paths = Paths::new();

    println!();
    println!("surfkit doctor — environment diagnostics");
    println!("========================================");
    println!();

    // Config
    let config_path = paths.config_file();
    if config_path.exists() {
        println!("  [ok] config file: {}", config_path.display());
    } else {
        println!("  [--] no config file, using defaults ({})", config_path.display());
    }
    let config = Config::load_or_default(&paths)?;

    // Browser binary
    let binary = config.browser.binary.clone().or_else(find_browser_binary);
    match binary {
        Some(path) => println!("  [ok] browser binary: {}", path),
        None => println!("  [!!] no Chrome/Chromium binary found — install one or set browser.binary"),
    }

    // Session storage
    let sessions = paths.sessions_dir();
    match std::fs::create_dir_all(&sessions) {
        Ok(_) => {
            let probe = sessions.join(".doctor_probe");
            match std::fs::write(&probe, "probe") {
                Ok(_) => {
                    let _ = std::fs::remove_file(&probe);
                    println!("  [ok] session storage writable: {}", sessions.display());
                }
                Err(e) => println!("  [!!] session storage not writable: {}", e),
            }
        }
        Err(e) => println!("  [!!] cannot create session storage dir: {}", e),
    }

    println!();
    println!(
        "  gateway: {}:{}  auth: {}",
        config.gateway.host,
        config.gateway.port,
        if config.gateway.api_token.is_some() { "bearer token" } else { "disabled" }
    );
    println!("  session ttl: {}s", config.storage.session_ttl_secs);
    println!();
    Ok(())
}
