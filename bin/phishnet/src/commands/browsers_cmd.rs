use phishnet_core::{Config, Paths};
use phishnet_sandbox::{find_browser_binary, list_available_browsers};

pub fn run() -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;

    if let Some(path) = config.sandbox.browser_path.as_deref() {
        println!("Configured: {}", path);
    }

    let found = list_available_browsers();
    if found.is_empty() {
        println!("No Chrome/Chromium/Edge binary found. Set sandbox.browserPath in {}", paths.config_file().display());
        return Ok(());
    }
    for browser in &found {
        println!("  {}", browser);
    }
    if config.sandbox.browser_path.is_none() {
        if let Some(default) = find_browser_binary() {
            println!("Default: {}", default);
        }
    }
    Ok(())
}
