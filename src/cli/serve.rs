//! Serve command implementation

use anyhow::{Context, Result};
use std::path::Path;

use cdw::app::{App, AppOptions};

/// Run the composed app until Ctrl-C, then shut down cleanly
pub async fn serve_command(state_dir: Option<&Path>, shell: Option<String>) -> Result<()> {
    let mut options = AppOptions::new(tokio::runtime::Handle::current());
    if let Some(dir) = state_dir {
        options = options.with_state_dir(dir);
    }
    options.shell = shell;

    let app = App::new(options);
    app.start()?;

    match app.server().credentials() {
        Some(creds) => {
            println!("Automation API listening on {}", creds.base_url());
            println!(
                "Credentials: {}",
                app.server().paths().credentials_file.display()
            );
        }
        None => {
            println!(
                "Automation API is {} (enable with `cdw api enable --root <DIR>`)",
                app.server().status()
            );
        }
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    println!("Shutting down...");
    // Joins the accept loop, keep it off the async workers
    tokio::task::spawn_blocking(move || app.shutdown())
        .await
        .context("Shutdown task failed")?;
    Ok(())
}
