//! Config commands

use std::path::Path;

use anyhow::{Context, Result, bail};
use docflow_core::Config;

/// Print the effective config and where it came from.
pub fn cmd_config_show(config: &Config, explicit: Option<&Path>) -> Result<()> {
  let cwd = std::env::current_dir().context("Failed to resolve current directory")?;
  let project_path = Config::project_config_path(&cwd);
  let user_path = Config::user_config_path();

  let source = match (explicit, user_path) {
    (Some(path), _) => format!("{:?}", path),
    (None, _) if project_path.exists() => format!("{:?} (project)", project_path),
    (None, Some(user)) if user.exists() => format!("{:?} (user)", user),
    _ => "(defaults)".to_string(),
  };

  println!("# Config source: {}", source);
  println!("# Environment overrides: BLOB_AMOUNT_PARALLEL, SEARCH_INDEX_NAME, BLOB_CONTAINER_NAME");
  println!();
  let rendered = toml::to_string_pretty(config).context("Failed to render config")?;
  print!("{}", rendered);

  Ok(())
}

/// Write the commented default config for the current project.
pub fn cmd_config_init(force: bool) -> Result<()> {
  let cwd = std::env::current_dir().context("Failed to resolve current directory")?;
  let config_path = Config::project_config_path(&cwd);

  if config_path.exists() && !force {
    bail!("Config file already exists: {:?} (use --force to overwrite)", config_path);
  }

  if let Some(parent) = config_path.parent() {
    std::fs::create_dir_all(parent).with_context(|| format!("Failed to create {:?}", parent))?;
  }
  std::fs::write(&config_path, Config::generate_template())
    .with_context(|| format!("Failed to write {:?}", config_path))?;

  println!("Created project config: {:?}", config_path);
  println!("Edit the file to customize settings.");

  Ok(())
}
