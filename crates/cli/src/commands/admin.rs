//! Administrative commands (status, config)

use std::path::Path;

use anyhow::{Context, Result, bail};
use docsync::{config::Config, server::SERVICES, store::fetch_status};

use super::base_url;

/// Probe every service's status endpoint
pub async fn cmd_status(config: Option<&Path>, url: Option<&str>) -> Result<()> {
  let base = base_url(config, url)?;
  let client = reqwest::Client::new();

  println!("docsync status ({})", base);
  println!("=======================\n");

  let mut down = 0;
  for service in SERVICES {
    match fetch_status(&client, &base, service).await {
      Ok(body) => println!("{:<12}{}", service, body),
      Err(e) => {
        down += 1;
        println!("{:<12}DOWN ({})", service, e);
      }
    }
  }

  if down > 0 {
    bail!("{} of {} services unavailable", down, SERVICES.len());
  }
  Ok(())
}

/// Write the config template
pub fn cmd_config_init(config: Option<&Path>, force: bool) -> Result<()> {
  let path = config.map(Path::to_path_buf).unwrap_or_else(Config::user_config_path);
  if path.exists() && !force {
    bail!("{} already exists (use --force to overwrite)", path.display());
  }

  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
  }
  std::fs::write(&path, Config::generate_template()).with_context(|| format!("Failed to write {}", path.display()))?;

  println!("Created {}", path.display());
  Ok(())
}

/// Show the effective configuration
pub fn cmd_config_show(config: Option<&Path>) -> Result<()> {
  let source = match config {
    Some(path) => path.display().to_string(),
    None => {
      let user = Config::user_config_path();
      if user.exists() {
        user.display().to_string()
      } else {
        "(defaults)".to_string()
      }
    }
  };
  let effective = Config::load(config).context("Failed to load config")?;

  println!("# Source: {}\n", source);
  print!("{}", toml::to_string_pretty(&effective).context("Failed to render config")?);
  Ok(())
}
