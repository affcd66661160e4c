//! `spindle config` — print or check a reactor configuration.

use anyhow::Context;
use spindle_reactor::ReactorConfig;
use std::path::PathBuf;

pub fn execute(check: Option<PathBuf>) -> anyhow::Result<()> {
    match check {
        Some(path) => {
            let config = ReactorConfig::load(&path)
                .and_then(ReactorConfig::validate)
                .with_context(|| format!("invalid config {}", path.display()))?;
            println!(
                "{}: ok (tick {:?}, max delay {:?})",
                path.display(),
                config.level1.tick,
                config.max_delay()
            );
        }
        None => print!("{}", ReactorConfig::default().to_toml_string()?),
    }
    Ok(())
}
