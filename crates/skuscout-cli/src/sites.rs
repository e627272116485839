//! `sites` command.

use skuscout_core::EngineConfig;

/// Prints one line per registered site: id, adapter kind, base URL.
pub(crate) fn list_sites(config: &EngineConfig) -> anyhow::Result<()> {
    let sites = skuscout_core::load_sites(&config.sites_path)?;
    for site in &sites.sites {
        let credentials = match &site.credentials_env {
            Some(var) if site.credentials().is_some() => format!(" (credentials: {var})"),
            Some(var) => format!(" (credentials: {var} unset)"),
            None => String::new(),
        };
        println!(
            "{:<20} {:<8} {}{credentials}",
            site.id, site.adapter, site.base_url
        );
    }
    Ok(())
}
