use std::path::Path;

use vigil_core::ProfileSet;

pub fn list(config: &Path) -> anyhow::Result<()> {
    let profiles = ProfileSet::from_file(config)?;
    for name in profiles.names() {
        // Validate each profile so broken ones are reported up front.
        match profiles.profile(name) {
            Ok(cfg) => println!(
                "{name}\ttimeout={:?}\tendpoint={}\trate_limit={}\tbreaker={}",
                cfg.timeout,
                cfg.default_endpoint,
                cfg.rate_limit,
                if cfg.circuit_breaker.enabled { "on" } else { "off" }
            ),
            Err(e) => println!("{name}\tinvalid: {e}"),
        }
    }
    Ok(())
}
