use super::{json_pretty, EXIT_SUCCESS};
use kiln_schema::parse_config_file;
use std::path::Path;

/// Print the configuration as the orchestrator would see it.
pub fn check(path: &Path, json: bool) -> Result<u8, String> {
    let config = parse_config_file(path)
        .and_then(kiln_schema::BuildConfig::with_defaults)
        .map_err(|e| format!("configuration error: {e}"))?;

    if json {
        println!("{}", json_pretty(&config)?);
    } else {
        let rendered = config
            .to_toml_string()
            .map_err(|e| format!("configuration error: {e}"))?;
        print!("{rendered}");
    }
    Ok(EXIT_SUCCESS)
}
