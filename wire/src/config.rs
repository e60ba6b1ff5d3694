//! Seed directory loading.
//!
//! `config.csv` holds one `<host>,<port>` record per line, no header,
//! read once at startup by both node kinds. File order is the canonical
//! seed ordering used for tie-breaks, so it is preserved here.

use {
    crate::{
        error::{Result, WireError},
        identity::NodeId,
    },
    log::warn,
    std::{fs, path::Path},
};

/// Load the seed list from `path`.
///
/// Whitespace around fields is trimmed; rows with fewer than two fields
/// or an unparseable port are skipped with a warning. A missing or empty
/// file is a fatal startup error.
pub fn load_seeds(path: &Path) -> Result<Vec<NodeId>> {
    let raw = fs::read_to_string(path)
        .map_err(|e| WireError::Config(format!("cannot read {}: {e}", path.display())))?;

    let mut seeds = Vec::new();
    for (lineno, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split(',').map(str::trim);
        let (host, port) = match (fields.next(), fields.next()) {
            (Some(host), Some(port)) if !host.is_empty() => (host, port),
            _ => {
                warn!("{}:{}: skipping short row", path.display(), lineno + 1);
                continue;
            }
        };
        match port.parse::<u16>() {
            Ok(port) => seeds.push(NodeId::new(host, port)),
            Err(_) => {
                warn!(
                    "{}:{}: skipping row with bad port {port:?}",
                    path.display(),
                    lineno + 1
                );
            }
        }
    }

    if seeds.is_empty() {
        return Err(WireError::Config(format!(
            "{} contains no usable seed records",
            path.display()
        )));
    }
    Ok(seeds)
}
