//! Reference-table loading: YAML row files named by primary-header
//! bindings.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use wavecal::refdata::{RefTables, NOT_APPLICABLE};

/// The primary-header keywords that bind reference tables.
pub const TABLE_KEYWORDS: [&str; 7] = [
    "WCPTAB", "LAMPTAB", "APDESTAB", "DISPTAB", "INANGTAB", "SPTRCTAB", "SDCTAB",
];

/// Resolves the bound reference tables into typed row vectors.  A
/// missing binding or one set to "N/A" leaves that table absent;
/// whether that is acceptable is decided downstream per table.
/// Relative paths are taken relative to `base` (the directory of the
/// input exposure).
pub fn load_tables(
    bindings: &HashMap<String, String>,
    base: Option<&Path>,
) -> Result<RefTables> {
    let mut tables = RefTables::default();

    for keyword in TABLE_KEYWORDS {
        let Some(name) = bindings.get(keyword) else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() || name.eq_ignore_ascii_case(NOT_APPLICABLE) {
            continue;
        }

        let path = resolve(name, base);
        match keyword {
            "WCPTAB" => tables.wcp = Some(read_rows(&path, keyword)?),
            "LAMPTAB" => tables.lamp = Some(read_rows(&path, keyword)?),
            "APDESTAB" => tables.apdes = Some(read_rows(&path, keyword)?),
            "DISPTAB" => tables.disp = Some(read_rows(&path, keyword)?),
            "INANGTAB" => tables.inang = Some(read_rows(&path, keyword)?),
            "SPTRCTAB" => tables.sptrc = Some(read_rows(&path, keyword)?),
            "SDCTAB" => tables.sdc = Some(read_rows(&path, keyword)?),
            _ => unreachable!(),
        }
        tables.names.push((keyword.to_owned(), name.to_owned()));
    }

    Ok(tables)
}

fn resolve(name: &str, base: Option<&Path>) -> PathBuf {
    let path = Path::new(name);
    if path.is_absolute() || base.is_none() {
        path.to_path_buf()
    } else {
        base.unwrap().join(path)
    }
}

fn read_rows<T: DeserializeOwned>(path: &Path, keyword: &str) -> Result<Vec<T>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("{keyword} `{}' not found", path.display()))?;
    serde_yaml::from_str(&text)
        .with_context(|| format!("{keyword} `{}' is not a valid table", path.display()))
}
