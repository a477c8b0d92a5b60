//! Source registry: loads source definitions from embedded and on-disk TOML.
//!
//! Each `.toml` file in `packages/source/sources/` is baked into the binary
//! at compile time via [`include_str!`]. Additional definitions can be loaded
//! from a directory at runtime; they override embedded ones with the same id.

use std::path::Path;

use crate::SourceDefError;
use crate::source_def::{SourceDefinition, parse_source_toml};

/// Environment variable holding a comma-separated list of source ids to run.
pub const SOURCES_ENV_VAR: &str = "HARVESTER_SOURCES";

/// TOML configs embedded at compile time.
const SOURCE_TOMLS: &[(&str, &str)] = &[
    // ── JSON APIs ────────────────────────────────────────────────────
    ("crates_io", include_str!("../sources/crates_io.toml")),
    ("hacker_news", include_str!("../sources/hacker_news.toml")),
    // ── HTML listings ────────────────────────────────────────────────
    (
        "quotes_to_scrape",
        include_str!("../sources/quotes_to_scrape.toml"),
    ),
];

/// Total number of configured sources (used in tests).
#[cfg(test)]
const EXPECTED_SOURCE_COUNT: usize = 3;

/// Returns all embedded source definitions.
///
/// # Panics
///
/// Panics if any TOML config is malformed (this is a compile-time guarantee
/// since the configs are embedded).
#[must_use]
pub fn all_sources() -> Vec<SourceDefinition> {
    SOURCE_TOMLS
        .iter()
        .map(|(name, toml)| {
            parse_source_toml(toml).unwrap_or_else(|e| panic!("Failed to parse {name}.toml: {e}"))
        })
        .collect()
}

/// Loads every `*.toml` file in `dir`, sorted by file name.
///
/// # Errors
///
/// Returns [`SourceDefError::Io`] if the directory cannot be read and
/// [`SourceDefError::File`] if a definition fails to parse.
pub fn load_dir(dir: &Path) -> Result<Vec<SourceDefinition>, SourceDefError> {
    let mut paths = std::fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()?;
    paths.retain(|p| p.extension().is_some_and(|ext| ext == "toml"));
    paths.sort();

    paths
        .iter()
        .map(|path| {
            let contents = std::fs::read_to_string(path)?;
            parse_source_toml(&contents).map_err(|e| SourceDefError::File {
                path: path.display().to_string(),
                source: Box::new(e),
            })
        })
        .inspect(|def| {
            if let Ok(def) = def {
                log::debug!("Loaded source definition {}", def.id);
            }
        })
        .collect()
}

/// Merges `overrides` into `base`.
///
/// A definition whose id already exists replaces it in place; new ids are
/// appended in order.
#[must_use]
pub fn merge(
    mut base: Vec<SourceDefinition>,
    overrides: Vec<SourceDefinition>,
) -> Vec<SourceDefinition> {
    for def in overrides {
        if let Some(existing) = base.iter_mut().find(|d| d.id == def.id) {
            log::info!("Overriding source definition {}", def.id);
            *existing = def;
        } else {
            base.push(def);
        }
    }
    base
}

/// Parses a comma-separated source id list, ignoring blanks.
#[must_use]
pub fn parse_filter(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Reads the source filter from [`SOURCES_ENV_VAR`], if set and non-empty.
#[must_use]
pub fn filter_from_env() -> Option<Vec<String>> {
    std::env::var(SOURCES_ENV_VAR)
        .ok()
        .map(|v| parse_filter(&v))
        .filter(|ids| !ids.is_empty())
}

/// Returns the definitions selected by `filter`, preserving definition
/// order. `None` selects everything. Unknown ids are logged and ignored.
#[must_use]
pub fn enabled_sources(
    definitions: Vec<SourceDefinition>,
    filter: Option<&[String]>,
) -> Vec<SourceDefinition> {
    let Some(filter) = filter else {
        return definitions;
    };

    for id in filter {
        if !definitions.iter().any(|d| &d.id == id) {
            log::warn!("Unknown source '{id}' in filter, ignoring");
        }
    }

    definitions
        .into_iter()
        .filter(|d| filter.iter().any(|id| id == &d.id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(id: &str, url: &str) -> String {
        format!(
            r#"
            id = "{id}"
            name = "{id}"
            [fetcher]
            type = "json_paginated"
            url = "{url}"
            "#
        )
    }

    #[test]
    fn loads_all_sources() {
        let sources = all_sources();
        assert_eq!(sources.len(), EXPECTED_SOURCE_COUNT);
    }

    #[test]
    fn source_ids_are_unique() {
        let sources = all_sources();
        let mut ids: Vec<&str> = sources.iter().map(|s| s.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), EXPECTED_SOURCE_COUNT);
    }

    #[test]
    fn all_sources_have_valid_configs() {
        for source in &all_sources() {
            assert!(!source.name.is_empty(), "{}: name is empty", source.id);
            source
                .config()
                .validate()
                .unwrap_or_else(|e| panic!("{}: {e}", source.id));
        }
    }

    #[test]
    fn loads_toml_files_from_dir_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.toml"), definition("b", "https://b.com")).unwrap();
        std::fs::write(dir.path().join("a.toml"), definition("a", "https://a.com")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let defs = load_dir(dir.path()).unwrap();
        let ids: Vec<&str> = defs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn malformed_file_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.toml"), "id = ").unwrap();

        let err = load_dir(dir.path()).unwrap_err();
        let SourceDefError::File { path, .. } = err else {
            panic!("expected file error, got {err:?}");
        };
        assert!(path.ends_with("bad.toml"));
    }

    #[test]
    fn missing_dir_is_io_error() {
        let err = load_dir(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, SourceDefError::Io(_)));
    }

    #[test]
    fn merge_overrides_by_id_and_appends_new() {
        let base = vec![
            parse_source_toml(&definition("a", "https://a.com")).unwrap(),
            parse_source_toml(&definition("b", "https://b.com")).unwrap(),
        ];
        let overrides = vec![
            parse_source_toml(&definition("b", "https://b2.com")).unwrap(),
            parse_source_toml(&definition("c", "https://c.com")).unwrap(),
        ];

        let merged = merge(base, overrides);
        let urls: Vec<(&str, &str)> = merged.iter().map(|d| (d.id(), d.base_url())).collect();
        assert_eq!(
            urls,
            vec![
                ("a", "https://a.com"),
                ("b", "https://b2.com"),
                ("c", "https://c.com"),
            ]
        );
    }

    #[test]
    fn filter_selects_in_definition_order() {
        let filter = parse_filter(" quotes_to_scrape, ,crates_io,nope ");
        assert_eq!(filter, vec!["quotes_to_scrape", "crates_io", "nope"]);

        let enabled = enabled_sources(all_sources(), Some(filter.as_slice()));
        let ids: Vec<&str> = enabled.iter().map(SourceDefinition::id).collect();
        assert_eq!(ids, vec!["crates_io", "quotes_to_scrape"]);
    }

    #[test]
    fn no_filter_selects_everything() {
        assert_eq!(
            enabled_sources(all_sources(), None).len(),
            EXPECTED_SOURCE_COUNT
        );
    }
}
