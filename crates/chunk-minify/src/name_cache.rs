//! Merging and persisting the cross-chunk name cache.
//!
//! Every task hands back the renames it knows about. Those get folded into the
//! session's accumulated cache with the accumulated entries taking precedence,
//! so a name, once picked, stays picked for the rest of the build.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use camino::{Utf8Path, Utf8PathBuf};
use cell_minify_proto::NameCache;
use serde_yaml::{Mapping, Value};
use tracing::{debug, warn};

use crate::{Error, Result};

static STAGING_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Fold `incoming` into `accumulated`.
///
/// Per partition: start from the incoming entries, then lay the accumulated
/// entries on top. Merging the same fragment twice changes nothing.
pub fn merge_name_cache(accumulated: &NameCache, incoming: &NameCache) -> NameCache {
    NameCache {
        vars: merge_partition(&accumulated.vars, &incoming.vars),
        props: merge_partition(&accumulated.props, &incoming.props),
    }
}

fn merge_partition(
    accumulated: &HashMap<String, String>,
    incoming: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut merged = incoming.clone();
    merged.extend(
        accumulated
            .iter()
            .map(|(original, renamed)| (original.clone(), renamed.clone())),
    );
    merged
}

/// Build a name cache from loosely-typed data.
///
/// A missing or wrong-shaped `vars` or `props` is treated as empty, and
/// entries whose key or value is not a string are skipped. Both the flat
/// layout (`vars: { name: a }`) and the wrapped layout other minifiers write
/// (`vars: { props: { $name: a } }`) are accepted.
pub fn name_cache_from_value(value: &Value) -> NameCache {
    NameCache {
        vars: partition(value.get("vars")),
        props: partition(value.get("props")),
    }
}

fn partition(value: Option<&Value>) -> HashMap<String, String> {
    let Some(Value::Mapping(map)) = value else {
        return HashMap::new();
    };

    match map.get("props") {
        Some(Value::Mapping(inner)) if map.len() == 1 => entries(inner, true),
        _ => entries(map, false),
    }
}

fn entries(map: &Mapping, wrapped: bool) -> HashMap<String, String> {
    map.iter()
        .filter_map(|(key, value)| {
            let (Value::String(key), Value::String(value)) = (key, value) else {
                return None;
            };
            let key = if wrapped {
                key.strip_prefix('$').unwrap_or(key)
            } else {
                key
            };
            Some((key.to_string(), value.clone()))
        })
        .collect()
}

/// Load a name cache file. A missing file yields an empty cache, and so does a
/// file that is not valid YAML/JSON (with a warning).
pub fn load_name_cache(path: &Utf8Path) -> Result<NameCache> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("no name cache at {}, starting empty", path);
            return Ok(NameCache::default());
        }
        Err(e) => return Err(e.into()),
    };

    match serde_yaml::from_str::<Value>(&content) {
        Ok(value) => Ok(name_cache_from_value(&value)),
        Err(e) => {
            warn!("ignoring unreadable name cache {}: {}", path, e);
            Ok(NameCache::default())
        }
    }
}

/// Write a name cache file, creating parent directories as needed.
///
/// The file is written next to its destination and renamed into place, so
/// readers never see a partial cache.
pub async fn save_name_cache(path: &Utf8Path, cache: &NameCache) -> Result<()> {
    let yaml = facet_yaml::to_string(cache).map_err(|e| Error::NameCache(e.to_string()))?;

    if let Some(parent) = path.parent()
        && !parent.as_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    let staging = Utf8PathBuf::from(format!(
        "{}.{}-{}.tmp",
        path,
        std::process::id(),
        STAGING_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    tokio::fs::write(&staging, yaml).await?;
    if let Err(e) = tokio::fs::rename(&staging, path).await {
        let _ = tokio::fs::remove_file(&staging).await;
        return Err(e.into());
    }

    debug!(
        vars = cache.vars.len(),
        props = cache.props.len(),
        "saved name cache to {}",
        path
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(vars: &[(&str, &str)], props: &[(&str, &str)]) -> NameCache {
        let to_map = |entries: &[(&str, &str)]| {
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect()
        };
        NameCache {
            vars: to_map(vars),
            props: to_map(props),
        }
    }

    #[test]
    fn test_accumulated_entries_win() {
        let accumulated = cache(&[("a", "x")], &[]);
        let incoming = cache(&[("a", "y"), ("b", "z")], &[]);

        let merged = merge_name_cache(&accumulated, &incoming);
        assert_eq!(merged, cache(&[("a", "x"), ("b", "z")], &[]));
    }

    #[test]
    fn test_merge_is_idempotent() {
        let accumulated = cache(&[("a", "x")], &[("color", "c")]);
        let incoming = cache(&[("a", "y"), ("b", "z")], &[("size", "s")]);

        let once = merge_name_cache(&accumulated, &incoming);
        let twice = merge_name_cache(&once, &incoming);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_merge_never_changes_existing_entries() {
        let fragments = [
            cache(&[("a", "x"), ("b", "y")], &[("p", "q")]),
            cache(&[("a", "changed"), ("c", "z")], &[("p", "r"), ("s", "t")]),
            cache(&[("b", "changed"), ("d", "w")], &[]),
        ];

        let mut accumulated = NameCache::default();
        for fragment in &fragments {
            let next = merge_name_cache(&accumulated, fragment);
            for (original, renamed) in &accumulated.vars {
                assert_eq!(next.vars.get(original), Some(renamed));
            }
            for (original, renamed) in &accumulated.props {
                assert_eq!(next.props.get(original), Some(renamed));
            }
            accumulated = next;
        }

        assert_eq!(
            accumulated,
            cache(
                &[("a", "x"), ("b", "y"), ("c", "z"), ("d", "w")],
                &[("p", "q"), ("s", "t")]
            )
        );
    }

    #[test]
    fn test_empty_partitions() {
        let accumulated = cache(&[], &[("p", "q")]);
        let incoming = cache(&[("a", "x")], &[]);
        let merged = merge_name_cache(&accumulated, &incoming);
        assert_eq!(merged, cache(&[("a", "x")], &[("p", "q")]));
    }

    #[test]
    fn test_from_value_tolerates_bad_shapes() {
        let value: Value = serde_yaml::from_str(
            r#"
vars:
  - not
  - a
  - mapping
props:
  ok: k
  number: 3
"#,
        )
        .unwrap();
        assert_eq!(name_cache_from_value(&value), cache(&[], &[("ok", "k")]));

        let value: Value = serde_yaml::from_str("just a string").unwrap();
        assert_eq!(name_cache_from_value(&value), NameCache::default());
    }

    #[test]
    fn test_from_value_accepts_wrapped_layout() {
        let value: Value = serde_yaml::from_str(
            r#"{"vars": {"props": {"$counter": "a", "$render": "b"}}, "props": {"props": {}}}"#,
        )
        .unwrap();
        assert_eq!(
            name_cache_from_value(&value),
            cache(&[("counter", "a"), ("render", "b")], &[])
        );
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = camino::Utf8PathBuf::try_from(dir.path().join("names.yaml")).unwrap();
        assert_eq!(load_name_cache(&path).unwrap(), NameCache::default());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = camino::Utf8PathBuf::try_from(dir.path().join("cache/names.yaml")).unwrap();

        let saved = cache(&[("counter", "a")], &[("color", "c")]);
        save_name_cache(&path, &saved).await.unwrap();
        assert_eq!(load_name_cache(&path).unwrap(), saved);
    }

    #[tokio::test]
    async fn test_concurrent_saves_leave_one_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = camino::Utf8PathBuf::try_from(dir.path().join("names.yaml")).unwrap();

        let caches: Vec<NameCache> = (0..8)
            .map(|n| {
                let vars: Vec<(String, String)> = (0..50)
                    .map(|i| (format!("binding{i}"), format!("v{n}_{i}")))
                    .collect();
                NameCache {
                    vars: vars.into_iter().collect(),
                    props: Default::default(),
                }
            })
            .collect();

        let saves: Vec<_> = caches
            .iter()
            .map(|cache| {
                let path = path.clone();
                let cache = cache.clone();
                tokio::spawn(async move { save_name_cache(&path, &cache).await })
            })
            .collect();
        for save in saves {
            save.await.unwrap().unwrap();
        }

        let loaded = load_name_cache(&path).unwrap();
        assert!(caches.contains(&loaded));

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("names.yaml")]);
    }
}
