//! Keeping top-level renames consistent across chunks.

use std::collections::{HashMap, HashSet};

use cell_minify_proto::NameCache;
use oxc::semantic::{Scoping, SymbolId};
use tracing::debug;

const FIRST_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ$_";
const REST_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ$_0123456789";

const RESERVED: &[&str] = &[
    "arguments", "await", "break", "case", "catch", "class", "const", "continue", "debugger",
    "default", "delete", "do", "else", "enum", "eval", "export", "extends", "false", "finally",
    "for", "function", "if", "implements", "import", "in", "instanceof", "interface", "let",
    "new", "null", "package", "private", "protected", "public", "return", "static", "super",
    "switch", "this", "throw", "true", "try", "typeof", "undefined", "var", "void", "while",
    "with", "yield", "NaN", "Infinity",
];

/// Apply cached renames to the chunk's top-level symbols, then record the
/// renames the mangler picked for everything the cache did not know yet.
///
/// Existing cache entries are never changed. When the mangler handed a cached
/// name to some other symbol, that symbol is moved to an unused name first.
/// A cached name is only given up when it refers to a global, or when its
/// holder kept its own source name (exports, `keep_names`).
pub(crate) fn sync_name_cache(scoping: &mut Scoping, cache: &NameCache) -> NameCache {
    let mut cache = cache.clone();

    let root = scoping.root_scope_id();
    let top_level: Vec<(String, SymbolId)> = scoping
        .get_bindings(root)
        .into_iter()
        .map(|(name, &symbol_id)| (name.to_string(), symbol_id))
        .collect();

    let wanted_by: HashMap<SymbolId, String> = top_level
        .iter()
        .filter_map(|(original, symbol_id)| {
            cache
                .vars
                .get(original)
                .map(|wanted| (*symbol_id, wanted.clone()))
        })
        .collect();

    // Names no evicted symbol may move to: everything in use plus every name
    // a cached symbol of this chunk is about to take.
    let mut taken: HashSet<String> = scoping
        .symbol_ids()
        .map(|symbol_id| scoping.symbol_name(symbol_id).to_string())
        .collect();
    taken.extend(wanted_by.values().cloned());
    let mut next_fresh = 0;

    for (original, symbol_id) in &top_level {
        let Some(wanted) = wanted_by.get(symbol_id) else {
            continue;
        };
        let current = scoping.symbol_name(*symbol_id).to_string();
        if current == *wanted {
            continue;
        }
        if current == *original {
            debug!(%original, "symbol kept its source name, not applying cached rename");
            continue;
        }
        if scoping
            .root_unresolved_references()
            .contains_key(wanted.as_str())
        {
            debug!(%original, %wanted, "cached name is a global in this chunk, keeping mangled name");
            continue;
        }

        let holders: Vec<SymbolId> = scoping
            .symbol_ids()
            .filter(|&other| other != *symbol_id && scoping.symbol_name(other) == wanted.as_str())
            .collect();
        let pinned = holders.iter().any(|&holder| {
            wanted_by.get(&holder) == Some(wanted) || kept_source_name(scoping, holder, wanted)
        });
        if pinned {
            debug!(%original, %wanted, "cached name is pinned to another symbol, keeping mangled name");
            continue;
        }

        for holder in holders {
            let fresh = fresh_name(&mut next_fresh, &taken, scoping);
            debug!(%wanted, %fresh, "moving symbol out of the way of a cached name");
            scoping.set_symbol_name(holder, &fresh);
            taken.insert(fresh);
        }
        scoping.set_symbol_name(*symbol_id, wanted);
    }

    for (original, symbol_id) in top_level {
        let current = scoping.symbol_name(symbol_id);
        if current != original {
            cache
                .vars
                .entry(original)
                .or_insert_with(|| current.to_string());
        }
    }

    cache
}

/// Whether `symbol_id` is still bound under its source name `name`, i.e. the
/// mangler left it alone.
fn kept_source_name(scoping: &Scoping, symbol_id: SymbolId, name: &str) -> bool {
    let scope_id = scoping.symbol_scope_id(symbol_id);
    scoping.get_binding(scope_id, name) == Some(symbol_id)
}

/// Next short identifier that is not in use, not reserved and not a global.
fn fresh_name(counter: &mut usize, taken: &HashSet<String>, scoping: &Scoping) -> String {
    loop {
        let candidate = short_name(*counter);
        *counter += 1;
        if taken.contains(&candidate)
            || RESERVED.contains(&candidate.as_str())
            || scoping
                .root_unresolved_references()
                .contains_key(candidate.as_str())
        {
            continue;
        }
        return candidate;
    }
}

/// `0 -> a`, `53 -> _`, `54 -> aa`, ...
fn short_name(mut n: usize) -> String {
    let mut name = String::new();
    name.push(FIRST_CHARS[n % FIRST_CHARS.len()] as char);
    n /= FIRST_CHARS.len();
    while n > 0 {
        n -= 1;
        name.push(REST_CHARS[n % REST_CHARS.len()] as char);
        n /= REST_CHARS.len();
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_names_are_unique() {
        let names: HashSet<String> = (0..5000).map(short_name).collect();
        assert_eq!(names.len(), 5000);
        assert_eq!(short_name(0), "a");
        assert_eq!(short_name(53), "_");
        assert_eq!(short_name(54).len(), 2);
    }
}
