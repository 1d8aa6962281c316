//! Repository listing
//!
//! A directory lists its content, a file lists itself. A missing path whose last component is a
//! glob (`*`, `?` or `[`) lists the matching entries of its parent.

use crate::store::{PathEntry, Store};

const GLOB_CHARS: &[char] = &['*', '?', '['];

/// Permission string in `ls -l` style, e.g. `drwxrwxr-x`.
#[must_use]
pub fn mode_string(entry: &PathEntry) -> String {
    let mode = entry.mode();
    let mut out = String::with_capacity(10);
    out.push(if entry.is_dir() { 'd' } else { '-' });
    for shift in [6, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    out
}

fn modified(entry: &PathEntry) -> String {
    let time = entry
        .metadata
        .and_then(|md| md.modified)
        .unwrap_or(std::time::UNIX_EPOCH);
    chrono::DateTime::<chrono::Utc>::from(time)
        .format("%a %b %e %H:%M:%S %Z %Y")
        .to_string()
}

/// One output line for `entry`.
#[must_use]
pub fn format_entry(entry: &PathEntry, long: bool) -> String {
    if long {
        format!(
            "{:>11} {:>12} {} {}",
            mode_string(entry),
            entry.size(),
            modified(entry),
            entry.path.display()
        )
    } else {
        let name = entry
            .name()
            .map_or_else(|| entry.path.display().to_string(), |name| {
                name.to_string_lossy().into_owned()
            });
        if entry.is_dir() {
            format!("{name}/")
        } else {
            name
        }
    }
}

/// Entries to show for `path`, sorted by name.
pub async fn list(store: &dyn Store, path: &std::path::Path) -> anyhow::Result<Vec<PathEntry>> {
    use anyhow::Context;
    let mut entries = match store.stat(path).await {
        Ok(entry) if !entry.is_dir() => vec![entry],
        Ok(_) => store
            .read_dir(path)
            .await
            .with_context(|| format!("cannot list {path:?}"))?,
        Err(error) if error.is_not_found() => {
            let pattern = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .filter(|name| name.contains(GLOB_CHARS));
            let (Some(pattern), Some(parent)) = (pattern, path.parent()) else {
                return Err(error.into());
            };
            let matcher = globset::Glob::new(&pattern)
                .with_context(|| format!("invalid pattern {pattern:?}"))?
                .compile_matcher();
            tracing::debug!("listing {:?} matching {:?}", parent, &pattern);
            store
                .read_dir(parent)
                .await
                .with_context(|| format!("cannot list {parent:?}"))?
                .into_iter()
                .filter(|entry| entry.name().is_some_and(|name| matcher.is_match(name)))
                .collect()
        }
        Err(error) => return Err(error.into()),
    };
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}
