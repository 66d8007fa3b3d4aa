//! Test fixture discovery
//!
//! Fixtures live in one directory, in either of two layouts:
//!
//! ```text
//! tests/                      tests/
//! ├── input-1.c               ├── 1/
//! ├── output-1.txt            │   ├── input.c
//! ├── input-2.c               │   └── output.txt
//! └── output-2.txt            └── 2/ ...
//! ```
//!
//! Inside a per-fixture directory the expected output may also be named
//! `expected.*`. Both layouts may be mixed.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use autograder_common::TestFixture;

/// Fixture directory errors
#[derive(Debug, thiserror::Error)]
pub enum FixtureError {
    #[error("Fixture directory {} does not exist", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to read fixture directory: {0}")]
    Read(#[from] walkdir::Error),
}

/// Load every complete fixture under `dir`, in natural id order
pub fn load_fixtures(dir: &Path) -> Result<Vec<TestFixture>, FixtureError> {
    if !dir.is_dir() {
        return Err(FixtureError::NotFound(dir.to_path_buf()));
    }

    // id -> (input, expected)
    let mut flat: BTreeMap<String, (Option<PathBuf>, Option<PathBuf>)> = BTreeMap::new();
    let mut fixtures = Vec::new();

    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry?;
        let path = entry.path();

        if entry.file_type().is_dir() {
            let id = entry.file_name().to_string_lossy().into_owned();
            if id.starts_with('.') {
                continue;
            }
            match fixture_from_dir(&id, path)? {
                Some(fixture) => fixtures.push(fixture),
                None => tracing::warn!(
                    fixture = %id,
                    "Skipping fixture directory without input and expected output"
                ),
            }
            continue;
        }

        let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
            continue;
        };
        if let Some(id) = stem.strip_prefix("input-") {
            flat.entry(id.to_string()).or_default().0 = Some(path.to_path_buf());
        } else if let Some(id) = stem.strip_prefix("output-") {
            flat.entry(id.to_string()).or_default().1 = Some(path.to_path_buf());
        }
    }

    for (id, pair) in flat {
        match pair {
            (Some(input_path), Some(expected_output_path)) => fixtures.push(TestFixture {
                id,
                input_path,
                expected_output_path,
            }),
            _ => tracing::warn!(fixture = %id, "Skipping unpaired fixture file"),
        }
    }

    fixtures.sort_by(|a, b| natural_cmp(&a.id, &b.id));

    let mut seen = std::collections::HashSet::new();
    fixtures.retain(|f| {
        let fresh = seen.insert(f.id.clone());
        if !fresh {
            tracing::warn!(fixture = %f.id, "Skipping duplicate fixture id");
        }
        fresh
    });

    tracing::info!(dir = %dir.display(), count = fixtures.len(), "Loaded fixtures");
    Ok(fixtures)
}

fn fixture_from_dir(id: &str, dir: &Path) -> Result<Option<TestFixture>, FixtureError> {
    let mut input = None;
    let mut output = None;
    let mut expected = None;

    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.into_path();
        let slot = match path.file_stem().and_then(|s| s.to_str()) {
            Some("input") => &mut input,
            Some("output") => &mut output,
            Some("expected") => &mut expected,
            _ => continue,
        };
        if slot.is_none() {
            *slot = Some(path);
        }
    }

    Ok(match (input, output.or(expected)) {
        (Some(input_path), Some(expected_output_path)) => Some(TestFixture {
            id: id.to_string(),
            input_path,
            expected_output_path,
        }),
        _ => None,
    })
}

/// Compare ids so that embedded numbers order numerically ("2" < "10")
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = chunks(a);
    let mut right = chunks(b);
    loop {
        match (left.next(), right.next()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ord = match (x.parse::<u128>(), y.parse::<u128>()) {
                    (Ok(m), Ok(n)) => m.cmp(&n),
                    _ => x.cmp(y),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

/// Split into maximal runs of digits and non-digits
fn chunks(s: &str) -> impl Iterator<Item = &str> {
    let mut rest = s;
    std::iter::from_fn(move || {
        let first = rest.chars().next()?;
        let digit = first.is_ascii_digit();
        let end = rest
            .find(|c: char| c.is_ascii_digit() != digit)
            .unwrap_or(rest.len());
        let (chunk, tail) = rest.split_at(end);
        rest = tail;
        Some(chunk)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, b"x\n").unwrap();
    }

    #[test]
    fn test_natural_order() {
        let mut ids = vec!["10", "2", "1", "b", "a10", "a9"];
        ids.sort_by(|a, b| natural_cmp(a, b));
        assert_eq!(ids, vec!["1", "2", "10", "a9", "a10", "b"]);
    }

    #[test]
    fn test_flat_layout() {
        let dir = tempfile::tempdir().unwrap();
        for id in ["0", "1", "10", "2"] {
            touch(&dir.path().join(format!("input-{}.c", id)));
            touch(&dir.path().join(format!("output-{}.txt", id)));
        }
        // Unpaired input is ignored
        touch(&dir.path().join("input-7.c"));
        touch(&dir.path().join("README.md"));

        let fixtures = load_fixtures(dir.path()).unwrap();
        let ids: Vec<_> = fixtures.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["0", "1", "2", "10"]);
        assert_eq!(fixtures[3].input_path, dir.path().join("input-10.c"));
        assert_eq!(fixtures[3].expected_output_path, dir.path().join("output-10.txt"));
    }

    #[test]
    fn test_directory_layout() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("case2/input.txt"));
        touch(&dir.path().join("case2/output.txt"));
        touch(&dir.path().join("case1/input"));
        touch(&dir.path().join("case1/expected.out"));
        touch(&dir.path().join("broken/input.txt"));

        let fixtures = load_fixtures(dir.path()).unwrap();
        let ids: Vec<_> = fixtures.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["case1", "case2"]);
        assert_eq!(fixtures[0].expected_output_path, dir.path().join("case1/expected.out"));
    }

    #[test]
    fn test_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_fixtures(&dir.path().join("nope"));
        assert!(matches!(result, Err(FixtureError::NotFound(_))));
    }
}
