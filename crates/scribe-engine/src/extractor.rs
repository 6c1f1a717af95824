//! Source corpus extraction from a checked-out repository.
//!
//! Everything here is synchronous filesystem work; async callers run it on the
//! blocking pool.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

/// Relative path (always `/`-separated) to file content, ordered by path.
pub type Corpus = BTreeMap<String, String>;

/// Directory names whose contents never enter a corpus.
pub const EXCLUDED_DIRECTORIES: &[&str] = &[
    ".git",
    "genproto",
    ".venv",
    "node_modules",
    "dist",
    "build",
    "tests",
    "test",
    "bin",
    "target",
    "out",
    ".next",
];

/// Read every source file under `root` whose name ends with one of `allowed_extensions`.
///
/// Files under an excluded directory below `root` are skipped; the directories
/// above `root` are not considered. Files whose full path contains `/entry/` for
/// any `.gitignore` entry found in their directory or an ancestor of it are
/// skipped too. Unreadable files are logged and skipped.
pub fn extract(root: &Path, allowed_extensions: &[String]) -> Corpus {
    let mut corpus = Corpus::new();
    let mut ignore_cache = GitignoreCache::default();

    let walker = WalkDir::new(root).into_iter().filter_entry(|e| {
        !(e.depth() > 0
            && e.file_type().is_dir()
            && EXCLUDED_DIRECTORIES.contains(&e.file_name().to_string_lossy().as_ref()))
    });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let file_name = entry.file_name().to_string_lossy();
        if !allowed_extensions
            .iter()
            .any(|ext| file_name.ends_with(ext.as_str()))
        {
            continue;
        }

        let full_path = entry.path().to_string_lossy();
        let dir = entry.path().parent().unwrap_or(root);
        let ignored = ignore_cache
            .entries_for(dir)
            .iter()
            .any(|ignore| full_path.contains(&format!("/{ignore}/")));
        if ignored {
            debug!(path = %full_path, "skipping ignored file");
            continue;
        }

        match std::fs::read_to_string(entry.path()) {
            Ok(content) => {
                corpus.insert(relative_key(root, entry.path()), content);
            }
            Err(e) => {
                warn!(path = %full_path, error = %e, "failed to read file, skipping");
            }
        }
    }

    corpus
}

/// Distinct lowercase extensions (without the dot) of every file under `root`.
pub fn found_extensions(root: &Path) -> BTreeSet<String> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            e.path()
                .extension()
                .map(|ext| ext.to_string_lossy().to_lowercase())
        })
        .filter(|ext| !ext.is_empty())
        .collect()
}

fn relative_key(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Memoizes the accumulated `.gitignore` entries of each directory
/// (its own file plus every ancestor's, up to the filesystem root).
#[derive(Default)]
struct GitignoreCache {
    entries: HashMap<PathBuf, Vec<String>>,
}

impl GitignoreCache {
    fn entries_for(&mut self, dir: &Path) -> &[String] {
        if !self.entries.contains_key(dir) {
            let mut collected = read_gitignore(dir);
            if let Some(parent) = dir.parent() {
                collected.extend_from_slice(self.entries_for(parent));
            }
            self.entries.insert(dir.to_path_buf(), collected);
        }
        self.entries.get(dir).map(Vec::as_slice).unwrap_or_default()
    }
}

fn read_gitignore(dir: &Path) -> Vec<String> {
    let Ok(content) = std::fs::read_to_string(dir.join(".gitignore")) else {
        return Vec::new();
    };
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn exts(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn keeps_only_allowed_suffixes() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "main.py", "print('hi')");
        write(dir.path(), "src/lib.rs", "fn main() {}");
        write(dir.path(), "README.md", "# readme");
        write(dir.path(), "logo.png", "not really a png");

        let corpus = extract(dir.path(), &exts(&["py", "rs"]));
        let keys: Vec<&str> = corpus.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["main.py", "src/lib.rs"]);
        assert_eq!(corpus["src/lib.rs"], "fn main() {}");
    }

    #[test]
    fn suffix_match_is_not_extension_boundary() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.c", "int x;");
        write(dir.path(), "notes.etc", "config");

        let corpus = extract(dir.path(), &exts(&["c"]));
        assert!(corpus.contains_key("a.c"));
        assert!(corpus.contains_key("notes.etc"));
    }

    #[test]
    fn every_key_ends_with_an_allowed_extension() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.go", "b.ts", "c.txt", "d/e.go", "d/f.json", "g"] {
            write(dir.path(), name, "x");
        }
        let allowed = exts(&["go", "ts"]);
        let corpus = extract(dir.path(), &allowed);
        assert_eq!(corpus.len(), 3);
        for key in corpus.keys() {
            assert!(allowed.iter().any(|ext| key.ends_with(ext.as_str())), "{key}");
            assert!(dir.path().join(key).exists());
        }
    }

    #[test]
    fn excluded_directories_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/app.js", "app");
        write(dir.path(), "node_modules/lib/index.js", "dep");
        write(dir.path(), "dist/bundle.js", "bundle");
        write(dir.path(), "src/test/app.test.js", "test");

        let corpus = extract(dir.path(), &exts(&["js"]));
        let keys: Vec<&str> = corpus.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["src/app.js"]);
    }

    #[test]
    fn root_inside_excluded_directory_is_still_walked() {
        let outer = tempfile::tempdir().unwrap();
        let root = outer.path().join("build").join("checkout");
        write(&root, "src/app.js", "app");
        write(&root, "out/bundle.js", "bundle");

        let corpus = extract(&root, &exts(&["js"]));
        let keys: Vec<&str> = corpus.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["src/app.js"]);
    }

    #[test]
    fn gitignore_entry_excludes_matching_paths() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), ".gitignore", "# generated\n\n  vendor  \n");
        write(dir.path(), "vendor/dep.go", "dep");
        write(dir.path(), "pkg/vendor/inner.go", "inner");
        write(dir.path(), "pkg/main.go", "main");

        let corpus = extract(dir.path(), &exts(&["go"]));
        let keys: Vec<&str> = corpus.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["pkg/main.go"]);
    }

    #[test]
    fn nested_gitignore_applies_below_its_directory_only() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a/.gitignore", "gen\n");
        write(dir.path(), "a/gen/x.rs", "x");
        write(dir.path(), "b/gen/y.rs", "y");

        let corpus = extract(dir.path(), &exts(&["rs"]));
        let keys: Vec<&str> = corpus.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["b/gen/y.rs"]);
    }

    #[test]
    fn unreadable_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "ok.py", "fine");
        fs::write(dir.path().join("bad.py"), [0xff, 0xfe, 0x00, 0xc3]).unwrap();

        let corpus = extract(dir.path(), &exts(&["py"]));
        assert_eq!(corpus.len(), 1);
        assert!(corpus.contains_key("ok.py"));
    }

    #[test]
    fn empty_directory_yields_empty_corpus() {
        let dir = tempfile::tempdir().unwrap();
        assert!(extract(dir.path(), &exts(&["py"])).is_empty());
        assert!(found_extensions(dir.path()).is_empty());
    }

    #[test]
    fn found_extensions_are_distinct_and_lowercase() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.PY", "");
        write(dir.path(), "b.py", "");
        write(dir.path(), "docs/c.md", "");
        write(dir.path(), "Makefile", "");
        write(dir.path(), ".gitignore", "");

        let found: Vec<String> = found_extensions(dir.path()).into_iter().collect();
        assert_eq!(found, vec!["md".to_string(), "py".to_string()]);
    }
}
