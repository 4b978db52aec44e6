use std::collections::{BTreeSet, HashSet};
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// The file extensions that count as PHP source. One definition site; the
/// scanner, and nothing else, consults this.
/// TODO allow a project to extend this list from the command line
pub const SCRIPT_EXTENSIONS: [&str; 3] = ["php", "module", "install"];

fn has_script_extension(path: &Path) -> bool {
    match path.extension().and_then(OsStr::to_str) {
        Some(ext) => SCRIPT_EXTENSIONS.contains(&ext),
        None => false,
    }
}

/// Collect every PHP source file under `root`. Symlinked directories are
/// followed, but each resolved directory is visited at most once so link
/// cycles terminate. Symlinked files are resolved to their target before
/// inclusion. Any unreadable entry is an error; the caller treats that as
/// fatal since a partial index would silently lose breakpoint targets.
pub fn scan_sources(root: &Path) -> io::Result<BTreeSet<PathBuf>> {
    let root = root.canonicalize()?;
    let mut files = BTreeSet::new();
    let mut visited = HashSet::new();
    visited.insert(root.clone());
    walk(&root, &mut files, &mut visited)?;
    Ok(files)
}

fn walk(
    dir: &Path,
    files: &mut BTreeSet<PathBuf>,
    visited: &mut HashSet<PathBuf>,
) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_symlink() {
            let resolved = path.canonicalize()?;
            let meta = fs::metadata(&resolved)?;
            if meta.is_dir() {
                if visited.insert(resolved.clone()) {
                    walk(&resolved, files, visited)?;
                }
            } else if meta.is_file() && has_script_extension(&resolved) {
                files.insert(resolved);
            }
        } else if file_type.is_dir() {
            visited.insert(path.clone());
            walk(&path, files, visited)?;
        } else if file_type.is_file() && has_script_extension(&path) {
            files.insert(path);
        }
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use crate::scan::scan_sources;
    use std::fs;
    use std::os::unix::fs::symlink;
    use std::path::PathBuf;

    struct TestTree {
        root: PathBuf,
    }

    impl TestTree {
        fn new(name: &str) -> TestTree {
            let root = std::env::temp_dir().join(format!("dontbug-{}-{}", name, std::process::id()));
            let _ = fs::remove_dir_all(&root);
            fs::create_dir_all(&root).unwrap();
            TestTree { root }
        }
    }

    impl Drop for TestTree {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.root);
        }
    }

    #[test]
    fn collects_recognised_extensions_only() {
        let t = TestTree::new("scan-ext");
        fs::create_dir_all(t.root.join("sub")).unwrap();
        fs::write(t.root.join("a.php"), "<?php\n").unwrap();
        fs::write(t.root.join("sub/b.module"), "<?php\n").unwrap();
        fs::write(t.root.join("sub/c.install"), "<?php\n").unwrap();
        fs::write(t.root.join("notes.txt"), "nope\n").unwrap();
        fs::write(t.root.join("README"), "nope\n").unwrap();

        let files = scan_sources(&t.root).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names.len(), 3);
        assert!(names.contains(&"a.php".to_string()));
        assert!(names.contains(&"b.module".to_string()));
        assert!(names.contains(&"c.install".to_string()));
    }

    #[test]
    fn symlink_cycles_terminate() {
        let t = TestTree::new("scan-cycle");
        fs::create_dir_all(t.root.join("dir")).unwrap();
        fs::write(t.root.join("dir/a.php"), "<?php\n").unwrap();
        // dir/loop -> dir, a directory cycle
        symlink(t.root.join("dir"), t.root.join("dir/loop")).unwrap();

        let files = scan_sources(&t.root).unwrap();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn file_symlinks_resolve_to_target() {
        let t = TestTree::new("scan-filelink");
        fs::write(t.root.join("real.php"), "<?php\n").unwrap();
        symlink(t.root.join("real.php"), t.root.join("alias.php")).unwrap();

        let files = scan_sources(&t.root).unwrap();
        // Both names resolve to the same target, which is stored once.
        assert_eq!(files.len(), 1);
        assert!(files.iter().next().unwrap().ends_with("real.php"));
    }
}
