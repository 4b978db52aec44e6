use memchr::memchr;
use std::env;
use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};

/// Find the first occurrence of `needle` in `haystack`.
pub fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }

    let mut from = 0;
    while from + needle.len() <= haystack.len() {
        let at = match memchr(needle[0], &haystack[from..]) {
            Some(at) => from + at,
            None => return None,
        };
        if at + needle.len() > haystack.len() {
            return None;
        }
        if &haystack[at..at + needle.len()] == needle {
            return Some(at);
        }
        from = at + 1;
    }
    None
}

/// Absolute path with all symlinks resolved. The path must exist.
pub fn abs_no_symlink_path<P: AsRef<Path>>(path: P) -> io::Result<PathBuf> {
    path.as_ref().canonicalize()
}

/// Resolve a tool to a concrete executable path. A bare name is searched
/// for in $PATH; anything with a path separator is checked as given.
/// A tool that cannot be found is a user environment problem and fatal.
pub fn check_executable(name_or_path: &OsStr, what: &str) -> PathBuf {
    let p = Path::new(name_or_path);
    if p.components().count() > 1 {
        if p.is_file() {
            return p.to_path_buf();
        }
        clean_fatal!("Not able to find '{}' at {:?}", what, name_or_path);
    }

    if let Some(paths) = env::var_os("PATH") {
        for dir in env::split_paths(&paths) {
            let candidate = dir.join(p);
            if candidate.is_file() {
                return candidate;
            }
        }
    }

    clean_fatal!(
        "Not able to find '{}' ({:?}) in $PATH. Please install it or pass an explicit path",
        what,
        name_or_path
    );
}

#[cfg(test)]
mod test {
    use crate::util::find;

    #[test]
    fn find_byte_sequences() {
        assert_eq!(find(b"hello world", b"world"), Some(6));
        assert_eq!(find(b"hello world", b"hello"), Some(0));
        assert_eq!(find(b"hello world", b"worlds"), None);
        assert_eq!(find(b"aaab", b"ab"), Some(2));
        assert_eq!(find(b"", b"a"), None);
        assert_eq!(find(b"abc", b""), Some(0));
    }
}
