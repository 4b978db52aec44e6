//! Rebuilds the PHP-file -> generated-C-line mapping by reading
//! dontbug_break.c back, line by line. Every `//###` sentinel line is the
//! breakpoint address for the PHP file named after the marker, so the
//! 1-based line number of the match is what break-insert wants.

use crate::codegen::{
    BREAK_FILE_NAME, MAX_STACK_DEPTH_SENTINEL, NUM_FILES_SENTINEL, PHP_FILENAME_SENTINEL,
};
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

/// Offset of the path text from the start of the marker: the marker itself
/// plus the single separating space.
pub const PATH_STARTS_AT: usize = PHP_FILENAME_SENTINEL.len() + 1;

/// Map from `file://`-prefixed PHP path to the 1-based line of the
/// generated C file. Read-only for the lifetime of a replay session.
pub type BreakpointLocMap = HashMap<String, u32>;

pub fn construct_breakpoint_loc_map(ext_dir: &Path) -> io::Result<BreakpointLocMap> {
    let break_file = ext_dir.join(BREAK_FILE_NAME);
    let file = File::open(&break_file)?;

    let mut map: BreakpointLocMap = HashMap::with_capacity(1000);
    let mut lineno: u32 = 0;
    for line in BufReader::new(file).lines() {
        let line = line?;
        lineno += 1;

        let index = match line.find(PHP_FILENAME_SENTINEL) {
            Some(index) => index,
            None => continue,
        };

        let path = match line.get(index + PATH_STARTS_AT..) {
            Some(path) => path.trim(),
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("sentinel with no path on line {} of {}", lineno, BREAK_FILE_NAME),
                ))
            }
        };
        map.insert(format!("file://{}", path), lineno);
    }

    Ok(map)
}

/// Recover the two generation parameters from the preamble lines, so replay
/// can cross check the file it found against what generate produced.
pub fn read_generation_params(ext_dir: &Path) -> io::Result<(usize, u32)> {
    let break_file = ext_dir.join(BREAK_FILE_NAME);
    let file = File::open(&break_file)?;
    let mut lines = BufReader::new(file).lines();

    let num_files = parse_param_line(lines.next(), NUM_FILES_SENTINEL)?;
    let max_stack_depth = parse_param_line(lines.next(), MAX_STACK_DEPTH_SENTINEL)?;
    Ok((num_files as usize, max_stack_depth as u32))
}

fn parse_param_line(line: Option<io::Result<String>>, sentinel: &str) -> io::Result<u64> {
    let line = match line {
        Some(line) => line?,
        None => {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("{} is truncated", BREAK_FILE_NAME),
            ))
        }
    };

    if !line.starts_with(sentinel) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("expected a '{}' parameter line, got {:?}", sentinel.trim(), line),
        ));
    }

    line[sentinel.len()..]
        .trim()
        .parse::<u64>()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod test {
    use crate::break_map::{construct_breakpoint_loc_map, read_generation_params};
    use crate::codegen::{generate_break_file, HashIndex, Skeleton, BREAK_FILE_NAME};
    use std::collections::BTreeSet;
    use std::fs;
    use std::path::PathBuf;

    fn write_generated(name: &str, paths: &[&str], max_stack_depth: u32) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("dontbug-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();

        let files: BTreeSet<PathBuf> = paths.iter().map(PathBuf::from).collect();
        let index = HashIndex::build(&files).unwrap();
        let mut out: Vec<u8> = Vec::new();
        generate_break_file(&mut out, &index, max_stack_depth, &Skeleton::default()).unwrap();
        fs::write(dir.join(BREAK_FILE_NAME), out).unwrap();
        dir
    }

    #[test]
    fn round_trips_the_scanned_file_set() {
        let paths = ["/src/a.php", "/src/sub/b.module", "/src/z.install"];
        let dir = write_generated("sentinel-roundtrip", &paths, 5);

        let map = construct_breakpoint_loc_map(&dir).unwrap();
        assert_eq!(map.len(), paths.len());
        for p in &paths {
            assert!(map.contains_key(&format!("file://{}", p)), "missing {}", p);
        }

        let total_lines = fs::read_to_string(dir.join(BREAK_FILE_NAME))
            .unwrap()
            .lines()
            .count() as u32;
        let mut linenos: Vec<u32> = map.values().copied().collect();
        linenos.sort_unstable();
        assert!(linenos.first().copied().unwrap() >= 1);
        assert!(linenos.last().copied().unwrap() <= total_lines);
        linenos.dedup();
        assert_eq!(linenos.len(), paths.len(), "native lines must be distinct");

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn recovers_generation_params() {
        let dir = write_generated("sentinel-params", &["/src/a.php", "/src/b.php"], 7);
        assert_eq!(read_generation_params(&dir).unwrap(), (2, 7));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = std::env::temp_dir().join(format!("dontbug-nofile-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        assert!(construct_breakpoint_loc_map(&dir).is_err());
        fs::remove_dir_all(&dir).unwrap();
    }
}
