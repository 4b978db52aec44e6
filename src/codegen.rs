//! Generation of dontbug_break.c, the translation unit that the Zend
//! extension compiles in and that gdb later sets breakpoints inside.
//!
//! The file has two halves. dontbug_break_location() encodes the set of
//! indexed PHP files as a binary search over their interned-string hashes;
//! each leaf `return` line doubles as the breakpoint address for that file.
//! dontbug_level_location() is a ladder of conditional increments, one line
//! per stack depth. Sentinel comments (### for filenames, $$$ for levels,
//! &&& reserved for the extension itself) let the replay side recover the
//! line numbers again by reading the text back.

use crate::hash::{djbx33a, PathHash};
use std::collections::{BTreeSet, HashMap};
use std::io::{self, Write};
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;

pub const BREAK_FILE_NAME: &str = "dontbug_break.c";

pub const PHP_FILENAME_SENTINEL: &str = "//###";
pub const LEVEL_SENTINEL: &str = "//$$$";
pub const NUM_FILES_SENTINEL: &str = "// num_php_files: ";
pub const MAX_STACK_DEPTH_SENTINEL: &str = "// max_stack_depth: ";

/// Line numbers of the two breakable statements in the default skeleton
/// header. The two parameter lines above the header are part of the file
/// format, so every header line has a fixed absolute position.
/// `STARTUP_LINE` hosts the temporary breakpoint that fires on the first
/// line event of the recording; `STEP_LINE` hosts breakpoint "1", the
/// persistent stepping breakpoint, as well as the temporary stack-level
/// breakpoints used by step-over.
pub const STARTUP_LINE: u32 = 13;
pub const STEP_LINE: u32 = 14;

const BREAK_SKELETON_HEADER: &str = "\
/*
 * This file is autogenerated by 'dontbug generate'.
 * IMPORTANT -- DO NOT remove, edit or move comments with ### or $$$ or &&&
 * Line positions in this file are load bearing. Do not reformat.
 */
#include \"php.h\"
#include \"php_dontbug.h\"

void dontbug_break_location(zend_string* zfilename, zend_execute_data *execute_data, int lineno, unsigned long level) {
    volatile int brk = 0;
    brk++; //&&& startup break line
    brk++; //&&& step break line
    zend_ulong hash = zfilename->h;
    char *filename = ZSTR_VAL(zfilename);";

const BREAK_SKELETON_FOOTER: &str = "}";

const LEVEL_LOCATION_HEADER: &str = "\
void dontbug_level_location(unsigned long level, char* filename, int lineno) {
    int count = 0;";

const LEVEL_LOCATION_FOOTER: &str = "}";

/// The verbatim C fragments the generated regions are embedded between.
/// The defaults match STARTUP_LINE/STEP_LINE above; a caller substituting
/// its own header takes over that bookkeeping.
pub struct Skeleton {
    pub break_header: &'static str,
    pub break_footer: &'static str,
    pub level_header: &'static str,
    pub level_footer: &'static str,
}

impl Default for Skeleton {
    fn default() -> Skeleton {
        Skeleton {
            break_header: BREAK_SKELETON_HEADER,
            break_footer: BREAK_SKELETON_FOOTER,
            level_header: LEVEL_LOCATION_HEADER,
            level_footer: LEVEL_LOCATION_FOOTER,
        }
    }
}

/// The sorted hash -> file mapping the binary search is generated from.
pub struct HashIndex {
    // Strictly ascending.
    hashes: Vec<PathHash>,
    paths: HashMap<PathHash, PathBuf>,
}

impl HashIndex {
    /// Hash every file path. Two distinct paths landing on the same hash
    /// would make the decision tree ambiguous, so that is an error; so is
    /// an empty input, which would generate a function with no body.
    pub fn build(files: &BTreeSet<PathBuf>) -> io::Result<HashIndex> {
        if files.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "no PHP files to index",
            ));
        }

        let mut paths: HashMap<PathHash, PathBuf> = HashMap::with_capacity(files.len());
        for file in files {
            let hash = djbx33a(file.as_os_str().as_bytes());
            if let Some(existing) = paths.get(&hash) {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "hash collision between {:?} and {:?} (both hash to {})",
                        existing, file, hash
                    ),
                ));
            }
            paths.insert(hash, file.clone());
        }

        let mut hashes: Vec<PathHash> = paths.keys().copied().collect();
        hashes.sort_unstable();

        Ok(HashIndex { hashes, paths })
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }
}

/// Write the complete dontbug_break.c to `f`.
pub fn generate_break_file(
    f: &mut dyn Write,
    index: &HashIndex,
    max_stack_depth: u32,
    skel: &Skeleton,
) -> io::Result<()> {
    write!(f, "{}{}\n", NUM_FILES_SENTINEL, index.len())?;
    write!(f, "{}{}\n", MAX_STACK_DEPTH_SENTINEL, max_stack_depth)?;
    writeln!(f, "{}", skel.break_header)?;
    write!(f, "{}", generate_break_body(index))?;
    writeln!(f, "{}", skel.break_footer)?;
    writeln!(f, "{}", skel.level_header)?;
    write!(f, "{}", generate_level_body(max_stack_depth))?;
    writeln!(f, "{}", skel.level_footer)?;
    Ok(())
}

fn generate_level_body(max_stack_depth: u32) -> String {
    let mut buf = String::new();
    for level in 0..max_stack_depth {
        buf.push_str(&format!("    if (level <= {}) {{\n", level));
        buf.push_str(&format!("        count++; {} {}\n", LEVEL_SENTINEL, level));
        buf.push_str("    }\n");
    }
    buf
}

// Repeat a space n times
fn s(n: usize) -> String {
    " ".repeat(n)
}

fn eq(rhs: PathHash) -> String {
    format!("hash == Z_UL({})", rhs)
}

fn lt(rhs: PathHash) -> String {
    format!("hash < Z_UL({})", rhs)
}

fn found_hash(index: &HashIndex, hash: PathHash, indent: usize) -> String {
    let mut buf = String::new();
    buf.push_str(&format!("{}// hash == {}\n", s(indent), hash));
    buf.push_str(&format!(
        "{}return; {} {}\n",
        s(indent),
        PHP_FILENAME_SENTINEL,
        index.paths[&hash].display()
    ));
    buf
}

fn if_then(ifc: &str, ifb: &str, elseb: &str, indent: usize) -> String {
    let mut buf = String::new();
    buf.push_str(&format!("{}if ({}) {{\n", s(indent), ifc));
    buf.push_str(ifb);
    buf.push_str(&format!("{}}} else {{\n", s(indent)));
    buf.push_str(elseb);
    buf.push_str(&format!("{}}}\n", s(indent)));
    buf
}

fn if_then_else(
    ifc: &str,
    ifb: &str,
    elseifc: &str,
    elseifb: &str,
    elseb: &str,
    indent: usize,
) -> String {
    let mut buf = String::new();
    buf.push_str(&format!("{}if ({}) {{\n", s(indent), ifc));
    buf.push_str(ifb);
    buf.push_str(&format!("{}}} else if ({}) {{\n", s(indent), elseifc));
    buf.push_str(elseifb);
    buf.push_str(&format!("{}}} else {{\n", s(indent)));
    buf.push_str(elseb);
    buf.push_str(&format!("{}}}\n", s(indent)));
    buf
}

fn generate_break_body(index: &HashIndex) -> String {
    generate_break_helper(index, 0, index.hashes.len() - 1, 4)
}

fn generate_break_helper(index: &HashIndex, low: usize, high: usize, indent: usize) -> String {
    if high == low {
        return found_hash(index, index.hashes[low], indent);
    }

    let mid = (high + low) / 2;
    // Can only happen when we have two elements left
    if mid == low {
        return if_then(
            &eq(index.hashes[mid]),
            &found_hash(index, index.hashes[mid], indent + 4),
            &found_hash(index, index.hashes[high], indent + 4),
            indent,
        );
    }

    if_then_else(
        &eq(index.hashes[mid]),
        &found_hash(index, index.hashes[mid], indent + 4),
        &lt(index.hashes[mid]),
        &generate_break_helper(index, low, mid - 1, indent + 4),
        &generate_break_helper(index, mid + 1, high, indent + 4),
        indent,
    )
}

#[cfg(test)]
mod test {
    use crate::codegen::{
        generate_break_file, HashIndex, Skeleton, LEVEL_SENTINEL, MAX_STACK_DEPTH_SENTINEL,
        NUM_FILES_SENTINEL, PHP_FILENAME_SENTINEL, STARTUP_LINE, STEP_LINE,
    };
    use crate::hash::djbx33a;
    use std::collections::BTreeSet;
    use std::path::PathBuf;

    fn tree(paths: &[&str]) -> BTreeSet<PathBuf> {
        paths.iter().map(PathBuf::from).collect()
    }

    fn generate(paths: &[&str], max_stack_depth: u32) -> String {
        let index = HashIndex::build(&tree(paths)).unwrap();
        let mut out: Vec<u8> = Vec::new();
        generate_break_file(&mut out, &index, max_stack_depth, &Skeleton::default()).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn preamble_and_sentinel_counts() {
        let text = generate(&["/src/a.php", "/src/sub/b.module"], 3);
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], format!("{}2", NUM_FILES_SENTINEL));
        assert_eq!(lines[1], format!("{}3", MAX_STACK_DEPTH_SENTINEL));

        let filename_lines: Vec<&str> = lines
            .iter()
            .copied()
            .filter(|l| l.contains(PHP_FILENAME_SENTINEL))
            .collect();
        assert_eq!(filename_lines.len(), 2);

        let level_lines: Vec<&str> = lines
            .iter()
            .copied()
            .filter(|l| l.contains(LEVEL_SENTINEL))
            .collect();
        assert_eq!(level_lines.len(), 3);
        for (i, line) in level_lines.iter().enumerate() {
            assert!(line.ends_with(&format!("{} {}", LEVEL_SENTINEL, i)));
        }
    }

    #[test]
    fn breakpoint_lines_match_constants() {
        let text = generate(&["/src/a.php"], 1);
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[STARTUP_LINE as usize - 1].contains("//&&& startup break line"));
        assert!(lines[STEP_LINE as usize - 1].contains("//&&& step break line"));
    }

    #[test]
    fn every_file_appears_as_exactly_one_leaf() {
        let paths = [
            "/w/a.php",
            "/w/b.php",
            "/w/c.module",
            "/w/d.install",
            "/w/e/f.php",
            "/w/g.php",
            "/w/h.php",
        ];
        for n in 1..=paths.len() {
            let text = generate(&paths[..n], 2);
            for p in &paths[..n] {
                let leaf = format!("return; {} {}", PHP_FILENAME_SENTINEL, p);
                assert_eq!(
                    text.matches(&leaf).count(),
                    1,
                    "missing or duplicated leaf for {} with {} files",
                    p,
                    n
                );
                let hash_comment = format!("// hash == {}", djbx33a(p.as_bytes()));
                assert!(text.contains(&hash_comment));
            }
        }
    }

    #[test]
    fn empty_input_is_an_error() {
        assert!(HashIndex::build(&BTreeSet::new()).is_err());
    }

    #[test]
    fn collision_is_an_error() {
        // 33*'a' + 'B' == 33*'b' + '!', so these two paths hash identically.
        let files = tree(&["/src/aB.php", "/src/b!.php"]);
        assert_eq!(
            djbx33a("/src/aB.php".as_bytes()),
            djbx33a("/src/b!.php".as_bytes())
        );
        assert!(HashIndex::build(&files).is_err());
    }
}
