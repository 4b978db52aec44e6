use crate::codegen::{generate_break_file, HashIndex, Skeleton, BREAK_FILE_NAME};
use crate::commands::dontbug_options::{
    DontbugOptions, DontbugSubCommand, DEFAULT_EXT_DIR, DEFAULT_MAX_STACK_DEPTH,
};
use crate::commands::{exit_result::ExitResult, DontbugCommand};
use crate::flags::Flags;
use crate::scan::scan_sources;
use crate::util;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

pub struct GenerateCommand {
    root_dir: PathBuf,
    ext_dir: PathBuf,
    max_stack_depth: u32,
    php_path: PathBuf,
}

impl GenerateCommand {
    pub fn new(options: &DontbugOptions) -> GenerateCommand {
        match options.cmd.clone() {
            DontbugSubCommand::Generate {
                ext_dir,
                max_stack_depth,
                with_php,
                root_dir,
            } => {
                let ext_dir = ext_dir.unwrap_or_else(|| {
                    println!(
                        "dontbug: No --ext-dir provided, assuming \"{}\"",
                        DEFAULT_EXT_DIR
                    );
                    PathBuf::from(DEFAULT_EXT_DIR)
                });

                GenerateCommand {
                    root_dir: root_dir.unwrap_or_else(|| PathBuf::from(".")),
                    ext_dir,
                    max_stack_depth: max_stack_depth.unwrap_or(DEFAULT_MAX_STACK_DEPTH),
                    php_path: with_php.unwrap_or_else(|| PathBuf::from("php")),
                }
            }
            _ => panic!("Unexpected DontbugSubCommand variant. Not a Generate variant!"),
        }
    }

    fn generate_break_c(&self, root_dir: &Path, ext_dir: &Path) -> io::Result<()> {
        let break_file_path = ext_dir.join(BREAK_FILE_NAME);
        println!(
            "dontbug: Generating {} for all PHP code in: {}",
            break_file_path.display(),
            root_dir.display()
        );

        let files = scan_sources(root_dir)?;
        println!("dontbug: {} PHP files found", files.len());
        let index = HashIndex::build(&files)?;

        let mut out = BufWriter::new(File::create(&break_file_path)?);
        generate_break_file(&mut out, &index, self.max_stack_depth, &Skeleton::default())?;
        out.flush()?;

        println!("dontbug: Code generation complete. Compiling dontbug zend extension...");
        Ok(())
    }
}

impl DontbugCommand for GenerateCommand {
    fn run(&mut self) -> ExitResult<()> {
        let php_path = util::check_executable(self.php_path.as_os_str(), "php");

        let root_dir = match util::abs_no_symlink_path(&self.root_dir) {
            Ok(dir) => dir,
            Err(e) => clean_fatal!("{:?} is not a usable source directory: {}", self.root_dir, e),
        };
        let ext_dir = match util::abs_no_symlink_path(&self.ext_dir) {
            Ok(dir) => dir,
            Err(e) => clean_fatal!(
                "{:?} does not seem to be a valid dontbug extension directory: {}",
                self.ext_dir,
                e
            ),
        };

        if let Err(e) = self.generate_break_c(&root_dir, &ext_dir) {
            clean_fatal!("Could not generate {}: {}", BREAK_FILE_NAME, e);
        }

        make_dontbug_extension(&ext_dir, &php_path);
        println!("dontbug: Successfully compiled the dontbug zend extension");
        ExitResult::Ok(())
    }
}

/// phpize / configure / make, all inside the extension directory. phpize
/// and php-config are taken from next to the php executable so a custom
/// PHP build gets its own toolchain.
fn make_dontbug_extension(ext_dir: &Path, php_path: &Path) {
    let php_dir = php_path.parent().unwrap_or_else(|| Path::new("."));
    let phpize_path = php_dir.join("phpize");
    let php_config_path = php_dir.join("php-config");

    if Flags::get().verbose {
        println!(
            "dontbug: Trying to find phpize ({}) and php-config ({}) corresponding to the php executable ({})",
            phpize_path.display(),
            php_config_path.display(),
            php_path.display()
        );
    }
    if !phpize_path.is_file() {
        clean_fatal!("Not able to find 'phpize' at {}", phpize_path.display());
    }
    if !php_config_path.is_file() {
        clean_fatal!("Not able to find 'php-config' at {}", php_config_path.display());
    }

    if ext_dir.join("Makefile").is_file() {
        run_tool(
            Command::new("make").arg("distclean"),
            ext_dir,
            "make distclean",
        );
    }

    run_tool(&mut Command::new(&phpize_path), ext_dir, "phpize");

    run_tool(
        Command::new(ext_dir.join("configure")).arg(format!(
            "--with-php-config={}",
            php_config_path.display()
        )),
        ext_dir,
        "configure",
    );

    run_tool(
        Command::new("make").arg("CFLAGS=-g -O0"),
        ext_dir,
        "make",
    );
}

fn run_tool(cmd: &mut Command, ext_dir: &Path, what: &str) {
    let output = match cmd.current_dir(ext_dir).output() {
        Ok(output) => output,
        Err(e) => clean_fatal!("Not able to run '{}': {}", what, e),
    };

    if !output.status.success() {
        io::stdout().write_all(&output.stdout).unwrap();
        io::stderr().write_all(&output.stderr).unwrap();
        clean_fatal!("'{}' failed in the dontbug zend extension directory", what);
    }

    if Flags::get().verbose {
        io::stdout().write_all(&output.stdout).unwrap();
    }
    println!(
        "dontbug: Successfully ran '{}' in the dontbug zend extension directory",
        what
    );
}
