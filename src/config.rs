//! Command-line configuration: one flag per switch this core accepts,
//! parsed once into an immutable `Config` and passed by reference into
//! every pipeline stage. No global mutable flags.

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Which virtual machine generation the emitted code targets: the
/// legacy dialect uses 1-byte argument counts on send/call/etc, the
/// modern dialect uses 2 bytes and supports optional debug line
/// annotations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lower")]
pub enum Dialect {
    Legacy,
    Modern,
}

#[derive(Parser, Debug)]
#[command(
    name = "sfc",
    version,
    about = "Script compiler",
    long_about = "sfc — compiles script source into heap and hunk resource images for a stack-based virtual machine."
)]
pub struct Config {
    /// Abort the compile if the vocabulary database is locked by
    /// another process, rather than waiting for it.
    #[arg(short = 'a')]
    pub abort_if_locked: bool,

    /// Include debug line-number annotations in the emitted code
    /// (modern dialect only).
    #[arg(short = 'd')]
    pub include_debug_info: bool,

    /// Command-line define: `-D NAME` or `-D NAME=VALUE`.
    #[arg(short = 'D', value_name = "NAME[=VALUE]")]
    defines: Vec<String>,

    /// Maximum number of global or local variables.
    #[arg(short = 'g', default_value_t = 750)]
    pub max_variables: usize,

    /// Generate a code listing.
    #[arg(short = 'l')]
    pub generate_listing: bool,

    /// Suppress auto-naming of objects that declare no `name` selector.
    #[arg(short = 'n')]
    pub no_auto_name: bool,

    /// Output directory for generated resource files.
    #[arg(short = 'o', value_name = "DIR")]
    pub output_directory: Option<PathBuf>,

    /// Emit the offsets listing file alongside the resource images.
    #[arg(short = 'O')]
    pub emit_offsets_file: bool,

    /// Show selectors referenced but never resolved against the
    /// vocabulary.
    #[arg(short = 's')]
    pub show_forward_referenced_selectors: bool,

    /// Don't lock the class/selector vocabulary database.
    #[arg(short = 'u')]
    pub no_lock: bool,

    /// Verbose output; repeat to raise the log level further.
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Emit words high-byte first.
    #[arg(short = 'w')]
    pub big_endian_words: bool,

    /// Disable the peephole optimizer and offset-shrink fixpoint.
    #[arg(short = 'z')]
    pub no_optimize: bool,

    /// Target virtual machine dialect.
    #[arg(short = 't', long = "target", value_enum, default_value_t = Dialect::Modern)]
    pub dialect: Dialect,

    /// Selector vocabulary file.
    #[arg(long, default_value = "selector")]
    pub selector_file: PathBuf,

    /// Class definition vocabulary file.
    #[arg(long, default_value = "classdef")]
    pub classdef_file: PathBuf,

    /// System header file, included implicitly ahead of every unit.
    #[arg(long, default_value = "system.sh")]
    pub system_header: PathBuf,

    /// Game header file, included implicitly ahead of every unit.
    #[arg(long, default_value = "game.sh")]
    pub game_header: PathBuf,

    /// Additional include search directories.
    #[arg(short = 'I', long = "include_path", value_name = "DIR")]
    pub include_paths: Vec<PathBuf>,

    /// Source files to compile.
    pub files: Vec<PathBuf>,
}

impl Config {
    /// Parses `std::env::args_os()` into a `Config`, resolving the
    /// repeated `-D` flags into a map and validating nothing the
    /// derive macro can't express on its own.
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// The command-line defines, parsed from repeated `-D NAME[=VALUE]`
    /// flags. A bare `NAME` maps to `None`; `NAME=VALUE` maps to
    /// `Some(VALUE)`.
    pub fn command_line_defines(&self) -> BTreeMap<String, Option<String>> {
        let mut map = BTreeMap::new();
        for raw in &self.defines {
            match raw.split_once('=') {
                Some((name, value)) => {
                    map.insert(name.to_string(), Some(value.to_string()));
                }
                None => {
                    map.insert(raw.clone(), None);
                }
            }
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        let mut full = vec!["sfc"];
        full.extend_from_slice(args);
        Config::parse_from(full)
    }

    #[test]
    fn defaults_match_the_documented_conventions() {
        let cfg = parse(&["main.sc"]);
        assert_eq!(cfg.max_variables, 750);
        assert_eq!(cfg.dialect, Dialect::Modern);
        assert_eq!(cfg.selector_file, PathBuf::from("selector"));
        assert_eq!(cfg.classdef_file, PathBuf::from("classdef"));
        assert_eq!(cfg.system_header, PathBuf::from("system.sh"));
        assert_eq!(cfg.game_header, PathBuf::from("game.sh"));
        assert_eq!(cfg.files, vec![PathBuf::from("main.sc")]);
    }

    #[test]
    fn bare_define_maps_to_none_and_valued_define_maps_to_some() {
        let cfg = parse(&["-D", "MAC", "-D", "VERSION=2", "main.sc"]);
        let defines = cfg.command_line_defines();
        assert_eq!(defines.get("MAC"), Some(&None));
        assert_eq!(defines.get("VERSION"), Some(&Some("2".to_string())));
    }

    #[test]
    fn repeated_verbose_flag_counts() {
        let cfg = parse(&["-v", "-v", "main.sc"]);
        assert_eq!(cfg.verbose, 2);
    }

    #[test]
    fn dialect_accepts_only_the_two_spellings() {
        let cfg = parse(&["-t", "legacy", "main.sc"]);
        assert_eq!(cfg.dialect, Dialect::Legacy);
        assert!(Config::try_parse_from(["sfc", "-t", "bogus", "main.sc"]).is_err());
    }

    #[test]
    fn multiple_include_paths_accumulate() {
        let cfg = parse(&["-I", "a", "-I", "b", "main.sc"]);
        assert_eq!(cfg.include_paths, vec![PathBuf::from("a"), PathBuf::from("b")]);
    }
}
