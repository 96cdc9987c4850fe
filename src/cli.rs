use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "apkmux")]
#[command(version)]
#[command(about = "Inspect and repackage ZIP/APK archives", long_about = None)]
#[command(after_help = "Examples:\n  \
  apkmux list -v app.apk                       list entries with sizes and dates\n  \
  apkmux multiplex app.apk -e assets/base.apk  share entries duplicated in assets/base.apk\n  \
  apkmux compare app.apk app_multiplex.apk     check two archives hold the same content")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log debug details to stderr
    #[arg(long, global = true)]
    pub debug: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List archive entries
    List {
        /// ZIP file path
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// List verbosely
        #[arg(short = 'v')]
        verbose: bool,
    },

    /// Replace entries duplicated inside a stored host entry by references into it
    Multiplex {
        /// Input ZIP file path
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Host entry holding the embedded archive, e.g. assets/base.apk
        #[arg(short = 'e', long = "entry", value_name = "NAME")]
        host_entry: String,

        /// Output path (default: INPUT with "_multiplex" before the extension)
        #[arg(short = 'o', value_name = "OUTPUT")]
        output: Option<PathBuf>,

        /// Print every virtual entry
        #[arg(short = 'v')]
        verbose: bool,
    },

    /// Check that two archives hold the same entries and content
    Compare {
        #[arg(value_name = "FILE1")]
        first: PathBuf,

        #[arg(value_name = "FILE2")]
        second: PathBuf,
    },

    /// Show the signing sections of an archive
    Sections {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

/// `app.apk` becomes `app_multiplex.apk`; a name without extension gets the suffix appended.
pub fn default_multiplex_output(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match input.extension() {
        Some(ext) => format!("{}_multiplex.{}", stem, ext.to_string_lossy()),
        None => format!("{}_multiplex", stem),
    };
    input.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_multiplex_output() {
        assert_eq!(
            default_multiplex_output(Path::new("out/app.apk")),
            PathBuf::from("out/app_multiplex.apk")
        );
        assert_eq!(
            default_multiplex_output(Path::new("bundle")),
            PathBuf::from("bundle_multiplex")
        );
    }

    #[test]
    fn test_parse_multiplex() {
        let cli = Cli::parse_from(["apkmux", "multiplex", "app.apk", "-e", "assets/base.apk"]);
        match cli.command {
            Command::Multiplex {
                input,
                host_entry,
                output,
                ..
            } => {
                assert_eq!(input, PathBuf::from("app.apk"));
                assert_eq!(host_entry, "assets/base.apk");
                assert!(output.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
