//! Command line interface definition

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use vessel_types::ColorChoice;

/// vessel - build recipes into a content-addressed store
#[derive(Parser)]
#[command(name = "vessel")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build recipes into a content-addressed store and share them as signed cars")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub global: GlobalArgs,
}

/// Global arguments available for all commands
#[derive(Parser)]
pub struct GlobalArgs {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable debug logging to stderr
    #[arg(long, global = true)]
    pub debug: bool,

    /// Color output control
    #[arg(long, global = true, value_enum)]
    pub color: Option<ColorChoice>,

    /// Use alternate config file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Root of the store, cache, archive and profiles
    #[arg(long, global = true, value_name = "DIR", env = "VESSEL_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Number of concurrent builds
    #[arg(short, long, global = true, value_name = "N")]
    pub jobs: Option<usize>,
}

/// Profile selection shared by linking commands
#[derive(Args, Clone)]
pub struct ProfileArg {
    /// Profile to link into
    #[arg(long, default_value = "default")]
    pub profile: String,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Build recipes and link them into a profile
    #[command(alias = "i")]
    Install {
        /// Recipe names
        #[arg(required = true)]
        recipes: Vec<String>,

        #[command(flatten)]
        profile: ProfileArg,
    },

    /// Build a recipe into the store without linking it
    Build {
        /// Recipe name
        recipe: String,
    },

    /// Print a recipe's id and the plan that would install it
    Calc {
        /// Recipe name
        recipe: String,
    },

    /// Pack a stored artifact into a signed car
    Pack {
        /// Package id
        id: String,
    },

    /// Push a recipe's cars from the archive to the configured remote store
    Upload {
        /// Recipe name
        recipe: String,

        /// Push the recipe's whole dependency closure, not only cars present locally
        #[arg(long)]
        all: bool,

        /// Directory holding the cars; defaults to `<data>/archive`
        #[arg(long, value_name = "DIR")]
        input_dir: Option<PathBuf>,

        /// Remote base URL, overriding `[upload] url`
        #[arg(long, value_name = "URL")]
        url: Option<String>,
    },

    /// Build recipes and run a shell with their programs on PATH
    Shell {
        /// Recipe names
        #[arg(required = true)]
        recipes: Vec<String>,

        /// Print the PATH the shell would get and exit
        #[arg(short = 'E', long)]
        print_env: bool,

        /// Command to run instead of `$SHELL`
        #[arg(last = true)]
        command: Vec<String>,
    },

    /// Install a published car and its car dependencies
    InstallCar {
        /// Repository publishing the car
        repo: String,

        /// Package id
        id: String,

        #[command(flatten)]
        profile: ProfileArg,
    },

    /// Remove artifacts no profile reaches
    Gc,

    /// Link a stored artifact into a profile
    Link {
        /// Package id
        id: String,

        #[command(flatten)]
        profile: ProfileArg,
    },

    /// Remove an artifact's links from a profile
    Unlink {
        /// Package id
        id: String,

        #[command(flatten)]
        profile: ProfileArg,
    },

    /// List ids linked into a profile
    #[command(alias = "ls")]
    List {
        #[command(flatten)]
        profile: ProfileArg,
    },

    /// Record missing input sums of a recipe, or print the sum of a file or URL
    Sum {
        /// Recipe name
        #[arg(required_unless_present = "path", conflicts_with = "path")]
        recipe: Option<String>,

        /// Local file or URL to sum
        #[arg(long, value_name = "PATH_OR_URL")]
        path: Option<String>,
    },

    /// Generate the car signing key
    Keygen {
        /// Replace an existing key
        #[arg(long)]
        force: bool,
    },

    /// Write the signer id to `<signer>.txt`
    ExportKey {
        /// Output directory
        #[arg(default_value = ".")]
        dir: PathBuf,
    },
}

impl Commands {
    /// Name used in logs and operation events
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Install { .. } => "install",
            Self::Build { .. } => "build",
            Self::Calc { .. } => "calc",
            Self::Pack { .. } => "pack",
            Self::Upload { .. } => "upload",
            Self::Shell { .. } => "shell",
            Self::InstallCar { .. } => "install-car",
            Self::Gc => "gc",
            Self::Link { .. } => "link",
            Self::Unlink { .. } => "unlink",
            Self::List { .. } => "list",
            Self::Sum { .. } => "sum",
            Self::Keygen { .. } => "keygen",
            Self::ExportKey { .. } => "export-key",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_takes_profile() {
        let cli = Cli::parse_from(["vessel", "install", "zlib", "curl", "--profile", "dev"]);
        match cli.command {
            Commands::Install { recipes, profile } => {
                assert_eq!(recipes, vec!["zlib", "curl"]);
                assert_eq!(profile.profile, "dev");
            }
            _ => panic!("expected install"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["vessel", "gc", "--json", "--jobs", "3", "--data-dir", "/tmp/v"]);
        assert!(cli.global.json);
        assert_eq!(cli.global.jobs, Some(3));
        assert_eq!(cli.global.data_dir, Some(PathBuf::from("/tmp/v")));
    }

    #[test]
    fn test_shell_takes_command_after_separator() {
        let cli = Cli::parse_from(["vessel", "shell", "zlib", "-E", "--", "make", "-j4"]);
        match cli.command {
            Commands::Shell {
                recipes,
                print_env,
                command,
            } => {
                assert_eq!(recipes, vec!["zlib"]);
                assert!(print_env);
                assert_eq!(command, vec!["make", "-j4"]);
            }
            _ => panic!("expected shell"),
        }
    }

    #[test]
    fn test_upload_flags() {
        let cli = Cli::parse_from(["vessel", "upload", "zlib", "--all", "--url", "http://cars"]);
        assert!(matches!(
            cli.command,
            Commands::Upload { all: true, url: Some(_), input_dir: None, .. }
        ));
    }

    #[test]
    fn test_sum_needs_recipe_or_path() {
        assert!(Cli::try_parse_from(["vessel", "sum"]).is_err());
        assert!(Cli::try_parse_from(["vessel", "sum", "zlib", "--path", "x"]).is_err());
        let cli = Cli::parse_from(["vessel", "sum", "--path", "./fix.patch"]);
        assert!(matches!(cli.command, Commands::Sum { recipe: None, path: Some(_) }));
    }
}
