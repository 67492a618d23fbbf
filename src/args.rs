//! Command-line argument parsing and processing.
//!
//! Arguments are parsed by hand into a [`CliAction`]. Global flags may appear
//! before or after the subcommand; unknown flags or stray words turn into
//! [`CliAction::ShowHelpDueToError`].

/// Options shared by every subcommand.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalOptions {
    pub debug_enabled: bool,
    pub config_dir: Option<String>,
    pub log_file: Option<String>,
}

/// Represents the parsed command-line arguments and their intended actions.
#[derive(Debug, PartialEq)]
pub enum CliAction {
    /// Run the daemon (default)
    Run(GlobalOptions),
    /// Print the state snapshot of the configured user as JSON
    Status(GlobalOptions),
    /// Report whether now lies inside `[start, end)`
    Check {
        options: GlobalOptions,
        start: String,
        end: String,
    },
    /// Display help information and exit
    ShowHelp,
    /// Display version information and exit
    ShowVersion,
    /// Show help due to bad arguments and exit
    ShowHelpDueToError(String),
}

/// Result of parsing command-line arguments.
pub struct ParsedArgs {
    pub action: CliAction,
}

impl ParsedArgs {
    /// Parse command-line arguments into a structured result.
    ///
    /// The first item is the program name and is skipped.
    pub fn parse<I, S>(args: I) -> ParsedArgs
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args_vec: Vec<String> = args
            .into_iter()
            .skip(1)
            .map(|s| s.as_ref().to_string())
            .collect();

        // Help and version take precedence over everything else
        if args_vec
            .iter()
            .any(|arg| arg == "--version" || arg == "-V" || arg == "-v")
        {
            return ParsedArgs {
                action: CliAction::ShowVersion,
            };
        }
        if args_vec.iter().any(|arg| arg == "--help" || arg == "-h") {
            return ParsedArgs {
                action: CliAction::ShowHelp,
            };
        }

        let action = match Self::split(&args_vec) {
            Ok((options, positional)) => Self::dispatch(options, positional),
            Err(message) => CliAction::ShowHelpDueToError(message),
        };
        ParsedArgs { action }
    }

    /// Separate global flags (and their values) from positional words.
    fn split(args: &[String]) -> Result<(GlobalOptions, Vec<String>), String> {
        let mut options = GlobalOptions::default();
        let mut positional = Vec::new();
        let mut iter = args.iter();

        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--debug" | "-d" => options.debug_enabled = true,
                "--config" | "-c" => {
                    let dir = iter
                        .next()
                        .ok_or_else(|| format!("{arg} requires a directory"))?;
                    options.config_dir = Some(dir.clone());
                }
                "--log" | "-l" => {
                    let file = iter
                        .next()
                        .ok_or_else(|| format!("{arg} requires a file path"))?;
                    options.log_file = Some(file.clone());
                }
                flag if flag.starts_with('-') && flag.len() > 1 => {
                    return Err(format!("Unknown option: {flag}"));
                }
                word => positional.push(word.to_string()),
            }
        }

        Ok((options, positional))
    }

    fn dispatch(options: GlobalOptions, positional: Vec<String>) -> CliAction {
        let mut words = positional.into_iter();
        let Some(command) = words.next() else {
            return CliAction::Run(options);
        };
        let rest: Vec<String> = words.collect();

        match (command.as_str(), rest.as_slice()) {
            ("run", []) => CliAction::Run(options),
            ("status", []) => CliAction::Status(options),
            ("check", [start, end]) => CliAction::Check {
                options,
                start: start.clone(),
                end: end.clone(),
            },
            ("check", _) => {
                CliAction::ShowHelpDueToError("check expects <start> <end> as HH:MM".to_string())
            }
            ("run" | "status", _) => {
                CliAction::ShowHelpDueToError(format!("{command} takes no arguments"))
            }
            (other, _) => CliAction::ShowHelpDueToError(format!("Unknown command: {other}")),
        }
    }

    /// Convenience method to parse from std::env::args()
    pub fn from_env() -> ParsedArgs {
        Self::parse(std::env::args())
    }
}

/// Displays version information using custom logging style.
pub fn display_version_info() {
    log_version!();
    log_pipe!();
    println!("┗ {}", env!("CARGO_PKG_DESCRIPTION"));
}

/// Displays custom help message using logger methods.
pub fn display_help() {
    log_version!();
    log_block_start!(env!("CARGO_PKG_DESCRIPTION"));
    log_block_start!("Usage:");
    log_indented!("appearanced [OPTIONS] [COMMAND]");
    log_block_start!("Options:");
    log_indented!("-c, --config <dir>     Use custom configuration directory");
    log_indented!("-d, --debug            Enable detailed debug output");
    log_indented!("-h, --help             Print help information");
    log_indented!("-l, --log <file>       Write output to a file instead of stdout");
    log_indented!("-V, --version          Print version information");
    log_block_start!("Commands:");
    log_indented!("run                    Run the scheduling daemon (default)");
    log_indented!("status                 Print the configured user's state as JSON");
    log_indented!("check <start> <end>    Tell whether now is inside an HH:MM window");
    log_end!();
}
