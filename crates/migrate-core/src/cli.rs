//! Command-line surface of `migrate-agent`

use clap::{value_parser, Arg, ArgAction, Command};
use migrate_kernel::protocol::{ParamValue, ToolCall};

/// Process exit code on natural termination
pub const EXIT_OK: i32 = 0;
/// Process exit code on graph build failure or stage failure
pub const EXIT_RUN_FAILED: i32 = 1;
/// Process exit code on configuration error
pub const EXIT_CONFIG: i32 = 2;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

fn config_arg() -> Arg {
    Arg::new("config")
        .long("config")
        .short('c')
        .default_value("config.yaml")
        .help("Configuration file (.yaml, .yml or .toml)")
}

/// Full command tree
#[must_use]
pub fn command() -> Command {
    Command::new("migrate-agent")
        .version(crate::VERSION)
        .about("MySQL to Cloud SQL migration pipeline")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .global(true)
                .default_value("text")
                .value_parser(["text", "json"])
                .help("Log output format on stderr"),
        )
        .subcommand(
            Command::new("run")
                .about("Run the six-stage migration pipeline")
                .arg(
                    Arg::new("task")
                        .long("task")
                        .required(true)
                        .help("Migration task handed to the first stage"),
                )
                .arg(
                    Arg::new("encryption-method")
                        .long("encryption-method")
                        .default_value("default")
                        .value_parser(["default", "gcp-default", "legacy"])
                        .help("Encryption preference; legacy adds a CMEK note"),
                )
                .arg(config_arg())
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output the report as JSON"),
                ),
        )
        .subcommand(
            Command::new("strategy")
                .about("Show the strategy selected for a database size")
                .arg(
                    Arg::new("size-gb")
                        .long("size-gb")
                        .required(true)
                        .value_parser(value_parser!(f64))
                        .help("Database size in GB"),
                )
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("tools")
                .about("Inspect or call the source tool server")
                .subcommand_required(true)
                .arg(config_arg())
                .subcommand(Command::new("list").about("List registered tools"))
                .subcommand(
                    Command::new("call")
                        .about("Call one tool")
                        .arg(Arg::new("name").required(true).help("Tool name"))
                        .arg(
                            Arg::new("params")
                                .num_args(0..)
                                .help("Parameters as key=value"),
                        ),
                ),
        )
}

/// Build a call from `key=value` arguments
///
/// Integer-looking values become integers, `true`/`false` become flags.
///
/// # Errors
/// An argument without `=` or with an empty key.
pub fn tool_call<'a>(name: &str, params: impl IntoIterator<Item = &'a str>) -> Result<ToolCall, String> {
    let mut call = ToolCall::new(name);
    for param in params {
        let (key, value) = param
            .split_once('=')
            .filter(|(k, _)| !k.is_empty())
            .ok_or_else(|| format!("expected key=value, got '{param}'"))?;
        call = call.with_param(key, param_value(value));
    }
    Ok(call)
}

fn param_value(value: &str) -> ParamValue {
    if let Ok(i) = value.parse::<i64>() {
        ParamValue::Int(i)
    } else if let Ok(b) = value.parse::<bool>() {
        ParamValue::Bool(b)
    } else {
        ParamValue::Text(value.to_string())
    }
}
