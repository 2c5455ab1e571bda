pub mod handlers;

use std::path::PathBuf;

use clap::{value_parser, Arg, ArgAction, Command};

pub const SUITES: [&str; 7] = ["smoke", "crud", "isolation", "cascade", "shape", "stress", "full"];

pub fn build_cli() -> Command {
    Command::new("crudprobe")
        .version(env!("CARGO_PKG_VERSION"))
        .about("CRUD, tenant isolation and cascade checks for multi-tenant applications")
        .subcommand_required(true)
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Log at debug level"),
        )
        .subcommand(cmd_run())
        .subcommand(cmd_entities())
        .subcommand(cmd_check_shape())
}

fn config_arg() -> Arg {
    Arg::new("config")
        .long("config")
        .short('c')
        .value_name("PATH")
        .value_parser(value_parser!(PathBuf))
        .help("TOML configuration file (default: ./crudprobe.toml if present)")
}

fn json_arg() -> Arg {
    Arg::new("json")
        .long("json")
        .action(ArgAction::SetTrue)
        .help("Print JSON instead of a table")
}

fn cmd_run() -> Command {
    Command::new("run")
        .about("Run a test suite against the application")
        .arg(config_arg())
        .arg(json_arg())
        .arg(
            Arg::new("suite")
                .long("suite")
                .short('s')
                .default_value("smoke")
                .value_parser(SUITES)
                .help("Suite to run"),
        )
        .arg(
            Arg::new("target")
                .long("target")
                .short('t')
                .value_parser(["http", "webdriver", "twin"])
                .help("Driver to use; twin runs against the in-process reference app"),
        )
        .arg(
            Arg::new("base-url")
                .long("base-url")
                .value_name("URL")
                .help("Application base URL"),
        )
        .arg(
            Arg::new("threshold")
                .long("threshold")
                .value_parser(value_parser!(f64))
                .help("Minimum stress success rate in [0, 1]"),
        )
        .arg(
            Arg::new("operations")
                .long("operations")
                .value_parser(value_parser!(usize))
                .help("Concurrent operations per stress batch"),
        )
        .arg(
            Arg::new("retries")
                .long("retries")
                .value_parser(value_parser!(u32))
                .help("Re-runs for retryable failures"),
        )
        .arg(
            Arg::new("artifacts-dir")
                .long("artifacts-dir")
                .value_name("DIR")
                .help("Where diagnostic artifacts of failing cases are written"),
        )
}

fn cmd_entities() -> Command {
    Command::new("entities")
        .about("List registered entity types")
        .arg(config_arg())
        .arg(json_arg())
}

fn cmd_check_shape() -> Command {
    Command::new("check-shape")
        .about("Validate a JSON value file against a JSON shape file")
        .arg(
            Arg::new("shape")
                .long("shape")
                .required(true)
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("value")
                .long("value")
                .required(true)
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("sampling")
                .long("sampling")
                .default_value("first")
                .value_parser(["first", "all"])
                .help("Array elements to check: the first only, or all"),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_is_well_formed() {
        build_cli().debug_assert();
    }

    #[test]
    fn test_run_defaults_to_smoke() {
        let matches = build_cli().try_get_matches_from(["crudprobe", "run"]);
        let suite = matches
            .ok()
            .and_then(|m| m.subcommand_matches("run").cloned())
            .and_then(|m| m.get_one::<String>("suite").cloned());
        assert_eq!(suite.as_deref(), Some("smoke"));
    }

    #[test]
    fn test_unknown_suite_rejected() {
        let result = build_cli().try_get_matches_from(["crudprobe", "run", "--suite", "nope"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_check_shape_requires_files() {
        let result = build_cli().try_get_matches_from(["crudprobe", "check-shape"]);
        assert!(result.is_err());
    }
}
