//! `waymark` command line: catalog seeding, progress operations and the simulator

use anyhow::{bail, Context};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use waymark_core::{
    DependencySpec, EdgeConditions, MilestoneCode, SubscriptionTier, UserId, UserProfile,
};
use waymark_engine::simulator::{run_simulator, SimulatorConfig};
use waymark_engine::{Catalog, EngineConfig, ProgressEngine, ProgressUpdate};
use waymark_store::{MilestoneStore, SqliteStore};

fn parse_user(raw: &str) -> Result<UserId, uuid::Error> {
    raw.parse()
}

fn parse_code(raw: &str) -> Result<MilestoneCode, waymark_core::CodeError> {
    MilestoneCode::parse(raw)
}

fn user_arg() -> Arg {
    Arg::new("user")
        .required(true)
        .value_parser(parse_user)
        .help("User id (UUID)")
}

fn milestone_arg(name: &'static str) -> Arg {
    Arg::new(name)
        .required(true)
        .value_parser(parse_code)
        .help("Milestone code, e.g. M3")
}

fn cli() -> Command {
    Command::new("waymark")
        .version(waymark_engine::VERSION)
        .about("Dependency-aware milestone progress engine")
        .subcommand_required(true)
        .arg(
            Arg::new("db")
                .long("db")
                .global(true)
                .default_value("waymark.db")
                .value_parser(value_parser!(PathBuf))
                .help("SQLite database file"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Engine configuration (TOML)"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            Command::new("seed")
                .about("Register milestones and edges from a catalog file")
                .arg(
                    Arg::new("catalog")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Catalog file (TOML)"),
                ),
        )
        .subcommand(
            Command::new("add-dep")
                .about("Add a dependency edge")
                .arg(milestone_arg("milestone"))
                .arg(milestone_arg("depends-on"))
                .arg(
                    Arg::new("optional")
                        .long("optional")
                        .action(ArgAction::SetTrue)
                        .help("Edge does not block the dependent"),
                )
                .arg(
                    Arg::new("min-completion")
                        .long("min-completion")
                        .default_value("100")
                        .value_parser(value_parser!(u8).range(0..=100))
                        .help("Completion percentage the prerequisite must reach"),
                )
                .arg(
                    Arg::new("min-tier")
                        .long("min-tier")
                        .value_parser(|raw: &str| raw.parse::<SubscriptionTier>())
                        .help("Subscription tier the user must hold"),
                ),
        )
        .subcommand(
            Command::new("remove-dep")
                .about("Remove a dependency edge")
                .arg(milestone_arg("milestone"))
                .arg(milestone_arg("depends-on")),
        )
        .subcommand(
            Command::new("init-user")
                .about("Create progress rows for every milestone")
                .arg(user_arg()),
        )
        .subcommand(
            Command::new("start")
                .about("Start or retry a milestone")
                .arg(user_arg())
                .arg(milestone_arg("milestone")),
        )
        .subcommand(
            Command::new("progress")
                .about("Record a step of an in-progress milestone")
                .arg(user_arg())
                .arg(milestone_arg("milestone"))
                .arg(
                    Arg::new("step")
                        .long("step")
                        .required(true)
                        .value_parser(value_parser!(u32)),
                )
                .arg(
                    Arg::new("total")
                        .long("total")
                        .value_parser(value_parser!(u32))
                        .help("Total number of steps"),
                )
                .arg(
                    Arg::new("reset")
                        .long("reset")
                        .action(ArgAction::SetTrue)
                        .help("Allow the step to move backwards"),
                ),
        )
        .subcommand(
            Command::new("complete")
                .about("Complete a milestone and unlock its dependents")
                .arg(user_arg())
                .arg(milestone_arg("milestone"))
                .arg(
                    Arg::new("score")
                        .long("score")
                        .value_parser(value_parser!(f64))
                        .help("Quality score, 0 - 100"),
                )
                .arg(
                    Arg::new("output")
                        .long("output")
                        .help("Deliverable as a JSON document"),
                ),
        )
        .subcommand(
            Command::new("fail")
                .about("Record a failed attempt")
                .arg(user_arg())
                .arg(milestone_arg("milestone"))
                .arg(Arg::new("error").long("error").default_value("failed")),
        )
        .subcommand(
            Command::new("unlock")
                .about("Unlock a milestone explicitly (payment, admin)")
                .arg(user_arg())
                .arg(milestone_arg("milestone")),
        )
        .subcommand(
            Command::new("validate")
                .about("Check whether a user may work on a milestone")
                .arg(user_arg())
                .arg(milestone_arg("milestone"))
                .arg(
                    Arg::new("skip-conditions")
                        .long("skip-conditions")
                        .action(ArgAction::SetTrue)
                        .help("Ignore edge conditions"),
                ),
        )
        .subcommand(
            Command::new("chain")
                .about("List transitive prerequisites, roots first")
                .arg(milestone_arg("milestone"))
                .arg(
                    Arg::new("include-optional")
                        .long("include-optional")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("tree")
                .about("Show every milestone with the user's state")
                .arg(user_arg()),
        )
        .subcommand(
            Command::new("profile")
                .about("Set the user's subscription tier")
                .arg(user_arg())
                .arg(
                    Arg::new("tier")
                        .long("tier")
                        .required(true)
                        .value_parser(|raw: &str| raw.parse::<SubscriptionTier>()),
                ),
        )
        .subcommand(
            Command::new("simulate")
                .about("Run the randomized invariant simulator")
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .default_value("42")
                        .value_parser(value_parser!(u64))
                        .help("Random seed for reproducibility"),
                )
                .arg(
                    Arg::new("operations")
                        .long("operations")
                        .default_value("2000")
                        .value_parser(value_parser!(u64))
                        .help("Number of lifecycle operations"),
                )
                .arg(
                    Arg::new("milestones")
                        .long("milestones")
                        .default_value("12")
                        .value_parser(value_parser!(usize)),
                )
                .arg(
                    Arg::new("users")
                        .long("users")
                        .default_value("4")
                        .value_parser(value_parser!(usize)),
                )
                .arg(
                    Arg::new("keep-going")
                        .long("keep-going")
                        .action(ArgAction::SetTrue)
                        .help("Continue after the first violation"),
                ),
        )
}

const DEFAULT_LOG_FILTER: &str = "info";

/// `RUST_LOG` when it parses, `info` otherwise
fn env_filter(from_env: Option<&str>) -> EnvFilter {
    from_env
        .and_then(|raw| EnvFilter::try_new(raw).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

fn init_tracing(json: bool) {
    let filter = env_filter(std::env::var(EnvFilter::DEFAULT_ENV).ok().as_deref());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn user(args: &ArgMatches) -> anyhow::Result<UserId> {
    args.get_one::<UserId>("user").copied().context("missing <user>")
}

fn code<'a>(args: &'a ArgMatches, name: &str) -> anyhow::Result<&'a MilestoneCode> {
    args.get_one::<MilestoneCode>(name)
        .with_context(|| format!("missing <{name}>"))
}

fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));

    if let Some(("simulate", args)) = matches.subcommand() {
        return simulate(args);
    }

    let config = match matches.get_one::<PathBuf>("config") {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    let db = matches
        .get_one::<PathBuf>("db")
        .context("missing --db")?;
    let store = SqliteStore::open(db).with_context(|| format!("opening {}", db.display()))?;
    let engine = ProgressEngine::new(store, config);

    match matches.subcommand() {
        Some((name, args)) => dispatch(&engine, name, args),
        None => bail!("no subcommand given"),
    }
}

fn dispatch<S: MilestoneStore>(
    engine: &ProgressEngine<S>,
    name: &str,
    args: &ArgMatches,
) -> anyhow::Result<()> {
    match name {
        "seed" => {
            let path = args
                .get_one::<PathBuf>("catalog")
                .context("missing <catalog>")?;
            let report = Catalog::load(path)?.apply(engine)?;
            print(&report)
        }
        "add-dep" => {
            let mut spec = if args.get_flag("optional") {
                DependencySpec::optional()
            } else {
                DependencySpec::required()
            };
            if let Some(min) = args.get_one::<u8>("min-completion") {
                spec = spec.with_min_completion(*min);
            }
            if let Some(tier) = args.get_one::<SubscriptionTier>("min-tier") {
                spec = spec.with_conditions(EdgeConditions::none().with_min_tier(*tier));
            }
            let edge =
                engine.add_dependency(code(args, "milestone")?, code(args, "depends-on")?, spec)?;
            print(&edge)
        }
        "remove-dep" => {
            let removed =
                engine.remove_dependency(code(args, "milestone")?, code(args, "depends-on")?)?;
            print(&serde_json::json!({ "removed": removed }))
        }
        "init-user" => print(&engine.initialize_user(user(args)?)?),
        "start" => print(&engine.start_milestone(user(args)?, code(args, "milestone")?)?),
        "progress" => {
            let step = args.get_one::<u32>("step").copied().unwrap_or_default();
            let mut update = ProgressUpdate::step(step);
            if let Some(total) = args.get_one::<u32>("total") {
                update = update.with_total(*total);
            }
            if args.get_flag("reset") {
                update = update.reset();
            }
            print(&engine.update_progress(user(args)?, code(args, "milestone")?, update)?)
        }
        "complete" => {
            let output = args
                .get_one::<String>("output")
                .map(|raw| serde_json::from_str::<serde_json::Value>(raw))
                .transpose()
                .context("--output is not valid JSON")?;
            let score = args.get_one::<f64>("score").copied();
            let outcome =
                engine.complete_milestone(user(args)?, code(args, "milestone")?, output, score)?;
            print(&outcome)
        }
        "fail" => {
            let message = args
                .get_one::<String>("error")
                .map_or("failed", String::as_str);
            print(&engine.fail_milestone(user(args)?, code(args, "milestone")?, message)?)
        }
        "unlock" => print(&engine.unlock_milestone(user(args)?, code(args, "milestone")?)?),
        "validate" => {
            let check_conditions = !args.get_flag("skip-conditions");
            print(&engine.validate_dependencies(
                user(args)?,
                code(args, "milestone")?,
                check_conditions,
            )?)
        }
        "chain" => print(&engine.get_dependency_chain(
            code(args, "milestone")?,
            args.get_flag("include-optional"),
        )?),
        "tree" => print(&engine.get_user_tree(user(args)?)?),
        "profile" => {
            let tier = args
                .get_one::<SubscriptionTier>("tier")
                .copied()
                .context("missing --tier")?;
            let profile = UserProfile::new(user(args)?).with_tier(tier);
            engine.set_profile(&profile)?;
            print(&profile)
        }
        other => bail!("unknown subcommand {other}"),
    }
}

fn simulate(args: &ArgMatches) -> anyhow::Result<()> {
    let defaults = SimulatorConfig::default();
    let config = SimulatorConfig {
        seed: args.get_one::<u64>("seed").copied().unwrap_or(defaults.seed),
        total_operations: args
            .get_one::<u64>("operations")
            .copied()
            .unwrap_or(defaults.total_operations),
        milestones: args
            .get_one::<usize>("milestones")
            .copied()
            .unwrap_or(defaults.milestones),
        users: args
            .get_one::<usize>("users")
            .copied()
            .unwrap_or(defaults.users),
        stop_on_first_violation: !args.get_flag("keep-going"),
        ..defaults
    };

    let report = run_simulator(config)?;
    println!("{}", report.generate_text());
    std::process::exit(if report.passed() { 0 } else { 1 });
}
