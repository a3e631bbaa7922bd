use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use compose_galaxy::settings::load_source;
use compose_galaxy::simulate::{SimulatedProvisioner, DEFAULT_REGION};
use compose_kernel::config::ConfigSource;
use compose_kernel::error::{ComposeError, ConfigurationError};
use compose_kernel::graph::ResourceGraph;
use compose_kernel::outputs::OutputRegistry;
use compose_kernel::scheduler::{DependencyScheduler, SchedulerOptions};
use compose_kernel::types::ResourceId;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn context_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("context")
                .long("context")
                .value_parser(value_parser!(PathBuf))
                .help("JSON or TOML context file"),
        )
        .arg(
            Arg::new("set")
                .short('c')
                .long("set")
                .action(ArgAction::Append)
                .value_name("KEY=VALUE")
                .help("Override one context key"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .action(ArgAction::SetTrue)
                .help("Output as JSON"),
        )
}

fn cli() -> Command {
    Command::new("galaxy-compose")
        .version(compose_kernel::VERSION)
        .about("Compose and provision Galaxy on EKS")
        .subcommand_required(true)
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .subcommand(context_args(
            Command::new("plan").about("Resolve settings and print the ordered resource plan"),
        ))
        .subcommand(context_args(
            Command::new("deploy")
                .about("Provision the deployment with the simulated provisioner")
                .arg(
                    Arg::new("fail")
                        .long("fail")
                        .action(ArgAction::Append)
                        .value_name("ID")
                        .help("Make the provisioner fail for this resource"),
                )
                .arg(
                    Arg::new("max-in-flight")
                        .long("max-in-flight")
                        .default_value("1")
                        .value_parser(value_parser!(usize))
                        .help("Upper bound on concurrent provisioning calls"),
                )
                .arg(
                    Arg::new("region")
                        .long("region")
                        .default_value(DEFAULT_REGION)
                        .help("Region reported by the simulated provisioner"),
                ),
        ))
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn source_from(args: &ArgMatches) -> anyhow::Result<ConfigSource> {
    let context = args.get_one::<PathBuf>("context");
    let overrides: Vec<String> = args
        .get_many::<String>("set")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();
    load_source(context.map(PathBuf::as_path), std::env::vars(), &overrides)
        .context("loading deployment context")
}

fn plan(args: &ArgMatches) -> anyhow::Result<ExitCode> {
    let source = source_from(args)?;
    let (settings, graph) = compose_galaxy::compose(&source)?;
    let plan = graph.plan().map_err(ComposeError::from)?;

    if args.get_flag("json") {
        let document = serde_json::json!({ "settings": settings, "plan": plan });
        println!("{}", serde_json::to_string_pretty(&document)?);
        return Ok(ExitCode::SUCCESS);
    }

    for (unit, ids) in graph.units() {
        println!("{unit} ({} resources)", ids.len());
    }
    println!();
    for (index, step) in plan.steps.iter().enumerate() {
        let deps: Vec<&str> = step.dependencies.iter().map(|d| d.as_str()).collect();
        println!(
            "{:>3}. {:<10} {:<36} {:<24} <- [{}]",
            index + 1,
            step.unit,
            step.id,
            step.kind,
            deps.join(", ")
        );
    }
    for output in plan.outputs {
        println!("output {} <- {}.{}", output.name, output.source, output.attribute);
    }
    Ok(ExitCode::SUCCESS)
}

/// `--fail` ids that name no resource of `graph`
fn check_failures<'a>(
    graph: &ResourceGraph,
    ids: impl IntoIterator<Item = &'a String>,
) -> Result<Vec<&'a String>, ConfigurationError> {
    let mut wanted = Vec::new();
    for id in ids {
        if !graph.contains(&ResourceId::new(id.as_str())) {
            return Err(ConfigurationError::Source {
                origin: "--fail".to_string(),
                message: format!("`{id}` is not a resource of this deployment"),
            });
        }
        wanted.push(id);
    }
    Ok(wanted)
}

async fn deploy(args: &ArgMatches) -> anyhow::Result<ExitCode> {
    let source = source_from(args)?;
    let (_, graph) = compose_galaxy::compose(&source)?;

    let region = args
        .get_one::<String>("region")
        .map_or(DEFAULT_REGION, String::as_str);
    let mut provisioner = SimulatedProvisioner::new(region);
    for id in check_failures(&graph, args.get_many::<String>("fail").into_iter().flatten())? {
        tracing::warn!(resource = %id, "provisioner will fail this resource");
        provisioner = provisioner.failing(id.as_str());
    }
    let options = SchedulerOptions {
        max_in_flight: args.get_one::<usize>("max-in-flight").copied().unwrap_or(1),
    };

    let registry = OutputRegistry::new();
    let report = DependencyScheduler::with_options(Arc::new(provisioner), options)
        .run(&graph, &registry)
        .await
        .map_err(ComposeError::from)?;

    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.summary());
    }
    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));

    let result = match matches.subcommand() {
        Some(("plan", args)) => plan(args),
        Some(("deploy", args)) => deploy(args).await,
        _ => Ok(ExitCode::from(2)),
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            // configuration and topology problems abort before anything runs
            let aborted = err
                .chain()
                .filter_map(|cause| cause.downcast_ref::<ComposeError>())
                .any(ComposeError::aborts_run);
            let config_error = err.chain().any(|cause| cause.is::<ConfigurationError>());
            if aborted || config_error {
                ExitCode::from(2)
            } else {
                ExitCode::from(1)
            }
        }
    }
}
