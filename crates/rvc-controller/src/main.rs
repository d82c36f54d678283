use anyhow::{bail, Context, Result};
use clap::{Arg, ArgMatches, Command};
use rvc_controller::config::{load_file, LogConfig, LogFormat};
use rvc_controller::dispatch::{JobDispatcher, JobRequest};
use rvc_controller::dry_run::{DryRunJobClient, StaticReleaseStore};
use rvc_controller::verify::upgrade_source;
use rvc_controller::{
    cluster, ControllerConfig, FileJobConfigLoader, JobCache, JobConfigLoader,
    TracingEventRecorder,
};
use rvc_core::annotations::RELEASE_LABEL_VERIFY;
use rvc_core::{generate_safe_job_name, Architecture, Release};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Command::new("rvc-controller")
        .version(rvc_controller::VERSION)
        .about("Release verification controller")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("validate")
                .about("Load and validate controller and job configuration")
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("job-name")
                .about("Print the job name for a tag and verification")
                .arg(Arg::new("tag").required(true).help("Release tag name"))
                .arg(Arg::new("verify").required(true).help("Verification name"))
                .arg(
                    Arg::new("suffix")
                        .long("suffix")
                        .default_value("")
                        .help("Name suffix, e.g. a retry counter"),
                ),
        )
        .subcommand(
            Command::new("render")
                .about("Print the job that would be created for a tag, without submitting it")
                .arg(config_arg())
                .arg(
                    Arg::new("release")
                        .long("release")
                        .required(true)
                        .value_parser(clap::value_parser!(PathBuf))
                        .help("Release file (YAML or TOML)"),
                )
                .arg(
                    Arg::new("tag")
                        .long("tag")
                        .required(true)
                        .help("Tag to render the job for"),
                )
                .arg(
                    Arg::new("verify")
                        .long("verify")
                        .required(true)
                        .help("Verification name"),
                ),
        );

    let matches = cli.get_matches();

    match matches.subcommand() {
        Some(("validate", args)) => validate(args),
        Some(("job-name", args)) => {
            let tag = required(args, "tag")?;
            let verify = required(args, "verify")?;
            let suffix = args.get_one::<String>("suffix").map_or("", String::as_str);
            println!("{}", generate_safe_job_name(&format!("{tag}-{verify}"), suffix));
            Ok(())
        }
        Some(("render", args)) => render(args).await,
        _ => bail!("unknown command"),
    }
}

fn config_arg() -> Arg {
    Arg::new("config")
        .long("config")
        .required(true)
        .value_parser(clap::value_parser!(PathBuf))
        .help("Controller configuration (YAML or TOML)")
}

fn required<'a>(args: &'a ArgMatches, name: &str) -> Result<&'a str> {
    args.get_one::<String>(name)
        .map(String::as_str)
        .with_context(|| format!("missing argument {name}"))
}

fn init_tracing(config: &LogConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match config.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

fn load_config(args: &ArgMatches) -> Result<(ControllerConfig, Option<FileJobConfigLoader>)> {
    let path = args
        .get_one::<PathBuf>("config")
        .context("missing argument config")?;
    let config = ControllerConfig::load(path)
        .with_context(|| format!("loading {}", path.display()))?;
    init_tracing(&config.log);
    let jobs = config
        .job_config_path
        .as_ref()
        .map(FileJobConfigLoader::load)
        .transpose()
        .context("loading job configuration")?;
    Ok((config, jobs))
}

fn validate(args: &ArgMatches) -> Result<()> {
    let (config, jobs) = load_config(args)?;
    println!("Configuration valid");
    println!("  Job namespace: {}", config.job_namespace);
    println!("  Architecture: {}", Architecture::parse(&config.architecture));
    println!("  Workers: {}", config.workers);
    println!(
        "  Build cluster distributions: {}",
        config.build_cluster_distributions.len()
    );
    match jobs.and_then(|loader| loader.config()) {
        Some(jobs) => println!("  Job templates: {}", jobs.periodics.len()),
        None => println!("  Job templates: none configured"),
    }
    Ok(())
}

async fn render(args: &ArgMatches) -> Result<()> {
    let (config, jobs) = load_config(args)?;
    let Some(jobs) = jobs else {
        bail!("jobConfigPath must be set to render jobs");
    };
    let release_path = args
        .get_one::<PathBuf>("release")
        .context("missing argument release")?;
    let release: Release = load_file(release_path)
        .with_context(|| format!("loading {}", release_path.display()))?;
    let tag_name = required(args, "tag")?;
    let verify_name = required(args, "verify")?;

    let tag = release
        .target
        .find_tag(tag_name)
        .with_context(|| format!("release has no tag {tag_name}"))?;
    let verification = release
        .config
        .verify
        .get(verify_name)
        .with_context(|| format!("release has no verification {verify_name}"))?;

    let releases = Arc::new(StaticReleaseStore::new(release.clone()));
    let dispatcher = JobDispatcher::new(
        config.job_namespace.clone(),
        Architecture::parse(&config.architecture),
        Arc::new(JobCache::new()),
        Arc::new(DryRunJobClient),
        Arc::new(jobs) as Arc<dyn JobConfigLoader>,
        releases,
        Arc::new(TracingEventRecorder),
    )
    .with_distributions(
        config
            .build_cluster_distributions
            .iter()
            .map(cluster::from_config)
            .collect(),
    );

    let upgrade = if verification.upgrade {
        upgrade_source(&release, tag, verification)
    } else {
        None
    };
    let mut extra_labels = BTreeMap::new();
    extra_labels.insert(RELEASE_LABEL_VERIFY.to_string(), "true".to_string());
    let request = JobRequest {
        verify_name,
        suffix: "",
        verification,
        tag,
        previous_tag: upgrade.as_ref().map(|(name, _)| name.as_str()),
        previous_pull_spec: upgrade.as_ref().map(|(_, spec)| spec.as_str()),
        extra_labels,
    };

    let job = dispatcher.ensure_job(&release, &request).await?;
    println!("{}", serde_json::to_string_pretty(&job)?);
    for analysis in dispatcher.launch_analysis_jobs(&release, &request).await? {
        println!("{}", serde_json::to_string_pretty(&analysis)?);
    }
    Ok(())
}
