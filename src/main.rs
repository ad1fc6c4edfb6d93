use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use quickmod::core::version::{PackageRef, Version, VersionRef};
use quickmod::{
    init_logging, Catalog, InstanceTarget, ModError, ModResult, QuickModInstaller, ResolverSettings,
};

/// quickmod - QuickMod package inspector and installer
///
/// Examples:
///   quickmod inspect jei.json
///   quickmod install jei.json --instance ~/instances/modded --version 4.2
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Data directory holding settings and the download cache
    #[arg(long = "data-dir", value_name = "PATH", global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print the versions of a QuickMod file and the source each would use
    Inspect(InspectArgs),

    /// Install one version of a QuickMod file into an instance directory
    Install(InstallArgs),
}

#[derive(clap::Args, Debug)]
struct InspectArgs {
    #[arg(value_name = "FILE")]
    file: PathBuf,
}

#[derive(clap::Args, Debug)]
struct InstallArgs {
    #[arg(value_name = "FILE")]
    file: PathBuf,

    /// Instance root directory
    #[arg(long, value_name = "DIR")]
    instance: PathBuf,

    /// Version to install (defaults to the newest valid one)
    #[arg(long, value_name = "VERSION")]
    version: Option<String>,
}

fn load_catalog(file: &Path) -> ModResult<(Catalog, PackageRef)> {
    let json = std::fs::read_to_string(file).map_err(|e| ModError::io(file, e))?;
    let mut catalog = Catalog::new();
    let package = catalog.load_json(&json)?;
    Ok((catalog, package))
}

fn inspect(args: &InspectArgs, settings: &ResolverSettings) -> ModResult<()> {
    let (catalog, package) = load_catalog(&args.file)?;
    println!("{}", package);

    for version in catalog.versions_of(&package) {
        let status = if version.is_valid() { "ok" } else { "invalid" };
        println!(
            "  {} [{}] {} ({})",
            version.descriptor(),
            version.type_string(),
            version.install_type,
            status
        );
        for problem in &version.problems {
            println!("      ! {}", problem);
        }
        if version.install_type.has_artifact() {
            match version.highest_priority_download(settings.preferred_download_kind) {
                Ok(source) => println!("      {} {}", source.kind, source.url),
                Err(e) => println!("      no source: {}", e),
            }
        }
        for (kind, relation) in version.relations.iter() {
            println!("      {} {}", kind, relation.target);
        }
    }
    Ok(())
}

async fn install(args: &InstallArgs, settings: &ResolverSettings) -> ModResult<()> {
    let (catalog, package) = load_catalog(&args.file)?;
    let version = match &args.version {
        Some(raw) => catalog
            .find(&VersionRef::exact(package.clone(), Version::parse(raw)?))
            .ok_or_else(|| ModError::NotFound(format!("{}@{}", package, raw)))?,
        None => catalog
            .latest(&package)
            .ok_or_else(|| ModError::NotFound(format!("no valid version of {}", package)))?,
    };

    let installer = Arc::new(QuickModInstaller::from_settings(settings)?);
    let target = Arc::new(InstanceTarget::new(&args.instance));
    let state = installer.spawn(version.clone(), target).wait().await?;
    info!("{}: {:?}", version.id(), state);
    println!("{} {:?}", version.id(), state);
    Ok(())
}

#[tokio::main]
async fn main() -> ModResult<()> {
    init_logging();
    let cli = Cli::parse();
    let data_dir = cli
        .data_dir
        .clone()
        .unwrap_or_else(quickmod::core::settings::default_data_dir);
    let settings = ResolverSettings::load(&data_dir);

    match &cli.command {
        Commands::Inspect(args) => inspect(args, &settings)?,
        Commands::Install(args) => install(args, &settings).await?,
    }
    Ok(())
}
