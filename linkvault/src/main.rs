// Linkvault - symlink-based virtual file system with capacity-aware
// disc saves

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use linkvault_common::{SaveMode, VaultConfig, parse_size};

mod backup;
mod collection;
mod console;
mod disc;
mod executor;
mod filter;
mod freeze;
mod fsutil;
mod index;
mod planner;
mod props;
mod query;
mod savemap;
mod session;
mod store;
#[cfg(test)]
mod testutil;
mod vfs;

use console::Console;
use executor::SaveOptions;
use filter::FilterSpec;
use session::Session;

#[derive(Parser)]
#[command(
    name = "linkvault",
    version,
    about = "Organize collections as a virtual tree of symlinks and save them across discs"
)]
struct Cli {
    /// Verbose (debug-level) output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// VFS to operate on; defaults to the VFS containing the working
    /// directory
    #[arg(long, global = true)]
    vfs: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    Copy,
    Move,
}

impl From<ModeArg> for SaveMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Copy => SaveMode::Copy,
            ModeArg::Move => SaveMode::Move,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Create a new VFS in the current or specified directory
    NewVfs {
        name: String,
        /// Directory to create the virtual base in
        #[arg(short, long)]
        path: Option<PathBuf>,
    },
    /// Delete a VFS by name
    DelVfs { name: String },
    /// List all available VFS
    ListVfs,
    /// Show the details of a VFS by name or containing path
    ShowVfs {
        #[arg(short, long)]
        name: Option<String>,
        #[arg(short, long)]
        path: Option<PathBuf>,
    },

    /// Mirror an actual directory into the VFS as a new collection
    AddCollection {
        path: PathBuf,
        /// Collection name; defaults to the directory name
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Reconcile a collection with its actual directory
    SyncCollection { name: String },
    /// List all collections of the VFS
    ListCollections,
    /// Show the details of a collection by name or containing path
    ShowCollection {
        #[arg(short, long)]
        name: Option<String>,
        #[arg(short, long)]
        path: Option<PathBuf>,
    },

    /// Register a disc
    AddDisc {
        path: PathBuf,
        /// Disc name; defaults to the directory name
        #[arg(short, long)]
        name: Option<String>,
        /// Capacity limit (e.g. 500G); unlimited when omitted
        #[arg(short, long)]
        capacity: Option<String>,
    },
    /// Remove a disc from the registry
    DelDisc { name: String },
    /// List all registered discs with usage
    ListDiscs,

    /// Map a virtual directory onto an actual directory for saves
    AddSaveMap {
        virtual_path: PathBuf,
        actual_path: PathBuf,
    },
    /// Delete all save mappings
    DelSaveMaps,
    /// List all save mappings
    ListSaveMaps,

    /// Set a property on a virtual file or directory
    SetProp {
        path: PathBuf,
        prop: String,
        #[arg(long, default_value = "true")]
        val: String,
    },
    /// Delete a property from a virtual file or directory
    DelProp { path: PathBuf, prop: String },
    /// List the properties of a virtual file or directory
    ListProps { path: PathBuf },

    /// Freeze a virtual directory (excluded from filters)
    Freeze { path: Option<PathBuf> },
    /// Unfreeze a virtual directory
    Unfreeze { path: Option<PathBuf> },
    /// List frozen directories under a virtual directory
    ListFrozen { path: Option<PathBuf> },

    /// Filter the VFS by extension category
    FilterByExt {
        /// Category to keep (repeatable)
        #[arg(short, long = "category", required = true)]
        categories: Vec<String>,
    },
    /// Filter the VFS by file size range in bytes (negative bound = open)
    #[command(arg_required_else_help = true)]
    FilterBySize {
        #[arg(allow_negative_numbers = true)]
        size_start: i64,
        #[arg(allow_negative_numbers = true)]
        size_end: i64,
    },
    /// Filter the VFS by property (NAME or NAME=VALUE, repeatable)
    FilterByProp {
        #[arg(short, long = "prop", required = true)]
        props: Vec<String>,
    },
    /// List the applied filters
    ListFilters,
    /// Clear all filters, merging their content back
    ClearFilters,

    /// Show the metadata behind a symlink or virtual directory
    QueryMeta { path: Option<PathBuf> },

    /// Back up the VFS metadata and virtual tree
    Backup {
        #[arg(short, long)]
        comment: Option<String>,
    },
    /// List backups (all VFS, or --vfs to narrow)
    ListBackups,
    /// Delete a backup by name
    DelBackup { name: String },
    /// Restore a backup by name
    Restore { name: String },

    /// Save the VFS onto discs per the save mappings, or resume a
    /// pending save
    Save {
        #[arg(short, long, value_enum, default_value = "copy")]
        mode: ModeArg,
        /// Discard prior progress and replan
        #[arg(short, long)]
        restart: bool,
        /// Delete the save progress file after completion
        #[arg(short = 'd', long)]
        delete_save_file: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    if let Err(err) = run(cli) {
        log::error!("{err:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = VaultConfig::load();
    log::debug!("Vault home: {}", config.home.display());
    let mut session = Session::new(config);
    session.ensure_home()?;

    let result = dispatch(&mut session, &cli);

    // Delayed metadata writes are committed on both exit paths, exactly
    // like the per-command state the original process would flush.
    let flush = session
        .flush_stats()
        .and_then(|_| session.store.flush_pending());
    result?;
    flush.context("failed to flush pending metadata")?;
    Ok(())
}

fn dispatch(session: &mut Session, cli: &Cli) -> Result<()> {
    match &cli.command {
        Command::NewVfs { name, path } => {
            let parent = path.clone().map(Ok).unwrap_or_else(current_dir)?;
            vfs::new_vfs(session, name, &parent)?;
        }
        Command::DelVfs { name } => vfs::del_vfs(session, name)?,
        Command::ListVfs => vfs::list_vfs(session)?,
        Command::ShowVfs { name, path } => match (name, path) {
            (Some(_), Some(_)) => bail!("only one of --name or --path may be specified"),
            (Some(name), None) => vfs::show_vfs_by_name(session, name)?,
            (None, Some(path)) => vfs::show_vfs_by_path(session, path)?,
            (None, None) => vfs::show_vfs_by_path(session, &current_dir()?)?,
        },

        Command::AddCollection { path, name } => {
            vfs::select_vfs(session, cli.vfs.as_deref())?;
            let name = match name {
                Some(name) => name.clone(),
                None => dir_name(path)?,
            };
            collection::add_collection(session, &name, path)?;
        }
        Command::SyncCollection { name } => {
            vfs::select_vfs(session, cli.vfs.as_deref())?;
            collection::sync_collection(session, name)?;
        }
        Command::ListCollections => {
            vfs::select_vfs(session, cli.vfs.as_deref())?;
            collection::list_collections(session)?;
        }
        Command::ShowCollection { name, path } => {
            vfs::select_vfs(session, cli.vfs.as_deref())?;
            match (name, path) {
                (Some(_), Some(_)) => bail!("only one of --name or --path may be specified"),
                (Some(name), None) => collection::show_collection_by_name(session, name)?,
                (None, Some(path)) => collection::show_collection_by_path(session, path)?,
                (None, None) => collection::show_collection_by_path(session, &current_dir()?)?,
            }
        }

        Command::AddDisc {
            path,
            name,
            capacity,
        } => {
            vfs::select_vfs(session, cli.vfs.as_deref())?;
            let name = match name {
                Some(name) => name.clone(),
                None => dir_name(path)?,
            };
            let capacity = capacity
                .as_deref()
                .map(parse_size)
                .transpose()
                .map_err(|e| anyhow::anyhow!("invalid --capacity: {e}"))?;
            disc::add_disc(session, &name, path, capacity)?;
        }
        Command::DelDisc { name } => {
            vfs::select_vfs(session, cli.vfs.as_deref())?;
            disc::del_disc(session, name)?;
        }
        Command::ListDiscs => {
            vfs::select_vfs(session, cli.vfs.as_deref())?;
            disc::list_discs(session)?;
        }

        Command::AddSaveMap {
            virtual_path,
            actual_path,
        } => {
            vfs::select_vfs(session, cli.vfs.as_deref())?;
            if !virtual_path.is_dir() {
                bail!("path {} is not a directory", virtual_path.display());
            }
            if !actual_path.is_dir() {
                bail!("path {} is not a directory", actual_path.display());
            }
            savemap::add_save_map(session, virtual_path, actual_path)?;
        }
        Command::DelSaveMaps => {
            vfs::select_vfs(session, cli.vfs.as_deref())?;
            savemap::del_save_maps(session)?;
        }
        Command::ListSaveMaps => {
            vfs::select_vfs(session, cli.vfs.as_deref())?;
            savemap::list_save_maps(session)?;
        }

        Command::SetProp { path, prop, val } => {
            let path = select_by_path(session, Some(path))?;
            props::set_prop(session, &path, prop, val, true)?;
        }
        Command::DelProp { path, prop } => {
            let path = select_by_path(session, Some(path))?;
            props::del_prop(session, &path, prop)?;
        }
        Command::ListProps { path } => {
            let path = select_by_path(session, Some(path))?;
            props::list_props(session, &path)?;
        }

        Command::Freeze { path } => {
            let path = select_by_path(session, path.as_ref())?;
            freeze::freeze_dir(session, &path)?;
        }
        Command::Unfreeze { path } => {
            let path = select_by_path(session, path.as_ref())?;
            freeze::unfreeze_dir(session, &path)?;
        }
        Command::ListFrozen { path } => {
            let path = select_by_path(session, path.as_ref())?;
            freeze::list_frozen_dirs(session, &path)?;
        }

        Command::FilterByExt { categories } => {
            vfs::select_vfs(session, cli.vfs.as_deref())?;
            let known = filter::all_categories();
            for category in categories {
                if !known.contains(&category.as_str()) {
                    bail!(
                        "unknown category \"{category}\"; expected one of: {}",
                        known.join(", ")
                    );
                }
            }
            filter::apply_filter(
                session,
                &FilterSpec::Extension {
                    categories: categories.clone(),
                },
            )?;
        }
        Command::FilterBySize {
            size_start,
            size_end,
        } => {
            vfs::select_vfs(session, cli.vfs.as_deref())?;
            filter::apply_filter(
                session,
                &FilterSpec::Size {
                    lower: *size_start,
                    upper: *size_end,
                },
            )?;
        }
        Command::FilterByProp { props } => {
            vfs::select_vfs(session, cli.vfs.as_deref())?;
            let props = props
                .iter()
                .map(|spec| match spec.split_once('=') {
                    Some((name, value)) => (name.to_string(), Some(value.to_string())),
                    None => (spec.clone(), None),
                })
                .collect();
            filter::apply_filter(session, &FilterSpec::Prop { props })?;
        }
        Command::ListFilters => {
            vfs::select_vfs(session, cli.vfs.as_deref())?;
            filter::list_filters(session)?;
        }
        Command::ClearFilters => {
            vfs::select_vfs(session, cli.vfs.as_deref())?;
            filter::clear_filters(session)?;
        }

        Command::QueryMeta { path } => {
            let path = select_by_path(session, path.as_ref())?;
            query::query_meta(session, &path)?;
        }

        Command::Backup { comment } => {
            vfs::select_vfs(session, cli.vfs.as_deref())?;
            backup::create_backup(session, comment.clone())?;
        }
        Command::ListBackups => backup::list_backups(session, cli.vfs.as_deref())?,
        Command::DelBackup { name } => backup::del_backup(session, name)?,
        Command::Restore { name } => backup::restore_backup(session, name)?,

        Command::Save {
            mode,
            restart,
            delete_save_file,
        } => {
            vfs::select_vfs(session, cli.vfs.as_deref())?;
            let console = Console::spawn();
            executor::run_save(
                session,
                SaveOptions {
                    mode: (*mode).into(),
                    restart: *restart,
                    delete_save_file: *delete_save_file,
                },
                &console,
            )?;
        }
    }
    Ok(())
}

fn current_dir() -> Result<PathBuf> {
    std::env::current_dir().context("failed to resolve the current directory")
}

/// Resolve a path argument (defaulting to the working directory) and
/// select the VFS containing it.
fn select_by_path(session: &mut Session, path: Option<&PathBuf>) -> Result<PathBuf> {
    let path = match path {
        Some(path) => vfs::absolutize(path)?,
        None => current_dir()?,
    };
    vfs::select_vfs_by_path(session, &path)?;
    Ok(path)
}

fn dir_name(path: &Path) -> Result<String> {
    let absolute = vfs::absolutize(path)?;
    absolute
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .with_context(|| format!("cannot derive a name from path {}", path.display()))
}
