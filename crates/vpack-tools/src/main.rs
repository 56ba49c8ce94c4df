use anyhow::{bail, Context, Result};
use clap::{arg, ArgMatches, Command};
use colorize::AnsiColor;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use serde::Serialize;
use std::{
    collections::BTreeSet,
    fs::{self, File, OpenOptions},
    io::{self, stdout, Read},
    path::{Path, PathBuf},
    time::Duration,
};
use vpack::{
    archive::{archive_file_name, ArchiveWriter},
    fs::{DirEntryInfo, Filesystem, OsFilesystem},
    toc::{linearize, split},
    tree::scan,
    FsNode, FsNodeKind, DEFAULT_MAX_PAYLOAD,
};

fn cli() -> Command {
    Command::new("vpack-tools")
        .about("Tools for packing directory trees into VP archives")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("pack")
                .about("Pack every unit under <INPUT>/data into VP archives")
                .arg(arg!(input: <INPUT>))
                .arg(arg!(-o --out [OUT]))
                .arg(arg!(-m --maxsize [MAX_SIZE]))
                .arg(arg!(-w --overwrite)),
        )
        .subcommand(
            Command::new("plan")
                .about("Preview how units would split, without writing anything")
                .arg(arg!(input: <INPUT>))
                .arg(arg!(-m --maxsize [MAX_SIZE]))
                .arg(arg!(-j --json))
                .arg(arg!(-p --pretty)),
        )
        .subcommand(
            Command::new("tree")
                .about("Display the tree a directory would pack as")
                .arg(arg!(dir: <DIR>))
                .arg(arg!(-j --json))
                .arg(arg!(-p --pretty)),
        )
}

fn main() -> Result<()> {
    env_logger::init();
    let matches = cli().get_matches();
    match matches.subcommand() {
        Some(("pack", sub_matches)) => pack(sub_matches),
        Some(("plan", sub_matches)) => plan(sub_matches),
        Some(("tree", sub_matches)) => tree(sub_matches),
        _ => unreachable!(),
    }
}

fn pack(sub_matches: &ArgMatches) -> Result<()> {
    let input = PathBuf::from(sub_matches.get_one::<String>("input").expect("required"));
    let out_dir = sub_matches
        .get_one::<String>("out")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let max_payload = max_payload(sub_matches)?;
    let overwrite = sub_matches.get_flag("overwrite");

    let units = scan_units(&input)?;
    fs::create_dir_all(&out_dir)
        .with_context(|| format!("cannot create {}", out_dir.display()))?;

    let total: u64 = units.iter().map(FsNode::payload_bytes).sum();
    let bar = ProgressBar::new(total).with_style(
        ProgressStyle::with_template(
            "[{elapsed_precise}] [{eta}] {wide_bar} {bytes}/{total_bytes} ({percent_precise}%)",
        )
        .unwrap(),
    );
    let os_fs = OsFilesystem;
    let reading_fs = ProgressFs {
        inner: &os_fs,
        bar: &bar,
    };

    let result = pack_units(&reading_fs, &units, &out_dir, max_payload, overwrite);
    if result.is_err() {
        bar.abandon();
    } else {
        bar.finish();
    }
    result
}

/// Encodes every unit's groups into `out_dir`. A failed group's
/// partially written archive is removed before the error surfaces;
/// archives completed earlier stay on disk.
fn pack_units<F: Filesystem>(
    reader_fs: &F,
    units: &[FsNode],
    out_dir: &Path,
    max_payload: i32,
    overwrite: bool,
) -> Result<()> {
    for unit in units {
        let name = unit.display_name();
        let entries =
            linearize(unit, None).with_context(|| format!("cannot lay out unit {name}"))?;
        let groups = split(entries, max_payload);
        for (i, group) in groups.iter().enumerate() {
            let path = out_dir.join(archive_file_name(&name, i, groups.len()));
            let out = open_output(&path, overwrite)
                .with_context(|| format!("cannot create {}", path.display()))?;
            let mut writer = ArchiveWriter::new(out);
            if let Err(err) = writer.write_group(reader_fs, group) {
                drop(writer);
                let _ = fs::remove_file(&path);
                return Err(err).with_context(|| format!("cannot encode {}", path.display()));
            }
            info!(
                "wrote {} ({} entries, {} payload bytes)",
                path.display(),
                group.entries.len(),
                group.payload_bytes()
            );
        }
    }
    Ok(())
}

fn plan(sub_matches: &ArgMatches) -> Result<()> {
    let input = PathBuf::from(sub_matches.get_one::<String>("input").expect("required"));
    let max_payload = max_payload(sub_matches)?;

    let mut plan = PackPlan { units: Vec::new() };
    for unit in &scan_units(&input)? {
        plan.units.push(unit_plan(unit, max_payload)?);
    }

    if sub_matches.get_flag("json") {
        if sub_matches.get_flag("pretty") {
            serde_json::to_writer_pretty(stdout().lock(), &plan)?;
        } else {
            serde_json::to_writer(stdout().lock(), &plan)?;
        }
    } else {
        serde_yaml::to_writer(stdout().lock(), &plan)?;
    }
    println!();
    Ok(())
}

fn tree(sub_matches: &ArgMatches) -> Result<()> {
    let dir = PathBuf::from(sub_matches.get_one::<String>("dir").expect("required"));
    let root = scan(&OsFilesystem, &dir)?;
    if sub_matches.get_flag("json") {
        if sub_matches.get_flag("pretty") {
            serde_json::to_writer_pretty(stdout().lock(), &root)?;
        } else {
            serde_json::to_writer(stdout().lock(), &root)?;
        }
        println!();
    } else {
        println!("{}", root.display_name().blue().bold());
        print_tree(&root, &mut BTreeSet::new(), 0);
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct PackPlan {
    units: Vec<UnitPlan>,
}

#[derive(Debug, Serialize)]
struct UnitPlan {
    name: String,
    archives: Vec<ArchivePlan>,
}

#[derive(Debug, Serialize)]
struct ArchivePlan {
    file_name: String,
    entries: usize,
    payload_bytes: i64,
}

fn unit_plan(unit: &FsNode, max_payload: i32) -> Result<UnitPlan> {
    let name = unit.display_name();
    let entries = linearize(unit, None).with_context(|| format!("cannot lay out unit {name}"))?;
    let groups = split(entries, max_payload);
    Ok(UnitPlan {
        archives: groups
            .iter()
            .enumerate()
            .map(|(i, group)| ArchivePlan {
                file_name: archive_file_name(&name, i, groups.len()),
                entries: group.entries.len(),
                payload_bytes: group.payload_bytes(),
            })
            .collect(),
        name,
    })
}

/// Scans `<input>/data` and returns its immediate children, each one a
/// logical unit to pack, in byte-wise name order.
fn scan_units(input: &Path) -> Result<Vec<FsNode>> {
    let data_dir = input.join("data");
    if !data_dir.is_dir() {
        bail!("{} is not a directory", data_dir.display());
    }
    let spinner = ProgressBar::new_spinner().with_message("scanning");
    spinner.enable_steady_tick(Duration::from_millis(100));
    let root = scan(&OsFilesystem, &data_dir)
        .with_context(|| format!("cannot scan {}", data_dir.display()))?;
    spinner.finish_and_clear();
    info!(
        "scanned {}: {} nodes, {} payload bytes",
        data_dir.display(),
        root.node_count(),
        root.payload_bytes()
    );

    let FsNodeKind::Dir { mut children } = root.kind else {
        bail!("{} is not a directory", data_dir.display());
    };
    children.sort_by(|a, b| a.path.file_name().cmp(&b.path.file_name()));
    Ok(children)
}

fn max_payload(sub_matches: &ArgMatches) -> Result<i32> {
    match sub_matches.get_one::<String>("maxsize") {
        Some(s) => parse_max_payload(s),
        None => Ok(DEFAULT_MAX_PAYLOAD),
    }
}

fn parse_max_payload(s: &str) -> Result<i32> {
    let bytes = s
        .parse::<i32>()
        .with_context(|| format!("invalid max size {s:?}"))?;
    if bytes <= 0 {
        bail!("max size must be positive, got {bytes}");
    }
    Ok(bytes)
}

fn open_output(path: &Path, overwrite: bool) -> io::Result<File> {
    if overwrite {
        File::create(path)
    } else {
        OpenOptions::new().write(true).create_new(true).open(path)
    }
}

fn print_tree(node: &FsNode, last_depths: &mut BTreeSet<usize>, depth: usize) {
    let FsNodeKind::Dir { children } = &node.kind else {
        return;
    };
    let mut children: Vec<&FsNode> = children.iter().collect();
    children.sort_by(|a, b| a.path.file_name().cmp(&b.path.file_name()));

    let mut len = children.len();
    for child in children {
        len -= 1;
        let ident = tree_ident(depth, last_depths, len == 0);
        match &child.kind {
            FsNodeKind::File { size, .. } => {
                println!(
                    "{ident} {} {}",
                    child.display_name(),
                    format!("[{size}]").red().bold()
                );
            }
            FsNodeKind::Dir { .. } => {
                println!("{ident} {}", child.display_name().blue().bold());
                if len != 0 {
                    last_depths.insert(depth);
                }
                print_tree(child, last_depths, depth + 1);
                if len != 0 {
                    last_depths.remove(&depth);
                }
            }
        }
    }
}

fn tree_ident(depth: usize, last_depths: &BTreeSet<usize>, is_last: bool) -> String {
    let mut ident = String::new();
    for i in 0..depth {
        if last_depths.contains(&i) {
            ident.push_str("│   ");
        } else {
            ident.push_str("    ");
        }
    }
    if is_last {
        ident.push_str("└")
    } else {
        ident.push_str("├")
    }
    ident.push_str(&"─".repeat(2));
    ident
}

/// Filesystem decorator that feeds every payload byte read during
/// encoding into a progress bar.
struct ProgressFs<'a, F> {
    inner: &'a F,
    bar: &'a ProgressBar,
}

impl<'a, F: Filesystem> Filesystem for ProgressFs<'a, F> {
    type Reader = ProgressTrackingReader<'a, F::Reader>;

    fn list_entries(&self, path: &Path) -> io::Result<Vec<DirEntryInfo>> {
        self.inner.list_entries(path)
    }

    fn open_for_read(&self, path: &Path) -> io::Result<Self::Reader> {
        Ok(ProgressTrackingReader(
            self.inner.open_for_read(path)?,
            self.bar,
        ))
    }
}

struct ProgressTrackingReader<'a, R>(R, &'a ProgressBar);
impl<'a, R: Read> Read for ProgressTrackingReader<'a, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let read = self.0.read(buf)?;
        self.1.inc(read as u64);
        Ok(read)
    }
}
