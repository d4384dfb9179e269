//! Thin CLI over `catalog-core`, for manual smoke-testing. CLI-flag parsing and the
//! importer are external collaborators; this binary only drives the catalog's public API
//! with already-computed fingerprints, it does not import files.
//!
//! A `clap::Parser` with subcommands, `color-eyre`/`simplelog` wired up by
//! `bin_common::init`, and one function per subcommand.

mod bin_common;

use std::path::PathBuf;

use bin_common::init::{init_eyre, init_logger};
use catalog_core::fingerprint::ColorDescriptor;
use catalog_core::index::{ALGO_COLOR, ALGO_DCT_IMAGE, ALGO_VIDEO};
use catalog_core::record::{Kind, KindMask, MediaRecord, RelPath};
use catalog_core::search::SearchParams;
use catalog_core::{Catalog, MediaId};
use clap::{Parser, Subcommand};
use color_eyre::eyre::{self, bail, Context};

#[derive(Parser)]
#[command()]
/// Drives a catalog + index subsystem for manual smoke-testing.
struct Cli {
    /// Root directory of the catalog (holds the media files and the `.catalog-index`
    /// directory alongside them).
    #[arg(long, short = 'r', default_value = ".")]
    root: PathBuf,

    /// A file to additionally write the logs to.
    #[arg(long)]
    logfile: Option<PathBuf>,

    /// Enable debug-level logging.
    #[arg(long, short = 'v')]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Reports how many records of each kind the catalog holds.
    Count,
    /// Adds one already-fingerprinted media record.
    Add(AddArgs),
    /// Supplies the color descriptor for an already-catalogued record.
    SetColor(SetColorArgs),
    /// Removes records by id.
    Remove {
        ids: Vec<u32>,
    },
    /// Finds every group of records similar to each other under one index.
    Similar(SimilarArgs),
    /// Finds records similar to a single already-catalogued record.
    SimilarTo(SimilarToArgs),
    /// Finds exact-md5 duplicate clusters.
    Dups {
        #[arg(long)]
        min_matches: Option<usize>,
    },
    /// Compacts the record store and sweeps orphaned video sidecars.
    Vacuum,
    /// Records a pair of md5s as a confirmed non-match.
    NegAdd {
        md5_a: String,
        md5_b: String,
    },
}

#[derive(clap::Args)]
struct AddArgs {
    /// Path relative to the catalog root.
    path: String,
    /// Kind of media.
    #[arg(long, value_enum, default_value = "image")]
    kind: KindArg,
    #[arg(long)]
    width: u32,
    #[arg(long)]
    height: u32,
    /// Lowercase hex MD5 of the file's contents.
    #[arg(long)]
    md5: String,
    /// 64-bit DCT perceptual hash, as hex (e.g. `deadbeef00000000`).
    #[arg(long)]
    dct_hash: String,
}

#[derive(clap::Args)]
struct SetColorArgs {
    /// Catalog-relative path of the record to supply the descriptor for.
    path: String,
    /// One weighted color bucket as `r,g,b,count`; repeat for multiple buckets.
    #[arg(long = "color", required = true)]
    colors: Vec<String>,
}

#[derive(Copy, Clone, clap::ValueEnum)]
enum KindArg {
    Image,
    Video,
}

impl From<KindArg> for Kind {
    fn from(k: KindArg) -> Self {
        match k {
            KindArg::Image => Kind::Image,
            KindArg::Video => Kind::Video,
        }
    }
}

#[derive(Copy, Clone, clap::ValueEnum)]
enum AlgoArg {
    Dct,
    Color,
    Video,
}

impl From<AlgoArg> for u8 {
    fn from(a: AlgoArg) -> Self {
        match a {
            AlgoArg::Dct => ALGO_DCT_IMAGE,
            AlgoArg::Color => ALGO_COLOR,
            AlgoArg::Video => ALGO_VIDEO,
        }
    }
}

#[derive(clap::Args)]
struct SimilarArgs {
    #[arg(long, value_enum, default_value = "dct")]
    algo: AlgoArg,
    #[arg(long, default_value_t = 8)]
    dct_thresh: u32,
    #[arg(long, default_value_t = 1)]
    min_matches: usize,
    #[arg(long)]
    filter_parent: bool,
    #[arg(long)]
    filter_groups: bool,
    #[arg(long)]
    negative_match: bool,
    /// Log a "scanned" progress line at roughly this interval while the search fans out
    /// over the haystack (e.g. `1s`, `500ms`); has no effect without `--verbose`.
    #[arg(long)]
    progress_interval: Option<humantime::Duration>,
    /// Emit diagnostic progress logging during the search.
    #[arg(long)]
    verbose: bool,
}

#[derive(clap::Args)]
struct SimilarToArgs {
    /// Catalog-relative path of the needle record.
    path: String,
    #[arg(long, value_enum, default_value = "dct")]
    algo: AlgoArg,
    #[arg(long, default_value_t = 8)]
    dct_thresh: u32,
    #[arg(long)]
    filter_parent: bool,
    #[arg(long)]
    negative_match: bool,
}

fn main() -> eyre::Result<()> {
    init_eyre()?;
    let cli = Cli::parse();
    init_logger(cli.logfile.as_deref(), cli.verbose)?;

    let catalog = Catalog::open(&cli.root).wrap_err("failed to open the catalog")?;

    match cli.command {
        Command::Count => run_count(&catalog)?,
        Command::Add(args) => run_add(&catalog, args)?,
        Command::SetColor(args) => run_set_color(&catalog, args)?,
        Command::Remove { ids } => run_remove(&catalog, ids)?,
        Command::Similar(args) => run_similar(&catalog, args)?,
        Command::SimilarTo(args) => run_similar_to(&catalog, args)?,
        Command::Dups { min_matches } => run_dups(&catalog, min_matches)?,
        Command::Vacuum => catalog.vacuum().wrap_err("vacuum failed")?,
        Command::NegAdd { md5_a, md5_b } => {
            catalog.add_negative_match(&md5_a, &md5_b).wrap_err("failed to record the negative match")?
        }
    }

    Ok(())
}

fn run_count(catalog: &Catalog) -> eyre::Result<()> {
    println!("images: {}", catalog.count(KindMask::of(Kind::Image))?);
    println!("videos: {}", catalog.count(KindMask::of(Kind::Video))?);
    println!("total:  {}", catalog.count(KindMask::ALL)?);
    Ok(())
}

fn run_add(catalog: &Catalog, args: AddArgs) -> eyre::Result<()> {
    let dct_hash = u64::from_str_radix(args.dct_hash.trim_start_matches("0x"), 16)
        .wrap_err("--dct-hash must be a hex-encoded u64")?;
    let rel_path = RelPath::new(args.path).wrap_err("invalid --path")?;
    let record = MediaRecord::new_unassigned(
        args.kind.into(),
        rel_path,
        args.width,
        args.height,
        args.md5,
        catalog_core::fingerprint::Hamming::from_bits(dct_hash),
    );

    let ids = catalog.add(vec![record], vec![None]).wrap_err("failed to add the record")?;
    println!("added id {}", ids[0]);
    Ok(())
}

fn run_set_color(catalog: &Catalog, args: SetColorArgs) -> eyre::Result<()> {
    let Some(record) = catalog.media_with_path(&args.path)? else {
        bail!("no record catalogued at path: {}", args.path);
    };

    let mut buckets = Vec::with_capacity(args.colors.len());
    for raw in &args.colors {
        let mut parts = raw.split(',');
        let mut next_u8 = || -> eyre::Result<u8> {
            parts.next().ok_or_else(|| eyre::eyre!("--color must be r,g,b,count"))?.parse().wrap_err("--color channel must be 0-255")
        };
        let r = next_u8()?;
        let g = next_u8()?;
        let b = next_u8()?;
        let count: u32 = parts
            .next()
            .ok_or_else(|| eyre::eyre!("--color must be r,g,b,count"))?
            .parse()
            .wrap_err("--color count must be a non-negative integer")?;
        buckets.push(([r, g, b], count));
    }

    catalog
        .set_color_descriptor(record.id, ColorDescriptor::from_histogram(buckets))
        .wrap_err("failed to set the color descriptor")?;
    println!("set color descriptor for id {}", record.id);
    Ok(())
}

fn run_remove(catalog: &Catalog, ids: Vec<u32>) -> eyre::Result<()> {
    let ids: Vec<MediaId> = ids.into_iter().map(MediaId::new).collect();
    let deleted = catalog.remove(&ids).wrap_err("failed to remove records")?;
    println!("removed {} record(s)", deleted.len());
    Ok(())
}

fn run_similar(catalog: &Catalog, args: SimilarArgs) -> eyre::Result<()> {
    let mut params = SearchParams::new(args.algo.into())
        .with_dct_thresh(args.dct_thresh)
        .with_min_matches(args.min_matches)
        .with_filter_parent(args.filter_parent)
        .with_filter_groups(args.filter_groups)
        .with_negative_match(args.negative_match)
        .with_verbose(args.verbose);
    if let Some(interval) = args.progress_interval {
        params = params.with_progress_interval(interval.into());
    }

    let groups = catalog.search().similar(params).wrap_err("search failed")?;
    print_groups(&groups);
    Ok(())
}

fn run_similar_to(catalog: &Catalog, args: SimilarToArgs) -> eyre::Result<()> {
    let Some(needle) = catalog.media_with_path(&args.path)? else {
        bail!("no record catalogued at path: {}", args.path);
    };

    let params = SearchParams::new(args.algo.into())
        .with_dct_thresh(args.dct_thresh)
        .with_filter_parent(args.filter_parent)
        .with_negative_match(args.negative_match);

    let group = catalog.search().similar_to(&needle, params).wrap_err("search failed")?;
    print_groups(std::slice::from_ref(&group));
    Ok(())
}

fn run_dups(catalog: &Catalog, min_matches: Option<usize>) -> eyre::Result<()> {
    let mut params = SearchParams::default();
    if let Some(min) = min_matches {
        params = params.with_min_matches(min);
    }
    let groups = catalog.search().dups_by_md5(params).wrap_err("search failed")?;
    print_groups(&groups);
    Ok(())
}

fn print_groups(groups: &[catalog_core::Group]) {
    println!("{} group(s)", groups.len());
    for group in groups {
        println!("{} ({})", group.needle.rel_path, group.needle.id);
        for hit in &group.hits {
            println!("  -> {} ({}), score {:.2}", hit.record.rel_path, hit.record.id, hit.score);
        }
    }
}
