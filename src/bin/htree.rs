//! Command-line tool for building and inspecting Hilbert point trees.
#![forbid(unsafe_code)]

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use hilbert_tree::{
    FileStore, FixedAscii, Node, PageId, PageStore, PointRecord, Tree, TreeOptions,
};

#[derive(Parser, Debug)]
#[command(
    name = "htree",
    version,
    about = "Build, query and dump Hilbert-keyed point tree files"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build a tree from a CSV of point tuples.
    Build {
        /// Tree file to create or extend.
        db: PathBuf,
        /// CSV input with id, latitude, longitude and timestamp columns.
        #[arg(long, value_name = "FILE")]
        input: PathBuf,
        /// Override leaf capacity (testing aid).
        #[arg(long)]
        max_leaf_records: Option<usize>,
    },
    /// Decode one page and print its contents.
    Dump {
        /// Tree file to read.
        db: PathBuf,
        /// Page id to decode.
        #[arg(long)]
        page: u32,
    },
    /// Print all records with Hilbert keys in [low, high].
    Scan {
        /// Tree file to read.
        db: PathBuf,
        #[arg(long)]
        low: u32,
        #[arg(long)]
        high: u32,
    },
    /// Check structural invariants and report the tree's shape.
    Verify {
        /// Tree file to read.
        db: PathBuf,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    if let Err(err) = run(Cli::parse()) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    match cli.command {
        Command::Build {
            db,
            input,
            max_leaf_records,
        } => build(db, input, max_leaf_records),
        Command::Dump { db, page } => dump(db, page),
        Command::Scan { db, low, high } => scan(db, low, high),
        Command::Verify { db } => verify(db),
    }
}

fn build(
    db: PathBuf,
    input: PathBuf,
    max_leaf_records: Option<usize>,
) -> Result<(), Box<dyn Error>> {
    let store = Arc::new(FileStore::open(&db)?);
    let mut options = TreeOptions::default();
    if let Some(cap) = max_leaf_records {
        options = options.max_leaf_records(cap);
    }
    let mut tree = Tree::open_with(Arc::clone(&store) as Arc<dyn PageStore>, options)?;

    let mut reader = csv::Reader::from_path(&input)?;
    let headers = reader.headers()?.clone();
    let id_col = column(&headers, "id")?;
    let lat_col = column(&headers, "latitude")?;
    let lon_col = column(&headers, "longitude")?;
    let ts_col = column(&headers, "timestamp")?;

    let mut inserted = 0u64;
    for row in reader.records() {
        let row = row?;
        let record = PointRecord::new(
            FixedAscii::new(field(&row, id_col)?)?,
            field(&row, lat_col)?.parse()?,
            field(&row, lon_col)?.parse()?,
            FixedAscii::new(field(&row, ts_col)?)?,
        )?;
        tree.insert(record)?;
        inserted += 1;
    }
    store.sync()?;

    let stats = tree.stats()?;
    println!(
        "inserted {inserted} records: height {}, {} internal + {} leaf pages, root page {}",
        stats.height,
        stats.internal_pages,
        stats.leaf_pages,
        tree.root()
    );
    Ok(())
}

fn dump(db: PathBuf, page: u32) -> Result<(), Box<dyn Error>> {
    let store = FileStore::open(&db)?;
    let buf = store.read_page(PageId(page))?;
    match Node::decode(&buf)? {
        Node::Leaf(leaf) => {
            let next = leaf
                .next_leaf
                .map_or_else(|| "none".to_string(), |id| id.to_string());
            println!(
                "page {page}: leaf, {} records, next leaf {next}",
                leaf.records.len()
            );
            for record in &leaf.records {
                println!(
                    "  key {:>10}  id {:<25}  lat {:>10.5}  lon {:>10.5}  ts {}",
                    record.hilbert_key(),
                    record.id,
                    record.latitude(),
                    record.longitude(),
                    record.timestamp
                );
            }
        }
        Node::Internal(node) => {
            println!("page {page}: internal, {} separators", node.keys.len());
            for (idx, &child) in node.children.iter().enumerate() {
                if idx < node.keys.len() {
                    println!("  child {child} (keys <= {})", node.keys[idx]);
                } else {
                    println!("  child {child} (remaining keys)");
                }
            }
        }
    }
    Ok(())
}

fn scan(db: PathBuf, low: u32, high: u32) -> Result<(), Box<dyn Error>> {
    let store = Arc::new(FileStore::open(&db)?);
    let tree = Tree::open(store)?;
    let mut count = 0u64;
    for record in tree.range_scan(low, high)? {
        let record = record?;
        println!(
            "{:>10},{},{:.5},{:.5},{}",
            record.hilbert_key(),
            record.id,
            record.latitude(),
            record.longitude(),
            record.timestamp
        );
        count += 1;
    }
    eprintln!("{count} records in [{low}, {high}]");
    Ok(())
}

fn verify(db: PathBuf) -> Result<(), Box<dyn Error>> {
    let store = Arc::new(FileStore::open(&db)?);
    let tree = Tree::open(store)?;
    tree.verify()?;
    let stats = tree.stats()?;
    println!(
        "ok: {} records, height {}, {} internal + {} leaf pages",
        stats.records, stats.height, stats.internal_pages, stats.leaf_pages
    );
    Ok(())
}

fn column(headers: &csv::StringRecord, name: &str) -> Result<usize, Box<dyn Error>> {
    headers
        .iter()
        .position(|h| h.eq_ignore_ascii_case(name))
        .ok_or_else(|| format!("input CSV is missing a '{name}' column").into())
}

fn field(row: &csv::StringRecord, idx: usize) -> Result<&str, Box<dyn Error>> {
    row.get(idx)
        .map(str::trim)
        .ok_or_else(|| "CSV row shorter than header".into())
}
