use std::path::Path;

use anyhow::{bail, Context};
use colored::Colorize;
use serde::Serialize;
use vor_codec::format::{is_named, record_flags, value_trailer, REF};
use vor_codec::{describe_record, ItemPurger, PurgeStats};
use vor_repository::RepositoryConfig;
use vor_store::{
    verify_snapshot, InMemoryBackend, ItemRecord, ItemStore, LobStore, SnapshotInfo, TextIndex,
    ValueStore,
};
use vor_types::{ItemId, ItemStatus, Version};

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => RepositoryConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => RepositoryConfig::default(),
    };
    let format = cli.format;
    match cli.command {
        Command::Inspect(args) => emit(&format, &inspect(&args.snapshot)?, print_inspection),
        Command::Items(args) => {
            emit(&format, &items(&args.snapshot, args.version)?, print_items)
        }
        Command::Versions(args) => {
            emit(&format, &versions(&args.snapshot, &args.item)?, print_versions)
        }
        Command::Describe(args) => emit(
            &format,
            &describe(&args.snapshot, &args.item, args.version, args.attr.as_deref())?,
            print_description,
        ),
        Command::Verify(args) => {
            let report = verify(&args.snapshot)?;
            emit(&format, &report, print_verification);
            if !report.problems.is_empty() {
                bail!("{} problem(s) found", report.problems.len());
            }
        }
        Command::Purge(args) => {
            let output = args.output.as_deref().unwrap_or(&args.snapshot);
            let report = purge(&args.snapshot, args.keep_from, output, &config)?;
            emit(&format, &report, print_purge);
        }
        Command::Search(args) => emit(
            &format,
            &search(&args.snapshot, &args.term, args.version)?,
            print_hits,
        ),
        Command::Config => {
            if format == OutputFormat::Json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                print!("{}", config.to_toml_string()?);
            }
        }
    }
    Ok(())
}

fn emit<T: Serialize>(format: &OutputFormat, report: &T, text: fn(&T)) {
    match format {
        OutputFormat::Json => match serde_json::to_string_pretty(report) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("{} {e}", "error:".red().bold()),
        },
        OutputFormat::Text => text(report),
    }
}

fn open(path: &Path) -> anyhow::Result<(InMemoryBackend, SnapshotInfo)> {
    InMemoryBackend::read_snapshot(path).with_context(|| format!("reading snapshot {}", path.display()))
}

fn live_record(backend: &InMemoryBackend, id: &ItemId, version: Version) -> anyhow::Result<Option<ItemRecord>> {
    Ok(backend.load_item(id, version)?.filter(|r| !r.is_deleted()))
}

fn opt<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map_or_else(|| "-".to_string(), T::to_string)
}

// ---------------------------------------------------------------------------
// inspect
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct Inspection {
    pub version: Version,
    pub compressed_bytes: usize,
    pub crc32: u32,
    pub items: usize,
    pub item_records: usize,
    pub values: usize,
    pub lobs: usize,
    pub value_bytes: u64,
}

pub fn inspect(path: &Path) -> anyhow::Result<Inspection> {
    let (backend, info) = open(path)?;
    Ok(Inspection {
        version: info.version,
        compressed_bytes: info.compressed_bytes,
        crc32: info.crc32,
        items: backend.all_items()?.len(),
        item_records: backend.item_record_count(),
        values: backend.value_count(),
        lobs: backend.lob_count(),
        value_bytes: backend.total_bytes(),
    })
}

fn print_inspection(i: &Inspection) {
    println!("Version:      {}", i.version.to_string().yellow().bold());
    println!("Compressed:   {} bytes (crc32 {:08x})", i.compressed_bytes, i.crc32);
    println!("Items:        {} ({} records)", i.items, i.item_records);
    println!("Values:       {} ({} bytes)", i.values, i.value_bytes);
    println!("Lobs:         {}", i.lobs);
}

// ---------------------------------------------------------------------------
// items / versions
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct ItemRow {
    pub item: ItemId,
    pub version: Version,
    pub kind: Option<String>,
    pub parent: Option<ItemId>,
    pub name: Option<String>,
    pub status: String,
}

pub fn items(path: &Path, version: Option<Version>) -> anyhow::Result<Vec<ItemRow>> {
    let (backend, info) = open(path)?;
    let version = version.unwrap_or(info.version);
    let mut rows = Vec::new();
    for id in backend.all_items()? {
        if let Some(record) = live_record(&backend, &id, version)? {
            rows.push(ItemRow {
                item: id,
                version: record.version,
                kind: record.kind.map(|k| k.to_string()),
                parent: record.parent,
                name: record.name.clone(),
                status: format!("{:?}", record.status),
            });
        }
    }
    rows.sort_by(|a, b| a.item.cmp(&b.item));
    Ok(rows)
}

fn print_items(rows: &Vec<ItemRow>) {
    if rows.is_empty() {
        println!("No items.");
        return;
    }
    for row in rows {
        println!(
            "{} {} {} {}",
            row.item.to_string().yellow(),
            format!("v{}", row.version).dimmed(),
            opt(&row.name).bold(),
            row.status.cyan()
        );
    }
}

#[derive(Debug, Serialize)]
pub struct ItemVersions {
    pub item: ItemId,
    pub versions: Vec<Version>,
}

pub fn versions(path: &Path, item: &ItemId) -> anyhow::Result<ItemVersions> {
    let (backend, _) = open(path)?;
    let versions = backend.item_versions(item)?;
    if versions.is_empty() {
        bail!("no records for item {item}");
    }
    Ok(ItemVersions {
        item: *item,
        versions,
    })
}

fn print_versions(v: &ItemVersions) {
    println!("{}", v.item.to_string().yellow());
    for version in &v.versions {
        println!("  v{version}");
    }
}

// ---------------------------------------------------------------------------
// describe
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct ValueDescription {
    pub name: String,
    pub value: String,
    pub dump: String,
}

#[derive(Debug, Serialize)]
pub struct ItemDescription {
    pub item: ItemId,
    pub version: Version,
    pub kind: Option<String>,
    pub parent: Option<ItemId>,
    pub name: Option<String>,
    pub class: Option<String>,
    pub status: String,
    pub values: Vec<ValueDescription>,
}

pub fn describe(
    path: &Path,
    item: &ItemId,
    version: Option<Version>,
    attr: Option<&str>,
) -> anyhow::Result<ItemDescription> {
    let (backend, info) = open(path)?;
    let version = version.unwrap_or(info.version);
    let Some(record) = backend.load_item(item, version)? else {
        bail!("item {item} has no record at version {version}");
    };
    let with_schema = record.status.contains(ItemStatus::CORESCHEMA);
    let mut values = Vec::new();
    for (name, value_id) in &record.values {
        if attr.is_some_and(|a| a != name.as_str()) {
            continue;
        }
        let dump = match backend.load_value(value_id)? {
            Some(value) => describe_record(&value, with_schema),
            None => "<missing value record>\n".to_string(),
        };
        values.push(ValueDescription {
            name: name.clone(),
            value: value_id.to_string(),
            dump,
        });
    }
    if let Some(attr) = attr {
        if values.is_empty() {
            bail!("item {item} has no value {attr:?} at version {version}");
        }
    }
    Ok(ItemDescription {
        item: *item,
        version: record.version,
        kind: record.kind.map(|k| k.to_string()),
        parent: record.parent,
        name: record.name.clone(),
        class: record.class.clone(),
        status: format!("{:?}", record.status),
        values,
    })
}

fn print_description(d: &ItemDescription) {
    println!("{} {}", "item".bold(), d.item.to_string().yellow());
    println!("  version: {}", d.version);
    println!("  kind:    {}", opt(&d.kind));
    println!("  parent:  {}", opt(&d.parent));
    println!("  name:    {}", opt(&d.name));
    println!("  class:   {}", opt(&d.class));
    println!("  status:  {}", d.status.cyan());
    for value in &d.values {
        println!("\n{} {}", value.name.bold(), value.value.dimmed());
        for line in value.dump.lines() {
            println!("  {line}");
        }
    }
}

// ---------------------------------------------------------------------------
// verify
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Serialize)]
pub struct Verification {
    pub version: Version,
    pub crc32: u32,
    pub item_records: usize,
    pub values_checked: usize,
    pub problems: Vec<String>,
}

/// Header and checksum first, then every item record's values and the
/// lobs they point at.
pub fn verify(path: &Path) -> anyhow::Result<Verification> {
    let data = std::fs::read(path).with_context(|| format!("reading snapshot {}", path.display()))?;
    let info = verify_snapshot(&data)?;
    let (backend, _) = InMemoryBackend::from_snapshot_bytes(&data)?;
    let mut report = Verification {
        version: info.version,
        crc32: info.crc32,
        ..Verification::default()
    };
    for id in backend.all_items()? {
        for version in backend.item_versions(&id)? {
            let Some(record) = backend.load_item(&id, version)? else {
                continue;
            };
            report.item_records += 1;
            let with_schema = record.status.contains(ItemStatus::CORESCHEMA);
            for (name, value_id) in &record.values {
                report.values_checked += 1;
                let Some(value) = backend.load_value(value_id)? else {
                    report.problems.push(format!("{id} v{version} {name}: value {value_id} missing"));
                    continue;
                };
                let flags = match record_flags(&value.data, is_named(&value, with_schema)) {
                    Ok((_, flags)) => flags,
                    Err(e) => {
                        report.problems.push(format!("{id} v{version} {name}: {e}"));
                        continue;
                    }
                };
                if flags & REF != 0 {
                    continue;
                }
                match value_trailer(&value.data) {
                    Ok((lobs, _)) => {
                        for (lob, _) in lobs {
                            if backend.load_lob(&lob)?.is_none() {
                                report.problems.push(format!("{id} v{version} {name}: lob {lob} missing"));
                            }
                        }
                    }
                    Err(e) => report.problems.push(format!("{id} v{version} {name}: {e}")),
                }
            }
        }
    }
    Ok(report)
}

fn print_verification(v: &Verification) {
    println!(
        "Checked {} records, {} values at version {}",
        v.item_records, v.values_checked, v.version
    );
    if v.problems.is_empty() {
        println!("{} Snapshot intact (crc32 {:08x})", "✓".green().bold(), v.crc32);
        return;
    }
    for problem in &v.problems {
        println!("  {} {problem}", "✗".red());
    }
}

// ---------------------------------------------------------------------------
// purge
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct PurgeReport {
    pub keep_from: Version,
    pub items: usize,
    pub values: usize,
    pub lobs: usize,
    pub ref_lists: usize,
    pub indexes: usize,
    pub compressed_bytes: usize,
}

pub fn purge(
    path: &Path,
    keep_from: Version,
    output: &Path,
    config: &RepositoryConfig,
) -> anyhow::Result<PurgeReport> {
    let (backend, info) = open(path)?;
    if keep_from > info.version {
        bail!("cannot keep from version {keep_from}: snapshot is at {}", info.version);
    }
    let PurgeStats {
        items,
        values,
        lobs,
        ref_lists,
        indexes,
    } = ItemPurger::new(&backend).purge_all(keep_from)?;
    let written = backend
        .write_snapshot(output, config.snapshot_compression_level)
        .with_context(|| format!("writing snapshot {}", output.display()))?;
    Ok(PurgeReport {
        keep_from,
        items,
        values,
        lobs,
        ref_lists,
        indexes,
        compressed_bytes: written.compressed_bytes,
    })
}

fn print_purge(p: &PurgeReport) {
    println!(
        "{} Purged before v{}: {} records, {} values, {} lobs, {} ref lists, {} indexes",
        "✓".green(),
        p.keep_from,
        p.items,
        p.values,
        p.lobs,
        p.ref_lists,
        p.indexes
    );
    println!("  Snapshot now {} bytes", p.compressed_bytes);
}

// ---------------------------------------------------------------------------
// search
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct SearchHit {
    pub item: ItemId,
    pub attr: Option<String>,
    pub version: Version,
}

pub fn search(path: &Path, term: &str, version: Option<Version>) -> anyhow::Result<Vec<SearchHit>> {
    let (backend, info) = open(path)?;
    let version = version.unwrap_or(info.version);
    Ok(backend
        .search(term, version)?
        .into_iter()
        .map(|p| SearchHit {
            item: p.item,
            attr: p.attr.map(|a| a.to_string()),
            version: p.version,
        })
        .collect())
}

fn print_hits(hits: &Vec<SearchHit>) {
    if hits.is_empty() {
        println!("No matches.");
        return;
    }
    for hit in hits {
        println!(
            "{} {} {}",
            hit.item.to_string().yellow(),
            format!("v{}", hit.version).dimmed(),
            opt(&hit.attr)
        );
    }
}
