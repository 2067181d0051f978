// Command line utility for running droplet-rs functions

use anyhow::{bail, Context, Error};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use droplet_rs::mtx::load_matrix;
use droplet_rs::{
    barcode_ranks, AmbientSmoothing, CountMatrix, EmptyDrops, EmptyDropsParams, EmptyDropsResult, HashDemux,
    RankParams, Retain,
};
use droplet_types::feature_types::{ANTIBODY_CAPTURE, GENE_EXPRESSION};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::create_dir_all;
use std::path::{Path, PathBuf};

fn input_args() -> [Arg; 2] {
    [
        Arg::new("MATRIX")
            .help("10x matrix directory or mtx file")
            .required(true)
            .index(1)
            .value_parser(value_parser!(PathBuf)),
        Arg::new("OUT_DIR")
            .help("Output directory")
            .short('o')
            .long("out_dir")
            .default_value(".")
            .value_parser(value_parser!(PathBuf)),
    ]
}

fn empty_drops_args() -> Vec<Arg> {
    vec![
        Arg::new("LOWER")
            .help("Barcodes with at most this many UMIs form the ambient pool, or 'auto' for the inflection")
            .long("lower")
            .default_value("100"),
        Arg::new("BY_RANK")
            .help("Take everything below the N largest barcodes as ambient, overrides --lower")
            .long("by-rank")
            .value_parser(value_parser!(usize)),
        Arg::new("NITERS")
            .help("Monte Carlo iterations")
            .long("niters")
            .default_value("10000")
            .value_parser(value_parser!(usize)),
        Arg::new("FDR")
            .help("FDR threshold for calling cells")
            .long("fdr")
            .default_value("0.001")
            .value_parser(value_parser!(f64)),
        Arg::new("TEST_AMBIENT")
            .help("Also test the ambient barcodes")
            .long("test-ambient")
            .action(ArgAction::SetTrue),
        Arg::new("RETAIN")
            .help("Call barcodes with at least this many UMIs without testing, or 'knee'")
            .long("retain"),
        Arg::new("GOOD_TURING")
            .help("Good-Turing smoothing of the ambient profile")
            .long("good-turing")
            .action(ArgAction::SetTrue),
        Arg::new("SEED")
            .help("Random seed")
            .long("seed")
            .default_value("0")
            .value_parser(value_parser!(u64)),
    ]
}

fn parse_lower(lower: &str) -> Result<Option<u64>, Error> {
    match lower {
        "auto" => Ok(None),
        t => Ok(Some(t.parse().with_context(|| format!("--lower {}", t))?)),
    }
}

fn empty_drops_params(matches: &ArgMatches) -> Result<EmptyDropsParams, Error> {
    let retain = match matches.get_one::<String>("RETAIN").map(String::as_str) {
        None => None,
        Some("knee") => Some(Retain::Knee),
        Some(t) => Some(Retain::Total(
            t.parse().with_context(|| format!("--retain {}", t))?,
        )),
    };
    Ok(EmptyDropsParams {
        lower: parse_lower(matches.get_one::<String>("LOWER").unwrap())?,
        by_rank: matches.get_one("BY_RANK").copied(),
        n_iter: *matches.get_one("NITERS").unwrap(),
        fdr_threshold: *matches.get_one("FDR").unwrap(),
        test_ambient: matches.get_flag("TEST_AMBIENT"),
        retain,
        smoothing: if matches.get_flag("GOOD_TURING") {
            AmbientSmoothing::GoodTuring
        } else {
            AmbientSmoothing::None
        },
        seed: *matches.get_one("SEED").unwrap(),
        ..EmptyDropsParams::default()
    })
}

/// Gene expression rows if the matrix has any, otherwise everything.
fn gex_rows(matrix: &CountMatrix) -> Result<CountMatrix, Error> {
    if matrix.feature_types.labels().iter().any(|l| l == GENE_EXPRESSION) {
        matrix.select_feature_type(GENE_EXPRESSION)
    } else {
        Ok(matrix.clone())
    }
}

fn out_dir(matches: &ArgMatches) -> Result<PathBuf, Error> {
    let out_dir: &PathBuf = matches.get_one("OUT_DIR").unwrap();
    create_dir_all(out_dir).with_context(|| out_dir.display().to_string())?;
    Ok(out_dir.clone())
}

#[derive(Serialize)]
struct RankRow<'a> {
    barcode: &'a str,
    total: u64,
    rank: f64,
    fitted: Option<f64>,
}

fn ranks(matches: &ArgMatches) -> Result<(), Error> {
    let matrix = gex_rows(&load_matrix(matches.get_one::<PathBuf>("MATRIX").unwrap())?)?;
    let out_dir = out_dir(matches)?;
    let ranks = barcode_ranks(&matrix.totals(), &RankParams::default())?;
    info!("knee: {:.1}, inflection: {:.1}", ranks.knee, ranks.inflection);

    let mut writer = csv::Writer::from_path(out_dir.join("ranks.csv"))?;
    for (i, barcode) in matrix.barcodes.iter().enumerate() {
        writer.serialize(RankRow {
            barcode,
            total: ranks.total[i],
            rank: ranks.rank[i],
            fitted: ranks.fitted[i],
        })?;
    }
    writer.flush()?;
    Ok(())
}

fn write_empty_drops(result: &EmptyDropsResult, path: &Path) -> Result<(), Error> {
    let mut writer = csv::Writer::from_path(path)?;
    for row in &result.barcodes {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

fn empty_drops(matches: &ArgMatches) -> Result<(), Error> {
    let matrix = gex_rows(&load_matrix(matches.get_one::<PathBuf>("MATRIX").unwrap())?)?;
    let out_dir = out_dir(matches)?;
    let result = EmptyDrops::new(empty_drops_params(matches)?).run(&matrix)?;
    write_empty_drops(&result, &out_dir.join("empty_drops.csv"))
}

#[derive(Deserialize)]
struct CellRow {
    barcode: String,
    is_cell: bool,
}

/// Called barcodes from an `empty_drops.csv`.
fn read_cells(path: &Path) -> Result<HashSet<String>, Error> {
    let mut reader = csv::Reader::from_path(path).with_context(|| path.display().to_string())?;
    let mut cells = HashSet::new();
    for row in reader.deserialize() {
        let row: CellRow = row?;
        if row.is_cell {
            cells.insert(row.barcode);
        }
    }
    Ok(cells)
}

#[derive(Serialize)]
struct DemuxRow<'a> {
    barcode: &'a str,
    total: u64,
    best: &'a str,
    second: Option<&'a str>,
    log_fc: f64,
    log_fc2: Option<f64>,
    confident: bool,
    doublet: bool,
}

fn demux(matches: &ArgMatches) -> Result<(), Error> {
    let matrix = load_matrix(matches.get_one::<PathBuf>("MATRIX").unwrap())?;
    let out_dir = out_dir(matches)?;
    let feature_type: &String = matches.get_one("FEATURE_TYPE").unwrap();
    let hto = matrix.select_feature_type(feature_type)?;

    let cells: Vec<usize> = if let Some(path) = matches.get_one::<PathBuf>("CELLS") {
        let called = read_cells(path)?;
        (0..hto.cols())
            .filter(|&c| called.contains(&hto.barcodes[c]))
            .collect()
    } else if matches.get_flag("CALL_CELLS") {
        let result = EmptyDrops::new(empty_drops_params(matches)?).run(&gex_rows(&matrix)?)?;
        write_empty_drops(&result, &out_dir.join("empty_drops.csv"))?;
        result.called()
    } else {
        (0..hto.cols()).collect()
    };
    if cells.is_empty() {
        bail!("no cells to demultiplex");
    }

    let result = HashDemux::default().run(&hto.select_cols(&cells))?;
    let mut writer = csv::Writer::from_path(out_dir.join("hash_demux.csv"))?;
    for a in &result.assignments {
        writer.serialize(DemuxRow {
            barcode: &a.barcode,
            total: a.total,
            best: result.tag_name(a.best),
            second: a.second.map(|s| result.tag_name(s)),
            log_fc: a.log_fc,
            log_fc2: a.log_fc2,
            confident: a.confident,
            doublet: a.doublet,
        })?;
    }
    writer.flush()?;
    Ok(())
}

pub fn main() -> Result<(), Error> {
    env_logger::init();
    let matches = Command::new("droplet-cmd")
        .subcommand_required(true)
        .subcommand(
            Command::new("ranks")
                .about("Barcode rank curve with knee and inflection")
                .args(input_args()),
        )
        .subcommand(
            Command::new("empty-drops")
                .about("Call cells against the ambient profile")
                .args(input_args())
                .args(empty_drops_args()),
        )
        .subcommand(
            Command::new("demux")
                .about("Assign cells to samples from hashtag counts")
                .args(input_args())
                .args(empty_drops_args())
                .arg(
                    Arg::new("FEATURE_TYPE")
                        .help("Feature type of the hashtags")
                        .long("feature-type")
                        .default_value(ANTIBODY_CAPTURE),
                )
                .arg(
                    Arg::new("CELLS")
                        .help("empty_drops.csv with the called cells")
                        .long("cells")
                        .value_parser(value_parser!(PathBuf))
                        .conflicts_with("CALL_CELLS"),
                )
                .arg(
                    Arg::new("CALL_CELLS")
                        .help("Call cells on the gene expression rows first")
                        .long("call-cells")
                        .action(ArgAction::SetTrue),
                ),
        )
        .get_matches();

    match matches.subcommand() {
        Some(("ranks", m)) => ranks(m),
        Some(("empty-drops", m)) => empty_drops(m),
        Some(("demux", m)) => demux(m),
        _ => unreachable!("subcommand required"),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn params(args: &[&str]) -> EmptyDropsParams {
        let matches = Command::new("empty-drops")
            .args(empty_drops_args())
            .get_matches_from(std::iter::once("empty-drops").chain(args.iter().copied()));
        empty_drops_params(&matches).unwrap()
    }

    #[test]
    fn test_lower() {
        assert_eq!(params(&[]).lower, Some(100));
        assert_eq!(params(&["--lower", "25"]).lower, Some(25));
        assert_eq!(params(&["--lower", "auto"]).lower, None);
        assert!(parse_lower("lots").is_err());
    }

    #[test]
    fn test_retain() {
        assert_eq!(params(&["--retain", "knee"]).retain, Some(Retain::Knee));
        assert_eq!(params(&["--retain", "500"]).retain, Some(Retain::Total(500)));
        assert!(params(&[]).retain.is_none());
    }
}
