use anyhow::{bail, format_err, Context, Error};
use droplet_types::{CountCsc, CountMatrix, FeatureTypes};
use flate2::bufread::MultiGzDecoder;
use sprs::TriMatI;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Feature type given to rows of a features file that has no type column
const DEFAULT_FEATURE_TYPE: &str = droplet_types::feature_types::GENE_EXPRESSION;

fn open_text(path: &Path) -> Result<Box<dyn BufRead>, Error> {
    let file = BufReader::new(File::open(path).with_context(|| path.display().to_string())?);
    if path.extension().is_some_and(|e| e == "gz") {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(file))
    }
}

/// Load counts from MTX coordinate format, gzipped or plain
pub fn load_mtx(path: impl AsRef<Path>) -> Result<CountCsc, Error> {
    let path = path.as_ref();
    let mut reader = open_text(path)?;
    let mut line = String::new();
    let mut mat: Option<TriMatI<u32, usize>> = None;

    while reader.read_line(&mut line)? > 0 {
        if line.starts_with('%') || line.trim().is_empty() {
            line.clear();
            continue;
        }
        let mut data = line.split_whitespace();
        match mat.as_mut() {
            None => {
                let nrow = data.next().ok_or_else(|| format_err!("no NROW"))?.parse::<usize>()?;
                let ncol = data.next().ok_or_else(|| format_err!("no NCOL"))?.parse::<usize>()?;
                let nnz = data.next().ok_or_else(|| format_err!("no NNZ"))?.parse::<usize>()?;
                mat = Some(TriMatI::with_capacity((nrow, ncol), nnz));
            }
            Some(m) => {
                let row = data.next().ok_or_else(|| format_err!("missing ROW"))?.parse::<usize>()?;
                let col = data.next().ok_or_else(|| format_err!("missing COL"))?.parse::<usize>()?;
                let val = data.next().ok_or_else(|| format_err!("missing VAL"))?.parse::<u32>()?;
                if row == 0 || col == 0 || row > m.rows() || col > m.cols() {
                    bail!("entry ({}, {}) outside a {}x{} matrix", row, col, m.rows(), m.cols());
                }
                m.add_triplet(row - 1, col - 1, val);
            }
        }
        line.clear();
    }

    let Some(matrix) = mat else { bail!("no matrix found in {}", path.display()) };
    Ok(matrix.to_csc())
}

fn read_lines(path: &Path) -> Result<Vec<String>, Error> {
    let mut out = Vec::new();
    for line in open_text(path)?.lines() {
        let line = line?;
        if !line.is_empty() {
            out.push(line);
        }
    }
    Ok(out)
}

/// First existing file among `names` in `dir`.
fn find_file(dir: &Path, names: &[&str]) -> Result<PathBuf, Error> {
    names
        .iter()
        .map(|n| dir.join(n))
        .find(|p| p.exists())
        .ok_or_else(|| format_err!("none of {:?} found in {}", names, dir.display()))
}

/// Load a 10x-style matrix directory: `matrix.mtx[.gz]`, `barcodes.tsv[.gz]` and
/// `features.tsv[.gz]` (`id`, `name`, `type` columns) or the older two-column `genes.tsv`.
pub fn load_matrix_dir(dir: impl AsRef<Path>) -> Result<CountMatrix, Error> {
    let dir = dir.as_ref();
    let counts = load_mtx(find_file(dir, &["matrix.mtx.gz", "matrix.mtx"])?)?;

    let barcodes: Vec<String> = read_lines(&find_file(dir, &["barcodes.tsv.gz", "barcodes.tsv"])?)?
        .into_iter()
        .map(|l| l.split('\t').next().unwrap_or_default().to_string())
        .collect();

    let features_path = find_file(
        dir,
        &["features.tsv.gz", "features.tsv", "genes.tsv.gz", "genes.tsv"],
    )?;
    let mut ids = Vec::new();
    let mut names = Vec::new();
    let mut types = Vec::new();
    for line in read_lines(&features_path)? {
        let mut fields = line.split('\t');
        let id = fields.next().unwrap_or_default().to_string();
        let name = fields.next().map_or_else(|| id.clone(), str::to_string);
        let ftype = fields.next().unwrap_or(DEFAULT_FEATURE_TYPE).to_string();
        ids.push(id);
        names.push(name);
        types.push(ftype);
    }

    CountMatrix::new(barcodes, ids, names, FeatureTypes::from_type_vector(&types), counts)
        .with_context(|| dir.display().to_string())
}

/// Load either a matrix directory or a bare MTX file. Bare files get generated feature and
/// barcode names.
pub fn load_matrix(path: impl AsRef<Path>) -> Result<CountMatrix, Error> {
    let path = path.as_ref();
    if path.is_dir() {
        load_matrix_dir(path)
    } else {
        Ok(CountMatrix::from_counts(load_mtx(path)?))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use droplet_types::feature_types::ANTIBODY_CAPTURE;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("droplet-mtx-{}-{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_gz(path: &Path, text: &str) {
        let mut enc = GzEncoder::new(File::create(path).unwrap(), Compression::default());
        enc.write_all(text.as_bytes()).unwrap();
        enc.finish().unwrap();
    }

    const MTX: &str = "%%MatrixMarket matrix coordinate integer general\n% comment\n3 4 4\n1 1 5\n3 1 2\n2 3 7\n3 4 1\n";

    #[test]
    fn test_load_mtx() {
        let dir = scratch_dir("bare");
        let path = dir.join("m.mtx.gz");
        write_gz(&path, MTX);
        let counts = load_mtx(&path).unwrap();
        assert_eq!(counts.shape(), (3, 4));
        assert_eq!(counts.nnz(), 4);
        assert_eq!(counts.get(2, 0), Some(&2));

        let m = load_matrix(&path).unwrap();
        assert_eq!(m.totals(), vec![7, 0, 7, 1]);
        assert_eq!(m.barcodes[3], "BC3");
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_load_dir() {
        let dir = scratch_dir("tenx");
        write_gz(&dir.join("matrix.mtx.gz"), MTX);
        write_gz(&dir.join("barcodes.tsv.gz"), "AAAC-1\nAAAG-1\nAAAT-1\nAACA-1\n");
        write_gz(
            &dir.join("features.tsv.gz"),
            "ENSG1\tGENE1\tGene Expression\nHTO1\tHTO1\tAntibody Capture\nHTO2\tHTO2\tAntibody Capture\n",
        );
        let m = load_matrix(&dir).unwrap();
        assert_eq!(m.barcodes, vec!["AAAC-1", "AAAG-1", "AAAT-1", "AACA-1"]);
        assert_eq!(m.feature_names[1], "HTO1");
        let hto = m.select_feature_type(ANTIBODY_CAPTURE).unwrap();
        assert_eq!(hto.totals(), vec![2, 0, 7, 1]);
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_bad_entries() {
        let dir = scratch_dir("bad");
        let path = dir.join("m.mtx");
        std::fs::write(&path, "2 2 1\n3 1 4\n").unwrap();
        assert!(load_mtx(&path).is_err());
        std::fs::write(&path, "% only a comment\n").unwrap();
        assert!(load_mtx(&path).is_err());
        std::fs::remove_dir_all(dir).unwrap();
    }
}
