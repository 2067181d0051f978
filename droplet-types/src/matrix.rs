use crate::feature_types::{FeatureTypes, GENE_EXPRESSION};
use anyhow::{bail, Error};
use sprs::{CsMatI, TriMatI};

/// Raw UMI count storage: compressed sparse columns, one column per barcode.
pub type CountCsc = CsMatI<u32, usize>;

/// Feature-barcode UMI count matrix. Rows are features (genes or hashtags), columns are
/// barcodes. The counts are always held in CSC layout so a barcode's profile is a
/// contiguous slice.
#[derive(Clone, Debug)]
pub struct CountMatrix {
    pub barcodes: Vec<String>,
    pub feature_ids: Vec<String>,
    pub feature_names: Vec<String>,
    pub feature_types: FeatureTypes,
    counts: CountCsc,
}

impl CountMatrix {
    /// Assemble a matrix, checking that every label vector matches the count dimensions.
    pub fn new(
        barcodes: Vec<String>,
        feature_ids: Vec<String>,
        feature_names: Vec<String>,
        feature_types: FeatureTypes,
        counts: CountCsc,
    ) -> Result<CountMatrix, Error> {
        let (rows, cols) = counts.shape();
        if barcodes.len() != cols {
            bail!("{} barcodes for a matrix with {} columns", barcodes.len(), cols);
        }
        if feature_ids.len() != rows || feature_names.len() != rows || feature_types.len() != rows {
            bail!(
                "feature labels ({} ids, {} names, {} types) don't match {} matrix rows",
                feature_ids.len(),
                feature_names.len(),
                feature_types.len(),
                rows
            );
        }
        let counts = if counts.is_csc() { counts } else { counts.to_csc() };
        Ok(CountMatrix {
            barcodes,
            feature_ids,
            feature_names,
            feature_types,
            counts,
        })
    }

    /// Wrap bare counts, generating `F<i>` feature ids and `BC<j>` barcodes.
    pub fn from_counts(counts: CountCsc) -> CountMatrix {
        let (rows, cols) = counts.shape();
        let feature_ids: Vec<String> = (0..rows).map(|i| format!("F{i}")).collect();
        CountMatrix {
            barcodes: (0..cols).map(|j| format!("BC{j}")).collect(),
            feature_names: feature_ids.clone(),
            feature_ids,
            feature_types: FeatureTypes::uniform(GENE_EXPRESSION, rows),
            counts: if counts.is_csc() { counts } else { counts.to_csc() },
        }
    }

    /// Build from dense rows, `rows[feature][barcode]`. Handy for small fixtures.
    pub fn from_dense_rows(rows: &[Vec<u32>]) -> CountMatrix {
        let nrow = rows.len();
        let ncol = rows.first().map_or(0, Vec::len);
        let mut tri = TriMatI::<u32, usize>::new((nrow, ncol));
        for (r, row) in rows.iter().enumerate() {
            assert_eq!(row.len(), ncol, "ragged dense rows");
            for (c, &v) in row.iter().enumerate() {
                if v > 0 {
                    tri.add_triplet(r, c, v);
                }
            }
        }
        CountMatrix::from_counts(tri.to_csc())
    }

    /// Number of features
    pub fn rows(&self) -> usize {
        self.counts.rows()
    }

    /// Number of barcodes
    pub fn cols(&self) -> usize {
        self.counts.cols()
    }

    /// `(features, barcodes)`
    pub fn shape(&self) -> (usize, usize) {
        self.counts.shape()
    }

    /// Number of stored non-zero entries
    pub fn nnz(&self) -> usize {
        self.counts.nnz()
    }

    /// Underlying CSC counts
    pub fn counts(&self) -> &CountCsc {
        &self.counts
    }

    /// Count at `(row, col)`, zero when not stored.
    pub fn get(&self, row: usize, col: usize) -> u32 {
        self.counts.get(row, col).copied().unwrap_or(0)
    }

    /// Feature indices and counts stored for barcode `col`.
    pub fn column_slices(&self, col: usize) -> (&[usize], &[u32]) {
        let range = self.counts.indptr().outer_inds_sz(col);
        (&self.counts.indices()[range.clone()], &self.counts.data()[range])
    }

    /// Non-zero `(feature, count)` entries of barcode `col`, in feature order.
    pub fn column(&self, col: usize) -> impl Iterator<Item = (usize, u32)> + '_ {
        let (rows, vals) = self.column_slices(col);
        rows.iter().copied().zip(vals.iter().copied())
    }

    /// Total UMI count of every barcode.
    pub fn totals(&self) -> Vec<u64> {
        self.counts
            .outer_iterator()
            .map(|col| col.data().iter().map(|&v| u64::from(v)).sum())
            .collect()
    }

    /// Per-feature sums over a subset of barcodes.
    pub fn feature_sums(&self, cols: &[usize]) -> Vec<u64> {
        let mut sums = vec![0u64; self.rows()];
        for &c in cols {
            for (r, v) in self.column(c) {
                sums[r] += u64::from(v);
            }
        }
        sums
    }

    /// Matrix restricted to the given barcodes, in the order given.
    pub fn select_cols(&self, cols: &[usize]) -> CountMatrix {
        let mut tri = TriMatI::<u32, usize>::new((self.rows(), cols.len()));
        for (new_c, &c) in cols.iter().enumerate() {
            for (r, v) in self.column(c) {
                tri.add_triplet(r, new_c, v);
            }
        }
        CountMatrix {
            barcodes: cols.iter().map(|&c| self.barcodes[c].clone()).collect(),
            feature_ids: self.feature_ids.clone(),
            feature_names: self.feature_names.clone(),
            feature_types: self.feature_types.clone(),
            counts: tri.to_csc(),
        }
    }

    /// Matrix restricted to the given features, in the order given.
    pub fn select_rows(&self, rows: &[usize]) -> CountMatrix {
        let mut new_row = vec![None; self.rows()];
        for (i, &r) in rows.iter().enumerate() {
            new_row[r] = Some(i);
        }
        let mut tri = TriMatI::<u32, usize>::new((rows.len(), self.cols()));
        for c in 0..self.cols() {
            for (r, v) in self.column(c) {
                if let Some(nr) = new_row[r] {
                    tri.add_triplet(nr, c, v);
                }
            }
        }
        CountMatrix {
            barcodes: self.barcodes.clone(),
            feature_ids: rows.iter().map(|&r| self.feature_ids[r].clone()).collect(),
            feature_names: rows.iter().map(|&r| self.feature_names[r].clone()).collect(),
            feature_types: self.feature_types.select(rows),
            counts: tri.to_csc(),
        }
    }

    /// Matrix restricted to the features of one library type, e.g. the hashtags of an
    /// `Antibody Capture` library.
    pub fn select_feature_type(&self, feature_type: &str) -> Result<CountMatrix, Error> {
        let rows = self.feature_types.rows_of(feature_type)?;
        Ok(self.select_rows(&rows))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::feature_types::ANTIBODY_CAPTURE;

    fn fixture() -> CountMatrix {
        CountMatrix::from_dense_rows(&[vec![1, 0, 3, 0], vec![0, 0, 2, 7], vec![4, 0, 0, 1]])
    }

    #[test]
    fn test_totals_and_columns() {
        let m = fixture();
        assert_eq!(m.shape(), (3, 4));
        assert_eq!(m.nnz(), 6);
        assert_eq!(m.totals(), vec![5, 0, 5, 8]);
        assert_eq!(m.column(2).collect::<Vec<_>>(), vec![(0, 3), (1, 2)]);
        assert_eq!(m.column(1).count(), 0);
        assert_eq!(m.feature_sums(&[0, 3]), vec![1, 7, 5]);
        assert_eq!(m.get(1, 3), 7);
        assert_eq!(m.get(1, 0), 0);
    }

    #[test]
    fn test_select() {
        let m = fixture();
        let c = m.select_cols(&[3, 0]);
        assert_eq!(c.barcodes, vec!["BC3", "BC0"]);
        assert_eq!(c.totals(), vec![8, 5]);

        let r = m.select_rows(&[2, 0]);
        assert_eq!(r.feature_ids, vec!["F2", "F0"]);
        assert_eq!(r.column(0).collect::<Vec<_>>(), vec![(0, 4), (1, 1)]);
        assert_eq!(r.totals(), vec![5, 0, 3, 1]);
    }

    #[test]
    fn test_new_checks_dimensions() {
        let m = fixture();
        let bad = CountMatrix::new(
            vec!["a".to_string()],
            m.feature_ids.clone(),
            m.feature_names.clone(),
            m.feature_types.clone(),
            m.counts().clone(),
        );
        assert!(bad.is_err());

        let types = FeatureTypes::from_type_vector(&[
            GENE_EXPRESSION.to_string(),
            ANTIBODY_CAPTURE.to_string(),
            ANTIBODY_CAPTURE.to_string(),
        ]);
        let ok = CountMatrix::new(
            m.barcodes.clone(),
            m.feature_ids.clone(),
            m.feature_names.clone(),
            types,
            m.counts().to_csr(),
        )
        .unwrap();
        assert!(ok.counts().is_csc());
        let hto = ok.select_feature_type(ANTIBODY_CAPTURE).unwrap();
        assert_eq!(hto.rows(), 2);
        assert_eq!(hto.totals(), vec![4, 0, 2, 8]);
    }
}
