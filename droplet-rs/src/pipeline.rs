use crate::empty_drops::EmptyDropsResult;
use crate::error::DropletError;
use crate::hash_demux::{HashDemux, HashDemuxResult};
use droplet_types::CountMatrix;
use log::info;

/// Column indices of the barcodes called as cells.
pub fn called_cells(result: &EmptyDropsResult) -> Vec<usize> {
    result.called()
}

/// Restrict a hashtag matrix with the same barcode columns as the tested matrix to the
/// called cells and demultiplex them.
pub fn demultiplex_called(
    hto: &CountMatrix,
    result: &EmptyDropsResult,
    demux: &HashDemux,
) -> Result<HashDemuxResult, DropletError> {
    if hto.cols() != result.barcodes.len() {
        return Err(DropletError::invalid(format!(
            "hashtag matrix has {} barcodes, cell calls cover {}",
            hto.cols(),
            result.barcodes.len()
        )));
    }
    let cells = called_cells(result);
    info!("demultiplexing {} called cells", cells.len());
    demux.run(&hto.select_cols(&cells))
}
