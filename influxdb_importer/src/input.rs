//! Opening the dump file, optionally through gzip decompression.

use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use flate2::read::GzDecoder;

use crate::{Error, Result};

/// Open the dump at `path` for line-by-line reading.
///
/// For a `compressed` dump the gzip header is read up front, so a file that is not gzip
/// data fails here rather than part way through the import.
pub fn open(path: &Path, compressed: bool) -> Result<Box<dyn BufRead + Send>> {
    let file = File::open(path).map_err(|source| Error::OpenInput {
        path: path.to_path_buf(),
        source,
    })?;

    if !compressed {
        return Ok(Box::new(BufReader::new(file)));
    }

    let mut reader = BufReader::new(GzDecoder::new(file));
    reader.fill_buf().map_err(|source| Error::Decompress {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Box::new(reader))
}
