/*
 * Small example application that checks the CRC checksums of all pages in an E57 file.
 */

use anyhow::{ensure, Context, Result};
use e57_foundation::E57Reader;
use std::fs::File;
use std::io::BufReader;

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    ensure!(args.len() >= 2, "Usage: e57-crc-validator <path/to/my.e57>");

    let file = File::open(&args[1]).context("Failed to open E57 file")?;
    let reader = BufReader::new(file);
    let pages = E57Reader::validate_crc(reader).context("Found invalid page")?;

    println!("Validated {pages} pages, all checksums are correct");
    Ok(())
}
