use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};

use camino::Utf8Path;
use flate2::Compression;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;

use crate::error::KiraError;

const FASTA_WIDTH: usize = 80;

/// Rewrites a FASTA file in place: identifiers restricted to
/// `[A-Za-z0-9_|.]`, residues stripped of anything but letters, `.` and `-`,
/// sequences wrapped at 80 columns. Gzip input stays gzip.
pub fn clean_fasta_file(path: &Utf8Path) -> Result<(), KiraError> {
    let parent = path
        .parent()
        .ok_or_else(|| KiraError::Filesystem(format!("invalid FASTA path: {path}")))?;
    let input = File::open(path.as_std_path())
        .map_err(|err| KiraError::Filesystem(format!("open {path}: {err}")))?;
    let temp = tempfile::Builder::new()
        .prefix("kira-pl-clean")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;

    let written = if path.as_str().ends_with(".gz") {
        let reader = BufReader::new(MultiGzDecoder::new(input));
        let mut writer = GzEncoder::new(BufWriter::new(temp.as_file()), Compression::best());
        normalize_fasta(reader, &mut writer).and_then(|_| writer.finish()?.flush())
    } else {
        let reader = BufReader::new(input);
        let mut writer = BufWriter::new(temp.as_file());
        normalize_fasta(reader, &mut writer).and_then(|_| writer.flush())
    };
    written.map_err(|err| KiraError::Filesystem(format!("clean {path}: {err}")))?;

    temp.persist(path.as_std_path())
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    Ok(())
}

pub fn normalize_fasta<R: BufRead, W: Write>(reader: R, writer: &mut W) -> io::Result<()> {
    let mut sequence = String::new();
    for line in reader.lines() {
        let line = line?;
        let line = line.trim_end();
        if let Some(header) = line.strip_prefix('>') {
            write_wrapped(writer, &sequence)?;
            sequence.clear();
            let header = header.trim_start();
            let split = header
                .find(char::is_whitespace)
                .unwrap_or(header.len());
            let (id, description) = header.split_at(split);
            let id = id
                .chars()
                .map(|ch| {
                    if ch.is_ascii_alphanumeric() || matches!(ch, '_' | '|' | '.') {
                        ch
                    } else {
                        '_'
                    }
                })
                .collect::<String>();
            writeln!(writer, ">{id}{description}")?;
        } else {
            sequence.extend(
                line.chars()
                    .filter(|ch| ch.is_ascii_alphabetic() || matches!(ch, '.' | '-')),
            );
        }
    }
    write_wrapped(writer, &sequence)
}

fn write_wrapped<W: Write>(writer: &mut W, sequence: &str) -> io::Result<()> {
    for chunk in sequence.as_bytes().chunks(FASTA_WIDTH) {
        writer.write_all(chunk)?;
        writer.write_all(b"\n")?;
    }
    Ok(())
}
