use candle_core::{DType, Device, Tensor};
use flate2::read::GzDecoder;
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

///
/// Open a file for reading, and return a buffered reader
/// * `input_file` - file name--either gzipped or not
pub fn open_buf_reader(input_file: &str) -> anyhow::Result<Box<dyn BufRead>> {
    let ext = Path::new(input_file).extension().and_then(|x| x.to_str());
    let file = File::open(input_file)
        .map_err(|e| anyhow::anyhow!("failed to open {}: {}", input_file, e))?;
    match ext {
        Some("gz") => Ok(Box::new(BufReader::new(GzDecoder::new(file)))),
        _ => Ok(Box::new(BufReader::new(file))),
    }
}

///
/// Open a file for writing, and return a buffered writer
/// * `output_file` - file name--either gzipped or not; `stdout` and
///   `stderr` write to the console
pub fn open_buf_writer(output_file: &str) -> anyhow::Result<Box<dyn Write>> {
    if output_file.eq_ignore_ascii_case("stdout") {
        return Ok(Box::new(BufWriter::new(std::io::stdout())));
    }

    if output_file.eq_ignore_ascii_case("stderr") {
        return Ok(Box::new(BufWriter::new(std::io::stderr())));
    }

    let ext = Path::new(output_file).extension().and_then(|x| x.to_str());
    let file = File::create(output_file)?;
    match ext {
        Some("gz") => {
            let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            Ok(Box::new(BufWriter::new(encoder)))
        }
        _ => Ok(Box::new(BufWriter::new(file))),
    }
}

///
/// Create a directory if needed
/// * `file` - file name
///
pub fn mkdir(file: &str) -> anyhow::Result<()> {
    let path = Path::new(file);
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}

fn is_not_comment_line(line: &str) -> bool {
    !(line.starts_with('#') || line.starts_with('%') || line.trim().is_empty())
}

fn parse_row(line: &str) -> anyhow::Result<Vec<f32>> {
    line.split(['\t', ',', ' '])
        .filter(|x| !x.is_empty())
        .map(|x| {
            x.parse::<f32>()
                .map_err(|e| anyhow::anyhow!("failed to parse '{}': {}", x, e))
        })
        .collect()
}

///
/// Read a numeric matrix into a `n x d` tensor on CPU
///
/// * `input_file` - tab, comma, or space separated; gzipped or not;
///   lines starting with `#` or `%` are skipped
///
pub fn read_tensor_delim(input_file: &str) -> anyhow::Result<Tensor> {
    let buf = open_buf_reader(input_file)?;

    let mut lines_raw = vec![];
    for line in buf.lines() {
        let line = line?;
        if is_not_comment_line(&line) {
            lines_raw.push(line);
        }
    }

    // parsing takes more time than reading
    let rows = lines_raw
        .par_iter()
        .map(|s| parse_row(s))
        .collect::<anyhow::Result<Vec<_>>>()?;

    if rows.is_empty() {
        return Err(anyhow::anyhow!("no data in {}", input_file));
    }

    let ncols = rows[0].len();
    let nrows = rows.len();

    if let Some(i) = rows.iter().position(|r| r.len() != ncols) {
        return Err(anyhow::anyhow!(
            "{}: row {} has {} columns vs. {} in the first row",
            input_file,
            i,
            rows[i].len(),
            ncols
        ));
    }

    let data = rows.into_iter().flatten().collect::<Vec<_>>();
    Ok(Tensor::from_vec(data, (nrows, ncols), &Device::Cpu)?)
}

///
/// Write a 2d tensor as delimited text
///
/// * `data` - `n x d` tensor on any device
/// * `output_file` - gzipped or not
/// * `delim` - column separator
///
pub fn write_tensor_delim(data: &Tensor, output_file: &str, delim: &str) -> anyhow::Result<()> {
    let rows = data.to_dtype(DType::F32)?.to_vec2::<f32>()?;

    let lines: Vec<String> = rows
        .par_iter()
        .map(|row| {
            row.iter()
                .map(|x| format!("{}", x))
                .collect::<Vec<_>>()
                .join(delim)
        })
        .collect();

    write_lines(&lines, output_file)
}

///
/// Write every line into the output_file
///
/// * `lines` - anything printable, one per line
/// * `output_file` - file name--either gzipped or not
///
pub fn write_lines<T>(lines: &[T], output_file: &str) -> anyhow::Result<()>
where
    T: std::fmt::Display,
{
    let mut buf = open_buf_writer(output_file)?;
    for line in lines {
        if let Err(e) = writeln!(buf, "{}", line) {
            if e.kind() == std::io::ErrorKind::BrokenPipe {
                return Ok(());
            } else {
                return Err(anyhow::anyhow!("unexpected error: {}", e));
            }
        }
    }
    buf.flush()?;
    Ok(())
}
