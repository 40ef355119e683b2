//! Offline analyzer for captured request streams.
//!
//! A capture file is a concatenation of records, each a little-endian i32
//! length followed by that many bytes of the original wire frame.

use mongotap_protocol::{decode, RequestType};
use std::collections::HashSet;
use std::fs::File;
use std::io::{self, ErrorKind, Read, Write};

/// Implements the `tools analyze` command.
pub fn run(
    file: &str,
    offset: usize,
    limit: usize,
    filters: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    let mut stream: Box<dyn Read> = if file == "-" {
        tracing::info!(from = "STDIN", "reading captured stream data");
        Box::new(io::stdin())
    } else {
        tracing::info!(from = file, "reading captured stream data");
        Box::new(File::open(file)?)
    };

    let filter = parse_filters(filters)?;
    analyze(
        &mut stream,
        &mut io::stdout(),
        offset,
        limit,
        filter.as_ref(),
    )
}

fn parse_filters(
    filters: &[String],
) -> Result<Option<HashSet<RequestType>>, Box<dyn std::error::Error>> {
    if filters.is_empty() {
        return Ok(None);
    }

    let mut set = HashSet::new();
    for name in filters {
        let request_type: RequestType = name.parse().map_err(|_| {
            format!(
                "unknown request type {:?} in --filter parameter; known types: {}",
                name,
                RequestType::all_names().join(", ")
            )
        })?;
        set.insert(request_type);
    }
    Ok(Some(set))
}

fn analyze(
    stream: &mut dyn Read,
    out: &mut dyn Write,
    offset: usize,
    limit: usize,
    filter: Option<&HashSet<RequestType>>,
) -> Result<(), Box<dyn std::error::Error>> {
    // Skip over the requested number of records.
    for i in 0..offset {
        let Some(len) = read_record_len(stream)? else {
            return Ok(()); // offset points past the end of the capture
        };
        io::copy(&mut (&mut *stream).take(len as u64), &mut io::sink())
            .map_err(|e| format!("unable to skip over request {}: {}", i + 1, e))?;
    }

    let mut buf = Vec::new();
    let mut index = 0;
    loop {
        if limit != 0 && index == limit {
            break;
        }

        let Some(len) = read_record_len(stream)? else {
            break;
        };
        buf.clear();
        buf.resize(len, 0);
        stream
            .read_exact(&mut buf)
            .map_err(|e| format!("unable to read request {}: {}", index + offset + 1, e))?;

        let request = decode(&buf)
            .map_err(|e| format!("unable to decode request {}: {}", index + offset + 1, e))?;

        if let Some(filter) = filter {
            if !filter.contains(&request.request_type()) {
                index += 1;
                continue;
            }
        }

        writeln!(
            out,
            "[+] request: {:05}, type {:?} (opcode: {})\n{:#?}\n",
            index + offset,
            request.request_type().as_str(),
            request.opcode(),
            request
        )?;
        index += 1;
    }

    Ok(())
}

/// Reads the next record's length prefix. A clean EOF at a record boundary
/// ends the capture.
fn read_record_len(stream: &mut dyn Read) -> Result<Option<usize>, Box<dyn std::error::Error>> {
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf) {
        Ok(()) => {
            let len = i32::from_le_bytes(len_buf);
            if len < 0 {
                return Err(format!("negative record length {}", len).into());
            }
            Ok(Some(len as usize))
        }
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e.into()),
    }
}
