//! Client-side loaders for the query protocol.
//!
//! Remote tools (monitors, mergers, forwarders) fetch integration periods
//! from a running server with these helpers rather than speaking the
//! protocol by hand. Each call opens its own connection, issues one
//! command, and reads the complete reply.

use crate::error::{Result, StoreError};
use crate::record::IntegrationRecord;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};

/// Fetches every record with timestamp in `[start, end]` from `addr`.
///
/// `end == 0` requests everything from `start` onward. The keep flags
/// select which optional sections the server should include; `clean`
/// asks the server to drop interference-flagged periods.
///
/// # Errors
///
/// Returns an error when the connection fails or the reply is malformed.
/// An empty vector is a normal "no data" reply.
pub fn load_between(
    addr: impl ToSocketAddrs,
    start: i64,
    end: i64,
    keep_cross: bool,
    keep_inputs: bool,
    keep_audio: bool,
    clean: bool,
) -> Result<Vec<IntegrationRecord>> {
    let mut stream = TcpStream::connect(addr)?;
    writeln!(
        stream,
        "BETWEEN {start} {end} {} {} {} {}",
        flag(keep_cross),
        flag(keep_inputs),
        flag(keep_audio),
        flag(clean)
    )?;
    stream.flush()?;

    let mut reader = BufReader::new(stream);
    let count = read_count(&mut reader)?;
    read_records(&mut reader, count)
}

/// Fetches raw-audio records in `[start, end]` together with the
/// server's sample rate.
///
/// Returns an empty vector and a zero rate when the server has no raw
/// store or no matching data.
pub fn load_raw_between(
    addr: impl ToSocketAddrs,
    start: i64,
    end: i64,
) -> Result<(Vec<IntegrationRecord>, u32)> {
    let mut stream = TcpStream::connect(addr)?;
    writeln!(stream, "RAW-BETWEEN {start} {end}")?;
    stream.flush()?;

    let mut reader = BufReader::new(stream);
    let count = read_count(&mut reader)?;
    if count == 0 {
        return Ok((Vec::new(), 0));
    }

    let mut rate_line = String::new();
    reader.read_line(&mut rate_line)?;
    let sample_rate: u32 = rate_line
        .trim()
        .parse()
        .map_err(|_| StoreError::Protocol(format!("bad sample rate {}", rate_line.trim())))?;

    let records = read_records(&mut reader, count)?;
    Ok((records, sample_rate))
}

fn flag(value: bool) -> u8 {
    u8::from(value)
}

fn read_count<R: BufRead>(reader: &mut R) -> Result<usize> {
    let mut line = String::new();
    reader.read_line(&mut line)?;
    line.trim()
        .parse()
        .map_err(|_| StoreError::Protocol(format!("bad record count {}", line.trim())))
}

fn read_records<R: BufRead>(reader: &mut R, count: usize) -> Result<Vec<IntegrationRecord>> {
    let mut records = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        match IntegrationRecord::read_from(reader)? {
            Some(record) => records.push(record),
            None => {
                return Err(StoreError::Protocol(
                    "server closed mid-reply".into(),
                ));
            }
        }
    }
    Ok(records)
}
