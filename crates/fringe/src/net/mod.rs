//! TCP query service: wire-protocol grammar, per-connection handler, and
//! the accept loop.
//!
//! Clients hold one persistent connection each and issue line-oriented
//! ASCII commands; the server replies inline on the same stream, with
//! record payloads in the binary encoding of [`crate::record`]. Each
//! connection is served by its own thread with plain blocking I/O.
//!
//! # Commands
//!
//! ```text
//! BETWEEN <start> <end> <keepCross> <keepInputs> <keepAudio> [<clean>]
//! RAW-BETWEEN <start> <end>
//! AFTER <epoch>
//! LOCATION
//! VERSION
//! ```
//!
//! Timestamps are microseconds since the Unix epoch; `0` is a wildcard
//! whose meaning depends on position (no lower bound / "now"). A
//! malformed command, an implausible timestamp, or a stream failure ends
//! the connection with a literal `\nERROR\n`; other connections and the
//! store itself are unaffected.

pub mod client;

use crate::error::{Result, StoreError};
use crate::record::purge_flagged;
use crate::store::layout::utc_parts;
use crate::store::TimeSeriesStore;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread;
use tracing::{debug, warn};

/// Version string returned by the `VERSION` command.
pub const SERVER_VERSION: &str = "FRINGE 1.1";

/// Marker sent before dropping a misbehaving connection.
const ERROR_REPLY: &[u8] = b"\nERROR\n";

/// Observatory site details reported to clients.
#[derive(Debug, Clone, Copy)]
pub struct SiteInfo {
    /// Site longitude in degrees, east positive.
    pub longitude: f64,
    /// Site latitude in degrees, north positive.
    pub latitude: f64,
    /// Sample rate of the raw audio stream, Hz.
    pub sample_rate: u32,
}

/// A parsed client command.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Between {
        start: i64,
        end: i64,
        keep_cross: bool,
        keep_inputs: bool,
        keep_audio: bool,
        clean: bool,
    },
    RawBetween {
        start: i64,
        end: i64,
    },
    After {
        epoch: i64,
    },
    Location,
    Version,
}

impl Command {
    /// Parses one command line.
    fn parse(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let directive = words
            .next()
            .ok_or_else(|| StoreError::Protocol("empty command".into()))?;

        let command = match directive {
            "BETWEEN" => {
                let start = parse_epoch(words.next())?;
                let end = parse_epoch(words.next())?;
                let (start, end) = order_bounds(start, end);
                Self::Between {
                    start,
                    end,
                    keep_cross: parse_bool(words.next())?,
                    keep_inputs: parse_bool(words.next())?,
                    keep_audio: parse_bool(words.next())?,
                    // A missing clean flag defaults to off.
                    clean: match words.next() {
                        Some(word) => parse_bool(Some(word)).unwrap_or(false),
                        None => false,
                    },
                }
            }
            "RAW-BETWEEN" => {
                let start = parse_epoch(words.next())?;
                let end = parse_epoch(words.next())?;
                let (start, end) = order_bounds(start, end);
                Self::RawBetween { start, end }
            }
            "AFTER" => Self::After {
                epoch: parse_epoch(words.next())?,
            },
            "LOCATION" => Self::Location,
            "VERSION" => Self::Version,
            other => {
                return Err(StoreError::Protocol(format!("unknown command {other}")));
            }
        };
        Ok(command)
    }
}

/// Parses a timestamp argument and sanity-checks its calendar year.
///
/// Nonzero values must land between the years 1990 and 2200; anything
/// else is client rubbish and drops the connection.
fn parse_epoch(word: Option<&str>) -> Result<i64> {
    let word = word.ok_or_else(|| StoreError::Protocol("missing timestamp".into()))?;
    let epoch: i64 = word
        .parse()
        .map_err(|_| StoreError::Protocol(format!("bad timestamp {word}")))?;
    if epoch != 0 {
        let year = utc_parts(epoch).year;
        if !(1990..=2200).contains(&year) {
            return Err(StoreError::Protocol(format!(
                "timestamp {epoch} outside plausible range"
            )));
        }
    }
    Ok(epoch)
}

fn parse_bool(word: Option<&str>) -> Result<bool> {
    match word {
        Some("0") => Ok(false),
        Some("1") => Ok(true),
        Some(other) => Err(StoreError::Protocol(format!("bad flag {other}"))),
        None => Err(StoreError::Protocol("missing flag".into())),
    }
}

/// Swapped bounds are reordered; a zero end stays "open".
fn order_bounds(start: i64, end: i64) -> (i64, i64) {
    if end != 0 && end < start {
        (end, start)
    } else {
        (start, end)
    }
}

/// Per-connection request handler over a shared store.
///
/// The handler is generic over its streams so the command loop can be
/// exercised without sockets; [`QueryService::serve_connection`] adapts a
/// [`TcpStream`].
pub struct QueryService {
    store: Arc<TimeSeriesStore>,
    /// Rolling store holding raw-audio records, when one is configured.
    raw_store: Option<Arc<TimeSeriesStore>>,
    site: SiteInfo,
}

impl QueryService {
    /// Creates a service over `store`, optionally backed by a raw-audio
    /// store for `RAW-BETWEEN`.
    pub fn new(
        store: Arc<TimeSeriesStore>,
        raw_store: Option<Arc<TimeSeriesStore>>,
        site: SiteInfo,
    ) -> Self {
        Self {
            store,
            raw_store,
            site,
        }
    }

    /// Serves one TCP connection to completion.
    pub fn serve_connection(&self, stream: TcpStream) {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".into());
        debug!(%peer, "new connection");

        let reader = match stream.try_clone() {
            Ok(read_half) => BufReader::new(read_half),
            Err(err) => {
                warn!(%peer, "failed to split connection: {err}");
                return;
            }
        };
        let mut writer = stream;
        match self.serve_io(reader, &mut writer) {
            Ok(()) => debug!(%peer, "connection closed"),
            Err(err) => {
                debug!(%peer, "dropping connection: {err}");
                // Best effort; the peer may already be gone.
                let _ = writer.write_all(ERROR_REPLY);
                let _ = writer.flush();
            }
        }
    }

    /// Command loop over arbitrary streams. Returns `Ok` on a clean
    /// client disconnect and `Err` when the connection must be dropped
    /// with the error marker.
    pub fn serve_io<R: BufRead, W: Write>(&self, mut reader: R, writer: &mut W) -> Result<()> {
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                return Ok(());
            }
            if line.trim().is_empty() {
                continue;
            }
            let command = Command::parse(&line)?;
            self.dispatch(&command, writer)?;
            writer.flush()?;
        }
    }

    fn dispatch<W: Write>(&self, command: &Command, writer: &mut W) -> Result<()> {
        match *command {
            Command::Between {
                start,
                end,
                keep_cross,
                keep_inputs,
                keep_audio,
                clean,
            } => {
                let mut records = self.store.get_range(start, end)?;
                if clean {
                    records = purge_flagged(&records);
                }
                writeln!(writer, "{}", records.len())?;
                for record in &mut records {
                    record.keep_only(keep_cross, keep_inputs, keep_audio);
                    record.write_to(writer)?;
                }
            }
            Command::RawBetween { start, end } => {
                let Some(raw_store) = &self.raw_store else {
                    debug!("raw data requested but no raw store configured");
                    writeln!(writer, "0")?;
                    return Ok(());
                };
                let records = raw_store.get_range(start, end)?;
                writeln!(writer, "{}", records.len())?;
                if !records.is_empty() {
                    writeln!(writer, "{}", self.site.sample_rate)?;
                    for record in &records {
                        record.write_to(writer)?;
                    }
                }
            }
            Command::After { epoch } => {
                let records = if epoch == 0 {
                    self.store.get_recent().into_iter().collect()
                } else {
                    self.store.get_range(epoch, 0)?
                };
                writeln!(writer, "{}", records.len())?;
                for record in &records {
                    writeln!(
                        writer,
                        "{} {} {} {}",
                        record.timestamp, record.power1, record.power2, record.cross_power
                    )?;
                }
            }
            Command::Location => {
                writeln!(writer, "{}\t{}", self.site.longitude, self.site.latitude)?;
            }
            Command::Version => {
                writeln!(writer, "{SERVER_VERSION}")?;
            }
        }
        Ok(())
    }
}

/// Accept loop: one handler thread per client connection.
pub struct Server {
    listener: TcpListener,
    service: Arc<QueryService>,
}

impl Server {
    /// Binds the listening socket.
    ///
    /// # Errors
    ///
    /// Returns an error when the address cannot be bound.
    pub fn bind(addr: impl ToSocketAddrs, service: Arc<QueryService>) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        Ok(Self { listener, service })
    }

    /// Address the server is actually listening on.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections forever, spawning a thread per client.
    pub fn run(&self) -> Result<()> {
        loop {
            match self.listener.accept() {
                Ok((stream, _addr)) => {
                    let service = Arc::clone(&self.service);
                    thread::spawn(move || service.serve_connection(stream));
                }
                Err(err) => {
                    // Transient accept failures should not kill the server.
                    warn!("accept failed: {err}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_between_with_optional_clean() {
        let parsed = Command::parse("BETWEEN 0 0 1 1 1 0").unwrap();
        assert_eq!(
            parsed,
            Command::Between {
                start: 0,
                end: 0,
                keep_cross: true,
                keep_inputs: true,
                keep_audio: true,
                clean: false,
            }
        );

        let defaulted = Command::parse("BETWEEN 0 0 1 0 0").unwrap();
        assert!(matches!(defaulted, Command::Between { clean: false, .. }));
    }

    #[test]
    fn test_parse_reorders_swapped_bounds() {
        let ts1 = 1_500_000_000_000_000_i64;
        let ts2 = ts1 + 1_000_000;
        let parsed = Command::parse(&format!("BETWEEN {ts2} {ts1} 0 0 0")).unwrap();
        assert!(matches!(
            parsed,
            Command::Between { start, end, .. } if start == ts1 && end == ts2
        ));
    }

    #[test]
    fn test_parse_rejects_implausible_year() {
        // Seconds-resolution value, year 1970 in microseconds.
        assert!(Command::parse("AFTER 1500000000").is_err());
        assert!(Command::parse("AFTER 1500000000000000").is_ok());
    }

    #[test]
    fn test_parse_rejects_unknown_directive_and_bad_flags() {
        assert!(Command::parse("FETCH 1 2").is_err());
        assert!(Command::parse("BETWEEN 0 0 yes 0 0").is_err());
        assert!(Command::parse("BETWEEN 0 0 1 1").is_err());
    }
}
