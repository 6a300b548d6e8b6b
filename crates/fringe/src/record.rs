//! The integration period record and its binary codec.
//!
//! An [`IntegrationRecord`] is one timestamped measurement produced by the
//! correlator for a two-input interferometer: detected power for each
//! input, the cross-correlated power, complex amplitude and phase, and an
//! interference flag, optionally accompanied by per-input and cross
//! spectra and by the raw interleaved sample buffer they were computed
//! from.
//!
//! # Encoding
//!
//! Records are serialized with an identical little-endian layout on disk
//! and on the wire:
//!
//! ```text
//! i32  total_len      total record size in bytes, length field included
//! i64  timestamp      microseconds since the Unix epoch, UTC
//! f32  cross_power, power1, power2, amplitude, phase
//! i32  num_bins
//! u8   'R' | ' '      interference flag
//! u8   'P' | ' '      phase spectrum present
//! u8   'X' | ' '      cross spectrum present
//! u8   '1' | ' '      input 1 spectrum present
//! u8   '2' | ' '      input 2 spectrum present
//! [f32 x num_bins]    each present spectrum, in flag order
//! i32  audio_len      samples per channel, 0 when no audio follows
//! [i16 x 2*audio_len] interleaved two-channel raw samples
//! ```
//!
//! `total_len` counts its own four bytes; readers that skip a record body
//! seek `total_len - PREFIX_LEN` forward after consuming the prefix.
//! Absent sections decode as absent, never as zero-length-but-present.

use crate::error::{Result, StoreError};
use std::io::{Read, Write};

/// Byte size of the length + timestamp prefix used for body skipping.
pub const PREFIX_LEN: i64 = 12;

/// Fixed encoded size of a record with no spectra and no audio.
///
/// Length word (4) + timestamp (8) + five scalars (20) + num_bins (4)
/// + five flag bytes (5) + audio_len (4).
pub const BASE_ENCODED_LEN: i32 = 45;

/// One integration period: scalars, presence flags, and optional
/// variable-length sections.
///
/// Records are plain value objects: freely clonable, with exclusive
/// ownership of any array payload. They are created by the acquisition
/// pipeline with raw samples only, populated in place once derived
/// quantities are computed, and optionally stripped with [`keep_only`]
/// before storage or transmission.
///
/// [`keep_only`]: IntegrationRecord::keep_only
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntegrationRecord {
    /// Start time of the integration period, microseconds since the Unix
    /// epoch. Zero means "unset".
    pub timestamp: i64,
    /// Detected zero-lag cross power.
    pub cross_power: f32,
    /// Detected power for input 1.
    pub power1: f32,
    /// Detected power for input 2.
    pub power2: f32,
    /// Complex amplitude of the cross-correlated channel.
    pub amplitude: f32,
    /// Complex phase of the cross-correlated channel.
    pub phase: f32,
    /// Set when this period is considered perturbed by interference.
    pub rfi: bool,
    /// Imaginary part of the cross spectrum, one value per bin.
    pub phase_spec: Option<Vec<f32>>,
    /// Real part of the cross spectrum, one value per bin.
    pub cross_spec: Option<Vec<f32>>,
    /// Spectrum for input 1, one value per bin.
    pub input1_spec: Option<Vec<f32>>,
    /// Spectrum for input 2, one value per bin.
    pub input2_spec: Option<Vec<f32>>,
    /// Interleaved two-channel raw samples; length is `2 * audio_len()`.
    pub raw_audio: Option<Vec<i16>>,
}

impl IntegrationRecord {
    /// Creates an empty record with the given timestamp.
    pub fn at(timestamp: i64) -> Self {
        Self {
            timestamp,
            ..Self::default()
        }
    }

    /// Number of frequency bins shared by every present spectrum.
    ///
    /// Returns 0 when no spectra are present. All present spectra must
    /// share one length; a mismatch is a construction bug and aborts.
    pub fn num_bins(&self) -> i32 {
        let mut bins: Option<usize> = None;
        for spec in [
            &self.phase_spec,
            &self.cross_spec,
            &self.input1_spec,
            &self.input2_spec,
        ]
        .into_iter()
        .flatten()
        {
            match bins {
                None => bins = Some(spec.len()),
                Some(n) => assert_eq!(n, spec.len(), "spectral length mismatch"),
            }
        }
        bins.unwrap_or(0) as i32
    }

    /// Number of raw samples per channel, 0 when no audio is attached.
    ///
    /// The stored buffer is channel-interleaved, so it must hold an even
    /// number of samples.
    pub fn audio_len(&self) -> i32 {
        match &self.raw_audio {
            Some(audio) => {
                assert_eq!(audio.len() % 2, 0, "raw audio not channel-interleaved");
                (audio.len() / 2) as i32
            }
            None => 0,
        }
    }

    /// Total encoded size in bytes, the length word included.
    pub fn encoded_len(&self) -> i32 {
        let mut len = BASE_ENCODED_LEN;
        let spec_bytes = self.num_bins() * 4;
        if self.phase_spec.is_some() {
            len += spec_bytes;
        }
        if self.cross_spec.is_some() {
            len += spec_bytes;
        }
        if self.input1_spec.is_some() {
            len += spec_bytes;
        }
        if self.input2_spec.is_some() {
            len += spec_bytes;
        }
        len += 2 * 2 * self.audio_len();
        len
    }

    /// Discards any sections not selected, in place.
    ///
    /// `cross` keeps the cross and phase spectra, `inputs` keeps the two
    /// per-input spectra, `audio` keeps the raw sample buffer. Remaining
    /// fields stay valid.
    pub fn keep_only(&mut self, cross: bool, inputs: bool, audio: bool) {
        if !cross {
            self.phase_spec = None;
            self.cross_spec = None;
        }
        if !inputs {
            self.input1_spec = None;
            self.input2_spec = None;
        }
        if !audio {
            self.raw_audio = None;
        }
    }

    /// Serializes the record to `writer`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying write fails.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let num_bins = self.num_bins();
        let audio_len = self.audio_len();

        writer.write_all(&self.encoded_len().to_le_bytes())?;
        writer.write_all(&self.timestamp.to_le_bytes())?;
        writer.write_all(&self.cross_power.to_le_bytes())?;
        writer.write_all(&self.power1.to_le_bytes())?;
        writer.write_all(&self.power2.to_le_bytes())?;
        writer.write_all(&self.amplitude.to_le_bytes())?;
        writer.write_all(&self.phase.to_le_bytes())?;
        writer.write_all(&num_bins.to_le_bytes())?;

        let flags = [
            flag_byte(self.rfi, b'R'),
            flag_byte(self.phase_spec.is_some(), b'P'),
            flag_byte(self.cross_spec.is_some(), b'X'),
            flag_byte(self.input1_spec.is_some(), b'1'),
            flag_byte(self.input2_spec.is_some(), b'2'),
        ];
        writer.write_all(&flags)?;

        for spec in [
            &self.phase_spec,
            &self.cross_spec,
            &self.input1_spec,
            &self.input2_spec,
        ]
        .into_iter()
        .flatten()
        {
            for value in spec {
                writer.write_all(&value.to_le_bytes())?;
            }
        }

        writer.write_all(&audio_len.to_le_bytes())?;
        if let Some(audio) = &self.raw_audio {
            for sample in audio {
                writer.write_all(&sample.to_le_bytes())?;
            }
        }
        Ok(())
    }

    /// Deserializes one record from `reader`.
    ///
    /// Returns `Ok(None)` when the stream is cleanly at end-of-file, that
    /// is, when not a single byte of the next record could be read.
    ///
    /// # Errors
    ///
    /// Returns an error when the stream ends mid-record, a presence flag
    /// holds an unexpected byte, or a declared length is implausible.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Option<Self>> {
        let mut len_buf = [0u8; 4];
        if !read_exact_or_eof(reader, &mut len_buf)? {
            return Ok(None);
        }
        let total_len = i32::from_le_bytes(len_buf);
        if total_len < BASE_ENCODED_LEN {
            return Err(StoreError::CorruptLength { length: total_len });
        }

        let mut rec = Self {
            timestamp: read_i64(reader, "timestamp")?,
            cross_power: read_f32(reader, "cross power")?,
            power1: read_f32(reader, "power 1")?,
            power2: read_f32(reader, "power 2")?,
            amplitude: read_f32(reader, "amplitude")?,
            phase: read_f32(reader, "phase")?,
            ..Self::default()
        };
        let num_bins = read_i32(reader, "bin count")?;
        if num_bins < 0 {
            return Err(StoreError::CorruptLength { length: num_bins });
        }

        rec.rfi = read_flag(reader, 'R')?;
        let has_phase = read_flag(reader, 'P')?;
        let has_cross = read_flag(reader, 'X')?;
        let has_input1 = read_flag(reader, '1')?;
        let has_input2 = read_flag(reader, '2')?;

        if has_phase {
            rec.phase_spec = Some(read_spectrum(reader, num_bins)?);
        }
        if has_cross {
            rec.cross_spec = Some(read_spectrum(reader, num_bins)?);
        }
        if has_input1 {
            rec.input1_spec = Some(read_spectrum(reader, num_bins)?);
        }
        if has_input2 {
            rec.input2_spec = Some(read_spectrum(reader, num_bins)?);
        }

        let audio_len = read_i32(reader, "audio length")?;
        if audio_len < 0 {
            return Err(StoreError::CorruptLength { length: audio_len });
        }
        if audio_len != 0 {
            let mut audio = Vec::with_capacity(2 * audio_len as usize);
            let mut buf = [0u8; 2];
            for _ in 0..2 * audio_len {
                reader.read_exact(&mut buf).map_err(|_| {
                    StoreError::TruncatedRecord {
                        context: "raw audio",
                    }
                })?;
                audio.push(i16::from_le_bytes(buf));
            }
            rec.raw_audio = Some(audio);
        }

        Ok(Some(rec))
    }

    /// Reads only the length + timestamp prefix of the next record.
    ///
    /// Returns `Ok(None)` at clean end-of-file. The caller is positioned
    /// `PREFIX_LEN` bytes into the record and can skip its body by
    /// seeking `total_len - PREFIX_LEN` further.
    pub fn read_prefix<R: Read>(reader: &mut R) -> Result<Option<(i32, i64)>> {
        let mut len_buf = [0u8; 4];
        if !read_exact_or_eof(reader, &mut len_buf)? {
            return Ok(None);
        }
        let total_len = i32::from_le_bytes(len_buf);
        if total_len < BASE_ENCODED_LEN {
            return Err(StoreError::CorruptLength { length: total_len });
        }
        let timestamp = read_i64(reader, "timestamp")?;
        Ok(Some((total_len, timestamp)))
    }
}

/// Returns a new series with every interference-flagged record removed.
pub fn purge_flagged(records: &[IntegrationRecord]) -> Vec<IntegrationRecord> {
    records.iter().filter(|r| !r.rfi).cloned().collect()
}

/// Sorts records in place by ascending timestamp.
pub fn sort_by_time(records: &mut [IntegrationRecord]) {
    records.sort_by_key(|r| r.timestamp);
}

/// Merges two individually time-sorted runs into one sorted series.
pub fn merge(
    first: &[IntegrationRecord],
    second: &[IntegrationRecord],
) -> Vec<IntegrationRecord> {
    let mut merged = Vec::with_capacity(first.len() + second.len());
    let (mut i, mut j) = (0, 0);
    while i < first.len() && j < second.len() {
        if first[i].timestamp <= second[j].timestamp {
            merged.push(first[i].clone());
            i += 1;
        } else {
            merged.push(second[j].clone());
            j += 1;
        }
    }
    merged.extend_from_slice(&first[i..]);
    merged.extend_from_slice(&second[j..]);
    merged
}

fn flag_byte(present: bool, marker: u8) -> u8 {
    if present {
        marker
    } else {
        b' '
    }
}

/// Fills `buf` from `reader`. Returns `false` when the stream was already
/// at end-of-file; a partial fill is a truncation error.
fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(StoreError::TruncatedRecord {
                context: "record prefix",
            });
        }
        filled += n;
    }
    Ok(true)
}

fn read_i32<R: Read>(reader: &mut R, context: &'static str) -> Result<i32> {
    let mut buf = [0u8; 4];
    reader
        .read_exact(&mut buf)
        .map_err(|_| StoreError::TruncatedRecord { context })?;
    Ok(i32::from_le_bytes(buf))
}

fn read_i64<R: Read>(reader: &mut R, context: &'static str) -> Result<i64> {
    let mut buf = [0u8; 8];
    reader
        .read_exact(&mut buf)
        .map_err(|_| StoreError::TruncatedRecord { context })?;
    Ok(i64::from_le_bytes(buf))
}

fn read_f32<R: Read>(reader: &mut R, context: &'static str) -> Result<f32> {
    let mut buf = [0u8; 4];
    reader
        .read_exact(&mut buf)
        .map_err(|_| StoreError::TruncatedRecord { context })?;
    Ok(f32::from_le_bytes(buf))
}

fn read_flag<R: Read>(reader: &mut R, section: char) -> Result<bool> {
    let mut buf = [0u8; 1];
    reader
        .read_exact(&mut buf)
        .map_err(|_| StoreError::TruncatedRecord {
            context: "presence flags",
        })?;
    if buf[0] == section as u8 {
        Ok(true)
    } else if buf[0] == b' ' {
        Ok(false)
    } else {
        Err(StoreError::InvalidFlag {
            section,
            found: buf[0],
        })
    }
}

fn read_spectrum<R: Read>(reader: &mut R, num_bins: i32) -> Result<Vec<f32>> {
    let mut spec = Vec::with_capacity(num_bins as usize);
    let mut buf = [0u8; 4];
    for _ in 0..num_bins {
        reader
            .read_exact(&mut buf)
            .map_err(|_| StoreError::TruncatedRecord {
                context: "spectrum",
            })?;
        spec.push(f32::from_le_bytes(buf));
    }
    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_record() -> IntegrationRecord {
        IntegrationRecord {
            timestamp: 1_500_000_000_000_000,
            cross_power: 3.5,
            power1: 1.25,
            power2: 2.5,
            amplitude: 0.75,
            phase: -1.5,
            rfi: true,
            phase_spec: Some(vec![0.1, 0.2, 0.3]),
            cross_spec: Some(vec![1.0, 2.0, 3.0]),
            input1_spec: None,
            input2_spec: Some(vec![-1.0, 0.0, 1.0]),
            raw_audio: Some(vec![10, -10, 20, -20]),
        }
    }

    #[test]
    fn test_encoded_len_matches_bytes_written() {
        let rec = sample_record();
        let mut buf = Vec::new();
        rec.write_to(&mut buf).unwrap();
        assert_eq!(buf.len() as i32, rec.encoded_len());
    }

    #[test]
    fn test_base_len_has_no_optional_sections() {
        let rec = IntegrationRecord::at(1);
        assert_eq!(rec.encoded_len(), BASE_ENCODED_LEN);
    }

    #[test]
    fn test_roundtrip_preserves_absent_sections() {
        let mut rec = sample_record();
        rec.input1_spec = None;
        let mut buf = Vec::new();
        rec.write_to(&mut buf).unwrap();

        let decoded = IntegrationRecord::read_from(&mut Cursor::new(&buf))
            .unwrap()
            .unwrap();
        assert_eq!(decoded, rec);
        assert!(decoded.input1_spec.is_none());
    }

    #[test]
    fn test_read_from_clean_eof_is_none() {
        let mut empty = Cursor::new(Vec::new());
        assert!(IntegrationRecord::read_from(&mut empty).unwrap().is_none());
    }

    #[test]
    fn test_read_from_partial_prefix_is_error() {
        let mut short = Cursor::new(vec![1u8, 2]);
        assert!(IntegrationRecord::read_from(&mut short).is_err());
    }

    #[test]
    fn test_bad_flag_byte_is_error() {
        let rec = IntegrationRecord::at(7);
        let mut buf = Vec::new();
        rec.write_to(&mut buf).unwrap();
        // The RFI flag sits right after the bin count.
        buf[36] = b'Q';
        assert!(matches!(
            IntegrationRecord::read_from(&mut Cursor::new(&buf)),
            Err(StoreError::InvalidFlag { section: 'R', .. })
        ));
    }

    #[test]
    fn test_prefix_skip_lands_on_next_record() {
        let first = sample_record();
        let second = IntegrationRecord::at(first.timestamp + 1);
        let mut buf = Vec::new();
        first.write_to(&mut buf).unwrap();
        second.write_to(&mut buf).unwrap();

        let mut cursor = Cursor::new(&buf);
        let (len, ts) = IntegrationRecord::read_prefix(&mut cursor).unwrap().unwrap();
        assert_eq!(ts, first.timestamp);
        cursor.set_position(cursor.position() + (len as i64 - PREFIX_LEN) as u64);

        let next = IntegrationRecord::read_from(&mut cursor).unwrap().unwrap();
        assert_eq!(next.timestamp, second.timestamp);
    }

    #[test]
    fn test_keep_only_strips_by_group() {
        let mut rec = sample_record();
        rec.keep_only(false, true, false);
        assert!(rec.phase_spec.is_none());
        assert!(rec.cross_spec.is_none());
        assert!(rec.input2_spec.is_some());
        assert!(rec.raw_audio.is_none());
        // Scalars survive stripping.
        assert_eq!(rec.power1, 1.25);
    }

    #[test]
    fn test_purge_flagged_drops_rfi_periods() {
        let mut clean = sample_record();
        clean.rfi = false;
        let flagged = sample_record();
        let purged = purge_flagged(&[clean.clone(), flagged]);
        assert_eq!(purged, vec![clean]);
    }

    #[test]
    fn test_sort_by_time_orders_unsorted_series() {
        let mut records: Vec<_> = [300, 100, 200]
            .iter()
            .map(|&t| IntegrationRecord::at(t))
            .collect();
        sort_by_time(&mut records);
        let times: Vec<_> = records.iter().map(|r| r.timestamp).collect();
        assert_eq!(times, vec![100, 200, 300]);
    }

    #[test]
    fn test_merge_interleaves_sorted_runs() {
        let a: Vec<_> = [100, 300].iter().map(|&t| IntegrationRecord::at(t)).collect();
        let b: Vec<_> = [200, 400].iter().map(|&t| IntegrationRecord::at(t)).collect();
        let merged = merge(&a, &b);
        let times: Vec<_> = merged.iter().map(|r| r.timestamp).collect();
        assert_eq!(times, vec![100, 200, 300, 400]);
    }
}
