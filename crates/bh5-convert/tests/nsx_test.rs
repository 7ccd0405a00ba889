//! End-to-end tests for the continuous-format pipelines: synthetic NSx
//! 2.1 and 2.2 files built in memory, converted, and verified through
//! the container reader.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use bh5_convert::nsx22::decode_nsx22;
use bh5_convert::{convert, ChannelDescriptor, ChannelExtDescriptor, ConvertError, ConvertOptions};
use bh5_format::{Bh5Reader, GroupId, StreamId};

// ──────────────────────── builders ────────────────────────

/// Deterministic sample for channel column `c`, tuple `t`.
fn sample(c: usize, t: usize) -> i16 {
    (c as i16 * 1000).wrapping_add(t as i16)
}

fn nsx21_file(period: u32, ids: &[u32], tuples: usize) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(b"NEURALSG");
    let mut label = [0u8; 16];
    label[..8].copy_from_slice(b"30 kS/s\0");
    buf.extend_from_slice(&label);
    buf.extend_from_slice(&period.to_le_bytes());
    buf.extend_from_slice(&(ids.len() as u32).to_le_bytes());
    for id in ids {
        buf.extend_from_slice(&id.to_le_bytes());
    }
    for t in 0..tuples {
        for c in 0..ids.len() {
            buf.extend_from_slice(&sample(c, t).to_le_bytes());
        }
    }
    buf
}

struct TestChannel {
    id: u16,
    label: &'static str,
    unit: &'static str,
    dig: (i16, i16),
    ana: (i16, i16),
}

fn nsx22_ext(ch: &TestChannel) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(b"CC");
    buf.extend_from_slice(&ch.id.to_le_bytes());
    let mut label = [0u8; 16];
    label[..ch.label.len()].copy_from_slice(ch.label.as_bytes());
    buf.extend_from_slice(&label);
    buf.push(1); // connector
    buf.push(ch.id as u8); // pin
    buf.extend_from_slice(&ch.dig.0.to_le_bytes());
    buf.extend_from_slice(&ch.dig.1.to_le_bytes());
    buf.extend_from_slice(&ch.ana.0.to_le_bytes());
    buf.extend_from_slice(&ch.ana.1.to_le_bytes());
    let mut unit = [0u8; 16];
    unit[..ch.unit.len()].copy_from_slice(ch.unit.as_bytes());
    buf.extend_from_slice(&unit);
    buf.extend_from_slice(&250u32.to_le_bytes()); // hp freq
    buf.extend_from_slice(&4u32.to_le_bytes()); // hp order
    buf.extend_from_slice(&1u16.to_le_bytes()); // hp type
    buf.extend_from_slice(&7500u32.to_le_bytes()); // lp freq
    buf.extend_from_slice(&2u32.to_le_bytes()); // lp order
    buf.extend_from_slice(&1u16.to_le_bytes()); // lp type
    assert_eq!(buf.len(), 66);
    buf
}

/// A 2.2 file: fixed header, one `CC` header per channel, then segments
/// of `(start timestamp, sample tuples)`.
fn nsx22_file(
    channels: &[TestChannel],
    period: u32,
    resolution: u32,
    segments: &[(u32, Vec<Vec<i16>>)],
) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(b"NEURALCD");
    buf.push(2);
    buf.push(2);
    let bytes_in_headers = 314 + 66 * channels.len() as u32;
    buf.extend_from_slice(&bytes_in_headers.to_le_bytes());
    let mut label = [0u8; 16];
    label[..7].copy_from_slice(b"raw set");
    buf.extend_from_slice(&label);
    let mut comment = [0u8; 256];
    comment[..9].copy_from_slice(b"continual");
    buf.extend_from_slice(&comment);
    buf.extend_from_slice(&period.to_le_bytes());
    buf.extend_from_slice(&resolution.to_le_bytes());
    for v in [2013u16, 1, 2, 8, 9, 30, 0, 0] {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    buf.extend_from_slice(&(channels.len() as u32).to_le_bytes());
    assert_eq!(buf.len(), 314);
    for ch in channels {
        buf.extend_from_slice(&nsx22_ext(ch));
    }
    for (timestamp, tuples) in segments {
        buf.push(1); // data header tag
        buf.extend_from_slice(&timestamp.to_le_bytes());
        buf.extend_from_slice(&(tuples.len() as u32).to_le_bytes());
        for tuple in tuples {
            for s in tuple {
                buf.extend_from_slice(&s.to_le_bytes());
            }
        }
    }
    buf
}

fn write_and_convert(name: &str, bytes: &[u8]) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join(name);
    std::fs::write(&src, bytes).unwrap();
    let dest = dir.path().join(format!("{name}.bh5"));
    convert(&src, &dest, &ConvertOptions::default()).unwrap();
    (dir, dest)
}

fn read_samples(reader: &mut Bh5Reader, stream: StreamId) -> Vec<i16> {
    reader
        .read_stream_bytes(stream)
        .unwrap()
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect()
}

// ──────────────────────── NSx 2.1 ────────────────────────

#[test]
fn nsx21_preserves_sample_count_and_order() {
    // 2500 tuples: crosses two chunk boundaries and leaves a partial
    // tail chunk.
    let ids = [4u32, 9, 2];
    let bytes = nsx21_file(3, &ids, 2500);
    let (_dir, dest) = write_and_convert("session.ns2", &bytes);

    let mut reader = Bh5Reader::open(&dest).unwrap();
    for (c, id) in ids.iter().enumerate() {
        let group = reader
            .group_by_path(&format!("/channel/channel{id:05}"))
            .unwrap();
        let chan = reader.group_attr::<ChannelDescriptor>(group, "Chan").unwrap();
        assert_eq!(chan.id, *id as u16);
        assert_eq!(chan.clock_hz, 30000.0);
        assert_eq!(chan.sample_rate_hz, 10000.0);
        assert_eq!(chan.sample_bits, 16);

        let stream = reader.find_stream(group, "continuous_set").unwrap();
        assert_eq!(reader.stream_attr::<u32>(stream, "Offset").unwrap(), 0);
        assert_eq!(reader.stream_record_count(stream).unwrap(), 2500);
        let samples = read_samples(&mut reader, stream);
        let expected: Vec<i16> = (0..2500).map(|t| sample(c, t)).collect();
        assert_eq!(samples, expected);
        reader.verify_stream(stream).unwrap();
    }
}

#[test]
fn nsx21_chunked_and_unchunked_output_identical() {
    let ids = [1u32, 2];
    let bytes = nsx21_file(1, &ids, 1500);
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("session.ns2");
    std::fs::write(&src, &bytes).unwrap();

    let cached = dir.path().join("cached.bh5");
    let exact = dir.path().join("exact.bh5");
    convert(&src, &cached, &ConvertOptions::default()).unwrap();
    convert(
        &src,
        &exact,
        &ConvertOptions {
            chunk_cache: false,
            ..ConvertOptions::default()
        },
    )
    .unwrap();

    for c in 0..ids.len() {
        let path = format!("/channel/channel{:05}", ids[c]);
        let mut readers = [Bh5Reader::open(&cached).unwrap(), Bh5Reader::open(&exact).unwrap()];
        let mut outputs = Vec::new();
        for reader in &mut readers {
            let group = reader.group_by_path(&path).unwrap();
            let stream = reader.find_stream(group, "continuous_set").unwrap();
            outputs.push(read_samples(reader, stream));
        }
        assert_eq!(outputs[0], outputs[1]);
        assert_eq!(outputs[0].len(), 1500);
    }
}

#[test]
fn nsx21_empty_data_is_fatal() {
    let bytes = nsx21_file(1, &[1, 2], 0);
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("empty.ns2");
    std::fs::write(&src, &bytes).unwrap();

    let result = convert(&src, &dir.path().join("empty.bh5"), &ConvertOptions::default());
    assert!(matches!(result, Err(ConvertError::EmptyData)));
}

#[test]
fn nsx21_truncated_first_tuple_is_fatal() {
    let mut bytes = nsx21_file(1, &[1, 2], 0);
    bytes.extend_from_slice(&7i16.to_le_bytes()); // half a tuple
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("short.ns2");
    std::fs::write(&src, &bytes).unwrap();

    let result = convert(&src, &dir.path().join("short.bh5"), &ConvertOptions::default());
    assert!(matches!(result, Err(ConvertError::EmptyData)));
}

#[test]
fn nsx21_rejects_too_many_channels() {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"NEURALSG");
    bytes.extend_from_slice(&[0u8; 16]);
    bytes.extend_from_slice(&1u32.to_le_bytes());
    bytes.extend_from_slice(&300u32.to_le_bytes()); // over the limit
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("wide.ns2");
    std::fs::write(&src, &bytes).unwrap();

    let result = convert(&src, &dir.path().join("wide.bh5"), &ConvertOptions::default());
    assert!(matches!(
        result,
        Err(ConvertError::TooManyChannels { got: 300, max: 272 })
    ));
}

// ──────────────────────── NSx 2.2 ────────────────────────

fn two_channels() -> Vec<TestChannel> {
    vec![
        TestChannel {
            id: 3,
            label: "elec3",
            unit: "uV",
            dig: (-10000, 10000),
            ana: (-5000, 5000),
        },
        TestChannel {
            id: 8,
            label: "lfp8",
            unit: "mV",
            dig: (-500, 500),
            ana: (-5, 5),
        },
    ]
}

fn segment_tuples(channels: usize, base: usize, count: usize) -> Vec<Vec<i16>> {
    (0..count)
        .map(|t| (0..channels).map(|c| sample(c, base + t)).collect())
        .collect()
}

#[test]
fn nsx22_paused_recording_round_trip() {
    let channels = two_channels();
    // Two segments: a pause after 1500 samples, resuming at clock 90000.
    let segments = vec![
        (0u32, segment_tuples(2, 0, 1500)),
        (90000u32, segment_tuples(2, 1500, 700)),
    ];
    let bytes = nsx22_file(&channels, 3, 30000, &segments);
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("session.ns5");
    std::fs::write(&src, &bytes).unwrap();
    let dest = dir.path().join("session.bh5");
    let report = convert(&src, &dest, &ConvertOptions::default()).unwrap();
    assert_eq!(report.segments, 2);
    assert_eq!(report.records, (1500 + 700) * 2);

    let mut reader = Bh5Reader::open(&dest).unwrap();
    assert_eq!(
        reader.group_attr::<String>(GroupId::ROOT, "Comment").unwrap(),
        "continual"
    );

    for (c, channel) in channels.iter().enumerate() {
        let group = reader
            .group_by_path(&format!("/channel/channel{:05}", channel.id))
            .unwrap();
        let ext = reader.group_attr::<ChannelExtDescriptor>(group, "ChanExt").unwrap();
        assert_eq!(ext.label, channel.label);

        let base = reader.find_stream(group, "continuous_set").unwrap();
        let resumed = reader.find_stream(group, "continuous_set00001").unwrap();
        assert_eq!(reader.stream_attr::<u32>(base, "Offset").unwrap(), 0);
        assert_eq!(reader.stream_attr::<u32>(resumed, "Offset").unwrap(), 90000);

        // Concatenating the segments in offset order reproduces the
        // original sample sequence exactly.
        let mut all = read_samples(&mut reader, base);
        all.extend(read_samples(&mut reader, resumed));
        let expected: Vec<i16> = (0..2200).map(|t| sample(c, t)).collect();
        assert_eq!(all, expected);
    }
}

#[test]
fn nsx22_digital_factor_follows_analog_unit() {
    let channels = two_channels();
    let bytes = nsx22_file(&channels, 1, 30000, &[(0, segment_tuples(2, 0, 4))]);
    let session = decode_nsx22(&mut Cursor::new(bytes)).unwrap();

    // uV: 10000 uV range over 20000 levels = 500 nV per level.
    assert_eq!(session.channels[0].ext.digital_factor, 500);
    // mV: 10 mV range over 1000 levels = 10000 nV per level.
    assert_eq!(session.channels[1].ext.digital_factor, 10000);
    assert_eq!(session.channels[0].range.unit, "uV");
}

#[test]
fn nsx22_unknown_unit_defaults_to_microvolts() {
    let channels = vec![TestChannel {
        id: 1,
        label: "odd",
        unit: "furlong",
        dig: (-10000, 10000),
        ana: (-5000, 5000),
    }];
    let bytes = nsx22_file(&channels, 1, 30000, &[(0, segment_tuples(1, 0, 4))]);
    let session = decode_nsx22(&mut Cursor::new(bytes)).unwrap();
    assert_eq!(session.channels[0].ext.digital_factor, 500);
}

#[test]
fn nsx22_rejects_bad_extended_header_tag() {
    let mut bytes = nsx22_file(&two_channels(), 1, 30000, &[]);
    bytes[314] = b'X'; // corrupt the first channel's tag
    let result = decode_nsx22(&mut Cursor::new(bytes));
    assert!(matches!(result, Err(ConvertError::BadExtendedHeaderTag { .. })));
}

#[test]
fn nsx22_rejects_invalid_channel_id() {
    let channels = vec![TestChannel {
        id: 0,
        label: "zero",
        unit: "uV",
        dig: (-10, 10),
        ana: (-10, 10),
    }];
    let bytes = nsx22_file(&channels, 1, 30000, &[]);
    let result = decode_nsx22(&mut Cursor::new(bytes));
    assert!(matches!(result, Err(ConvertError::InvalidChannelId { id: 0 })));
}

#[test]
fn nsx22_missing_data_header_is_fatal() {
    let bytes = nsx22_file(&two_channels(), 1, 30000, &[]);
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("headless.ns5");
    std::fs::write(&src, &bytes).unwrap();

    let result = convert(&src, &dir.path().join("headless.bh5"), &ConvertOptions::default());
    assert!(matches!(result, Err(ConvertError::MissingDataHeader)));
}

#[test]
fn nsx22_bad_segment_tag_keeps_prior_segments() {
    let channels = two_channels();
    let mut bytes = nsx22_file(&channels, 1, 30000, &[(0, segment_tuples(2, 0, 10))]);
    // A second segment whose header tag is wrong, followed by data that
    // must not be consumed.
    bytes.push(9);
    bytes.extend_from_slice(&50u32.to_le_bytes());
    bytes.extend_from_slice(&4u32.to_le_bytes());
    bytes.extend_from_slice(&[0u8; 16]);

    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("badseg.ns5");
    std::fs::write(&src, &bytes).unwrap();
    let dest = dir.path().join("badseg.bh5");
    let report = convert(&src, &dest, &ConvertOptions::default()).unwrap();
    assert_eq!(report.segments, 1);

    let mut reader = Bh5Reader::open(&dest).unwrap();
    let group = reader.group_by_path("/channel/channel00003").unwrap();
    let stream = reader.find_stream(group, "continuous_set").unwrap();
    assert_eq!(reader.stream_record_count(stream).unwrap(), 10);
    assert_eq!(reader.find_stream(group, "continuous_set00001"), None);
}

#[test]
fn nsx22_short_segment_truncates_without_aborting() {
    let channels = two_channels();
    // The data header promises 1000 tuples but the file holds 600.
    let mut bytes = nsx22_file(&channels, 1, 30000, &[(0, segment_tuples(2, 0, 600))]);
    let count_at = bytes.len() - 600 * 4 - 4;
    bytes[count_at..count_at + 4].copy_from_slice(&1000u32.to_le_bytes());

    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("shortseg.ns5");
    std::fs::write(&src, &bytes).unwrap();
    let dest = dir.path().join("shortseg.bh5");
    let report = convert(&src, &dest, &ConvertOptions::default()).unwrap();
    assert_eq!(report.segments, 1);
    assert_eq!(report.records, 600 * 2);

    let mut reader = Bh5Reader::open(&dest).unwrap();
    let group = reader.group_by_path("/channel/channel00008").unwrap();
    let stream = reader.find_stream(group, "continuous_set").unwrap();
    let samples = read_samples(&mut reader, stream);
    let expected: Vec<i16> = (0..600).map(|t| sample(1, t)).collect();
    assert_eq!(samples, expected);
}

#[test]
fn nsx21_acquisition_time_comes_from_file_metadata() {
    let bytes = nsx21_file(1, &[1], 8);
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("timed.ns2");
    std::fs::write(&src, &bytes).unwrap();

    let file = std::fs::File::open(&src).unwrap();
    let mut reader = std::io::BufReader::new(file);
    let session = bh5_convert::nsx21::decode_nsx21(&mut reader, Path::new(&src)).unwrap();
    // Derived from the just-written file's mtime: a current date, in
    // the same shape the embedded timestamps use.
    assert_eq!(session.root.acquisition_time.len(), "2026-08-08 12:00:00.000000".len());
    assert!(session.root.acquisition_time.starts_with("20"));
    assert_eq!(session.root.application, "30 kS/s");
}
