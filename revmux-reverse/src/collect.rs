//! Forward collection: scan the stream and remember reversible anchors.

use crate::catalog::{AnchorKind, ReverseCatalog};
use crate::error::Result;
use revmux_es::EsByteSource;
use revmux_h262::{H262FrameReader, H262Picture};
use revmux_h264::AccessUnitReader;
use tracing::{debug, info};

/// Options for the forward collection pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct CollectOptions {
    /// Stop as soon as possible after this many frames (0 = no limit),
    /// checked between frames.
    pub max_frames: u32,
    /// Also keep P pictures (H.262) / P-sliced reference access units
    /// (H.264).
    pub keep_all_ref: bool,
}

/// What the collection pass saw.
#[derive(Debug, Clone, Copy, Default)]
pub struct CollectStats {
    /// Coded frames encountered.
    pub frames_seen: u32,
    /// Frames remembered in the catalog.
    pub frames_kept: u32,
}

/// Scan H.262 pictures into the catalog.
///
/// I pictures are always remembered, P pictures when `keep_all_ref` is
/// set. A sequence header differing from the last remembered one is
/// inserted immediately before the next remembered picture.
pub fn collect_h262<S: EsByteSource>(
    reader: &mut H262FrameReader<S>,
    catalog: &mut ReverseCatalog,
    opts: &CollectOptions,
) -> Result<CollectStats> {
    let mut stats = CollectStats::default();
    let mut pending_seq: Option<H262Picture> = None;
    let mut recorded_seq: Option<H262Picture> = None;

    loop {
        if opts.max_frames != 0 && stats.frames_seen >= opts.max_frames {
            info!(frames = stats.frames_seen, "stopping collection at limit");
            break;
        }
        let Some(picture) = reader.next_frame()? else {
            break;
        };

        if picture.is_sequence_header() {
            let differs = recorded_seq
                .as_ref()
                .map(|last| !last.same_data(&picture))
                .unwrap_or(true);
            if differs {
                pending_seq = Some(picture);
            }
            continue;
        }
        if !picture.is_picture() {
            continue;
        }

        stats.frames_seen += 1;
        let index = stats.frames_seen - 1;

        let kind = match picture.coding_type {
            Some(revmux_h262::PictureCodingType::I) => AnchorKind::I,
            Some(revmux_h262::PictureCodingType::P) if opts.keep_all_ref => AnchorKind::P,
            _ => continue,
        };

        let Some((offset, _, data_len)) = picture.bounds() else {
            continue;
        };

        if let Some(seq) = pending_seq.take() {
            if let Some((seq_offset, _, seq_len)) = seq.bounds() {
                debug!(%seq_offset, "remembering sequence header");
                catalog.add_seq_header(seq_offset, seq_len)?;
            }
            recorded_seq = Some(seq);
        }

        debug!(index, %offset, data_len, kind = ?kind, "remembering picture");
        catalog.add_picture(kind, index, offset, data_len)?;
        stats.frames_kept += 1;
    }

    Ok(stats)
}

/// Scan H.264 access units into the catalog.
///
/// IDR units are always remembered, all-I units always, and all-I-or-P
/// reference units when `keep_all_ref` is set and no reference frame
/// has been skipped since the last IDR.
pub fn collect_h264<S: EsByteSource>(
    reader: &mut AccessUnitReader<S>,
    catalog: &mut ReverseCatalog,
    opts: &CollectOptions,
) -> Result<CollectStats> {
    let mut stats = CollectStats::default();
    let mut skipped_ref = false;

    loop {
        if opts.max_frames != 0 && stats.frames_seen >= opts.max_frames {
            info!(frames = stats.frames_seen, "stopping collection at limit");
            break;
        }
        let Some(au) = reader.next_access_unit()? else {
            break;
        };

        stats.frames_seen += 1;
        let index = stats.frames_seen - 1;

        let kind = if au.is_idr() {
            skipped_ref = false;
            Some(AnchorKind::Idr)
        } else if au.all_slices_i() {
            Some(AnchorKind::ISlices)
        } else if opts.keep_all_ref && !skipped_ref && au.is_reference() && au.all_slices_i_or_p()
        {
            Some(AnchorKind::PSlices)
        } else {
            if au.is_reference() {
                skipped_ref = true;
            }
            None
        };

        let Some(kind) = kind else { continue };
        let Some((offset, _, data_len)) = au.bounds() else {
            continue;
        };

        debug!(index, %offset, data_len, kind = ?kind, "remembering access unit");
        catalog.add_picture(kind, index, offset, data_len)?;
        stats.frames_kept += 1;
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use revmux_es::{EsUnitReader, FileEsSource};
    use std::io::Cursor;

    fn picture(temporal_reference: u16, coding_type: u8) -> Vec<u8> {
        let mut bytes = vec![
            0x00,
            0x00,
            0x01,
            0x00,
            (temporal_reference >> 2) as u8,
            ((temporal_reference as u8 & 0x03) << 6) | (coding_type << 3),
            0x00,
            0x00,
        ];
        bytes.extend([0x00, 0x00, 0x01, 0x05, 0xAB, 0xCD]); // one slice
        bytes
    }

    fn seq_header(aspect: u8) -> Vec<u8> {
        vec![
            0x00, 0x00, 0x01, 0xB3, 0x2D, 0x02, 0x40, (aspect << 4) | 0x03, 0xFF, 0xFF, 0xE0,
            0x20,
        ]
    }

    fn h262_reader(bytes: Vec<u8>) -> H262FrameReader<FileEsSource<Cursor<Vec<u8>>>> {
        H262FrameReader::new(EsUnitReader::new(FileEsSource::new(Cursor::new(bytes))))
    }

    #[test]
    fn test_h262_collects_i_pictures_and_seq_headers() {
        let mut bytes = seq_header(2);
        bytes.extend(picture(0, 1)); // I
        bytes.extend(picture(1, 3)); // B
        bytes.extend(picture(2, 2)); // P
        bytes.extend(picture(3, 1)); // I
        bytes.extend([0x00, 0x00, 0x01, 0xB7]);

        let mut reader = h262_reader(bytes);
        let mut catalog = ReverseCatalog::new();
        let stats =
            collect_h262(&mut reader, &mut catalog, &CollectOptions::default()).unwrap();

        assert_eq!(stats.frames_seen, 4);
        assert_eq!(stats.frames_kept, 2);
        // Sequence header, I at index 0, I at index 3
        let entries = catalog.entries();
        assert_eq!(entries.len(), 3);
        assert!(entries[0].is_seq_header());
        assert_eq!(entries[1].kind, AnchorKind::I);
        assert_eq!(entries[1].index, 0);
        assert_eq!(entries[2].index, 3);
    }

    #[test]
    fn test_h262_identical_seq_header_not_rerecorded() {
        let mut bytes = seq_header(2);
        bytes.extend(picture(0, 1));
        bytes.extend(seq_header(2)); // identical: no new entry
        bytes.extend(picture(1, 1));
        bytes.extend(seq_header(3)); // differs: recorded before next I
        bytes.extend(picture(2, 1));
        bytes.extend([0x00, 0x00, 0x01, 0xB7]);

        let mut reader = h262_reader(bytes);
        let mut catalog = ReverseCatalog::new();
        collect_h262(&mut reader, &mut catalog, &CollectOptions::default()).unwrap();

        let seq_count = catalog
            .entries()
            .iter()
            .filter(|e| e.is_seq_header())
            .count();
        assert_eq!(seq_count, 2);
        assert_eq!(catalog.pictures_kept(), 3);
        // The differing header sits immediately before its I picture
        assert!(catalog.entries()[3].is_seq_header());
        assert_eq!(catalog.entries()[4].kind, AnchorKind::I);
    }

    #[test]
    fn test_h262_allref_keeps_p() {
        let mut bytes = seq_header(2);
        bytes.extend(picture(0, 1));
        bytes.extend(picture(1, 2));
        bytes.extend([0x00, 0x00, 0x01, 0xB7]);

        let mut reader = h262_reader(bytes);
        let mut catalog = ReverseCatalog::new();
        let opts = CollectOptions {
            keep_all_ref: true,
            ..Default::default()
        };
        collect_h262(&mut reader, &mut catalog, &opts).unwrap();
        assert_eq!(catalog.pictures_kept(), 2);
        assert_eq!(catalog.entries()[2].kind, AnchorKind::P);
    }

    #[test]
    fn test_h262_max_frames_stops_early() {
        let mut bytes = seq_header(2);
        for i in 0..10u16 {
            bytes.extend(picture(i, 1));
        }
        bytes.extend([0x00, 0x00, 0x01, 0xB7]);

        let mut reader = h262_reader(bytes);
        let mut catalog = ReverseCatalog::new();
        let opts = CollectOptions {
            max_frames: 3,
            ..Default::default()
        };
        let stats = collect_h262(&mut reader, &mut catalog, &opts).unwrap();
        assert_eq!(stats.frames_seen, 3);
        assert_eq!(catalog.pictures_kept(), 3);
    }
}
