//! Minimal FITS reader: primary HDU, first image plane, as `Array2<f32>`.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use anyhow::{bail, Context, Result};
use log::debug;
use ndarray::Array2;
use rayon::prelude::*;

const FITS_BLOCK_SIZE: usize = 2880;
const FITS_CARD_SIZE: usize = 80;

struct FitsHeader {
    bitpix: i32,
    naxis: i32,
    naxis1: usize,
    naxis2: usize,
    bzero: f64,
    bscale: f64,
}

fn get_keyword_value(card: &str, keyword: &str) -> Option<String> {
    if !card.starts_with(keyword) {
        return None;
    }
    let eq_pos = card.find('=')?;
    Some(card[eq_pos + 1..].trim_start().to_string())
}

fn parse_int_keyword(card: &str, keyword: &str) -> Option<i64> {
    let val = get_keyword_value(card, keyword)?;
    let num_str: String = val
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '-' || *c == '+')
        .collect();
    num_str.parse().ok()
}

fn parse_float_keyword(card: &str, keyword: &str) -> Option<f64> {
    let val = get_keyword_value(card, keyword)?;
    let num_str: String = val
        .chars()
        .take_while(|c| {
            c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'E' | 'e' | 'D' | 'd')
        })
        .collect();
    num_str.replace(['D', 'd'], "E").parse().ok()
}

fn read_fits_header(reader: &mut impl Read) -> Result<FitsHeader> {
    let mut hdr = FitsHeader {
        bitpix: 0,
        naxis: 0,
        naxis1: 0,
        naxis2: 0,
        bzero: 0.0,
        bscale: 1.0,
    };

    let mut block = [0u8; FITS_BLOCK_SIZE];
    let mut found_end = false;

    while !found_end {
        reader
            .read_exact(&mut block)
            .context("Failed to read FITS header block")?;

        for card_bytes in block.chunks_exact(FITS_CARD_SIZE) {
            let card = std::str::from_utf8(card_bytes).unwrap_or("");

            if card.starts_with("END") && card.as_bytes().get(3).map_or(true, |&b| b == b' ') {
                found_end = true;
                break;
            }

            if let Some(v) = parse_int_keyword(card, "BITPIX  ") {
                hdr.bitpix = v as i32;
            } else if let Some(v) = parse_int_keyword(card, "NAXIS   ") {
                hdr.naxis = v as i32;
            } else if let Some(v) = parse_int_keyword(card, "NAXIS1") {
                hdr.naxis1 = v as usize;
            } else if let Some(v) = parse_int_keyword(card, "NAXIS2") {
                hdr.naxis2 = v as usize;
            } else if let Some(v) = parse_float_keyword(card, "BZERO") {
                hdr.bzero = v;
            } else if let Some(v) = parse_float_keyword(card, "BSCALE") {
                hdr.bscale = v;
            }
        }
    }

    if hdr.bitpix == 0 {
        bail!("Missing BITPIX keyword in FITS header");
    }
    if hdr.naxis < 2 {
        bail!(
            "FITS image must have at least 2 dimensions, got NAXIS={}",
            hdr.naxis
        );
    }
    if hdr.naxis1 == 0 || hdr.naxis2 == 0 {
        bail!(
            "Invalid FITS image dimensions {}x{}",
            hdr.naxis1,
            hdr.naxis2
        );
    }

    Ok(hdr)
}

/// Load the primary HDU of a FITS file as a 2D float image.
///
/// Data cubes (NAXIS > 2) contribute their first plane only. BZERO/BSCALE
/// are applied; payloads decode in parallel for large frames.
pub fn load_fits_image<P: AsRef<Path>>(path: P) -> Result<Array2<f32>> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("Failed to open FITS file {}", path.display()))?;
    let mut reader = BufReader::new(file);

    let hdr = read_fits_header(&mut reader)?;
    let width = hdr.naxis1;
    let height = hdr.naxis2;
    debug!(
        "{}: BITPIX {}, NAXIS {}, {}x{}",
        path.display(),
        hdr.bitpix,
        hdr.naxis,
        width,
        height
    );

    // Planes are stored sequentially with NAXIS1 fastest, so the first
    // width*height values are the first plane of a cube.
    let num_pixels = width * height;
    let bytes_per_pixel = (hdr.bitpix.unsigned_abs() as usize) / 8;
    let mut raw = vec![0u8; num_pixels * bytes_per_pixel];
    reader
        .read_exact(&mut raw)
        .context("Failed to read FITS data")?;

    let bzero = hdr.bzero;
    let bscale = hdr.bscale;
    let mut data = vec![0f32; num_pixels];

    match hdr.bitpix {
        8 => decode_chunks(&raw, &mut data, 1, |s, d| {
            for (i, out) in d.iter_mut().enumerate() {
                *out = (bzero + bscale * s[i] as f64) as f32;
            }
        }),
        16 => decode_chunks(&raw, &mut data, 2, |s, d| {
            for (i, out) in d.iter_mut().enumerate() {
                let v = i16::from_be_bytes([s[i * 2], s[i * 2 + 1]]);
                *out = (bzero + bscale * v as f64) as f32;
            }
        }),
        32 => decode_chunks(&raw, &mut data, 4, |s, d| {
            for (i, out) in d.iter_mut().enumerate() {
                let off = i * 4;
                let v = i32::from_be_bytes([s[off], s[off + 1], s[off + 2], s[off + 3]]);
                *out = (bzero + bscale * v as f64) as f32;
            }
        }),
        -32 => decode_chunks(&raw, &mut data, 4, |s, d| {
            for (i, out) in d.iter_mut().enumerate() {
                let off = i * 4;
                let v = f32::from_be_bytes([s[off], s[off + 1], s[off + 2], s[off + 3]]);
                *out = (bzero + bscale * v as f64) as f32;
            }
        }),
        -64 => decode_chunks(&raw, &mut data, 8, |s, d| {
            for (i, out) in d.iter_mut().enumerate() {
                let off = i * 8;
                let v = f64::from_be_bytes([
                    s[off],
                    s[off + 1],
                    s[off + 2],
                    s[off + 3],
                    s[off + 4],
                    s[off + 5],
                    s[off + 6],
                    s[off + 7],
                ]);
                *out = (bzero + bscale * v) as f32;
            }
        }),
        other => bail!("Unsupported BITPIX value: {}", other),
    }

    Array2::from_shape_vec((height, width), data).context("Failed to reshape FITS data")
}

const DECODE_CHUNK: usize = 65536;

fn decode_chunks(
    raw: &[u8],
    data: &mut [f32],
    bytes_per_pixel: usize,
    convert: impl Fn(&[u8], &mut [f32]) + Sync,
) {
    if data.len() >= DECODE_CHUNK * 2 {
        raw.par_chunks(DECODE_CHUNK * bytes_per_pixel)
            .zip(data.par_chunks_mut(DECODE_CHUNK))
            .for_each(|(s, d)| convert(s, d));
    } else {
        convert(raw, data);
    }
}
