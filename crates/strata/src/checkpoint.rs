// Checkpoint — save and load filter weights
//
// Binary checkpoint format (.strata):
//
//   Header:
//     magic:   [u8; 4]  = b"STRA"
//     version: u32 LE   = 1
//     count:   u32 LE   = number of filters
//
//   For each filter:
//     key_len:  u32 LE
//     key:      [u8; key_len]  (UTF-8, format: "layers.{i}.filters.{k}")
//     side:     u32 LE
//     channels: u32 LE
//     step:     u32 LE
//     data_len: u64 LE         (number of f64 values, side² · channels)
//     data:     [f64 LE; data_len]
//
// Only weights are stored. Layer kinds, pointwise functions and pooling
// geometry come from the network the checkpoint is loaded into.
//
// Usage:
//   checkpoint::save("model.strata", &network)?;
//   checkpoint::load("model.strata", &mut network)?;

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use strata_core::{Error, Result};
use strata_nn::{Convolution, Filter, Layer};

const MAGIC: &[u8; 4] = b"STRA";
const VERSION: u32 = 1;
const PREALLOC_LIMIT: usize = 1 << 16;

// Low-level IO helpers

fn write_u32(w: &mut impl Write, v: u32) -> std::io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn write_u64(w: &mut impl Write, v: u64) -> std::io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn read_u32(r: &mut impl Read) -> std::io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(r: &mut impl Read) -> std::io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_f64(r: &mut impl Read) -> std::io::Result<f64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}

fn truncated(what: &str) -> Error {
    Error::Io(std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        format!("checkpoint ends inside a {what}"),
    ))
}

fn to_u32(v: usize, what: &str) -> Result<u32> {
    u32::try_from(v).map_err(|_| Error::msg(format!("{what} {v} does not fit the checkpoint format")))
}

/// Filters of every activation layer, keyed `layers.{i}.filters.{k}`.
pub fn named_filters(network: &Convolution) -> Vec<(String, Filter)> {
    let mut named = Vec::new();
    for (i, layer) in network.layers().iter().enumerate() {
        if let Layer::Activation(a) = layer {
            for (k, f) in a.filters().iter().enumerate() {
                named.push((format!("layers.{i}.filters.{k}"), f.clone()));
            }
        }
    }
    named
}

/// Write named filters in the checkpoint format.
pub fn write_filters(writer: &mut impl Write, filters: &[(String, Filter)]) -> Result<()> {
    writer.write_all(MAGIC)?;
    write_u32(writer, VERSION)?;
    write_u32(writer, to_u32(filters.len(), "filter count")?)?;

    for (key, filter) in filters {
        let key_bytes = key.as_bytes();
        write_u32(writer, to_u32(key_bytes.len(), "key length")?)?;
        writer.write_all(key_bytes)?;

        write_u32(writer, to_u32(filter.size(), "filter side")?)?;
        write_u32(writer, to_u32(filter.channels(), "filter channels")?)?;
        write_u32(writer, to_u32(filter.step(), "filter step")?)?;

        let data = filter.data();
        write_u64(writer, data.len() as u64)?;
        for &v in data {
            writer.write_all(&v.to_le_bytes())?;
        }
    }
    Ok(())
}

/// Read named filters written by [`write_filters`].
pub fn read_filters(reader: &mut impl Read) -> Result<Vec<(String, Filter)>> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(Error::msg(format!(
            "invalid checkpoint: expected magic {MAGIC:?}, got {magic:?}"
        )));
    }

    let version = read_u32(reader)?;
    if version != VERSION {
        return Err(Error::msg(format!(
            "unsupported checkpoint version: {version} (expected {VERSION})"
        )));
    }

    // Counts and sizes are untrusted; preallocation is capped.
    let count = read_u32(reader)? as usize;
    let mut filters = Vec::with_capacity(count.min(PREALLOC_LIMIT));
    for _ in 0..count {
        let key_len = read_u32(reader)? as u64;
        let mut key_bytes = Vec::new();
        reader.by_ref().take(key_len).read_to_end(&mut key_bytes)?;
        if key_bytes.len() as u64 != key_len {
            return Err(truncated("key"));
        }
        let key = String::from_utf8(key_bytes)
            .map_err(|e| Error::msg(format!("invalid UTF-8 key: {e}")))?;

        let side = read_u32(reader)? as usize;
        let channels = read_u32(reader)? as usize;
        let step = read_u32(reader)? as usize;

        let expected = side
            .checked_mul(side)
            .and_then(|n| n.checked_mul(channels))
            .ok_or_else(|| {
                Error::msg(format!("{key}: filter {side}x{side}x{channels} is too large"))
            })?;
        let data_len = read_u64(reader)?;
        if usize::try_from(data_len).ok() != Some(expected) {
            return Err(Error::msg(format!(
                "{key}: {data_len} weights stored for a {side}x{side}x{channels} filter"
            )));
        }
        let mut data = Vec::with_capacity(expected.min(PREALLOC_LIMIT));
        for _ in 0..expected {
            data.push(read_f64(reader)?);
        }
        filters.push((key, Filter::from_weights(data, side, channels, step)?));
    }
    Ok(filters)
}

/// Serialize a network's filters to an in-memory byte vector.
pub fn to_bytes(network: &Convolution) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    write_filters(&mut buf, &named_filters(network))?;
    Ok(buf)
}

/// Restore filters from an in-memory checkpoint. Returns the number loaded.
pub fn from_bytes(data: &[u8], network: &mut Convolution) -> Result<usize> {
    let mut cursor = std::io::Cursor::new(data);
    let filters = read_filters(&mut cursor)?;
    apply(filters, network)
}

/// Save every filter of `network` to a file.
pub fn save(path: impl AsRef<Path>, network: &Convolution) -> Result<()> {
    let named = named_filters(network);
    let file = File::create(path.as_ref())?;
    let mut writer = BufWriter::new(file);
    write_filters(&mut writer, &named)?;
    writer.flush()?;
    tracing::debug!(path = %path.as_ref().display(), filters = named.len(), "saved checkpoint");
    Ok(())
}

/// Load filters from a file into `network`.
///
/// Filters not present in the file keep their current weights. A stored
/// filter whose geometry differs from the network's is an error, and in that
/// case nothing is modified. Returns the number of filters loaded.
pub fn load(path: impl AsRef<Path>, network: &mut Convolution) -> Result<usize> {
    let file = File::open(path.as_ref())?;
    let mut reader = BufReader::new(file);
    let filters = read_filters(&mut reader)?;
    let count = apply(filters, network)?;
    tracing::debug!(path = %path.as_ref().display(), filters = count, "loaded checkpoint");
    Ok(count)
}

fn apply(filters: Vec<(String, Filter)>, network: &mut Convolution) -> Result<usize> {
    let mut stored: HashMap<String, Filter> = filters.into_iter().collect();

    for (key, current) in named_filters(network) {
        if let Some(f) = stored.get(&key) {
            if f.geometry() != current.geometry() || f.step() != current.step() {
                return Err(Error::msg(format!(
                    "{key}: checkpoint holds a {} filter with step {}, network expects {} with step {}",
                    f.geometry(),
                    f.step(),
                    current.geometry(),
                    current.step()
                )));
            }
        }
    }

    let mut count = 0;
    for (i, layer) in network.layers_mut().iter_mut().enumerate() {
        let Some(a) = layer.as_activation_mut() else {
            continue;
        };
        for (k, slot) in a.filters_mut().iter_mut().enumerate() {
            if let Some(f) = stored.remove(&format!("layers.{i}.filters.{k}")) {
                *slot = f;
                count += 1;
            }
        }
    }
    Ok(count)
}
