//! Binary gating-cache files.
//!
//! A cache file holds a [`GatingCache`] as four consecutive segments:
//!
//! - **HEADER**: fifteen ASCII fields of 20 bytes each, space padded: the format version
//!   (`FGGatingCache1.1`), byte order (`lsbf`/`msbf`), numeric width (`float`/`double`),
//!   event count, gate-tree format (`json`/`gatingml`), offset and length of the source
//!   table, of the gate-tree text, and of the gate states, the number of gates, and the
//!   cluster count, iterations and seed the applied gates were computed with (a cluster
//!   count of 0 meaning none recorded)
//! - **SOURCE**: the source event table
//! - **TREES**: the gate trees as JSON or Gating-ML text
//! - **STATES**: per gate, parents before children: its table, an applied byte, and one
//!   inclusion byte per event
//!
//! A table is a `u32` parameter count; per parameter its name and long name (`u32`
//! length then UTF-8, an empty long name meaning none) and its specified min and max as
//! `f64` (NaN meaning none); then each column's event values.
//!
//! Files are written in host byte order and swapped on load when the header says
//! otherwise.

use crate::cache::GatingCache;
use crate::config::DafiConfig;
use crate::error::{GatingError, Result};
use crate::state::GateState;
use byteorder::{BigEndian as BE, ByteOrder as BO, LittleEndian as LE, NativeEndian, WriteBytesExt};
use flow_events::{EventColumns, EventTable, NumericWidth, ParameterInfo};
use flow_gates::GateTreesFormat;
use memmap3::MmapOptions;
use std::fs::File;
use std::marker::PhantomData;
use std::ops::Range;
use std::path::Path;
use tracing::{debug, info};

pub const CACHE_VERSION: &str = "FGGatingCache1.1";
const FIELD_WIDTH: usize = 20;
const HEADER_FIELDS: usize = 15;
pub const HEADER_LEN: usize = FIELD_WIDTH * HEADER_FIELDS;

/// Byte order of the binary values in a cache file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ByteOrder {
    LittleEndian,
    BigEndian,
}

impl ByteOrder {
    /// The byte order of the machine running this code
    pub const fn host() -> Self {
        if cfg!(target_endian = "little") {
            Self::LittleEndian
        } else {
            Self::BigEndian
        }
    }

    /// # Errors
    /// Returns `GatingError::Format` for anything but `lsbf` or `msbf`
    pub fn from_keyword_str(keyword: &str) -> Result<Self> {
        match keyword.trim() {
            "lsbf" => Ok(Self::LittleEndian),
            "msbf" => Ok(Self::BigEndian),
            other => Err(GatingError::format(format!("unknown byte order '{other}'"))),
        }
    }

    pub fn to_keyword_str(&self) -> &'static str {
        match self {
            Self::LittleEndian => "lsbf",
            Self::BigEndian => "msbf",
        }
    }
}

/// The fixed-width header of a cache file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheHeader {
    pub byte_order: ByteOrder,
    pub width: NumericWidth,
    pub number_of_events: usize,
    pub tree_format: GateTreesFormat,
    pub source: Range<usize>,
    pub trees: Range<usize>,
    pub states: Range<usize>,
    pub number_of_gates: usize,
    /// Clustering configuration recorded with the applied gates
    pub config: Option<DafiConfig>,
}

impl CacheHeader {
    /// Parse and validate the header at the start of `bytes`, checking every section
    /// lies inside `bytes`
    /// # Errors
    /// Returns `GatingError::Format` for a short file, a wrong version, unknown
    /// keywords, unparsable numbers, or out-of-bounds sections
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let header = bytes
            .get(..HEADER_LEN)
            .ok_or_else(|| GatingError::format("file is shorter than the cache header"))?;
        let fields = header
            .chunks_exact(FIELD_WIDTH)
            .map(|field| std::str::from_utf8(field).map(str::trim))
            .collect::<std::result::Result<Vec<&str>, _>>()
            .map_err(|_| GatingError::format("cache header is not ASCII"))?;

        if fields[0] != CACHE_VERSION {
            return Err(GatingError::format(format!(
                "unsupported cache version '{}'",
                fields[0]
            )));
        }
        let number = |index: usize, name: &str| {
            fields[index].parse::<usize>().map_err(|_| {
                GatingError::format(format!("header field {name} is not a number: '{}'", fields[index]))
            })
        };
        let section = |offset: usize, length: usize, name: &str| {
            let start = number(offset, name)?;
            let end = start
                .checked_add(number(length, name)?)
                .filter(|&end| start >= HEADER_LEN && end <= bytes.len())
                .ok_or_else(|| GatingError::format(format!("{name} section lies outside the file")))?;
            Ok::<_, GatingError>(start..end)
        };

        Ok(Self {
            byte_order: ByteOrder::from_keyword_str(fields[1])?,
            width: NumericWidth::from_keyword_str(fields[2])
                .map_err(|e| GatingError::format(e.to_string()))?,
            number_of_events: number(3, "event count")?,
            tree_format: GateTreesFormat::from_keyword_str(fields[4])
                .map_err(|e| GatingError::format(e.to_string()))?,
            source: section(5, 6, "source table")?,
            trees: section(7, 8, "gate trees")?,
            states: section(9, 10, "gate states")?,
            number_of_gates: number(11, "gate count")?,
            config: match number(12, "cluster count")? {
                0 => None,
                cluster_count => Some(DafiConfig {
                    cluster_count,
                    iterations: number(13, "iterations")?,
                    seed: fields[14].parse::<u64>().map_err(|_| {
                        GatingError::format(format!("header field seed is not a number: '{}'", fields[14]))
                    })?,
                }),
            },
        })
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        let fields = [
            CACHE_VERSION.to_string(),
            self.byte_order.to_keyword_str().to_string(),
            self.width.to_keyword_str().to_string(),
            self.number_of_events.to_string(),
            self.tree_format.to_string(),
            self.source.start.to_string(),
            self.source.len().to_string(),
            self.trees.start.to_string(),
            self.trees.len().to_string(),
            self.states.start.to_string(),
            self.states.len().to_string(),
            self.number_of_gates.to_string(),
            self.config.as_ref().map_or(0, |c| c.cluster_count).to_string(),
            self.config.as_ref().map_or(0, |c| c.iterations).to_string(),
            self.config.as_ref().map_or(0, |c| c.seed).to_string(),
        ];
        let mut header = Vec::with_capacity(HEADER_LEN);
        for field in fields {
            if field.len() > FIELD_WIDTH {
                return Err(GatingError::format(format!("header field '{field}' is too long")));
            }
            header.extend_from_slice(format!("{field:<width$}", width = FIELD_WIDTH).as_bytes());
        }
        Ok(header)
    }
}

fn length_u32(length: usize, what: &str) -> Result<u32> {
    u32::try_from(length).map_err(|_| GatingError::format(format!("{what} is too large: {length}")))
}

fn write_string<B: BO>(out: &mut Vec<u8>, value: &str) -> Result<()> {
    out.write_u32::<B>(length_u32(value.len(), "string")?)?;
    out.extend_from_slice(value.as_bytes());
    Ok(())
}

fn write_table<B: BO>(out: &mut Vec<u8>, table: &EventTable) -> Result<()> {
    out.write_u32::<B>(length_u32(table.number_of_parameters(), "parameter count")?)?;
    for info in table.parameters() {
        write_string::<B>(out, &info.name)?;
        write_string::<B>(out, info.long_name.as_deref().unwrap_or(""))?;
        out.write_f64::<B>(info.specified_min.unwrap_or(f64::NAN))?;
        out.write_f64::<B>(info.specified_max.unwrap_or(f64::NAN))?;
    }
    match table.columns() {
        EventColumns::Float(columns) => {
            for &value in columns.iter().flatten() {
                out.write_f32::<B>(value)?;
            }
        }
        EventColumns::Double(columns) => {
            for &value in columns.iter().flatten() {
                out.write_f64::<B>(value)?;
            }
        }
    }
    Ok(())
}

fn encode<B: BO>(cache: &GatingCache, tree_format: GateTreesFormat, byte_order: ByteOrder) -> Result<Vec<u8>> {
    let mut source = Vec::new();
    write_table::<B>(&mut source, cache.source())?;
    let trees = tree_format.write(cache.trees())?;

    let mut states = Vec::new();
    for id in cache.trees().find_descendant_gates() {
        let state = cache
            .state(id)
            .ok_or_else(|| GatingError::format(format!("gate {id} has no state")))?;
        write_table::<B>(&mut states, state.table())?;
        states.push(u8::from(state.is_applied()));
        states.extend_from_slice(state.flags());
    }

    let source_start = HEADER_LEN;
    let trees_start = source_start + source.len();
    let states_start = trees_start + trees.len();
    let header = CacheHeader {
        byte_order,
        width: cache.source().width(),
        number_of_events: cache.number_of_events(),
        tree_format,
        source: source_start..trees_start,
        trees: trees_start..states_start,
        states: states_start..states_start + states.len(),
        number_of_gates: cache.trees().number_of_gates(),
        config: cache.clustering_config().cloned(),
    };

    let mut out = header.to_bytes()?;
    out.reserve(source.len() + trees.len() + states.len());
    out.extend_from_slice(&source);
    out.extend_from_slice(trees.as_bytes());
    out.extend_from_slice(&states);
    Ok(out)
}

/// Encode a cache in host byte order with its gate trees stored as `tree_format`
/// # Errors
/// Returns an error if the gate trees cannot be written or a count overflows the format
pub fn encode_gating_cache(cache: &GatingCache, tree_format: GateTreesFormat) -> Result<Vec<u8>> {
    encode::<NativeEndian>(cache, tree_format, ByteOrder::host())
}

/// Write a cache file
/// # Errors
/// Returns an error if encoding fails or the file cannot be written
pub fn save_gating_cache(path: impl AsRef<Path>, cache: &GatingCache, tree_format: GateTreesFormat) -> Result<()> {
    let path = path.as_ref();
    let bytes = encode_gating_cache(cache, tree_format)?;
    std::fs::write(path, &bytes)?;
    info!("Saved gating cache ({} bytes) to {}", bytes.len(), path.display());
    Ok(())
}

/// Sequential reader over one section, failing with a format error when it runs short
struct SectionReader<'a, B> {
    bytes: &'a [u8],
    position: usize,
    section: &'static str,
    native: bool,
    order: PhantomData<B>,
}

impl<'a, B: BO> SectionReader<'a, B> {
    fn new(bytes: &'a [u8], section: &'static str, native: bool) -> Self {
        Self {
            bytes,
            position: 0,
            section,
            native,
            order: PhantomData,
        }
    }

    fn take(&mut self, length: usize) -> Result<&'a [u8]> {
        let end = self
            .position
            .checked_add(length)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| GatingError::format(format!("{} section is truncated", self.section)))?;
        let slice = &self.bytes[self.position..end];
        self.position = end;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(B::read_u32(self.take(4)?))
    }

    fn read_optional_f64(&mut self) -> Result<Option<f64>> {
        let value = B::read_f64(self.take(8)?);
        Ok((!value.is_nan()).then_some(value))
    }

    fn read_string(&mut self) -> Result<String> {
        let length = self.read_u32()? as usize;
        let bytes = self.take(length)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| GatingError::format(format!("{} section holds a non-UTF-8 name", self.section)))
    }

    fn read_f32_column(&mut self, events: usize) -> Result<Vec<f32>> {
        let length = events.checked_mul(4).ok_or_else(|| GatingError::format("event count overflows"))?;
        let bytes = self.take(length)?;
        if self.native {
            if let Ok(values) = bytemuck::try_cast_slice::<u8, f32>(bytes) {
                return Ok(values.to_vec());
            }
        }
        Ok(bytes.chunks_exact(4).map(B::read_f32).collect())
    }

    fn read_f64_column(&mut self, events: usize) -> Result<Vec<f64>> {
        let length = events.checked_mul(8).ok_or_else(|| GatingError::format("event count overflows"))?;
        let bytes = self.take(length)?;
        if self.native {
            if let Ok(values) = bytemuck::try_cast_slice::<u8, f64>(bytes) {
                return Ok(values.to_vec());
            }
        }
        Ok(bytes.chunks_exact(8).map(B::read_f64).collect())
    }

    fn read_table(&mut self, width: NumericWidth, events: usize) -> Result<EventTable> {
        let count = self.read_u32()? as usize;
        let mut parameters = Vec::new();
        for _ in 0..count {
            let name = self.read_string()?;
            let long_name = self.read_string()?;
            let min = self.read_optional_f64()?;
            let max = self.read_optional_f64()?;
            let mut info = ParameterInfo::new(name).with_specified_range(min, max);
            if !long_name.is_empty() {
                info = info.with_long_name(long_name);
            }
            parameters.push(info);
        }
        if parameters.is_empty() {
            return Ok(EventTable::new(width, events));
        }

        let columns = match width {
            NumericWidth::Float => EventColumns::Float(
                (0..count)
                    .map(|_| self.read_f32_column(events))
                    .collect::<Result<_>>()?,
            ),
            NumericWidth::Double => EventColumns::Double(
                (0..count)
                    .map(|_| self.read_f64_column(events))
                    .collect::<Result<_>>()?,
            ),
        };
        Ok(EventTable::from_parts(parameters, columns)?)
    }

    fn finish(&self) -> Result<()> {
        if self.position != self.bytes.len() {
            return Err(GatingError::format(format!(
                "{} section has {} trailing bytes",
                self.section,
                self.bytes.len() - self.position
            )));
        }
        Ok(())
    }
}

fn decode<B: BO>(bytes: &[u8], header: &CacheHeader) -> Result<GatingCache> {
    let native = header.byte_order == ByteOrder::host();
    let events = header.number_of_events;

    let mut reader = SectionReader::<B>::new(&bytes[header.source.clone()], "source table", native);
    let source = reader.read_table(header.width, events)?;
    reader.finish()?;
    if source.number_of_events() != events {
        return Err(GatingError::format(format!(
            "source table has {} events, header says {events}",
            source.number_of_events()
        )));
    }

    let text = std::str::from_utf8(&bytes[header.trees.clone()])
        .map_err(|_| GatingError::format("gate tree text is not UTF-8"))?;
    let trees = header.tree_format.parse(text)?;
    if trees.number_of_gates() != header.number_of_gates {
        return Err(GatingError::format(format!(
            "gate trees hold {} gates, header says {}",
            trees.number_of_gates(),
            header.number_of_gates
        )));
    }

    let mut reader = SectionReader::<B>::new(&bytes[header.states.clone()], "gate states", native);
    let mut states: Vec<Option<GateState>> = vec![None; trees.number_of_gates()];
    for id in trees.find_descendant_gates() {
        let table = reader.read_table(header.width, events)?;
        let applied = match reader.read_u8()? {
            0 => false,
            1 => true,
            other => {
                return Err(GatingError::format(format!("gate {id} has applied byte {other}")));
            }
        };
        let flags = reader.take(events)?.to_vec();
        states[id.index()] = Some(GateState::from_parts(table, flags, applied));
    }
    reader.finish()?;

    let states = states
        .into_iter()
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| GatingError::format("gate states do not cover every gate"))?;
    GatingCache::from_parts(source, trees, states, header.config.clone())
}

/// Decode a cache from the bytes of a cache file
/// # Errors
/// Returns `GatingError::Format` for malformed or truncated input, or the gate codec's
/// error if the gate-tree text cannot be parsed
pub fn decode_gating_cache(bytes: &[u8]) -> Result<GatingCache> {
    let header = CacheHeader::parse(bytes)?;
    debug!(
        "Cache header: {} events, {} gates, {} {}",
        header.number_of_events,
        header.number_of_gates,
        header.width,
        header.byte_order.to_keyword_str()
    );
    match header.byte_order {
        ByteOrder::LittleEndian => decode::<LE>(bytes, &header),
        ByteOrder::BigEndian => decode::<BE>(bytes, &header),
    }
}

/// Read a cache file through a memory map
/// # Errors
/// Returns an error if the file cannot be opened or mapped, or is not a valid cache
pub fn load_gating_cache(path: impl AsRef<Path>) -> Result<GatingCache> {
    let path = path.as_ref();
    let file = File::open(path)?;
    // The map is dropped before this function returns and the file is not written meanwhile.
    let mmap = unsafe { MmapOptions::new().map(&file)? };
    info!("Loading gating cache from {} ({} bytes)", path.display(), mmap.len());
    decode_gating_cache(&mmap)
}

/// Read only the header of a cache file
/// # Errors
/// Returns an error if the file cannot be read or its header is invalid
pub fn read_cache_header(path: impl AsRef<Path>) -> Result<CacheHeader> {
    let file = File::open(path)?;
    let mmap = unsafe { MmapOptions::new().map(&file)? };
    CacheHeader::parse(&mmap)
}
