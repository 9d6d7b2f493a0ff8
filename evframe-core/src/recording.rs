//! Recorded event files.
//!
//! Recordings are stored in the decoded formats produced by the EVT 3.0
//! tooling rather than as raw sensor words:
//!
//! - CSV: an optional `%geometry:W,H` line, an optional column-name line, then
//!   one `x,y,p,t` event per line (column order configurable).
//! - Binary: a `EVT3BIN\0` header followed by packed little-endian events.
//!
//! A loaded [`Recording`] serves time-range queries as a [`RecordedSource`].

use crate::source::RecordedSource;
use crate::types::{Event, EventBatch, SensorMetadata, Timestamp};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Magic bytes opening a binary recording.
pub const BINARY_MAGIC: &[u8; 8] = b"EVT3BIN\0";
const BINARY_VERSION: u32 = 1;

/// Errors that can occur while reading or writing recordings.
#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("Recording not found: {0}")]
    NotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Line {line}: {message}")]
    Parse { line: usize, message: String },
}

/// One column of an event line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    X,
    Y,
    Polarity,
    Timestamp,
}

/// Column order of CSV event lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldOrder {
    columns: [Field; 4],
}

impl Default for FieldOrder {
    fn default() -> Self {
        Self::XYPT
    }
}

impl FieldOrder {
    /// x, y, p, t (default)
    pub const XYPT: Self = Self {
        columns: [Field::X, Field::Y, Field::Polarity, Field::Timestamp],
    };
    /// t, x, y, p
    pub const TXYP: Self = Self {
        columns: [Field::Timestamp, Field::X, Field::Y, Field::Polarity],
    };
    /// x, y, t, p
    pub const XYTP: Self = Self {
        columns: [Field::X, Field::Y, Field::Timestamp, Field::Polarity],
    };

    pub fn columns(&self) -> [Field; 4] {
        self.columns
    }

    /// Column-name line for this order.
    pub fn header(&self) -> String {
        self.columns
            .iter()
            .map(|field| match field {
                Field::X => "x",
                Field::Y => "y",
                Field::Polarity => "polarity",
                Field::Timestamp => "timestamp",
            })
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Parses one event line in this column order.
    fn parse_event(&self, line: &str) -> Result<Event, String> {
        let parts: Vec<&str> = line.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(format!("expected 4 fields, found {}", parts.len()));
        }

        let mut event = Event::new(0, 0, false, 0);
        for (field, value) in self.columns.iter().zip(parts) {
            match field {
                Field::X => {
                    event.x = value
                        .parse::<u16>()
                        .map_err(|e| format!("x '{value}': {e}"))?
                }
                Field::Y => {
                    event.y = value
                        .parse::<u16>()
                        .map_err(|e| format!("y '{value}': {e}"))?
                }
                Field::Polarity => {
                    event.polarity = match value {
                        "1" => true,
                        "0" => false,
                        _ => return Err(format!("polarity '{value}' is not 0 or 1")),
                    }
                }
                Field::Timestamp => {
                    event.timestamp = value
                        .parse::<Timestamp>()
                        .map_err(|e| format!("timestamp '{value}': {e}"))?
                }
            }
        }
        Ok(event)
    }

    fn format_event(&self, event: &Event) -> String {
        self.columns
            .iter()
            .map(|field| match field {
                Field::X => event.x.to_string(),
                Field::Y => event.y.to_string(),
                Field::Polarity => u8::from(event.polarity).to_string(),
                Field::Timestamp => event.timestamp.to_string(),
            })
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl std::str::FromStr for FieldOrder {
    type Err = RecordingError;

    /// Parses a field order from a format string like "x,y,p,t" or "t,x,y,p".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<String> = s.split(',').map(|p| p.trim().to_lowercase()).collect();

        if parts.len() != 4 {
            return Err(RecordingError::InvalidFormat(
                "Format must have exactly 4 fields: x, y, p, t".to_string(),
            ));
        }

        let mut columns = [Field::X; 4];
        let mut seen = Vec::with_capacity(4);
        for (i, part) in parts.iter().enumerate() {
            let field = match part.as_str() {
                "x" => Field::X,
                "y" => Field::Y,
                "p" | "pol" | "polarity" => Field::Polarity,
                "t" | "time" | "timestamp" => Field::Timestamp,
                _ => {
                    return Err(RecordingError::InvalidFormat(format!(
                        "Unknown field: {}. Use x, y, p, t",
                        part
                    )))
                }
            };
            if seen.contains(&field) {
                return Err(RecordingError::InvalidFormat(format!(
                    "Duplicate field: {}",
                    part
                )));
            }
            seen.push(field);
            columns[i] = field;
        }

        Ok(Self { columns })
    }
}

/// A loaded event recording.
#[derive(Debug, Clone, Default)]
pub struct Recording {
    events: Vec<Event>,
    pub metadata: SensorMetadata,
}

impl Recording {
    /// Builds a recording, ordering the events by timestamp.
    ///
    /// The sort is stable, so events sharing a timestamp keep their order.
    pub fn new(mut events: Vec<Event>, metadata: SensorMetadata) -> Self {
        if !events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp) {
            events.sort_by_key(|e| e.timestamp);
        }
        Self { events, metadata }
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Index of the first event at or after `timestamp`.
    #[inline]
    pub fn lower_bound(&self, timestamp: Timestamp) -> usize {
        self.events.partition_point(|e| e.timestamp < timestamp)
    }
}

impl RecordedSource for Recording {
    fn width(&self) -> u16 {
        self.metadata.width
    }

    fn height(&self) -> u16 {
        self.metadata.height
    }

    fn start_timestamp(&self) -> Option<Timestamp> {
        self.events.first().map(|e| e.timestamp)
    }

    fn end_timestamp(&self) -> Option<Timestamp> {
        // Exclusive, so the final event lies inside [start, end).
        self.events.last().map(|e| e.timestamp.saturating_add(1))
    }

    fn get_range(&self, start: Timestamp, duration: Timestamp) -> Option<EventBatch> {
        if duration <= 0 {
            return None;
        }
        let end = start.saturating_add(duration);
        let lo = self.lower_bound(start);
        let hi = self.lower_bound(end);
        Some(EventBatch::from_sorted(self.events[lo..hi].to_vec()))
    }
}

fn open(path: &Path) -> Result<File, RecordingError> {
    File::open(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => RecordingError::NotFound(path.to_path_buf()),
        _ => RecordingError::Io(e),
    })
}

/// Reads a CSV recording from any buffered reader.
///
/// A column-name line such as `t,x,y,p` before the first event overrides
/// `field_order`.
pub fn read_csv_from<R: BufRead>(
    reader: R,
    field_order: FieldOrder,
) -> Result<Recording, RecordingError> {
    let mut metadata = SensorMetadata::default();
    let mut order = field_order;
    let mut events = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        let line_no = index + 1;

        if line.is_empty() {
            continue;
        }
        if let Some(header) = line.strip_prefix('%') {
            parse_header_line(header, &mut metadata);
            continue;
        }
        if events.is_empty() && line.starts_with(|c: char| c.is_ascii_alphabetic()) {
            order = line.parse::<FieldOrder>().map_err(|e| RecordingError::Parse {
                line: line_no,
                message: e.to_string(),
            })?;
            continue;
        }

        let event = order
            .parse_event(line)
            .map_err(|message| RecordingError::Parse {
                line: line_no,
                message,
            })?;
        events.push(event);
    }

    Ok(Recording::new(events, metadata))
}

/// Parses a `%` header line (without the `%`) into sensor metadata.
fn parse_header_line(header: &str, metadata: &mut SensorMetadata) {
    let header = header.trim();
    // Format: "%geometry:1280,720" or "% geometry 1280x720"
    let Some(rest) = header.strip_prefix("geometry") else {
        return;
    };
    let rest = rest.trim_start_matches([':', ' ']);
    let mut dims = rest.split([',', 'x']).map(|d| d.trim().parse::<u16>());
    if let (Some(Ok(w)), Some(Ok(h))) = (dims.next(), dims.next()) {
        metadata.width = w;
        metadata.height = h;
    }
}

/// Reads a CSV recording from disk.
pub fn read_csv<P: AsRef<Path>>(
    path: P,
    field_order: FieldOrder,
) -> Result<Recording, RecordingError> {
    let file = open(path.as_ref())?;
    read_csv_from(BufReader::new(file), field_order)
}

/// Reads a binary recording from any reader.
pub fn read_binary_from<R: Read>(mut reader: R) -> Result<Recording, RecordingError> {
    let mut magic = [0u8; 8];
    reader.read_exact(&mut magic)?;
    if &magic != BINARY_MAGIC {
        return Err(RecordingError::InvalidFormat(
            "Missing EVT3BIN header".to_string(),
        ));
    }
    let version = reader.read_u32::<LittleEndian>()?;
    if version != BINARY_VERSION {
        return Err(RecordingError::InvalidFormat(format!(
            "Unsupported binary version {}",
            version
        )));
    }

    let width = reader.read_u32::<LittleEndian>()?;
    let height = reader.read_u32::<LittleEndian>()?;
    let metadata = SensorMetadata {
        width: u16::try_from(width).unwrap_or(0),
        height: u16::try_from(height).unwrap_or(0),
    };
    let count = reader.read_u64::<LittleEndian>()?;

    // Cap the preallocation; a corrupted count must not exhaust memory.
    let mut events = Vec::with_capacity(count.min(1 << 20) as usize);
    for i in 0..count {
        let x = reader.read_u16::<LittleEndian>()?;
        let y = reader.read_u16::<LittleEndian>()?;
        let polarity = reader.read_u8()? != 0;
        let _padding = reader.read_u8()?;
        let raw_ts = reader.read_u64::<LittleEndian>()?;
        let timestamp = Timestamp::try_from(raw_ts).map_err(|_| {
            RecordingError::InvalidFormat(format!("Event {} timestamp {} overflows", i, raw_ts))
        })?;
        events.push(Event::new(x, y, polarity, timestamp));
    }

    Ok(Recording::new(events, metadata))
}

/// Reads a binary recording from disk.
pub fn read_binary<P: AsRef<Path>>(path: P) -> Result<Recording, RecordingError> {
    let file = open(path.as_ref())?;
    read_binary_from(BufReader::new(file))
}

/// Reads a recording, picking the format from the file extension.
///
/// `.bin` is read as binary, anything else as CSV.
pub fn read_recording<P: AsRef<Path>>(
    path: P,
    field_order: FieldOrder,
) -> Result<Recording, RecordingError> {
    let path = path.as_ref();
    match extension(path).as_str() {
        "bin" => read_binary(path),
        _ => read_csv(path, field_order),
    }
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("csv")
        .to_lowercase()
}

/// CSV writer for events.
pub struct CsvEventWriter<W: Write> {
    writer: BufWriter<W>,
    field_order: FieldOrder,
}

impl<W: Write> CsvEventWriter<W> {
    pub fn new(writer: W, field_order: FieldOrder) -> Self {
        Self {
            writer: BufWriter::new(writer),
            field_order,
        }
    }

    /// Writes the geometry line, when known, and the column-name line.
    pub fn write_header(&mut self, metadata: &SensorMetadata) -> Result<(), RecordingError> {
        if metadata.width != 0 && metadata.height != 0 {
            writeln!(self.writer, "%geometry:{},{}", metadata.width, metadata.height)?;
        }
        writeln!(self.writer, "{}", self.field_order.header())?;
        Ok(())
    }

    pub fn write_events(&mut self, events: &[Event]) -> Result<(), RecordingError> {
        for event in events {
            writeln!(self.writer, "{}", self.field_order.format_event(event))?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), RecordingError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Writes a recording to a CSV file.
pub fn write_csv<P: AsRef<Path>>(
    path: P,
    recording: &Recording,
    field_order: FieldOrder,
) -> Result<(), RecordingError> {
    let file = File::create(path)?;
    let mut writer = CsvEventWriter::new(file, field_order);
    writer.write_header(&recording.metadata)?;
    writer.write_events(recording.events())?;
    writer.flush()
}

/// Writes events in the binary layout to any writer.
///
/// Each event is packed as x u16, y u16, polarity u8, padding u8 and
/// timestamp u64. Negative timestamps cannot be represented.
pub fn write_binary_to<W: Write>(
    mut writer: W,
    recording: &Recording,
) -> Result<(), RecordingError> {
    writer.write_all(BINARY_MAGIC)?;
    writer.write_u32::<LittleEndian>(BINARY_VERSION)?;
    writer.write_u32::<LittleEndian>(recording.metadata.width as u32)?;
    writer.write_u32::<LittleEndian>(recording.metadata.height as u32)?;
    writer.write_u64::<LittleEndian>(recording.len() as u64)?;
    for event in recording.events() {
        let timestamp = u64::try_from(event.timestamp).map_err(|_| {
            RecordingError::InvalidFormat(format!(
                "Negative timestamp {} cannot be stored",
                event.timestamp
            ))
        })?;
        writer.write_u16::<LittleEndian>(event.x)?;
        writer.write_u16::<LittleEndian>(event.y)?;
        writer.write_all(&[u8::from(event.polarity), 0])?;
        writer.write_u64::<LittleEndian>(timestamp)?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes a recording to a binary file.
pub fn write_binary<P: AsRef<Path>>(path: P, recording: &Recording) -> Result<(), RecordingError> {
    let file = File::create(path)?;
    write_binary_to(BufWriter::new(file), recording)
}
