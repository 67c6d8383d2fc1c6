//! Configuration bootstrap: pulling the onboard archive bundle and parsing
//! the extracted project files.
//!
//! Controllers keep their own configuration in code memory as a small
//! directory of ZIP archives. The directory descriptor lives at
//! [`ARCHIVE_DIRECTORY_ADDRESS`] and points at a table of
//! [`FILE_DESCRIPTOR_SIZE`]-byte file descriptors:
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | up to 32 | file name bytes |
//! | 32 | 2 | file name length (little-endian) |
//! | 34 | 4 | archive address in code memory |
//! | 38 | 4 | archive size |
//! | 42 | 4 | timestamp |
//!
//! [`read_archives`] walks the directory over any [`CodeMemory`]
//! implementation (usually a connected [`Controller`](crate::Controller))
//! and returns each archive's **raw bytes** — ZIP inflation is the
//! caller's business. Once extracted, [`parse_allocation`] turns the
//! allocation file into a [`Registry`] and [`parse_program`] turns the
//! project file into the socket [`RouteTable`] plus project options.

use std::collections::HashMap;

use tracing::warn;

use crate::error::{CybroError, Result};
use crate::variable::{Registry, RouteTable, SocketRoute, Variable};

/// Code-memory address of the archive directory descriptor.
pub const ARCHIVE_DIRECTORY_ADDRESS: u32 = 0x0002_0040;

/// Size of one file descriptor in the archive directory.
pub const FILE_DESCRIPTOR_SIZE: usize = 46;

/// Name of the archive holding the project file.
pub const PROGRAM_ARCHIVE: &str = "cyp.zip";

/// Name of the archive holding the allocation file.
pub const ALLOCATION_ARCHIVE: &str = "alc.zip";

/// Read access to controller code memory in arbitrary byte ranges.
///
/// Implemented by [`Controller`](crate::Controller) on top of segmented
/// code reads; tests substitute an in-memory image.
pub trait CodeMemory {
    /// Reads `size` bytes starting at `address`.
    fn read_range(
        &self,
        address: u32,
        size: usize,
    ) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
}

/// One entry of the onboard archive directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveFile {
    /// Archive file name (e.g. `cyp.zip`).
    pub name: String,
    /// Address of the archive in code memory.
    pub address: u32,
    /// Archive size in bytes.
    pub size: u32,
    /// Controller-side timestamp.
    pub timestamp: u32,
}

/// A directory entry together with the archive's raw (still compressed)
/// bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigArchive {
    /// Directory entry.
    pub file: ArchiveFile,
    /// Raw archive bytes as stored in code memory.
    pub data: Vec<u8>,
}

/// Walks the archive directory and pulls every archive's raw bytes.
///
/// # Errors
///
/// Propagates read failures and returns `CybroError::InvalidResponse` for
/// a descriptor that cannot be parsed.
pub async fn read_archives<M: CodeMemory>(memory: &M) -> Result<Vec<ConfigArchive>> {
    let directory = memory.read_range(ARCHIVE_DIRECTORY_ADDRESS, 6).await?;
    if directory.len() < 6 {
        return Err(CybroError::invalid_response(
            "archive directory descriptor too short",
        ));
    }
    let table_address = u32::from_le_bytes([directory[0], directory[1], directory[2], directory[3]]);
    let file_count = u16::from_le_bytes([directory[4], directory[5]]) as usize;

    let table = memory
        .read_range(table_address, file_count * FILE_DESCRIPTOR_SIZE)
        .await?;

    let mut archives = Vec::with_capacity(file_count);
    for chunk in table.chunks_exact(FILE_DESCRIPTOR_SIZE).take(file_count) {
        let file = parse_file_descriptor(chunk)?;
        let data = memory.read_range(file.address, file.size as usize).await?;
        archives.push(ConfigArchive { file, data });
    }
    Ok(archives)
}

fn parse_file_descriptor(chunk: &[u8]) -> Result<ArchiveFile> {
    let name_len = u16::from_le_bytes([chunk[32], chunk[33]]) as usize;
    if name_len > 32 {
        return Err(CybroError::invalid_response(format!(
            "file name length {} overruns descriptor",
            name_len
        )));
    }
    Ok(ArchiveFile {
        name: String::from_utf8_lossy(&chunk[..name_len]).into_owned(),
        address: u32::from_le_bytes([chunk[34], chunk[35], chunk[36], chunk[37]]),
        size: u32::from_le_bytes([chunk[38], chunk[39], chunk[40], chunk[41]]),
        timestamp: u32::from_le_bytes([chunk[42], chunk[43], chunk[44], chunk[45]]),
    })
}

/// Parses the extracted allocation file into a variable registry.
///
/// The file is columnar text: two header lines, then one line per
/// variable with whitespace-separated fields `address id array offset
/// size scope type name description…`. The address column is
/// hexadecimal. Lines that do not parse are skipped with a warning.
pub fn parse_allocation(text: &str) -> Registry {
    let mut registry = Registry::new();

    for line in text.lines().skip(2) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 8 {
            warn!(line, "skipping malformed allocation line");
            continue;
        }

        let address = match u16::from_str_radix(fields[0], 16) {
            Ok(address) => address,
            Err(_) => {
                warn!(line, "skipping allocation line with bad address");
                continue;
            }
        };
        let size = match fields[4].parse::<u16>() {
            Ok(size) => size,
            Err(_) => {
                warn!(line, "skipping allocation line with bad size");
                continue;
            }
        };
        let var_type = match fields[6].parse() {
            Ok(var_type) => var_type,
            Err(_) => {
                warn!(line, "skipping allocation line with bad type");
                continue;
            }
        };

        registry.insert(Variable::new(fields[7], address, var_type, size));
    }
    registry
}

/// The parsed project file: socket routes plus the remaining sections as
/// plain key/value options.
#[derive(Debug, Default, Clone)]
pub struct ProgramInfo {
    /// Socket-routing table assembled from the `[Socket…]` sections.
    pub routes: RouteTable,
    /// All other sections, keyed by section name.
    pub options: HashMap<String, HashMap<String, String>>,
}

/// Parses the extracted project file.
///
/// The file is INI-style: the first line is skipped, parsing stops at
/// `#PROJECT_OPTIONS_END`. Sections whose name starts with `Socket`
/// become routes — their `ID` key is the socket selector and their
/// `Var…` keys list routed variables in declared order. Every other
/// section lands in [`ProgramInfo::options`].
pub fn parse_program(text: &str) -> ProgramInfo {
    let mut info = ProgramInfo::default();
    let mut section: Option<String> = None;
    // Entries keep declared order; Var keys are order-sensitive.
    let mut entries: Vec<(String, String)> = Vec::new();

    for line in text.lines().skip(1) {
        let line = line.trim();
        if line == "#PROJECT_OPTIONS_END" {
            break;
        }
        if line.is_empty() {
            continue;
        }

        if let Some(name) = line.strip_prefix('[') {
            flush_section(&mut info, section.take(), std::mem::take(&mut entries));
            section = Some(name.trim_end_matches(']').to_string());
        } else if let Some((key, value)) = line.split_once('=') {
            entries.push((key.to_string(), value.to_string()));
        }
    }
    flush_section(&mut info, section, entries);
    info
}

fn flush_section(info: &mut ProgramInfo, section: Option<String>, entries: Vec<(String, String)>) {
    let Some(name) = section else {
        return;
    };

    if name.starts_with("Socket") {
        let id = entries
            .iter()
            .find(|(key, _)| key == "ID")
            .and_then(|(_, value)| value.parse::<u8>().ok());
        let Some(id) = id else {
            warn!(section = name.as_str(), "socket section without usable ID");
            return;
        };
        let variables = entries
            .iter()
            .filter(|(key, _)| key.starts_with("Var"))
            .map(|(_, value)| value.clone())
            .collect();
        info.routes.insert(SocketRoute { id, variables });
    } else {
        info.options.insert(name, entries.into_iter().collect());
    }
}
