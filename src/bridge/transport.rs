/// Emulator memory transports.
///
/// The poll loop only needs three calls; anything that can read and write
/// guest RAM by address can stand behind [`Transport`].
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use thiserror::Error;

/// Start of MEM1 in the GameCube address space.
pub const MEM1_BASE: u32 = 0x8000_0000;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport not connected")]
    NotConnected,
    #[error("address 0x{address:08X} (+{len}) outside mapped memory")]
    OutOfRange { address: u32, len: usize },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Raw access to the emulated process. There is no locking on the guest
/// side; callers keep writes to one address from overlapping.
pub trait Transport: Send + Sync {
    fn connect(&self) -> Result<(), TransportError>;
    fn read(&self, address: u32, size: usize) -> Result<Vec<u8>, TransportError>;
    fn write(&self, address: u32, data: &[u8]) -> Result<(), TransportError>;
}

/// Read in `chunk` steps until one of `markers` shows up in a chunk, a read
/// fails, or `max` bytes have been collected.
pub fn read_until_marker(
    transport: &dyn Transport,
    address: u32,
    max: usize,
    chunk: usize,
    markers: &[&[u8]],
) -> Vec<u8> {
    let mut out = Vec::new();
    let chunk = chunk.max(1);
    let mut offset = 0usize;
    while offset < max {
        let Ok(step) = u32::try_from(offset) else {
            break;
        };
        let bytes = match transport.read(address.wrapping_add(step), chunk.min(max - offset)) {
            Ok(bytes) if !bytes.is_empty() => bytes,
            _ => break,
        };
        let done = markers
            .iter()
            .any(|marker| bytes.windows(marker.len()).any(|w| w == *marker));
        offset += bytes.len();
        out.extend(bytes);
        if done {
            break;
        }
    }
    out
}

/// A flat RAM image held in process. Writes are logged so tests can see
/// exactly what reached the "game".
#[derive(Debug)]
pub struct MemoryTransport {
    base: u32,
    ram: Mutex<Vec<u8>>,
    writes: Mutex<Vec<(u32, Vec<u8>)>>,
}

impl MemoryTransport {
    pub fn new(base: u32, size: usize) -> Self {
        Self {
            base,
            ram: Mutex::new(vec![0; size]),
            writes: Mutex::new(Vec::new()),
        }
    }

    /// Change memory the way the game would, without logging a write.
    pub fn poke(&self, address: u32, data: &[u8]) -> Result<(), TransportError> {
        let mut ram = self.ram.lock();
        let range = self.span(address, data.len(), ram.len())?;
        ram[range].copy_from_slice(data);
        Ok(())
    }

    pub fn peek(&self, address: u32, len: usize) -> Result<Vec<u8>, TransportError> {
        let ram = self.ram.lock();
        let range = self.span(address, len, ram.len())?;
        Ok(ram[range].to_vec())
    }

    /// Every `write` so far, oldest first.
    pub fn writes(&self) -> Vec<(u32, Vec<u8>)> {
        self.writes.lock().clone()
    }

    pub fn writes_to(&self, address: u32) -> Vec<Vec<u8>> {
        self.writes
            .lock()
            .iter()
            .filter(|(addr, _)| *addr == address)
            .map(|(_, data)| data.clone())
            .collect()
    }

    fn span(
        &self,
        address: u32,
        len: usize,
        size: usize,
    ) -> Result<std::ops::Range<usize>, TransportError> {
        let out_of_range = TransportError::OutOfRange { address, len };
        let start = address.checked_sub(self.base).ok_or(out_of_range)? as usize;
        let end = start.checked_add(len).filter(|end| *end <= size);
        end.map(|end| start..end)
            .ok_or(TransportError::OutOfRange { address, len })
    }
}

impl Transport for MemoryTransport {
    fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Reads running past the end of the image come back short.
    fn read(&self, address: u32, size: usize) -> Result<Vec<u8>, TransportError> {
        let ram = self.ram.lock();
        let start = address
            .checked_sub(self.base)
            .map(|offset| offset as usize)
            .filter(|start| *start < ram.len())
            .ok_or(TransportError::OutOfRange { address, len: size })?;
        let end = start.saturating_add(size).min(ram.len());
        Ok(ram[start..end].to_vec())
    }

    fn write(&self, address: u32, data: &[u8]) -> Result<(), TransportError> {
        self.poke(address, data)?;
        self.writes.lock().push((address, data.to_vec()));
        Ok(())
    }
}

/// Guest RAM exposed as a file, such as the shared-memory file Dolphin
/// publishes for MEM1 (`/dev/shm/dolphin-emu.<pid>`).
#[derive(Debug)]
pub struct FileTransport {
    path: PathBuf,
    base: u32,
    file: Mutex<Option<File>>,
}

impl FileTransport {
    pub fn new(path: impl Into<PathBuf>, base: u32) -> Self {
        Self {
            path: path.into(),
            base,
            file: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn offset(&self, address: u32, len: usize) -> Result<u64, TransportError> {
        address
            .checked_sub(self.base)
            .map(u64::from)
            .ok_or(TransportError::OutOfRange { address, len })
    }
}

impl Transport for FileTransport {
    fn connect(&self) -> Result<(), TransportError> {
        let file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        *self.file.lock() = Some(file);
        Ok(())
    }

    fn read(&self, address: u32, size: usize) -> Result<Vec<u8>, TransportError> {
        let offset = self.offset(address, size)?;
        let mut guard = self.file.lock();
        let file = guard.as_mut().ok_or(TransportError::NotConnected)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = Vec::with_capacity(size);
        file.take(size as u64).read_to_end(&mut buf)?;
        Ok(buf)
    }

    fn write(&self, address: u32, data: &[u8]) -> Result<(), TransportError> {
        let offset = self.offset(address, data.len())?;
        let mut guard = self.file.lock();
        let file = guard.as_mut().ok_or(TransportError::NotConnected)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_round_trip_and_log() {
        let mem = MemoryTransport::new(0x8000_0000, 0x100);
        mem.poke(0x8000_0010, b"game").unwrap();
        assert_eq!(mem.read(0x8000_0010, 4).unwrap(), b"game");
        assert!(mem.writes().is_empty());

        mem.write(0x8000_0020, b"mod").unwrap();
        assert_eq!(mem.peek(0x8000_0020, 3).unwrap(), b"mod");
        assert_eq!(mem.writes_to(0x8000_0020), vec![b"mod".to_vec()]);
    }

    #[test]
    fn memory_bounds() {
        let mem = MemoryTransport::new(0x8000_0000, 0x10);
        assert!(matches!(
            mem.read(0x7FFF_FFFF, 1),
            Err(TransportError::OutOfRange { .. })
        ));
        assert_eq!(mem.read(0x8000_000C, 16).unwrap().len(), 4);
        assert!(mem.write(0x8000_000E, b"abc").is_err());
    }

    #[test]
    fn chunked_read_stops_at_marker() {
        let mem = MemoryTransport::new(0x8000_0000, 0x400);
        let mut data = vec![0x41; 300];
        data.extend([0x7F, 0x00]);
        mem.poke(0x8000_0000, &data).unwrap();
        let got = read_until_marker(&mem, 0x8000_0000, 0x400, 256, &[&[0x7F, 0x00]]);
        assert_eq!(got.len(), 512);
        let got = read_until_marker(&mem, 0x8000_0000, 0x400, 256, &[&[0x7F, 0x0D]]);
        assert_eq!(got.len(), 0x400);
    }

    #[test]
    fn file_transport_reads_and_writes() {
        let path = std::env::temp_dir().join(format!("dialogue-mem1-{}", std::process::id()));
        std::fs::write(&path, vec![0u8; 64]).unwrap();
        let transport = FileTransport::new(&path, MEM1_BASE);
        assert!(matches!(
            transport.read(MEM1_BASE, 4),
            Err(TransportError::NotConnected)
        ));
        transport.connect().unwrap();
        transport.write(MEM1_BASE + 8, b"Hi").unwrap();
        assert_eq!(transport.read(MEM1_BASE + 8, 2).unwrap(), b"Hi");
        assert_eq!(transport.read(MEM1_BASE + 60, 16).unwrap().len(), 4);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn file_transport_missing_file() {
        let transport = FileTransport::new("/nonexistent/dolphin-mem", MEM1_BASE);
        assert!(matches!(transport.connect(), Err(TransportError::Io(_))));
    }
}
