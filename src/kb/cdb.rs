//! Constant-database (CDB) reader and writer.
//!
//! The pattern indexes use the classic CDB layout: a 2048-byte header of 256
//! `(table offset, slot count)` pairs, the records, then the hash tables.
//! Records are immutable once written; lookup is two probes on average. The
//! writer streams records and patches the header on finish.

use super::error::{KbError, KbResult};
use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

const HEADER_SIZE: u64 = 2048;

fn cdb_hash(key: &[u8]) -> u32 {
    let mut h: u32 = 5381;
    for &b in key {
        h = (h << 5).wrapping_add(h) ^ u32::from(b);
    }
    h
}

/// Streaming CDB writer. Records go to disk immediately; the hash tables and
/// header are written by [`CdbWriter::finish`].
pub struct CdbWriter {
    file: BufWriter<File>,
    pos: u64,
    entries: Vec<(u32, u64)>,
}

impl CdbWriter {
    pub fn create(path: &Path) -> KbResult<CdbWriter> {
        let mut file = BufWriter::new(File::create(path)?);
        file.write_all(&[0u8; HEADER_SIZE as usize])?;
        Ok(CdbWriter {
            file,
            pos: HEADER_SIZE,
            entries: Vec::new(),
        })
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) -> KbResult<()> {
        self.entries.push((cdb_hash(key), self.pos));
        self.file.write_all(&(key.len() as u32).to_le_bytes())?;
        self.file.write_all(&(value.len() as u32).to_le_bytes())?;
        self.file.write_all(key)?;
        self.file.write_all(value)?;
        self.pos += 8 + key.len() as u64 + value.len() as u64;
        Ok(())
    }

    pub fn finish(mut self) -> KbResult<()> {
        let mut buckets: Vec<Vec<(u32, u64)>> = vec![Vec::new(); 256];
        for &(hash, pos) in &self.entries {
            buckets[(hash & 0xFF) as usize].push((hash, pos));
        }

        let mut header = Vec::with_capacity(HEADER_SIZE as usize);
        for bucket in &buckets {
            let nslots = bucket.len() as u32 * 2;
            header.extend_from_slice(&(self.pos as u32).to_le_bytes());
            header.extend_from_slice(&nslots.to_le_bytes());

            if nslots == 0 {
                continue;
            }
            let mut slots: Vec<(u32, u32)> = vec![(0, 0); nslots as usize];
            for &(hash, pos) in bucket {
                let mut slot = ((hash >> 8) % nslots) as usize;
                while slots[slot].1 != 0 {
                    slot = (slot + 1) % nslots as usize;
                }
                slots[slot] = (hash, pos as u32);
            }
            for (hash, pos) in slots {
                self.file.write_all(&hash.to_le_bytes())?;
                self.file.write_all(&pos.to_le_bytes())?;
            }
            self.pos += u64::from(nslots) * 8;
        }

        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&header)?;
        self.file.flush()?;
        Ok(())
    }
}

/// CDB reader. The whole file is resident; lookups never touch the disk.
pub struct CdbReader {
    data: Vec<u8>,
}

impl CdbReader {
    pub fn open(path: &Path) -> KbResult<CdbReader> {
        if !path.exists() {
            return Err(KbError::MissingFile(path.to_path_buf()));
        }
        let mut data = Vec::new();
        File::open(path)?.read_to_end(&mut data)?;
        if data.len() < HEADER_SIZE as usize {
            return Err(KbError::Corrupt(format!(
                "cdb file {} shorter than its header",
                path.display()
            )));
        }
        Ok(CdbReader { data })
    }

    fn u32_at(&self, pos: usize) -> KbResult<u32> {
        let bytes = self
            .data
            .get(pos..pos + 4)
            .ok_or_else(|| KbError::Corrupt("cdb offset out of range".to_string()))?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn get(&self, key: &[u8]) -> KbResult<Option<Vec<u8>>> {
        let hash = cdb_hash(key);
        let bucket = (hash & 0xFF) as usize;
        let table_pos = self.u32_at(bucket * 8)? as usize;
        let nslots = self.u32_at(bucket * 8 + 4)?;
        if nslots == 0 {
            return Ok(None);
        }

        let mut slot = (hash >> 8) % nslots;
        for _ in 0..nslots {
            let slot_pos = table_pos + slot as usize * 8;
            let slot_hash = self.u32_at(slot_pos)?;
            let record_pos = self.u32_at(slot_pos + 4)? as usize;
            if record_pos == 0 {
                return Ok(None);
            }
            if slot_hash == hash {
                let klen = self.u32_at(record_pos)? as usize;
                let vlen = self.u32_at(record_pos + 4)? as usize;
                let key_start = record_pos + 8;
                let val_start = key_start + klen;
                let found_key = self
                    .data
                    .get(key_start..val_start)
                    .ok_or_else(|| KbError::Corrupt("cdb record out of range".to_string()))?;
                if found_key == key {
                    let value = self
                        .data
                        .get(val_start..val_start + vlen)
                        .ok_or_else(|| KbError::Corrupt("cdb record out of range".to_string()))?;
                    return Ok(Some(value.to_vec()));
                }
            }
            slot = (slot + 1) % nslots;
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_cdb_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("test.cdb");

        let mut writer = CdbWriter::create(&path).unwrap();
        for i in 0u32..500 {
            writer
                .put(&i.to_le_bytes(), format!("value-{i}").as_bytes())
                .unwrap();
        }
        writer.finish().unwrap();

        let reader = CdbReader::open(&path).unwrap();
        for i in 0u32..500 {
            let value = reader.get(&i.to_le_bytes()).unwrap().unwrap();
            assert_eq!(value, format!("value-{i}").as_bytes());
        }
        assert!(reader.get(&9999u32.to_le_bytes()).unwrap().is_none());
    }

    #[test]
    fn test_cdb_empty() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("empty.cdb");
        CdbWriter::create(&path).unwrap().finish().unwrap();
        let reader = CdbReader::open(&path).unwrap();
        assert!(reader.get(b"anything").unwrap().is_none());
    }

    #[test]
    fn test_cdb_missing_file() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            CdbReader::open(&temp.path().join("nope.cdb")),
            Err(KbError::MissingFile(_))
        ));
    }
}
