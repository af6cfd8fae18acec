use crate::types::{CloudMask, ImageTimeSeries, TsResult};
use chrono::{DateTime, TimeZone, Utc};
use ndarray::{Array3, Array4};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tempfile::TempDir;

const MAGIC: &[u8; 4] = b"S2PS";
const FORMAT_VERSION: u8 = 1;

/// Scoped staging area forcing materialization between pipeline stages.
///
/// Each stage output is written to a temporary file and read back, so a
/// stage failure is attributable to a specific stage and the working set
/// stays bounded. The round trip is exact: the reread value compares equal
/// to the written one. All artifacts live under one temporary directory
/// that is removed when the context drops, on every exit path.
#[derive(Debug)]
pub struct StagingContext {
    dir: TempDir,
    counter: AtomicU64,
}

impl StagingContext {
    /// Create a staging area under the given parent directory
    pub fn new<P: AsRef<Path>>(parent: P) -> TsResult<Self> {
        let dir = tempfile::Builder::new()
            .prefix("s2prep-")
            .tempdir_in(parent)?;
        log::debug!("Staging directory: {}", dir.path().display());
        Ok(Self {
            dir,
            counter: AtomicU64::new(0),
        })
    }

    /// Location of the staging artifacts
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write a series to the staging area and read it back
    pub fn stage_series<T: StagedSample>(
        &self,
        series: &ImageTimeSeries<T>,
        label: &str,
    ) -> TsResult<ImageTimeSeries<T>> {
        let path = self.next_path(label);
        write_series(&path, series)?;
        let reread = read_series(&path)?;
        Ok(reread)
    }

    /// Write a cloud mask to the staging area and read it back
    pub fn stage_mask(&self, mask: &CloudMask, label: &str) -> TsResult<CloudMask> {
        let path = self.next_path(label);
        write_mask(&path, mask)?;
        let reread = read_mask(&path)?;
        Ok(reread)
    }

    fn next_path(&self, label: &str) -> PathBuf {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        self.dir.path().join(format!("{:04}-{}.s2ps", n, label))
    }
}

/// Pixel sample types the staging codec understands
pub trait StagedSample: Copy {
    const DTYPE: u8;
    fn write_to<W: Write>(w: &mut W, v: Self) -> io::Result<()>;
    fn read_from<R: Read>(r: &mut R) -> io::Result<Self>;
}

impl StagedSample for u8 {
    const DTYPE: u8 = 0;
    fn write_to<W: Write>(w: &mut W, v: Self) -> io::Result<()> {
        w.write_all(&[v])
    }
    fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let mut buf = [0u8; 1];
        r.read_exact(&mut buf)?;
        Ok(buf[0])
    }
}

impl StagedSample for u16 {
    const DTYPE: u8 = 1;
    fn write_to<W: Write>(w: &mut W, v: Self) -> io::Result<()> {
        w.write_all(&v.to_le_bytes())
    }
    fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let mut buf = [0u8; 2];
        r.read_exact(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }
}

impl StagedSample for f32 {
    const DTYPE: u8 = 2;
    fn write_to<W: Write>(w: &mut W, v: Self) -> io::Result<()> {
        w.write_all(&v.to_le_bytes())
    }
    fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let mut buf = [0u8; 4];
        r.read_exact(&mut buf)?;
        Ok(f32::from_le_bytes(buf))
    }
}

fn write_series<T: StagedSample>(path: &Path, series: &ImageTimeSeries<T>) -> io::Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    w.write_all(MAGIC)?;
    w.write_all(&[FORMAT_VERSION, T::DTYPE, 4])?;

    let (nt, nb, ny, nx) = series.data.dim();
    for dim in [nt, nb, ny, nx] {
        write_u64(&mut w, dim as u64)?;
    }

    write_times(&mut w, &series.time)?;
    write_strings(&mut w, &series.bands)?;
    write_floats(&mut w, &series.y)?;
    write_floats(&mut w, &series.x)?;
    write_strings(&mut w, &series.ids)?;
    match &series.processing_baseline {
        Some(baseline) => {
            w.write_all(&[1])?;
            write_strings(&mut w, baseline)?;
        }
        None => w.write_all(&[0])?,
    }

    write_u64(&mut w, series.attrs.len() as u64)?;
    let mut attrs: Vec<_> = series.attrs.iter().collect();
    attrs.sort();
    for (k, v) in attrs {
        write_string(&mut w, k)?;
        write_string(&mut w, v)?;
    }

    for &v in series.data.iter() {
        T::write_to(&mut w, v)?;
    }
    w.flush()
}

fn read_series<T: StagedSample>(path: &Path) -> TsResult<ImageTimeSeries<T>> {
    let mut r = BufReader::new(File::open(path)?);
    read_header(&mut r, T::DTYPE, 4)?;

    let nt = read_u64(&mut r)? as usize;
    let nb = read_u64(&mut r)? as usize;
    let ny = read_u64(&mut r)? as usize;
    let nx = read_u64(&mut r)? as usize;

    let time = read_times(&mut r)?;
    let bands = read_strings(&mut r)?;
    let y = read_floats(&mut r)?;
    let x = read_floats(&mut r)?;
    let ids = read_strings(&mut r)?;

    let mut flag = [0u8; 1];
    r.read_exact(&mut flag)?;
    let baseline = if flag[0] == 1 {
        Some(read_strings(&mut r)?)
    } else {
        None
    };

    let n_attrs = read_u64(&mut r)? as usize;
    let mut attrs = std::collections::HashMap::with_capacity(n_attrs);
    for _ in 0..n_attrs {
        let k = read_string(&mut r)?;
        let v = read_string(&mut r)?;
        attrs.insert(k, v);
    }

    let mut values = Vec::with_capacity(nt * nb * ny * nx);
    for _ in 0..nt * nb * ny * nx {
        values.push(T::read_from(&mut r)?);
    }
    let data = Array4::from_shape_vec((nt, nb, ny, nx), values)
        .map_err(|e| invalid_data(format!("staged array shape: {}", e)))?;

    let mut series = ImageTimeSeries::new(data, time, bands, y, x)?;
    series.ids = ids;
    series.processing_baseline = baseline;
    series.attrs = attrs;
    Ok(series)
}

fn write_mask(path: &Path, mask: &CloudMask) -> io::Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    w.write_all(MAGIC)?;
    w.write_all(&[FORMAT_VERSION, u8::DTYPE, 3])?;

    let (nt, ny, nx) = mask.data.dim();
    for dim in [nt, ny, nx] {
        write_u64(&mut w, dim as u64)?;
    }
    write_times(&mut w, &mask.time)?;
    write_floats(&mut w, &mask.y)?;
    write_floats(&mut w, &mask.x)?;
    for &v in mask.data.iter() {
        u8::write_to(&mut w, v)?;
    }
    w.flush()
}

fn read_mask(path: &Path) -> TsResult<CloudMask> {
    let mut r = BufReader::new(File::open(path)?);
    read_header(&mut r, u8::DTYPE, 3)?;

    let nt = read_u64(&mut r)? as usize;
    let ny = read_u64(&mut r)? as usize;
    let nx = read_u64(&mut r)? as usize;

    let time = read_times(&mut r)?;
    let y = read_floats(&mut r)?;
    let x = read_floats(&mut r)?;

    let mut values = Vec::with_capacity(nt * ny * nx);
    for _ in 0..nt * ny * nx {
        values.push(u8::read_from(&mut r)?);
    }
    let data = Array3::from_shape_vec((nt, ny, nx), values)
        .map_err(|e| invalid_data(format!("staged mask shape: {}", e)))?;

    CloudMask::new(data, time, y, x)
}

fn read_header<R: Read>(r: &mut R, dtype: u8, rank: u8) -> io::Result<()> {
    let mut header = [0u8; 7];
    r.read_exact(&mut header)?;
    if &header[..4] != MAGIC {
        return Err(invalid_data("not a staging artifact".to_string()));
    }
    if header[4] != FORMAT_VERSION {
        return Err(invalid_data(format!("unknown format version {}", header[4])));
    }
    if header[5] != dtype || header[6] != rank {
        return Err(invalid_data(format!(
            "staged dtype/rank ({}, {}) does not match expected ({}, {})",
            header[5], header[6], dtype, rank
        )));
    }
    Ok(())
}

fn invalid_data(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

fn write_u64<W: Write>(w: &mut W, v: u64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

fn read_u64<R: Read>(r: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn write_string<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    write_u64(w, s.len() as u64)?;
    w.write_all(s.as_bytes())
}

fn read_string<R: Read>(r: &mut R) -> io::Result<String> {
    let len = read_u64(r)? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| invalid_data(format!("staged string: {}", e)))
}

fn write_strings<W: Write>(w: &mut W, v: &[String]) -> io::Result<()> {
    write_u64(w, v.len() as u64)?;
    for s in v {
        write_string(w, s)?;
    }
    Ok(())
}

fn read_strings<R: Read>(r: &mut R) -> io::Result<Vec<String>> {
    let len = read_u64(r)? as usize;
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        out.push(read_string(r)?);
    }
    Ok(out)
}

fn write_floats<W: Write>(w: &mut W, v: &[f64]) -> io::Result<()> {
    write_u64(w, v.len() as u64)?;
    for &f in v {
        w.write_all(&f.to_le_bytes())?;
    }
    Ok(())
}

fn read_floats<R: Read>(r: &mut R) -> io::Result<Vec<f64>> {
    let len = read_u64(r)? as usize;
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        let mut buf = [0u8; 8];
        r.read_exact(&mut buf)?;
        out.push(f64::from_le_bytes(buf));
    }
    Ok(out)
}

// Timestamps are stored as (seconds, subsecond nanoseconds) so the
// microsecond offsets from time deduplication survive the round trip.
fn write_times<W: Write>(w: &mut W, times: &[DateTime<Utc>]) -> io::Result<()> {
    write_u64(w, times.len() as u64)?;
    for t in times {
        w.write_all(&t.timestamp().to_le_bytes())?;
        w.write_all(&t.timestamp_subsec_nanos().to_le_bytes())?;
    }
    Ok(())
}

fn read_times<R: Read>(r: &mut R) -> io::Result<Vec<DateTime<Utc>>> {
    let len = read_u64(r)? as usize;
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        let mut secs = [0u8; 8];
        let mut nanos = [0u8; 4];
        r.read_exact(&mut secs)?;
        r.read_exact(&mut nanos)?;
        let t = Utc
            .timestamp_opt(i64::from_le_bytes(secs), u32::from_le_bytes(nanos))
            .single()
            .ok_or_else(|| invalid_data("staged timestamp out of range".to_string()))?;
        out.push(t);
    }
    Ok(out)
}
