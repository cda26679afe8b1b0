//! Branch traces, and driving a [BranchPredictor] with them.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::{debug, trace};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::branch::*;
use crate::facade::BranchPredictor;
use crate::error::Result;
use crate::stats::BranchStats;
use crate::{Addr, Outcome, INST_BYTES};

/// Size of a [BranchRecord] in a binary trace.
///
/// Records are little-endian: the program counter (8 bytes), the target
/// (8 bytes), the packed [BranchFlags] (4 bytes), and 4 reserved bytes.
pub const RECORD_BYTES: usize = 24;

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

/// A list of binary trace files, opened one at a time.
pub struct BinaryTraceSet {
    /// A list of filenames
    pub files: Vec<PathBuf>,
    cur: usize,
}
impl BinaryTraceSet {
    pub fn new_from_slice(paths: &[impl AsRef<Path>]) -> Self {
        Self {
            files: paths.iter().map(|p| p.as_ref().to_path_buf()).collect(),
            cur: 0,
        }
    }
}
impl Iterator for BinaryTraceSet {
    type Item = io::Result<BinaryTrace>;
    fn next(&mut self) -> Option<Self::Item> {
        let path = self.files.get(self.cur)?;
        self.cur += 1;
        Some(BinaryTrace::from_file(path))
    }
}

/// A trace of branch records.
pub struct BinaryTrace {
    pub name: String,
    records: Vec<BranchRecord>,
}
impl BinaryTrace {
    /// Read a [BinaryTrace] from a file.
    pub fn from_file(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let name = path.file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let data = fs::read(path)?;
        Self::from_bytes(&name, &data)
    }

    /// Parse records from the contents of a binary trace.
    pub fn from_bytes(name: &str, data: &[u8]) -> io::Result<Self> {
        if data.len() % RECORD_BYTES != 0 {
            return Err(invalid(format!(
                "trace '{}' is {} bytes, not a whole number of records", name, data.len()
            )));
        }
        let records = data.chunks_exact(RECORD_BYTES).enumerate()
            .map(|(idx, rec)| Self::parse_record(idx, rec))
            .collect::<io::Result<Vec<_>>>()?;
        debug!("trace '{}': {} records", name, records.len());
        Ok(Self { name: name.to_string(), records })
    }

    fn parse_record(idx: usize, rec: &[u8]) -> io::Result<BranchRecord> {
        let word = |off: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&rec[off..off + 8]);
            u64::from_le_bytes(b)
        };
        let mut f = [0u8; 4];
        f.copy_from_slice(&rec[16..20]);
        let flags = BranchFlags(u32::from_le_bytes(f));
        let kind = flags.kind()
            .ok_or_else(|| invalid(format!("record {}: bad branch flags {:#x}", idx, flags.0)))?;
        Ok(BranchRecord::new(word(0), word(8), kind, Outcome::from(flags.is_taken())))
    }

    /// Write records in the binary trace format.
    pub fn write_records(w: &mut impl Write, records: &[BranchRecord]) -> io::Result<()> {
        for r in records {
            w.write_all(&r.pc.to_le_bytes())?;
            w.write_all(&r.tgt.to_le_bytes())?;
            w.write_all(&r.flags().0.to_le_bytes())?;
            w.write_all(&[0; 4])?;
        }
        Ok(())
    }

    /// Return the number of records
    pub fn num_entries(&self) -> usize { self.records.len() }

    pub fn name(&self) -> &str { &self.name }

    /// Return a slice of records.
    pub fn as_slice(&self) -> &[BranchRecord] { &self.records }

    /// Return a truncated slice of records
    pub fn as_slice_trunc(&self, limit: usize) -> &[BranchRecord] {
        &self.records[..limit.min(self.records.len())]
    }
}

/// The behavior of a conditional branch in a [SyntheticTrace].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SitePattern {
    /// Taken with some probability
    Biased(f64),

    /// A loop branch, not-taken once every 'n' executions
    Loop(usize),

    /// Follows the direction of the previous conditional branch
    Correlated,
}

#[derive(Clone, Copy, Debug)]
struct Site {
    pc: Addr,
    tgt: Addr,
    pattern: SitePattern,
    count: usize,
}

/// A reproducible stream of branch records from a made-up program.
///
/// The program is a cycle of conditional branches with a mix of
/// [SitePattern]s, interleaved with calls and the matching returns.
pub struct SyntheticTrace {
    sites: Vec<Site>,
    calls: Vec<Addr>,
    rng: StdRng,
    step: usize,
    last: Outcome,
}
impl SyntheticTrace {
    pub fn new(seed: u64, num_sites: usize) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let sites = (0..num_sites.max(1)).map(|i| {
            let pc = 0x0040_0000 + (i as Addr) * 0x40;
            let pattern = match rng.gen_range(0..4) {
                0 => SitePattern::Biased(0.95),
                1 => SitePattern::Biased(0.1),
                2 => SitePattern::Loop(rng.gen_range(2..12)),
                _ => SitePattern::Correlated,
            };
            Site { pc, tgt: pc + 0x20, pattern, count: 0 }
        }).collect();
        Self { sites, calls: Vec::new(), rng, step: 0, last: Outcome::N }
    }

    fn next_conditional(&mut self) -> BranchRecord {
        let idx = self.step % self.sites.len();
        let site = &mut self.sites[idx];
        site.count += 1;
        let outcome = match site.pattern {
            SitePattern::Biased(p) => Outcome::from(self.rng.gen_bool(p)),
            SitePattern::Loop(n) => Outcome::from(site.count % n != 0),
            SitePattern::Correlated => self.last,
        };
        self.last = outcome;
        BranchRecord::new(site.pc, site.tgt, BranchKind::DirectBranch, outcome)
    }
}
impl Iterator for SyntheticTrace {
    type Item = BranchRecord;
    fn next(&mut self) -> Option<BranchRecord> {
        self.step += 1;
        let rec = match self.step % 16 {
            5 | 9 if self.calls.len() < 4 => {
                let pc = 0x0080_0000 + (self.step as Addr % 64) * 0x10;
                self.calls.push(pc);
                BranchRecord::new(pc, 0x00c0_0000, BranchKind::DirectCall, Outcome::T)
            },
            13 | 15 if !self.calls.is_empty() => {
                let call = self.calls.pop().unwrap_or_default();
                BranchRecord::new(0x00c0_0100, call.wrapping_add(INST_BYTES), BranchKind::Return, Outcome::T)
            },
            _ => self.next_conditional(),
        };
        Some(rec)
    }
}

/// Run `records` through a predictor the way a pipeline would: lookup,
/// recover on a misprediction, then update.
///
/// Returns the per-branch direction statistics for conditional branches.
pub fn evaluate(bp: &mut BranchPredictor,
    records: impl IntoIterator<Item = BranchRecord>) -> Result<BranchStats>
{
    let mut stats = BranchStats::new();
    for r in records {
        let is_call = r.kind.is_call();
        let is_return = r.kind.is_return();
        let l = bp.lookup(r.pc, r.tgt, r.kind, is_call, is_return);

        let taken = bool::from(r.outcome);
        let pred_taken = l.prediction.taken;
        let pred_next = if pred_taken {
            l.prediction.target
        } else {
            Some(r.pc.wrapping_add(INST_BYTES))
        };
        let correct = pred_next == Some(r.next_pc());

        if r.is_conditional() {
            stats.record(r.pc, Outcome::from(pred_taken), r.outcome);
        }
        if !correct {
            trace!("mispredicted {:?} at {:#x}", r.kind, r.pc);
            bp.recover(r.pc, l.recover);
        }
        bp.update(l.token, r.pc, r.tgt, taken, pred_taken, correct, r.kind)?;
    }
    Ok(stats)
}
