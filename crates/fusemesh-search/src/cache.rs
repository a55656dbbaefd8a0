//! Persistent memoization of assignment evaluations
//!
//! One CSV file per `(architecture, model, sequence length)` identity. The
//! header lists the flattened factor keys (`level.dim`, sorted) followed by
//! `latency,energy`; every later line is one observation. Lookups match every
//! key column exactly.
//!
//! # Locking
//!
//! - In-process: one `parking_lot::RwLock` per file path, shared by every
//!   [`MemoCache`] opened on that path. Lookups take it shared, appends and
//!   [`MemoCache::get_or_evaluate`] take it exclusive.
//! - Across processes: an exclusive advisory lock (`flock` via `fs2`) on a
//!   `<file>.lock` sidecar, retried with the doubling backoff of
//!   [`LockPolicy`]. Exhausting the attempts fails with
//!   [`FusemeshError::CacheLockTimeout`]. The OS drops the lock when its
//!   holder exits, so a worker that crashes mid-evaluation never wedges the
//!   cache.
//!
//! Rows are written with a single `write_all` of a complete line; a reader
//! ignores a trailing line without its newline, so it never sees a partial
//! row.
//!
//! # Example
//!
//! ```no_run
//! use fusemesh_core::{FactorAssignment, LockPolicy, Observation};
//! use fusemesh_search::{CacheIdentity, MemoCache};
//!
//! let cache = MemoCache::open("pregenerate", CacheIdentity::new("cloud", "bert", "1K"), LockPolicy::default())?;
//! let key = FactorAssignment::new().with("L3", "P", 4).with("DRAM", "P", 8);
//! cache.store(&key, Observation::new(1.5, 2.5))?;
//! assert_eq!(cache.lookup(&key), Some(Observation::new(1.5, 2.5)));
//! # Ok::<(), fusemesh_core::FusemeshError>(())
//! ```

use fusemesh_core::{
    AssignmentEvaluator, FactorAssignment, FusemeshError, LockPolicy, Observation, Result,
};
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::thread;

const LATENCY_COLUMN: &str = "latency";
const ENERGY_COLUMN: &str = "energy";

/// Which cache file a run reads and appends to
///
/// Runs with equal identities share one file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheIdentity {
    /// Architecture name, e.g. `"cloud"`
    pub arch: String,
    /// Model name, e.g. `"bert"`
    pub model: String,
    /// Sequence length label, e.g. `"1K"`
    pub seq_len: String,
}

impl CacheIdentity {
    /// Identity from its three parts
    ///
    /// # Arguments
    ///
    /// * `arch` - Architecture name
    /// * `model` - Model name
    /// * `seq_len` - Sequence length label, used verbatim in the file name
    pub fn new(arch: impl Into<String>, model: impl Into<String>, seq_len: impl Into<String>) -> Self {
        Self {
            arch: arch.into(),
            model: model.into(),
            seq_len: seq_len.into(),
        }
    }

    /// File name `<arch>_<model>_<seq_len>.csv`
    ///
    /// # Examples
    ///
    /// ```
    /// use fusemesh_search::CacheIdentity;
    ///
    /// let identity = CacheIdentity::new("edge", "t5", "64K");
    /// assert_eq!(identity.file_name(), "edge_t5_64K.csv");
    /// ```
    pub fn file_name(&self) -> String {
        format!("{}_{}_{}.csv", self.arch, self.model, self.seq_len)
    }
}

/// One persisted observation
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRecord {
    /// Assignment rebuilt from the key columns
    pub factors: FactorAssignment,
    /// Latency and energy columns
    pub observation: Observation,
}

/// Counters for one cache handle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from the file
    pub hits: usize,
    /// Lookups that found no matching row
    pub misses: usize,
    /// Rows appended by this handle
    pub stores: usize,
    /// Lock attempts that found the sidecar locked by another handle
    pub lock_retries: usize,
    /// Reads that failed and were treated as misses
    pub read_failures: usize,
}

impl CacheStats {
    /// `hits / (hits + misses)`, 0 before any lookup
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// In-process lock shared by every handle on the same file
fn path_lock(path: &Path) -> Arc<RwLock<()>> {
    static LOCKS: OnceLock<Mutex<HashMap<PathBuf, Arc<RwLock<()>>>>> = OnceLock::new();
    let registry = LOCKS.get_or_init(|| Mutex::new(HashMap::new()));
    Arc::clone(registry.lock().entry(path.to_path_buf()).or_default())
}

/// Advisory lock on the `<file>.lock` sidecar
///
/// Held through an OS `flock`, so it is released when the handle drops or the
/// owning process dies. The sidecar file itself is left in place.
struct SidecarLock {
    _file: File,
}

impl SidecarLock {
    fn sidecar_path(target: &Path) -> PathBuf {
        let mut name = target.as_os_str().to_os_string();
        name.push(".lock");
        PathBuf::from(name)
    }

    fn acquire(target: &Path, policy: &LockPolicy, retries: &mut usize) -> Result<Self> {
        let path = Self::sidecar_path(target);
        let file = OpenOptions::new().read(true).write(true).create(true).open(&path)?;
        let contended = fs2::lock_contended_error().raw_os_error();

        for attempt in 0..policy.attempts.max(1) {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => return Ok(Self { _file: file }),
                Err(e) if e.kind() == ErrorKind::WouldBlock || e.raw_os_error() == contended => {
                    *retries += 1;
                    let wait = policy.backoff(attempt);
                    tracing::debug!(path = ?path, attempt, ?wait, "cache lock busy");
                    thread::sleep(wait);
                }
                Err(e) => return Err(e.into()),
            }
        }

        tracing::warn!(path = ?target, attempts = policy.attempts, "giving up on cache lock");
        Err(FusemeshError::CacheLockTimeout {
            path: target.to_path_buf(),
            attempts: policy.attempts,
        })
    }
}

/// Parsed cache file
struct Table {
    key_columns: Vec<String>,
    rows: Vec<(Vec<u64>, Observation)>,
}

impl Table {
    fn parse(path: &Path, text: &str) -> Result<Option<Self>> {
        // A final line without newline may still be in flight
        let complete = match text.rfind('\n') {
            Some(end) => &text[..end],
            None => return Ok(None),
        };
        let mut lines = complete.lines().enumerate();
        let Some((_, header)) = lines.next() else {
            return Ok(None);
        };

        let columns: Vec<&str> = header.split(',').map(str::trim).collect();
        let n = columns.len();
        if n < 2 || columns[n - 2] != LATENCY_COLUMN || columns[n - 1] != ENERGY_COLUMN {
            return Err(FusemeshError::CacheFormat {
                path: path.to_path_buf(),
                line: 1,
                reason: format!("header must end with {},{}", LATENCY_COLUMN, ENERGY_COLUMN),
            });
        }
        let key_columns: Vec<String> = columns[..n - 2].iter().map(|c| c.to_string()).collect();

        let mut rows = Vec::new();
        for (index, line) in lines {
            if line.trim().is_empty() {
                continue;
            }
            let bad = |reason: String| FusemeshError::CacheFormat {
                path: path.to_path_buf(),
                line: index + 1,
                reason,
            };
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            if fields.len() != n {
                return Err(bad(format!("expected {} fields, found {}", n, fields.len())));
            }
            let key = fields[..n - 2]
                .iter()
                .map(|f| f.parse::<u64>().map_err(|e| bad(format!("factor '{}': {}", f, e))))
                .collect::<Result<Vec<_>>>()?;
            let latency = fields[n - 2]
                .parse::<f64>()
                .map_err(|e| bad(format!("latency '{}': {}", fields[n - 2], e)))?;
            let energy = fields[n - 1]
                .parse::<f64>()
                .map_err(|e| bad(format!("energy '{}': {}", fields[n - 1], e)))?;
            rows.push((key, Observation::new(latency, energy)));
        }

        Ok(Some(Self { key_columns, rows }))
    }

    fn find(&self, flat: &[(String, u64)]) -> Option<Observation> {
        if self.key_columns.len() != flat.len()
            || self.key_columns.iter().zip(flat).any(|(c, (k, _))| c != k)
        {
            return None;
        }
        self.rows
            .iter()
            .find(|(key, _)| key.iter().zip(flat).all(|(v, (_, f))| v == f))
            .map(|(_, obs)| *obs)
    }
}

/// Memoization cache backed by one append-only CSV file
///
/// # Design
///
/// - The file is re-read on every lookup, so rows appended by other
///   processes are visible immediately
/// - Appends never rewrite existing rows; the header is written once by the
///   first store
/// - Counters in [`CacheStats`] belong to the handle, not to the file
///
/// # Performance
///
/// - Lookup: O(rows × key columns), dominated by reading the file
/// - Store: one `write_all` under both locks
pub struct MemoCache {
    path: PathBuf,
    policy: LockPolicy,
    lock: Arc<RwLock<()>>,
    stats: Mutex<CacheStats>,
}

impl MemoCache {
    /// Open the cache file for `identity` under `dir`, creating `dir` if needed
    pub fn open(dir: impl AsRef<Path>, identity: CacheIdentity, policy: LockPolicy) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        Ok(Self::at_path(dir.join(identity.file_name()), policy))
    }

    /// Use an explicit file path
    pub fn at_path(path: impl Into<PathBuf>, policy: LockPolicy) -> Self {
        let path = path.into();
        Self {
            lock: path_lock(&path),
            path,
            policy,
            stats: Mutex::new(CacheStats::default()),
        }
    }

    /// Backing CSV file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of this handle's counters
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use fusemesh_core::{FactorAssignment, LockPolicy};
    /// use fusemesh_search::{CacheIdentity, MemoCache};
    ///
    /// let cache = MemoCache::open("pregenerate", CacheIdentity::new("edge", "bert", "1K"), LockPolicy::default())?;
    /// let _ = cache.lookup(&FactorAssignment::new().with("L3", "P", 2));
    /// let stats = cache.stats();
    /// assert_eq!(stats.hits + stats.misses, 1);
    /// # Ok::<(), fusemesh_core::FusemeshError>(())
    /// ```
    pub fn stats(&self) -> CacheStats {
        self.stats.lock().clone()
    }

    fn read_table(&self) -> Result<Option<Table>> {
        let mut text = String::new();
        match File::open(&self.path) {
            Ok(mut f) => {
                f.read_to_string(&mut text)?;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        Table::parse(&self.path, &text)
    }

    fn find(&self, factors: &FactorAssignment) -> Result<Option<Observation>> {
        let flat = factors.flatten();
        Ok(self.read_table()?.and_then(|t| t.find(&flat)))
    }

    fn count(&self, hit: bool) {
        let mut stats = self.stats.lock();
        if hit {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }
    }

    /// Look up an observation, surfacing read and parse errors
    pub fn try_lookup(&self, factors: &FactorAssignment) -> Result<Option<Observation>> {
        let _shared = self.lock.read();
        let found = self.find(factors)?;
        self.count(found.is_some());
        Ok(found)
    }

    /// Look up an observation; an unreadable file counts as a miss
    pub fn lookup(&self, factors: &FactorAssignment) -> Option<Observation> {
        match self.try_lookup(factors) {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(path = ?self.path, error = %e, "cache read failed, treating as miss");
                let mut stats = self.stats.lock();
                stats.read_failures += 1;
                stats.misses += 1;
                None
            }
        }
    }

    /// Append while both locks are held
    fn append_locked(&self, factors: &FactorAssignment, observation: Observation) -> Result<()> {
        let flat = factors.flatten();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&self.path)?;

        let mut text = String::new();
        file.read_to_string(&mut text)?;
        let mut out = String::new();
        match Table::parse(&self.path, &text)? {
            None if text.is_empty() => {
                let mut header: Vec<&str> = flat.iter().map(|(k, _)| k.as_str()).collect();
                header.push(LATENCY_COLUMN);
                header.push(ENERGY_COLUMN);
                out.push_str(&header.join(","));
                out.push('\n');
            }
            None => {
                return Err(FusemeshError::CacheFormat {
                    path: self.path.clone(),
                    line: 1,
                    reason: "incomplete header".to_string(),
                })
            }
            Some(table) => {
                let matches = table.key_columns.len() == flat.len()
                    && table.key_columns.iter().zip(&flat).all(|(c, (k, _))| c == k);
                if !matches {
                    return Err(FusemeshError::CacheSchemaMismatch {
                        path: self.path.clone(),
                    });
                }
                if !text.ends_with('\n') {
                    // Only a writer that died mid-row leaves this behind
                    let keep = text.rfind('\n').map_or(0, |i| i + 1);
                    tracing::warn!(path = ?self.path, "discarding torn cache row");
                    file.set_len(keep as u64)?;
                }
            }
        }

        let mut row: Vec<String> = flat.iter().map(|(_, v)| v.to_string()).collect();
        row.push(observation.latency.to_string());
        row.push(observation.energy.to_string());
        out.push_str(&row.join(","));
        out.push('\n');

        file.write_all(out.as_bytes())?;
        file.flush()?;
        self.stats.lock().stores += 1;
        Ok(())
    }

    fn exclusive<T>(&self, body: impl FnOnce() -> Result<T>) -> Result<T> {
        let _exclusive = self.lock.write();
        let mut retries = 0;
        let sidecar = SidecarLock::acquire(&self.path, &self.policy, &mut retries);
        self.stats.lock().lock_retries += retries;
        let _sidecar = sidecar?;
        body()
    }

    /// Append one observation
    ///
    /// The first write to an empty or missing file writes the header.
    ///
    /// # Errors
    ///
    /// - [`FusemeshError::CacheSchemaMismatch`] if the key columns differ from the header
    /// - [`FusemeshError::CacheLockTimeout`] if another handle keeps the sidecar locked
    pub fn store(&self, factors: &FactorAssignment, observation: Observation) -> Result<()> {
        self.exclusive(|| self.append_locked(factors, observation))
    }

    /// Cached observation, or evaluate and store it, as one atomic step
    ///
    /// Returns the observation and whether it came from the cache. Evaluator
    /// failures are wrapped in [`FusemeshError::Oracle`] and nothing is stored.
    pub fn get_or_evaluate<E>(&self, factors: &FactorAssignment, evaluator: &mut E) -> Result<(Observation, bool)>
    where
        E: AssignmentEvaluator + ?Sized,
    {
        self.exclusive(|| {
            let cached = match self.find(factors) {
                Ok(found) => found,
                Err(e) => {
                    tracing::warn!(path = ?self.path, error = %e, "cache read failed, treating as miss");
                    self.stats.lock().read_failures += 1;
                    None
                }
            };
            self.count(cached.is_some());
            if let Some(observation) = cached {
                tracing::debug!(factors = %factors, "cache hit");
                return Ok((observation, true));
            }

            let observation = evaluator.evaluate(factors).map_err(FusemeshError::Oracle)?;
            tracing::debug!(
                factors = %factors,
                latency = observation.latency,
                energy = observation.energy,
                "cache miss evaluated"
            );
            self.append_locked(factors, observation)?;
            Ok((observation, false))
        })
    }

    /// Every persisted record, in file order
    pub fn records(&self) -> Result<Vec<CacheRecord>> {
        let _shared = self.lock.read();
        let Some(table) = self.read_table()? else {
            return Ok(Vec::new());
        };
        table
            .rows
            .into_iter()
            .map(|(key, observation)| {
                let factors = FactorAssignment::from_flat(table.key_columns.iter().zip(key))?;
                Ok(CacheRecord {
                    factors,
                    observation,
                })
            })
            .collect()
    }
}

impl std::fmt::Debug for MemoCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoCache")
            .field("path", &self.path)
            .field("policy", &self.policy)
            .finish()
    }
}
