//! In-Process Record Store
//!
//! A [`RecordStore`] backend for tests, benchmarks and local development.
//! Production deployments point the gateway at a remote cluster; this backend
//! only has to honor the same contract.
//!
//! Records live in one `DashMap`, so each call locks a single map shard.
//! Expiry is lazy: an expired record is invisible to every call and is dropped
//! the next time its key is written or read.
//! Writes work on a copy of the record and commit only if the whole call
//! succeeded. Bin names and record sizes are capped as a real cluster caps
//! them, which is what keeps single-record hashes and lists bounded.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use super::{
    BackgroundJob, Bin, Expiration, JobHandle, Key, ListEnd, Operation, Procedure,
    ProcedureResult, ReadPolicy, Record, RecordExistsAction, RecordHeader, RecordStore,
    RecordStream, StoreError, StoreResult, Value, WritePolicy, MAX_BIN_NAME_LEN,
    MAX_RECORD_SIZE,
};

/// A record as held in memory.
#[derive(Debug, Clone)]
struct StoredRecord {
    bins: HashMap<String, Value>,
    generation: u32,
    expires_at: Option<Instant>,
}

impl StoredRecord {
    fn new() -> Self {
        Self {
            bins: HashMap::new(),
            generation: 0,
            expires_at: None,
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| Instant::now() >= exp)
    }

    fn ttl_secs(&self) -> Option<u32> {
        self.expires_at.map(|exp| {
            let left = exp.saturating_duration_since(Instant::now());
            left.as_secs().min(u32::MAX as u64) as u32
        })
    }

    fn size(&self) -> usize {
        self.bins.iter().map(|(name, v)| name.len() + v.size()).sum()
    }

    fn header(&self) -> RecordHeader {
        RecordHeader {
            generation: self.generation,
            ttl: self.ttl_secs(),
        }
    }

    /// Projects the record onto `bins`; an empty selection returns every bin.
    fn to_record(&self, bins: &[&str]) -> Record {
        let selected = if bins.is_empty() {
            self.bins.clone()
        } else {
            bins.iter()
                .filter_map(|name| {
                    self.bins
                        .get(*name)
                        .map(|v| (name.to_string(), v.clone()))
                })
                .collect()
        };
        Record {
            bins: selected,
            generation: self.generation,
            ttl: self.ttl_secs(),
        }
    }
}

/// Validates a mutated record and bumps its generation. `None`, or a record
/// whose last bin was removed, means the record is deleted.
fn commit(slot: Option<StoredRecord>) -> StoreResult<Option<StoredRecord>> {
    match slot {
        Some(mut record) if !record.bins.is_empty() => {
            let size = record.size();
            if size > MAX_RECORD_SIZE {
                return Err(StoreError::RecordTooBig {
                    size,
                    max: MAX_RECORD_SIZE,
                });
            }
            record.generation = record.generation.wrapping_add(1);
            Ok(Some(record))
        }
        _ => Ok(None),
    }
}

/// The in-process record store.
///
/// # Example
///
/// ```
/// use recgate::store::{Bin, Key, MemoryStore, ReadPolicy, RecordStore, WritePolicy};
///
/// let store = MemoryStore::new();
/// let key = Key::new("test", "cache", "name").unwrap();
///
/// store.put(&WritePolicy::default(), &key, vec![Bin::new("r", "Ariz")]).unwrap();
/// let record = store.get(&ReadPolicy::default(), &key, &["r"]).unwrap().unwrap();
/// assert_eq!(record.bin("r").and_then(|v| v.as_str()), Some("Ariz"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: Arc<DashMap<Key, StoredRecord>>,
    /// Namespace default TTL; `None` keeps records forever
    default_ttl: Option<Duration>,
}

impl MemoryStore {
    /// Creates a store whose namespace default is to never expire.
    pub fn new() -> Self {
        Self::with_default_ttl(None)
    }

    pub fn with_default_ttl(default_ttl: Option<Duration>) -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            default_ttl,
        }
    }

    fn deadline(&self, expiration: Expiration) -> Option<Instant> {
        match expiration {
            Expiration::NamespaceDefault | Expiration::Seconds(0) => {
                self.default_ttl.map(|ttl| Instant::now() + ttl)
            }
            Expiration::Seconds(secs) => Some(Instant::now() + Duration::from_secs(secs as u64)),
        }
    }

    /// Expiration for a procedure write: an explicit TTL wins, `-1` keeps the
    /// record's current one, and new records take the policy's.
    fn procedure_deadline(
        &self,
        current: &StoredRecord,
        fresh: bool,
        policy: &WritePolicy,
        ttl: i64,
    ) -> Option<Instant> {
        match Expiration::from_ttl(ttl) {
            Some(Expiration::Seconds(secs)) => self.deadline(Expiration::Seconds(secs)),
            _ if fresh => self.deadline(policy.expiration),
            _ => current.expires_at,
        }
    }

    /// Reads a live record. An expired one is dropped instead.
    fn lookup<T>(&self, key: &Key, f: impl FnOnce(&StoredRecord) -> T) -> Option<T> {
        match self.records.get(key) {
            Some(record) if !record.is_expired() => return Some(f(&record)),
            Some(_) => {}
            None => return None,
        }

        self.records.remove_if(key, |_, record| record.is_expired());
        None
    }

    /// Runs `f` against a working copy of the record and commits it only if
    /// `f` succeeds. Leaving the slot empty deletes the record, and so does
    /// removing its last bin.
    fn mutate<T>(
        &self,
        key: &Key,
        f: impl FnOnce(&mut Option<StoredRecord>) -> StoreResult<T>,
    ) -> StoreResult<T> {
        match self.records.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                let mut slot = Some(entry.get().clone()).filter(|r| !r.is_expired());
                let out = f(&mut slot)?;
                match commit(slot)? {
                    Some(record) => {
                        entry.insert(record);
                    }
                    None => {
                        entry.remove();
                    }
                }
                Ok(out)
            }
            Entry::Vacant(entry) => {
                let mut slot = None;
                let out = f(&mut slot)?;
                if let Some(record) = commit(slot)? {
                    entry.insert(record);
                }
                Ok(out)
            }
        }
    }

    /// Number of stored records, counting expired ones not yet dropped.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn exec_hash(
        &self,
        policy: &WritePolicy,
        key: &Key,
        procedure: Procedure,
    ) -> StoreResult<ProcedureResult> {
        match procedure {
            Procedure::HashSet { field, value } => {
                check_bin_name(&field)?;
                self.mutate(key, |slot| {
                    let fresh = slot.is_none();
                    let record = slot.get_or_insert_with(StoredRecord::new);
                    if fresh {
                        record.expires_at = self.deadline(policy.expiration);
                    }
                    let created = record.bins.insert(field, value).is_none();
                    Ok(ProcedureResult::Int(created as i64))
                })
            }
            Procedure::HashDelete { field } => self.mutate(key, |slot| {
                let removed = slot
                    .as_mut()
                    .map(|record| record.bins.remove(&field).is_some())
                    .unwrap_or(false);
                Ok(ProcedureResult::Int(removed as i64))
            }),
            Procedure::HashSetMany { fields } => {
                for (field, _) in &fields {
                    check_bin_name(field)?;
                }
                self.mutate(key, |slot| {
                    let fresh = slot.is_none();
                    let record = slot.get_or_insert_with(StoredRecord::new);
                    if fresh {
                        record.expires_at = self.deadline(policy.expiration);
                    }
                    record.bins.extend(fields);
                    Ok(ProcedureResult::Status("OK".to_string()))
                })
            }
            Procedure::HashGetAll => {
                let pairs = self
                    .lookup(key, |record| {
                        let mut names: Vec<&String> = record.bins.keys().collect();
                        names.sort();
                        names
                            .into_iter()
                            .flat_map(|name| {
                                [Value::Str(name.clone()), record.bins[name].clone()]
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(ProcedureResult::List(pairs))
            }
            other => Err(StoreError::Procedure {
                name: other.name(),
                reason: "not a hash procedure".to_string(),
            }),
        }
    }

    fn exec_list(
        &self,
        policy: &WritePolicy,
        key: &Key,
        procedure: Procedure,
    ) -> StoreResult<ProcedureResult> {
        match procedure {
            Procedure::ListPush {
                end,
                bin,
                value,
                ttl,
            } => {
                let size_bin = size_bin_name(&bin);
                check_bin_name(&bin)?;
                check_bin_name(&size_bin)?;
                self.mutate(key, |slot| {
                    let fresh = slot.is_none();
                    let record = slot.get_or_insert_with(StoredRecord::new);
                    let mut list = take_list(record, &bin)?;
                    match end {
                        ListEnd::Head => list.insert(0, value),
                        ListEnd::Tail => list.push(value),
                    }
                    let len = list.len() as i64;
                    record.bins.insert(bin, Value::List(list));
                    record.bins.insert(size_bin, Value::Int(len));
                    record.expires_at = self.procedure_deadline(record, fresh, policy, ttl);
                    Ok(ProcedureResult::Int(len))
                })
            }
            Procedure::ListPop {
                end,
                bin,
                count,
                ttl,
            } => self.mutate(key, |slot| {
                let Some(record) = slot.as_mut() else {
                    return Ok(ProcedureResult::Nil);
                };
                let mut list = take_list(record, &bin)?;
                let n = count.min(list.len());
                let popped: Vec<Value> = match end {
                    ListEnd::Head => list.drain(..n).collect(),
                    ListEnd::Tail => list.drain(list.len() - n..).rev().collect(),
                };
                let len = list.len() as i64;
                record.bins.insert(size_bin_name(&bin), Value::Int(len));
                record.bins.insert(bin, Value::List(list));
                record.expires_at = self.procedure_deadline(record, false, policy, ttl);
                Ok(ProcedureResult::List(popped))
            }),
            Procedure::ListRange { bin, start, stop } => {
                let range = self.lookup(key, |record| match record.bins.get(&bin) {
                    None => Ok(Vec::new()),
                    Some(Value::List(list)) => Ok(match normalize_range(list.len(), start, stop) {
                        Some((from, to)) => list[from..=to].to_vec(),
                        None => Vec::new(),
                    }),
                    Some(_) => Err(StoreError::BinType),
                });
                match range {
                    None => Ok(ProcedureResult::Nil),
                    Some(items) => Ok(ProcedureResult::List(items?)),
                }
            }
            Procedure::ListTrim { bin, start, stop } => self.mutate(key, |slot| {
                let Some(record) = slot.as_mut() else {
                    return Ok(ProcedureResult::Nil);
                };
                let list = take_list(record, &bin)?;
                let kept = match normalize_range(list.len(), start, stop) {
                    Some((from, to)) => list[from..=to].to_vec(),
                    None => Vec::new(),
                };
                record
                    .bins
                    .insert(size_bin_name(&bin), Value::Int(kept.len() as i64));
                record.bins.insert(bin, Value::List(kept));
                Ok(ProcedureResult::Status("OK".to_string()))
            }),
            other => Err(StoreError::Procedure {
                name: other.name(),
                reason: "not a list procedure".to_string(),
            }),
        }
    }
}

fn check_bin_name(name: &str) -> StoreResult<()> {
    if name.len() > MAX_BIN_NAME_LEN {
        return Err(StoreError::BinNameTooLong(name.to_string()));
    }
    Ok(())
}

fn size_bin_name(bin: &str) -> String {
    format!("{}_size", bin)
}

/// Takes the list out of `bin`, treating a missing bin as an empty list.
fn take_list(record: &mut StoredRecord, bin: &str) -> StoreResult<Vec<Value>> {
    match record.bins.remove(bin) {
        None => Ok(Vec::new()),
        Some(Value::List(list)) => Ok(list),
        Some(other) => {
            record.bins.insert(bin.to_string(), other);
            Err(StoreError::BinType)
        }
    }
}

/// Resolves inclusive, possibly negative list indices against `len`.
fn normalize_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = (if start < 0 { len + start } else { start }).max(0);
    let stop = (if stop < 0 { len + stop } else { stop }).min(len - 1);

    if start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

impl RecordStore for MemoryStore {
    fn get(&self, _policy: &ReadPolicy, key: &Key, bins: &[&str]) -> StoreResult<Option<Record>> {
        Ok(self.lookup(key, |record| record.to_record(bins)))
    }

    fn get_header(&self, _policy: &ReadPolicy, key: &Key) -> StoreResult<Option<RecordHeader>> {
        Ok(self.lookup(key, StoredRecord::header))
    }

    fn exists(&self, _policy: &ReadPolicy, key: &Key) -> StoreResult<bool> {
        Ok(self.lookup(key, |_| ()).is_some())
    }

    fn put(&self, policy: &WritePolicy, key: &Key, bins: Vec<Bin>) -> StoreResult<()> {
        for bin in &bins {
            check_bin_name(&bin.name)?;
        }
        self.mutate(key, |slot| {
            if policy.record_exists == RecordExistsAction::CreateOnly && slot.is_some() {
                return Err(StoreError::KeyExists);
            }
            let record = slot.get_or_insert_with(StoredRecord::new);
            for bin in bins {
                record.bins.insert(bin.name, bin.value);
            }
            record.expires_at = self.deadline(policy.expiration);
            Ok(())
        })
    }

    fn delete(&self, _policy: &WritePolicy, key: &Key) -> StoreResult<bool> {
        Ok(self
            .records
            .remove(key)
            .is_some_and(|(_, record)| !record.is_expired()))
    }

    fn touch(&self, policy: &WritePolicy, key: &Key) -> StoreResult<()> {
        self.mutate(key, |slot| {
            let record = slot.as_mut().ok_or(StoreError::KeyNotFound)?;
            record.expires_at = self.deadline(policy.expiration);
            Ok(())
        })
    }

    fn operate(
        &self,
        policy: &WritePolicy,
        key: &Key,
        ops: &[Operation],
    ) -> StoreResult<Option<Record>> {
        let wanted: Vec<&str> = ops
            .iter()
            .filter_map(|op| match op {
                Operation::Get(name) => Some(name.as_str()),
                _ => None,
            })
            .collect();

        if !ops.iter().any(Operation::is_write) {
            return self.get(&ReadPolicy::default(), key, &wanted);
        }

        for op in ops {
            if let Operation::Put(bin) | Operation::Add(bin) = op {
                check_bin_name(&bin.name)?;
            }
        }

        self.mutate(key, |slot| {
            let record = slot.get_or_insert_with(StoredRecord::new);
            for op in ops {
                match op {
                    Operation::Put(bin) => {
                        record.bins.insert(bin.name.clone(), bin.value.clone());
                    }
                    Operation::Add(bin) => {
                        let delta = bin.value.as_int().ok_or(StoreError::BinType)?;
                        let current = match record.bins.get(&bin.name) {
                            None => 0,
                            Some(Value::Int(n)) => *n,
                            Some(_) => return Err(StoreError::BinType),
                        };
                        record
                            .bins
                            .insert(bin.name.clone(), Value::Int(current.wrapping_add(delta)));
                    }
                    Operation::Get(_) => {}
                }
            }
            record.expires_at = self.deadline(policy.expiration);

            if wanted.is_empty() {
                Ok(None)
            } else {
                // Generation is bumped on commit
                let mut out = record.to_record(&wanted);
                out.generation = record.generation.wrapping_add(1);
                Ok(Some(out))
            }
        })
    }

    fn execute(
        &self,
        policy: &WritePolicy,
        key: &Key,
        procedure: Procedure,
    ) -> StoreResult<ProcedureResult> {
        match procedure {
            Procedure::HashSet { .. }
            | Procedure::HashDelete { .. }
            | Procedure::HashSetMany { .. }
            | Procedure::HashGetAll => self.exec_hash(policy, key, procedure),
            _ => self.exec_list(policy, key, procedure),
        }
    }

    fn query_equal(
        &self,
        namespace: &str,
        set: &str,
        bin: &str,
        value: &Value,
    ) -> StoreResult<RecordStream> {
        let rows: Vec<StoreResult<Record>> = self
            .records
            .iter()
            .filter(|entry| {
                let (key, record) = entry.pair();
                key.namespace() == namespace
                    && key.set() == set
                    && !record.is_expired()
                    && record.bins.get(bin) == Some(value)
            })
            .map(|entry| Ok(entry.value().to_record(&[])))
            .collect();

        debug!(namespace, set, bin, rows = rows.len(), "Equality scan");
        Ok(Box::new(rows.into_iter()))
    }

    fn execute_background(
        &self,
        namespace: &str,
        set: &str,
        job: BackgroundJob,
    ) -> StoreResult<JobHandle> {
        let (completion, handle) = JobHandle::pair();
        let records = Arc::clone(&self.records);
        let namespace = namespace.to_string();
        let set = set.to_string();

        std::thread::Builder::new()
            .name("store-job".to_string())
            .spawn(move || match job {
                BackgroundJob::DeleteAll => {
                    let before = records.len();
                    records.retain(|key, _| key.namespace() != namespace || key.set() != set);
                    let removed = before.saturating_sub(records.len());
                    debug!(%namespace, %set, removed, "Background delete finished");
                    completion.complete(Ok(()));
                }
            })
            .map_err(|e| StoreError::Job(e.to_string()))?;

        Ok(handle)
    }
}
