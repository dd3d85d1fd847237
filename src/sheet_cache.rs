//! Sheet cache
//!
//! Parsed sheets keyed by (file path, sheet name), bounded by a TTL and a
//! byte budget with least-recently-used eviction. Datasets are handed out
//! as `Arc<DataFrame>` and never mutated in place.

use crate::config::SheetCacheConfig;
use crate::errors::{Result, SandboxError};
use crate::frame::{Cell, DataFrame};
use calamine::{open_workbook_auto, Data, Reader};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

const WORKBOOK_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xlsb", "xls", "ods"];

/// Backing store for sheets
pub trait SheetLoader: Send + Sync {
    /// Read one sheet; an empty `sheet_name` selects the first sheet
    fn load_sheet(&self, path: &Path, sheet_name: &str) -> Result<DataFrame>;
}

/// Reads spreadsheets with `calamine` and delimited text with `csv`
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkbookLoader;

impl SheetLoader for WorkbookLoader {
    fn load_sheet(&self, path: &Path, sheet_name: &str) -> Result<DataFrame> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match extension.as_str() {
            "csv" => read_delimited(path, b','),
            "tsv" => read_delimited(path, b'\t'),
            ext if WORKBOOK_EXTENSIONS.contains(&ext) => read_workbook(path, sheet_name),
            _ => Err(SandboxError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

fn read_workbook(path: &Path, sheet_name: &str) -> Result<DataFrame> {
    let mut workbook = open_workbook_auto(path)?;
    let names = workbook.sheet_names();
    let target = if sheet_name.is_empty() {
        names.first().cloned()
    } else {
        names.iter().find(|n| n.as_str() == sheet_name).cloned()
    };
    let Some(target) = target else {
        return Err(SandboxError::SheetNotFound {
            path: path.display().to_string(),
            sheet: sheet_name.to_string(),
        });
    };
    let range = workbook.worksheet_range(&target)?;
    let mut rows = range.rows();
    let header: Vec<String> = rows
        .next()
        .map(|row| row.iter().map(|c| header_text(c)).collect())
        .unwrap_or_default();
    let body: Vec<Vec<Cell>> = rows
        .map(|row| row.iter().map(workbook_cell).collect())
        .collect();
    build_frame(header, body)
}

fn header_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::Float(x) if x.fract() == 0.0 && x.is_finite() => format!("{}", *x as i64),
        other => other.to_string(),
    }
}

fn workbook_cell(cell: &Data) -> Cell {
    match cell {
        Data::Empty | Data::Error(_) => Cell::Null,
        Data::Int(i) => Cell::Int(*i),
        // Workbooks store whole numbers as floats
        Data::Float(x) if x.fract() == 0.0 && x.abs() < 9.0e15 => Cell::Int(*x as i64),
        Data::Float(x) => Cell::Float(*x),
        Data::Bool(b) => Cell::Bool(*b),
        Data::String(s) if s.is_empty() => Cell::Null,
        Data::String(s) => Cell::Str(s.clone()),
        Data::DateTime(dt) => Cell::Float(dt.as_f64()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Cell::Str(s.clone()),
    }
}

fn read_delimited(path: &Path, delimiter: u8) -> Result<DataFrame> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_path(path)?;
    let header: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let mut body = Vec::new();
    for record in reader.records() {
        body.push(record?.iter().map(text_cell).collect());
    }
    build_frame(header, body)
}

/// Type a raw text field
pub fn text_cell(raw: &str) -> Cell {
    let s = raw.trim();
    if s.is_empty() {
        return Cell::Null;
    }
    if let Ok(i) = s.parse::<i64>() {
        return Cell::Int(i);
    }
    if let Ok(x) = s.parse::<f64>() {
        return Cell::Float(x);
    }
    match s.to_ascii_lowercase().as_str() {
        "true" => Cell::Bool(true),
        "false" => Cell::Bool(false),
        _ => Cell::Str(raw.to_string()),
    }
}

/// Assemble columns, naming blank headers `Unnamed: i` and suffixing duplicates
fn build_frame(header: Vec<String>, body: Vec<Vec<Cell>>) -> Result<DataFrame> {
    let width = body
        .iter()
        .map(Vec::len)
        .chain(std::iter::once(header.len()))
        .max()
        .unwrap_or(0);
    let mut seen = HashSet::new();
    let mut names = Vec::with_capacity(width);
    for i in 0..width {
        let base = match header.get(i).map(|h| h.trim()) {
            Some(h) if !h.is_empty() => h.to_string(),
            _ => format!("Unnamed: {}", i),
        };
        let mut name = base.clone();
        let mut n = 1;
        while !seen.insert(name.clone()) {
            name = format!("{}.{}", base, n);
            n += 1;
        }
        names.push(name);
    }
    let columns = names
        .into_iter()
        .enumerate()
        .map(|(i, name)| {
            let values = body
                .iter()
                .map(|row| row.get(i).cloned().unwrap_or(Cell::Null))
                .collect();
            (name, values)
        })
        .collect();
    DataFrame::new(columns).map_err(|e| SandboxError::Workbook(e.to_string()))
}

/// Cache key for a sheet
pub fn sheet_key(file_path: &str, sheet_name: &str) -> String {
    let canonical = serde_json::json!({ "file_path": file_path, "sheet_name": sheet_name });
    hex::encode(Sha256::digest(canonical.to_string().as_bytes()))
}

#[derive(Debug, Clone)]
struct SheetEntry {
    file_path: String,
    dataset: Arc<DataFrame>,
    created_at: Instant,
    last_access: Instant,
    access_count: u64,
    size_bytes: usize,
    recency: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetCacheStats {
    pub entry_count: usize,
    pub size_mb: f64,
    pub max_size_mb: f64,
    pub utilization_pct: f64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

pub struct SheetCache {
    config: SheetCacheConfig,
    loader: Box<dyn SheetLoader>,
    entries: HashMap<String, SheetEntry>,
    total_bytes: usize,
    clock: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl std::fmt::Debug for SheetCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SheetCache")
            .field("config", &self.config)
            .field("entries", &self.entries.len())
            .field("total_bytes", &self.total_bytes)
            .finish()
    }
}

impl SheetCache {
    pub fn new(config: SheetCacheConfig, loader: Box<dyn SheetLoader>) -> Self {
        tracing::info!(
            "[SHEET_CACHE] Initialized (ttl {}s, budget {:.1} MB)",
            config.ttl.as_secs(),
            config.max_size_mb
        );
        Self {
            config,
            loader,
            entries: HashMap::new(),
            total_bytes: 0,
            clock: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    pub fn with_workbook_loader(config: SheetCacheConfig) -> Self {
        Self::new(config, Box::new(WorkbookLoader))
    }

    pub fn config(&self) -> &SheetCacheConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn remove_key(&mut self, key: &str) -> Option<SheetEntry> {
        let entry = self.entries.remove(key)?;
        self.total_bytes -= entry.size_bytes;
        Some(entry)
    }

    /// Return the sheet, reading it through the loader on a miss
    pub fn load(&mut self, file_path: &str, sheet_name: &str, use_cache: bool) -> Result<Arc<DataFrame>> {
        if !use_cache {
            return Ok(Arc::new(self.loader.load_sheet(Path::new(file_path), sheet_name)?));
        }
        if let Some(dataset) = self.get(file_path, sheet_name) {
            return Ok(dataset);
        }
        let dataset = Arc::new(self.loader.load_sheet(Path::new(file_path), sheet_name)?);
        tracing::info!(
            "[SHEET_CACHE] Loaded {} [{}]: {} rows x {} columns",
            file_path,
            sheet_name,
            dataset.n_rows(),
            dataset.n_cols()
        );
        self.put(file_path, sheet_name, Arc::clone(&dataset));
        Ok(dataset)
    }

    pub fn get(&mut self, file_path: &str, sheet_name: &str) -> Option<Arc<DataFrame>> {
        let key = sheet_key(file_path, sheet_name);
        let now = Instant::now();
        let expired = match self.entries.get(&key) {
            None => {
                self.misses += 1;
                return None;
            }
            Some(entry) => now.duration_since(entry.created_at) > self.config.ttl,
        };
        if expired {
            self.remove_key(&key);
            self.misses += 1;
            tracing::debug!("[SHEET_CACHE] {} [{}] expired", file_path, sheet_name);
            return None;
        }
        let recency = self.tick();
        let entry = self.entries.get_mut(&key)?;
        entry.last_access = now;
        entry.access_count += 1;
        entry.recency = recency;
        self.hits += 1;
        Some(Arc::clone(&entry.dataset))
    }

    /// Cache a dataset; `false` when it alone exceeds the byte budget
    pub fn put(&mut self, file_path: &str, sheet_name: &str, dataset: Arc<DataFrame>) -> bool {
        let size_bytes = dataset.estimated_size();
        let budget = self.config.max_size_bytes();
        if size_bytes > budget {
            tracing::warn!(
                "[SHEET_CACHE] {} [{}] needs {} bytes, over the {} byte budget; not cached",
                file_path,
                sheet_name,
                size_bytes,
                budget
            );
            return false;
        }
        self.purge_expired();
        let key = sheet_key(file_path, sheet_name);
        self.remove_key(&key);
        while self.total_bytes + size_bytes > budget {
            let victim = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.recency)
                .map(|(k, _)| k.clone());
            let Some(victim) = victim else { break };
            if let Some(entry) = self.remove_key(&victim) {
                self.evictions += 1;
                tracing::info!(
                    "[SHEET_CACHE] Evicted {} ({} bytes, {} accesses, idle {}ms)",
                    entry.file_path,
                    entry.size_bytes,
                    entry.access_count,
                    entry.last_access.elapsed().as_millis()
                );
            }
        }
        let now = Instant::now();
        let recency = self.tick();
        self.entries.insert(
            key,
            SheetEntry {
                file_path: file_path.to_string(),
                dataset,
                created_at: now,
                last_access: now,
                access_count: 0,
                size_bytes,
                recency,
            },
        );
        self.total_bytes += size_bytes;
        true
    }

    pub fn purge_expired(&mut self) -> usize {
        let now = Instant::now();
        let ttl = self.config.ttl;
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| now.duration_since(e.created_at) > ttl)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.remove_key(key);
        }
        expired.len()
    }

    /// Drop every sheet read from `file_path`
    pub fn invalidate_file(&mut self, file_path: &str) -> usize {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.file_path == file_path)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &keys {
            self.remove_key(key);
        }
        if !keys.is_empty() {
            tracing::info!("[SHEET_CACHE] Invalidated {} sheets of {}", keys.len(), file_path);
        }
        keys.len()
    }

    pub fn clear(&mut self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        self.total_bytes = 0;
        tracing::info!("[SHEET_CACHE] Cleared {} sheets", removed);
        removed
    }

    pub fn stats(&self) -> SheetCacheStats {
        let size_mb = self.total_bytes as f64 / (1024.0 * 1024.0);
        let utilization_pct = if self.config.max_size_mb > 0.0 {
            size_mb * 100.0 / self.config.max_size_mb
        } else {
            0.0
        };
        SheetCacheStats {
            entry_count: self.entries.len(),
            size_mb,
            max_size_mb: self.config.max_size_mb,
            utilization_pct,
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Serves a fixed frame and counts reads
    struct CountingLoader {
        reads: Arc<AtomicUsize>,
        rows: usize,
    }

    impl SheetLoader for CountingLoader {
        fn load_sheet(&self, _path: &Path, _sheet_name: &str) -> Result<DataFrame> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(frame(self.rows))
        }
    }

    fn frame(rows: usize) -> DataFrame {
        let values = (0..rows as i64).map(Cell::Int).collect();
        DataFrame::new(vec![("n".to_string(), values)]).unwrap()
    }

    fn cache(max_size_mb: f64, ttl: Duration) -> (SheetCache, Arc<AtomicUsize>) {
        let reads = Arc::new(AtomicUsize::new(0));
        let loader = CountingLoader {
            reads: Arc::clone(&reads),
            rows: 10,
        };
        let config = SheetCacheConfig { ttl, max_size_mb };
        (SheetCache::new(config, Box::new(loader)), reads)
    }

    #[test]
    fn test_load_reads_once() {
        let (mut cache, reads) = cache(1.0, Duration::from_secs(60));
        let first = cache.load("a.csv", "", true).unwrap();
        let second = cache.load("a.csv", "", true).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(reads.load(Ordering::SeqCst), 1);

        cache.load("a.csv", "", false).unwrap();
        assert_eq!(reads.load(Ordering::SeqCst), 2);
        let stats = cache.stats();
        assert_eq!(stats.entry_count, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_expired_sheet_is_reloaded() {
        let (mut cache, reads) = cache(1.0, Duration::from_millis(20));
        cache.load("a.csv", "", true).unwrap();
        std::thread::sleep(Duration::from_millis(40));
        assert!(cache.get("a.csv", "").is_none());
        assert!(cache.is_empty());
        cache.load("a.csv", "", true).unwrap();
        assert_eq!(reads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_oversized_dataset_is_not_cached() {
        let size = frame(10).estimated_size();
        let budget_mb = (size as f64 - 1.0) / (1024.0 * 1024.0);
        let (mut cache, _) = cache(budget_mb, Duration::from_secs(60));
        assert!(!cache.put("big.csv", "", Arc::new(frame(10))));
        assert!(cache.is_empty());
        assert_eq!(cache.total_bytes(), 0);
    }

    #[test]
    fn test_lru_eviction_stays_within_budget() {
        let size = frame(10).estimated_size();
        let budget_mb = (size * 5 / 2) as f64 / (1024.0 * 1024.0);
        let (mut cache, _) = cache(budget_mb, Duration::from_secs(60));
        assert!(cache.put("a.csv", "", Arc::new(frame(10))));
        assert!(cache.put("b.csv", "", Arc::new(frame(10))));
        assert!(cache.get("a.csv", "").is_some());

        assert!(cache.put("c.csv", "", Arc::new(frame(10))));
        assert_eq!(cache.len(), 2);
        assert!(cache.total_bytes() <= cache.config().max_size_bytes());
        assert!(cache.get("b.csv", "").is_none());
        assert!(cache.get("a.csv", "").is_some());
        assert!(cache.get("c.csv", "").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_replacing_a_sheet_keeps_size_accurate() {
        let (mut cache, _) = cache(1.0, Duration::from_secs(60));
        cache.put("a.csv", "", Arc::new(frame(10)));
        cache.put("a.csv", "", Arc::new(frame(3)));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.total_bytes(), frame(3).estimated_size());
    }

    #[test]
    fn test_invalidate_file_and_clear() {
        let (mut cache, _) = cache(1.0, Duration::from_secs(60));
        cache.put("a.xlsx", "One", Arc::new(frame(2)));
        cache.put("a.xlsx", "Two", Arc::new(frame(2)));
        cache.put("b.csv", "", Arc::new(frame(2)));
        assert_eq!(cache.invalidate_file("a.xlsx"), 2);
        assert_eq!(cache.clear(), 1);
        assert_eq!(cache.total_bytes(), 0);
    }

    #[test]
    fn test_sheet_key_distinguishes_sheets() {
        assert_ne!(sheet_key("a.xlsx", "One"), sheet_key("a.xlsx", "Two"));
        assert_eq!(sheet_key("a.xlsx", "One"), sheet_key("a.xlsx", "One"));
    }

    #[test]
    fn test_text_cell_typing() {
        assert_eq!(text_cell("42"), Cell::Int(42));
        assert_eq!(text_cell("2.5"), Cell::Float(2.5));
        assert_eq!(text_cell("TRUE"), Cell::Bool(true));
        assert_eq!(text_cell("  "), Cell::Null);
        assert_eq!(text_cell("West"), Cell::Str("West".to_string()));
    }

    #[test]
    fn test_workbook_loader_reads_csv() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "Region,Sales,,Sales").unwrap();
        writeln!(file, "West,100,x,1.5").unwrap();
        writeln!(file, "East,,y,2").unwrap();
        file.flush().unwrap();

        let df = WorkbookLoader.load_sheet(file.path(), "ignored").unwrap();
        assert_eq!(df.column_names(), vec!["Region", "Sales", "Unnamed: 2", "Sales.1"]);
        assert_eq!(df.column_values("Sales").unwrap(), vec![Cell::Float(100.0), Cell::Null]);
        assert_eq!(df.n_rows(), 2);
    }

    #[test]
    fn test_unknown_extension_is_rejected() {
        let err = WorkbookLoader
            .load_sheet(Path::new("notes.txt"), "")
            .unwrap_err();
        assert!(matches!(err, SandboxError::UnsupportedFormat(_)));
    }
}
