//! Scoped timing of planner stages and kernel calls.
//!
//! Everything here compiles to no-ops unless the `profiler` feature is enabled.

#[cfg(feature = "profiler")]
use std::cell::RefCell;
#[cfg(feature = "profiler")]
use std::collections::HashMap;
use std::fmt;
#[cfg(feature = "profiler")]
use std::sync::{Mutex, OnceLock, PoisonError};
#[cfg(feature = "profiler")]
use std::time::{Duration, Instant};

#[cfg(feature = "profiler")]
use serde::Serialize;

#[cfg_attr(not(feature = "profiler"), allow(dead_code))]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum ProfilerKey {
    Planner(&'static str),
    Kernel(&'static str),
}

#[cfg(feature = "profiler")]
#[derive(Default, Clone)]
struct Stat {
    calls: u64,
    exclusive_ns: u128,
    inclusive_ns: u128,
}

#[cfg(feature = "profiler")]
struct Profiler {
    stats: Mutex<HashMap<ProfilerKey, Stat>>,
}

#[cfg(feature = "profiler")]
impl Profiler {
    fn instance() -> &'static Self {
        static INSTANCE: OnceLock<Profiler> = OnceLock::new();
        INSTANCE.get_or_init(|| Profiler {
            stats: Mutex::new(HashMap::new()),
        })
    }

    fn record(&self, key: ProfilerKey, exclusive: Duration, inclusive: Duration) {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = stats.entry(key).or_default();
        entry.calls = entry.calls.saturating_add(1);
        entry.exclusive_ns = entry.exclusive_ns.saturating_add(exclusive.as_nanos());
        entry.inclusive_ns = entry.inclusive_ns.saturating_add(inclusive.as_nanos());
    }

    fn reset(&self) {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn take_stats(&self) -> HashMap<ProfilerKey, Stat> {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *stats)
    }
}

#[cfg(feature = "profiler")]
struct GuardFrame {
    key: ProfilerKey,
    start: Instant,
    child_time: Duration,
}

#[cfg(feature = "profiler")]
thread_local! {
    static ACTIVE_GUARDS: RefCell<Vec<GuardFrame>> = const { RefCell::new(Vec::new()) };
}

/// Records the enclosing scope's wall time when dropped.
///
/// Time spent in nested scopes is subtracted from the parent's exclusive time.
pub struct ScopeGuard {
    #[cfg(feature = "profiler")]
    key: ProfilerKey,
}

impl ScopeGuard {
    #[inline(always)]
    fn new(key: ProfilerKey) -> Self {
        #[cfg(feature = "profiler")]
        {
            ACTIVE_GUARDS.with(|stack| {
                stack.borrow_mut().push(GuardFrame {
                    key,
                    start: Instant::now(),
                    child_time: Duration::ZERO,
                });
            });
            ScopeGuard { key }
        }
        #[cfg(not(feature = "profiler"))]
        {
            let _ = key;
            ScopeGuard {}
        }
    }
}

#[cfg(feature = "profiler")]
impl Drop for ScopeGuard {
    fn drop(&mut self) {
        ACTIVE_GUARDS.with(|stack| {
            let mut stack = stack.borrow_mut();
            let Some(frame) = stack.pop() else {
                return;
            };
            debug_assert!(frame.key == self.key, "scope guard stack corrupted");
            let elapsed = frame.start.elapsed();
            let exclusive = elapsed.saturating_sub(frame.child_time);
            Profiler::instance().record(frame.key, exclusive, elapsed);
            if let Some(parent) = stack.last_mut() {
                parent.child_time = parent.child_time.saturating_add(elapsed);
            }
        });
    }
}

/// Times a planner stage (normalization through dispatch).
#[inline(always)]
pub fn planner_scope(name: &'static str) -> ScopeGuard {
    ScopeGuard::new(ProfilerKey::Planner(name))
}

/// Times one kernel invocation, keyed by backend name.
#[inline(always)]
pub fn kernel_scope(name: &'static str) -> ScopeGuard {
    ScopeGuard::new(ProfilerKey::Kernel(name))
}

#[cfg(feature = "profiler")]
#[derive(Debug, Clone, Serialize)]
pub struct TableRow {
    pub name: String,
    pub calls: u64,
    pub per_ms: f64,
    pub excl_ms: f64,
    pub incl_ms: f64,
    pub percent: f64,
}

#[cfg(not(feature = "profiler"))]
#[derive(Debug, Clone, Default)]
pub struct TableRow {
    _private: (),
}

#[cfg(feature = "profiler")]
#[derive(Debug, Default, Clone, Serialize)]
pub struct ProfilerReport {
    pub planner: Vec<TableRow>,
    pub kernels: Vec<TableRow>,
}

#[cfg(not(feature = "profiler"))]
#[derive(Debug, Default, Clone)]
pub struct ProfilerReport {
    _private: (),
}

#[cfg(feature = "profiler")]
fn summarise(rows: Vec<(&'static str, Stat)>, total_excl_ns: u128) -> Vec<TableRow> {
    let mut table: Vec<TableRow> = rows
        .into_iter()
        .map(|(name, stat)| {
            let excl_ms = stat.exclusive_ns as f64 / 1.0e6;
            TableRow {
                name: name.to_string(),
                calls: stat.calls,
                per_ms: if stat.calls == 0 {
                    0.0
                } else {
                    excl_ms / stat.calls as f64
                },
                excl_ms,
                incl_ms: stat.inclusive_ns as f64 / 1.0e6,
                percent: if total_excl_ns == 0 {
                    0.0
                } else {
                    100.0 * stat.exclusive_ns as f64 / total_excl_ns as f64
                },
            }
        })
        .collect();
    table.sort_by(|a, b| b.excl_ms.total_cmp(&a.excl_ms).then(a.name.cmp(&b.name)));
    table
}

/// Drains the collected statistics. Returns `None` when nothing was recorded.
#[cfg(feature = "profiler")]
pub fn take_report() -> Option<ProfilerReport> {
    let stats = Profiler::instance().take_stats();
    if stats.is_empty() {
        return None;
    }
    let total: u128 = stats.values().map(|stat| stat.exclusive_ns).sum();
    let mut planner = Vec::new();
    let mut kernels = Vec::new();
    for (key, stat) in stats {
        match key {
            ProfilerKey::Planner(name) => planner.push((name, stat)),
            ProfilerKey::Kernel(name) => kernels.push((name, stat)),
        }
    }
    Some(ProfilerReport {
        planner: summarise(planner, total),
        kernels: summarise(kernels, total),
    })
}

#[cfg(not(feature = "profiler"))]
pub fn take_report() -> Option<ProfilerReport> {
    None
}

#[cfg(feature = "profiler")]
pub fn take_report_json() -> Option<String> {
    let report = take_report()?;
    serde_json::to_string(&report).ok()
}

#[cfg(not(feature = "profiler"))]
pub fn take_report_json() -> Option<String> {
    None
}

#[cfg(feature = "profiler")]
pub fn reset() {
    Profiler::instance().reset();
}

#[cfg(not(feature = "profiler"))]
pub fn reset() {}

/// Writes the drained report as two aligned text tables.
#[cfg(feature = "profiler")]
pub fn write_tables<W: fmt::Write>(writer: &mut W) -> fmt::Result {
    let Some(report) = take_report() else {
        return Ok(());
    };
    for (title, rows) in [("planner", &report.planner), ("kernels", &report.kernels)] {
        if rows.is_empty() {
            continue;
        }
        writeln!(
            writer,
            "{title:<28} {:>8} {:>12} {:>12} {:>12} {:>7}",
            "calls", "ms/call", "self ms", "total ms", "%"
        )?;
        for row in rows {
            writeln!(
                writer,
                "{:<28} {:>8} {:>12.4} {:>12.4} {:>12.4} {:>7.2}",
                row.name, row.calls, row.per_ms, row.excl_ms, row.incl_ms, row.percent
            )?;
        }
    }
    Ok(())
}

#[cfg(not(feature = "profiler"))]
pub fn write_tables<W: fmt::Write>(_writer: &mut W) -> fmt::Result {
    Ok(())
}

#[cfg(all(test, feature = "profiler"))]
mod tests {
    use super::*;

    #[test]
    fn nested_scopes_split_exclusive_time() {
        reset();
        {
            let _outer = planner_scope("outer");
            let _inner = kernel_scope("inner");
            std::thread::sleep(Duration::from_millis(2));
        }
        let report = take_report().expect("scopes recorded");
        let outer = report
            .planner
            .iter()
            .find(|row| row.name == "outer")
            .expect("outer row");
        let inner = report
            .kernels
            .iter()
            .find(|row| row.name == "inner")
            .expect("inner row");
        assert_eq!(outer.calls, 1);
        assert_eq!(inner.calls, 1);
        assert!(outer.incl_ms >= inner.incl_ms);
        assert!(outer.excl_ms <= outer.incl_ms);
    }
}
