//! Stress tests for kvorm.
//!
//! These tests verify behavior under heavy load and concurrent access.

use crate::fixtures::scenarios;
use kvorm_codec::Value;
use kvorm_core::Database;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    #[allow(clippy::cast_precision_loss)]
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of operations to perform.
    pub operations: usize,
    /// Number of concurrent threads (for concurrent tests).
    pub threads: usize,
    /// Number of distinct entities.
    pub entity_count: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 10_000,
            threads: 4,
            entity_count: 1_000,
        }
    }
}

/// Run a sequential create stress test over the `Person` scenario type.
///
/// The database must not have `Person` registered with another shape.
pub fn stress_sequential_creates(db: &Database, config: &StressConfig) -> StressTestResult {
    let Ok(people) = scenarios::register_family(db) else {
        return StressTestResult::new(0, config.operations, Duration::ZERO);
    };

    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        match people.create([("name", Value::from(format!("stress_{i}")))]) {
            Ok(_) => successful += 1,
            Err(_) => failed += 1,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Run a mixed write/link/delete stress test.
pub fn stress_mixed_operations(db: &Database, config: &StressConfig) -> StressTestResult {
    let Ok(people) = scenarios::register_family(db) else {
        return StressTestResult::new(0, config.operations, Duration::ZERO);
    };
    for i in 0..config.entity_count {
        let _ = people.create([("name", Value::from(format!("mixed_{i}")))]);
    }

    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        let id = (i % config.entity_count.max(1) + 1).to_string();
        let result = match people.find(&id) {
            Ok(Some(person)) => match i % 3 {
                // Write (33%)
                0 => person.set("age", Value::from(i64::try_from(i % 120).unwrap_or(0))),
                // Link (33%)
                1 => match people.find(&(i % 7 + 1).to_string()) {
                    Ok(Some(mother)) if mother != person => mother.add_ref("children", &person),
                    Ok(_) => Ok(()),
                    Err(e) => Err(e),
                },
                // Delete (33%)
                _ => person.delete(),
            },
            Ok(None) => Ok(()),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => successful += 1,
            Err(_) => failed += 1,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Run a concurrent read stress test.
///
/// Readers on every thread load and read entities created up front.
pub fn stress_concurrent_reads(db: Arc<Database>, config: &StressConfig) -> StressTestResult {
    match scenarios::register_family(&db) {
        Ok(people) => {
            for i in 0..config.entity_count {
                let _ = people.create([("name", Value::from(format!("reader_{i}")))]);
            }
        }
        Err(_) => return StressTestResult::new(0, config.operations, Duration::ZERO),
    }

    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let ops_per_thread = config.operations / config.threads.max(1);

    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let db = Arc::clone(&db);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let entity_count = config.entity_count.max(1);

            thread::spawn(move || {
                let Ok(people) = db.entity_type("Person") else {
                    failed.fetch_add(ops_per_thread, Ordering::Relaxed);
                    return;
                };
                for i in 0..ops_per_thread {
                    let id = ((t * ops_per_thread + i) % entity_count + 1).to_string();
                    match people.load(&id).and_then(|p| p.get("name")) {
                        Ok(_) => {
                            successful.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(_) => {
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Run a concurrent write stress test.
///
/// Each thread acts as its own caller and writes only its own entities, so
/// every write must succeed and the audit log must hold one record per
/// write.
pub fn stress_concurrent_writes(db: Arc<Database>, config: &StressConfig) -> StressTestResult {
    let threads = config.threads.max(1);
    match scenarios::register_family(&db) {
        Ok(people) => {
            for t in 0..threads {
                let _ = people.create([("name", Value::from(format!("writer_{t}")))]);
            }
        }
        Err(_) => return StressTestResult::new(0, config.operations, Duration::ZERO),
    }

    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let ops_per_thread = config.operations / threads;

    let start = Instant::now();

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let db = Arc::clone(&db);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);

            thread::spawn(move || {
                let _caller = db.as_user(format!("writer_{t}"));
                let person = db
                    .entity_type("Person")
                    .and_then(|people| people.load(&(t + 1).to_string()));
                let Ok(person) = person else {
                    failed.fetch_add(ops_per_thread, Ordering::Relaxed);
                    return;
                };
                for i in 0..ops_per_thread {
                    let age = i64::try_from(i % 100 + 1).unwrap_or(1);
                    match person.set("age", Value::from(age)) {
                        Ok(()) => {
                            successful.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(_) => {
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}
