//! Exercises the concurrency contract of spec §5: writes are externally
//! serialized by the caller, reads may run concurrently with each other,
//! and a `put` strictly-before another `put` on the same key is always
//! visible to a subsequent `get`.

use std::sync::Arc;
use std::thread;

use logbase::{Logbase, Value};
use tempfile::tempdir;

#[test]
fn serialized_puts_are_visible_in_order() {
    let dir = tempdir().unwrap();
    let logbase = Arc::new(Logbase::open(dir.path()).unwrap());

    for i in 0..50u32 {
        logbase.put(Value::String("counter".into()), Value::U32(i)).unwrap();
    }

    let (bytes, _) = logbase.get(&Value::String("counter".into())).unwrap();
    assert_eq!(u32::from_be_bytes(bytes.try_into().unwrap()), 49);
}

#[test]
fn concurrent_reads_of_distinct_keys_all_succeed() {
    let dir = tempdir().unwrap();
    let logbase = Arc::new(Logbase::open(dir.path()).unwrap());

    for i in 0..20u32 {
        logbase
            .put(Value::String(format!("k{i}")), Value::String(format!("v{i}")))
            .unwrap();
    }

    let handles: Vec<_> = (0..20u32)
        .map(|i| {
            let logbase = Arc::clone(&logbase);
            thread::spawn(move || {
                let (bytes, _) = logbase.get(&Value::String(format!("k{i}"))).unwrap();
                assert_eq!(String::from_utf8(bytes).unwrap(), format!("v{i}"));
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}
