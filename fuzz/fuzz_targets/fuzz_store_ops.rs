#![no_main]
use libfuzzer_sys::{fuzz_target, arbitrary::{Arbitrary, Unstructured}};
use std::collections::HashSet;
use tierfs::{FileMeta, StoreConfig, TierStore};

#[derive(Debug, Arbitrary)]
enum StoreOp {
    Extend { file: u8, len: u16 },
    Shrink { file: u8, len: u16 },
    Write { file: u8, pos: u16, data: Vec<u8> },
    Read { file: u8, pos: u16, len: u8 },
}

// Random extend/shrink/read/write against a small two-tier store
fuzz_target!(|input: &[u8]| {
    let mut u = Unstructured::new(input);

    let ops: Vec<StoreOp> = match u.arbitrary() {
        Ok(ops) => ops,
        Err(_) => return,
    };

    let spill = std::env::temp_dir().join(format!("fuzz-store-{}.spill", std::process::id()));
    let config = StoreConfig::memory_only(4, 8).with_spillover(&spill, 8);
    let store = match TierStore::open(config) {
        Ok(s) => s,
        Err(_) => return,
    };

    let mut files: Vec<FileMeta> = (0..4).map(|_| store.new_file()).collect();

    for op in ops.iter().take(64) {
        match op {
            StoreOp::Extend { file, len } => {
                let idx = *file as usize % files.len();
                let _ = store.extend(idx as u32, &mut files[idx], *len as u64);
            }
            StoreOp::Shrink { file, len } => {
                let idx = *file as usize % files.len();
                store.shrink(idx as u32, &mut files[idx], *len as u64).unwrap();
            }
            StoreOp::Write { file, pos, data } => {
                let idx = *file as usize % files.len();
                let _ = store.write(idx as u32, &files[idx], *pos as u64, data);
            }
            StoreOp::Read { file, pos, len } => {
                let idx = *file as usize % files.len();
                let mut out = vec![0u8; *len as usize];
                let _ = store.read(idx as u32, &files[idx], *pos as u64, &mut out);
            }
        }

        // No physical chunk may belong to two files
        let mut seen = HashSet::new();
        for meta in &files {
            for d in meta.chunks() {
                assert!(seen.insert(d.physical_id));
            }
        }
        let stats = store.stats();
        assert_eq!(stats.memory_used() + stats.spill_used(), seen.len());
    }

    std::fs::remove_file(&spill).ok();
});
