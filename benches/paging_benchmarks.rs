//! Paging performance benchmarks using Criterion
//!
//! These benchmarks measure the hot paths of the paging core:
//! - Fault resolution for a pending anonymous page
//! - Steady-state eviction with a working set larger than the pool
//! - Lazy mapping setup and teardown

use core::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};

use nos_demand_paging::testing::{CountingFramePool, RamDisk, RamFile, SoftTranslationTable};
use nos_demand_paging::{
    AddressSpace, PageFlags, TargetKind, VirtAddr, Vm, VmFile, PAGE_SIZE, SECTORS_PER_PAGE,
    USER_BASE,
};

fn make_vm(frames: usize, swap_pages: usize) -> Vm {
    let pool = Arc::new(CountingFramePool::new(frames));
    let disk = Arc::new(RamDisk::new(swap_pages * SECTORS_PER_PAGE));
    Vm::new(pool, disk)
}

fn make_space() -> AddressSpace {
    AddressSpace::new(Arc::new(SoftTranslationTable::new()))
}

fn user_page(n: usize) -> VirtAddr {
    VirtAddr::new(USER_BASE + n * PAGE_SIZE)
}

/// Benchmark first-touch fault resolution of an anonymous page
fn bench_fault_resolution(c: &mut Criterion) {
    c.bench_function("fault_resolve_anon_page", |b| {
        let vm = make_vm(64, 64);
        b.iter(|| {
            let space = make_space();
            vm.alloc_page(&space, TargetKind::Anon, user_page(0), PageFlags::WRITABLE);
            let claimed = vm.claim_page(&space, user_page(0)).unwrap();
            black_box(claimed);
            vm.destroy_space(&space).unwrap();
        })
    });
}

/// Benchmark eviction under memory pressure: 4 frames, 16-page set
fn bench_eviction_cycling(c: &mut Criterion) {
    c.bench_function("eviction_cycle_16_pages_4_frames", |b| {
        let vm = make_vm(4, 32);
        let space = make_space();
        for n in 0..16 {
            vm.alloc_page(&space, TargetKind::Anon, user_page(n), PageFlags::WRITABLE);
        }
        b.iter(|| {
            for n in 0..16 {
                let claimed = vm.claim_page(&space, user_page(n)).unwrap();
                black_box(claimed);
            }
        })
    });
}

/// Benchmark swap traffic: two pages ping-ponging through one frame
fn bench_swap_round_trip(c: &mut Criterion) {
    c.bench_function("swap_round_trip_one_frame", |b| {
        let vm = make_vm(1, 8);
        let space = make_space();
        vm.alloc_page(&space, TargetKind::Anon, user_page(0), PageFlags::WRITABLE);
        vm.alloc_page(&space, TargetKind::Anon, user_page(1), PageFlags::WRITABLE);
        b.iter(|| {
            let a = vm.claim_page(&space, user_page(0)).unwrap();
            let b2 = vm.claim_page(&space, user_page(1)).unwrap();
            black_box((a, b2));
        })
    });
}

/// Benchmark lazy mapping setup and teardown of a 16-page file window
fn bench_mmap_setup_teardown(c: &mut Criterion) {
    c.bench_function("mmap_munmap_16_pages", |b| {
        let vm = make_vm(16, 16);
        let file: Arc<dyn VmFile> = Arc::new(RamFile::new(vec![0x5A; 16 * PAGE_SIZE]));
        b.iter(|| {
            let space = make_space();
            let addr = vm
                .mmap(&space, user_page(0), 16 * PAGE_SIZE, true, &file, 0)
                .unwrap();
            black_box(addr);
            vm.munmap(&space, user_page(0)).unwrap();
        })
    });
}

criterion_group!(
    paging_benchmarks,
    bench_fault_resolution,
    bench_eviction_cycling,
    bench_swap_round_trip,
    bench_mmap_setup_teardown
);

criterion_main!(paging_benchmarks);
