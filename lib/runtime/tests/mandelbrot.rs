// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Pool soak test: render a Mandelbrot tile row-by-row on the thread pool
//! and hash the pixels. The hash pins both the arithmetic and the complete,
//! non-overlapping coverage of the work distribution.

use std::sync::Arc;

use parking_lot::Mutex;

use slumber_runtime::prelude::*;
use slumber_runtime::logging;

const SIZE: usize = 2000;
const LEFT: f64 = -1.153;
const RIGHT: f64 = -1.154;
const TOP: f64 = 0.201;
const BOTTOM: f64 = 0.202;

fn pixel(x: f64, y: f64) -> u8 {
    let mut new_re = 0.0f64;
    let mut new_im = 0.0f64;
    let mut k: i32 = 0;
    while k < 255 {
        let old_re = new_re;
        let old_im = new_im;
        let re2 = old_re * old_re;
        let im2 = old_im * old_im;
        if re2 + im2 > 4.0 {
            k -= 1;
            break;
        }
        new_re = re2 - im2 + x;
        new_im = 2.0 * old_re * old_im + y;
        k += 1;
    }
    k as u8
}

fn fnv1a64(data: impl IntoIterator<Item = u8>) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in data {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100_0000_01b3);
    }
    hash
}

#[test]
fn pooled_mandelbrot_tile_hashes_exactly() {
    logging::init();
    let rows: Arc<Vec<Mutex<Vec<u8>>>> =
        Arc::new((0..SIZE).map(|_| Mutex::new(Vec::new())).collect());
    let finished = Checkpoint::new();
    {
        let pool = ThreadPool::new().final_stop(finished.alert()).start();
        for i in 0..SIZE {
            let rows = rows.clone();
            let submitted = pool.dispatch(move || {
                let y = TOP + (BOTTOM - TOP) * (i as f64 / SIZE as f64);
                let mut row = Vec::with_capacity(SIZE);
                for j in 0..SIZE {
                    let x = LEFT + (RIGHT - LEFT) * (j as f64 / SIZE as f64);
                    row.push(pixel(x, y));
                }
                *rows[i].lock() = row;
            });
            assert!(submitted);
        }
    }
    finished.wait();

    let hash = fnv1a64(rows.iter().flat_map(|row| row.lock().clone()));
    assert_eq!(hash, 10816640488088513931);
}
