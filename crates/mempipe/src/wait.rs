//! The pause primitive shared by both protocol poll loops.

use once_cell::sync::Lazy;

static MULTICORE: Lazy<bool> =
    Lazy::new(|| std::thread::available_parallelism().is_ok_and(|n| n.get() > 1));

const SPIN_CYCLES: u32 = 100;

/// Very short, non-blocking pause for tight polling loops.
///
/// On SMP hosts this spins ~100 pause cycles, keeping the thread hot
/// while easing bus traffic. On a single core a spin only starves the
/// peer, so the policy flips to a cooperative yield. The branch is
/// evaluated once, at first use.
#[inline]
pub fn wait() {
    if *MULTICORE {
        for _ in 0..SPIN_CYCLES {
            std::hint::spin_loop();
        }
    } else {
        std::thread::yield_now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_returns() {
        for _ in 0..1000 {
            wait();
        }
    }
}
