//! Software time base.
//!
//! The periodic timer interrupt calls [`tick_isr`] every 100 ms; everything
//! else reads the atomic counters it maintains. This keeps all mutation of
//! time state in one place and makes the getters safe from any context.

use core::sync::atomic::{AtomicU32, Ordering};

/// 100 ms scheduling quantum of the main loop, in milliseconds
pub const TICK_MS: u32 = 100;

static TICKS: AtomicU32 = AtomicU32::new(0);
static UPTIME_SECONDS: AtomicU32 = AtomicU32::new(0);

/// Called from the timer interrupt only
pub fn tick_isr() {
    let t = TICKS.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
    if t % (1000 / TICK_MS) == 0 {
        UPTIME_SECONDS.fetch_add(1, Ordering::Relaxed);
    }
}

/// Monotonic 100 ms ticks since boot
pub fn get_ticks() -> u32 {
    TICKS.load(Ordering::Relaxed)
}

pub fn get_time_ms() -> u32 {
    get_ticks().wrapping_mul(TICK_MS)
}

pub fn get_uptime_seconds() -> u32 {
    UPTIME_SECONDS.load(Ordering::Relaxed)
}

/// Busy-wait. On the target this spins on the tick counter; host builds
/// (unit tests) return immediately since nothing advances the counter.
#[cfg(target_os = "none")]
pub fn delay_ms(ms: u32) {
    let start = get_time_ms();
    while get_time_ms().wrapping_sub(start) < ms {
        core::hint::spin_loop();
    }
}

#[cfg(not(target_os = "none"))]
pub fn delay_ms(_ms: u32) {}

/// Calibrated spin delay for sub-tick waits (1-Wire bit slots, I2C glitches)
pub fn delay_us(us: u32) {
    // ~10 cycles per iteration at the soft-core clock; coarse on purpose
    for _ in 0..(us.saturating_mul(10)) {
        core::hint::spin_loop();
    }
}
