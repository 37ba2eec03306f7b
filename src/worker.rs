//! Decoder and renderer worker threads.
//!
//! Both workers live for the engine's lifetime and run the same outer
//! shape: wait for `wake`, rearm `begin`/`end`, post `begin`, run the inner
//! loop until suspended or out of range, post `end`. The command surface
//! stops an inner loop by setting the worker's suspend flag and
//! interrupting the ring, then waits on `end`.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::state::{Shared, SharedDecoder, SharedRenderer};

/// How long the renderer backs off when the device reports busy.
const WRITE_RETRY_DELAY: Duration = Duration::from_millis(10);

pub(crate) fn decoder_loop(shared: Arc<Shared>) {
    loop {
        shared.decoder_latches.wake.wait();
        if shared.stop_decoder.load(Ordering::Acquire) {
            break;
        }

        shared.decoder_latches.begin.clear();
        shared.decoder_latches.end.clear();

        let decoder = shared.active_decoder.lock().unwrap().clone();
        shared.decoder_latches.begin.post();

        if let Some(decoder) = decoder.as_ref() {
            decode_cycle(&shared, decoder);
        }

        shared.decoder_latches.end.post();
    }
    tracing::debug!("decoder worker stopped");
}

fn decode_cycle(shared: &Shared, decoder: &SharedDecoder) {
    loop {
        if shared.decoder_index.load(Ordering::Acquire) >= shared.unit_end.load(Ordering::Acquire) {
            shared.suspend_decoder.store(true, Ordering::Release);
            break;
        }

        let Some(mut slot) = shared.ring.take_free() else {
            break;
        };
        if shared.suspend_decoder.load(Ordering::Acquire) {
            shared.ring.restore_free(slot);
            break;
        }

        let decoded = decoder.lock().unwrap().decode_unit(&mut slot.data);
        match decoded {
            Ok(unit) if unit.units > 0 => {
                slot.used = unit.bytes;
                slot.unit_count = unit.units;
            }
            Ok(_) => {
                // Source ran dry before the range did.
                shared.ring.restore_free(slot);
                shared.suspend_decoder.store(true, Ordering::Release);
                break;
            }
            Err(err) => {
                tracing::warn!("decode failed, stopping producer: {err:#}");
                shared.ring.restore_free(slot);
                shared.suspend_decoder.store(true, Ordering::Release);
                break;
            }
        }

        shared
            .decoder_index
            .fetch_add(slot.unit_count, Ordering::AcqRel);
        shared.ring.recycle_free(slot);
    }
}

pub(crate) fn renderer_loop(shared: Arc<Shared>) {
    loop {
        shared.renderer_latches.wake.wait();
        if shared.stop_renderer.load(Ordering::Acquire) {
            break;
        }

        shared.renderer_latches.begin.clear();
        shared.renderer_latches.end.clear();

        let renderer = shared.active_renderer.lock().unwrap().clone();
        shared.renderer_latches.begin.post();

        let finished = match renderer.as_ref() {
            Some(renderer) => render_cycle(&shared, renderer),
            None => false,
        };

        shared.renderer_latches.end.post();

        // Natural end of range, as opposed to a pause: hand the completion
        // to a detached task so observers cannot stall this thread.
        if finished {
            shared.stop_if_playing();
            tracing::debug!(
                unit_index = shared.renderer_index.load(Ordering::Acquire),
                "playback reached end of range"
            );
            shared.finished.fire_detached();
        }
    }
    tracing::debug!("renderer worker stopped");
}

/// Returns true when the cycle ended because the range was fully rendered.
fn render_cycle(shared: &Shared, renderer: &SharedRenderer) -> bool {
    loop {
        if shared.renderer_index.load(Ordering::Acquire) >= shared.unit_end.load(Ordering::Acquire)
        {
            shared.suspend_renderer.store(true, Ordering::Release);
            return true;
        }

        let Some(slot) = shared.ring.take_data() else {
            return false;
        };
        if shared.suspend_renderer.load(Ordering::Acquire) {
            shared.ring.restore_data(slot);
            return false;
        }

        write_with_retry(renderer, slot.payload());

        shared
            .renderer_index
            .fetch_add(slot.unit_count, Ordering::AcqRel);
        shared.ring.recycle_data(slot);
    }
}

/// Write one frame, backing off once on a busy device. A frame that still
/// fails after the retry is dropped; playback keeps flowing.
fn write_with_retry(renderer: &SharedRenderer, payload: &[u8]) {
    let first = renderer.lock().unwrap().write(payload);
    if let Err(err) = first {
        tracing::debug!("renderer busy, backing off: {err:#}");
        thread::sleep(WRITE_RETRY_DELAY);
        if let Err(err) = renderer.lock().unwrap().write(payload) {
            tracing::warn!("renderer write failed, dropping frame: {err:#}");
        }
    }
}
