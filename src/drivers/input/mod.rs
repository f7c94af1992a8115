/*
 * Input Device Drivers
 *
 * PS/2 keyboard decoding is out of scope here; this module is kept as a
 * placeholder init hook for whatever input path userland ends up using.
 */

/// Initialize input devices
pub fn init() {
    log::info!("Input subsystem ready (no in-kernel device drivers)");
}
