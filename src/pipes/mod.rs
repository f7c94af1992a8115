/*
 * Pipes
 *
 * The filesystem delegate for pipe nodes (out of scope here) routes its
 * read/write/close calls straight through to `pipe`; this module owns
 * nothing about path lookup or file descriptors, only the ring buffers
 * and their reference counts.
 */

pub mod pipe;

pub fn initialize() {
    pipe::initialize();
    log::info!("pipes: initialized");
}
