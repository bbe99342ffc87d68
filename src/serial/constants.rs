/**
 * Baud rate established by the Pico firmware (8 data bits, 1 stop bit, no parity).
 */
pub const BAUD_RATE: u32 = 9600;

/**
 * How long (milliseconds) a single serial read or write may block. A read
 * that hits this deadline is "no data this iteration", not a failure.
 */
pub const IO_DEADLINE: u64 = 1000;

/**
 * How long (milliseconds) the read loop backs off after a hard read error
 * before trying again.
 */
pub const READ_ERROR_DELAY: u64 = 50;

/**
 * Size of the scratch buffer handed to each serial read.
 */
pub const READ_CHUNK_SIZE: usize = 1024;
