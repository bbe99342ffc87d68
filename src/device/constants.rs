/**
 * Default transmit timeout (milliseconds) sent to the Pico in the SAFE
 * command right after INIT. The firmware force-unkeys after this long.
 */
pub const DEFAULT_TX_TIMEOUT_MS: u32 = 2500;

/**
 * Default idle timeout (milliseconds) for the SAFE command.
 */
pub const DEFAULT_IDLE_TIMEOUT_MS: u32 = 30000;

/**
 * Bounded size of the session event channel handed to each subscriber.
 */
pub const EVENT_CHANNEL_SIZE: usize = 64;
