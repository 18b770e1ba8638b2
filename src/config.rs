//! Tunable constants collected in one place, the way the teacher gathers
//! kernel-wide settings in its own `config.rs`.

/// Minimum refresh rate the host application must drive `Cp`/`Pd` at.
pub const REFRESH_MIN_HZ: u32 = 20;

/// Default CP→PD poll cadence when no application command is queued.
pub const POLL_INTERVAL_MS: u64 = 50;

/// How long the CP waits for a reply before declaring a timeout.
pub const RESPONSE_TIMEOUT_MS: u64 = 200;

/// How many times the CP retransmits the same outstanding command (same
/// sequence number) after a response timeout before giving up and declaring
/// the PD offline (spec §8 scenario 5, "sequence recovery").
pub const CP_MAX_RETRIES: u8 = 1;

/// How long a PD may go without a valid exchange before the CP marks it
/// offline, and the back-off before the CP reattempts a handshake.
pub const OFFLINE_TIMEOUT_MS: u64 = 8_000;

/// Inter-byte timeout used to discard a stale partial frame.
pub const INTER_BYTE_TIMEOUT_MS: u64 = 20;

/// Capacity of the RX scratch buffer (default profile).
pub const RX_BUF_SIZE: usize = 256;

/// Capacity of a single PD's command queue (CP: outbound, PD: inbound).
pub const COMMAND_QUEUE_DEPTH: usize = 8;

/// Capacity of a single PD's event queue (PD: outbound to CP).
pub const EVENT_QUEUE_DEPTH: usize = 8;

/// Upper bound on PDs a single CP context manages.
pub const MAX_PD_PER_CP: usize = 16;

/// Bound on leading-garbage bytes discarded while hunting for SOM.
pub const SOM_SEARCH_LIMIT: usize = 8;

/// Number of capability function codes defined by the protocol (spec §4.5 /
/// `OSDP_PD_CAP_SENTINEL`), sizing the fixed capability table on
/// [`crate::pd_model::PdRecord`].
pub const NUM_CAP_CODES: usize = 14;

/// Maximum data bytes carried in one `FILETRANSFER` fragment. Bounded so the
/// encoded command (12-byte fragment header + data) still fits under
/// [`crate::secure_channel::MAX_WRAP_PAYLOAD`] once a secure session is
/// active, since a file transfer may run over an already-secured channel.
pub const FILE_FRAGMENT_MAX: usize = 96;
