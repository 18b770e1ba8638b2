//! Error taxonomy (spec §7).
//!
//! Every fallible operation in this crate returns one of these variants.
//! `TransportWouldBlock` deliberately has no variant here: a [`crate::Channel`]
//! signals "nothing to read yet" with `Ok(0)`, matching the original's
//! `recv() -> 0` steady state, not an error.

use thiserror::Error as ThisError;

/// The NAK reason codes an OSDP PD can send back to a CP, exposed so callers
/// can match on them (e.g. in a `CpEventHandler`) without re-deriving them
/// from the wire byte.
///
/// Codes 7/8 (biometric type/format) are absent: this catalogue has no BIO
/// command for a PD to NAK, matching `osdp_pd.c`, which carries no BIO arm
/// either. An unknown/reserved wire value, this pair included, decodes to
/// `None` rather than panicking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NakCode {
	None = 0,
	MsgCheck = 1,
	CmdLen = 2,
	CmdUnknown = 3,
	SeqNum = 4,
	ScUnsupported = 5,
	ScCondition = 6,
	Record = 9,
}

impl NakCode {
	pub fn from_u8(v: u8) -> Self {
		match v {
			1 => Self::MsgCheck,
			2 => Self::CmdLen,
			3 => Self::CmdUnknown,
			4 => Self::SeqNum,
			5 => Self::ScUnsupported,
			6 => Self::ScCondition,
			9 => Self::Record,
			_ => Self::None,
		}
	}
}

/// Taxonomy of failures the engine can report (spec §7).
#[derive(Debug, ThisError)]
pub enum Error {
	/// The channel returned an error from `send`/`recv`/`flush`, or a
	/// `send` wrote fewer bytes than requested (not all-or-nothing).
	#[error("transport error")]
	Transport,

	/// A parsed frame declared more bytes than are in the scratch buffer
	/// yet; the caller should retry on the next `refresh` with the same
	/// buffer contents. Not fatal, never surfaced across the public API.
	#[error("need more bytes to complete this frame")]
	NeedMore,

	/// Bad SOM/length/CRC: the scratch buffer must be discarded and the
	/// channel flushed.
	#[error("malformed OSDP frame")]
	FrameMalformed,

	/// The sequence number on an inbound frame didn't match what this
	/// side expected.
	#[error("sequence number mismatch")]
	SeqMismatch,

	/// A command/reply record failed length or range validation.
	#[error("invalid command/reply record")]
	RecordInvalid,

	/// The command opcode isn't in the catalogue.
	#[error("unknown command")]
	CmdUnknown,

	/// CHLNG was sent to a PD that doesn't advertise communication
	/// security capability.
	#[error("secure channel not supported by this PD")]
	ScUnsupported,

	/// A secure-channel-requiring command arrived while `secure-active`
	/// was clear, or a MAC/cryptogram failed to verify.
	#[error("secure channel condition not met")]
	ScCondition,

	/// The CP's outstanding transaction timed out waiting for a reply.
	#[error("response timeout")]
	Timeout,

	/// A bounded queue (command/event) is full.
	#[error("queue is full")]
	QueueFull,

	/// The backing file store reported an error during a file transfer.
	#[error("file I/O error")]
	FileIo,

	/// A build operation (packet/record encode) would overflow the
	/// destination buffer. Surfaced, never silently truncated.
	#[error("buffer too small")]
	BufferTooSmall,

	/// The caller passed an out-of-range PD index, address, or similar.
	#[error("invalid argument")]
	InvalidArgument,
}
