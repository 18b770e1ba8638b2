//! Shared PD record: the data both [`crate::pd::Pd`] and [`crate::cp::Cp`]
//! operate on (spec §3, §9 "Shared CP/PD internals").
//!
//! The original keeps one `struct osdp_pd` per device and reuses it for
//! both roles so the codec/secure-channel code is written once. This crate
//! keeps that data-model sharing (`PdRecord` is role-agnostic) while giving
//! each role its own type at the public surface (spec §9, "Opaque context
//! pointer").

use bitflags::bitflags;
use heapless::String;

use crate::channel::ChannelId;
use crate::config::NUM_CAP_CODES;
use crate::queue::Queue;
use crate::secure_channel::SessionKeys;

/// Capability function code for communication security support
/// (`OSDP_PD_CAP_COMMUNICATION_SECURITY`), used to gate whether a CP even
/// attempts the secure-channel handshake with a given PD.
pub const CAP_COMMUNICATION_SECURITY: u8 = 9;

bitflags! {
	/// Session/runtime flags carried on a [`PdRecord`] (spec §3 "Session").
	#[derive(Debug, Clone, Copy, PartialEq, Eq)]
	pub struct PdFlags: u16 {
		const ONLINE           = 0b0000_0000_0001;
		const TAMPER           = 0b0000_0000_0010;
		const POWER            = 0b0000_0000_0100;
		const SECURE_ACTIVE    = 0b0000_0000_1000;
		const INSTALL_MODE     = 0b0000_0001_0000;
		const USE_SCBK_D       = 0b0000_0010_0000;
		const PD_ROLE          = 0b0000_0100_0000;
		const ENFORCE_SECURE   = 0b0000_1000_0000;
		const IGN_UNSOLICITED  = 0b0001_0000_0000;
	}
}

/// A capability entry: compliance level and item count for one function
/// code (spec §3 "Capability vector"; function codes per
/// `osdp_pd_cap_function_code_e`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capability {
	pub function_code: u8,
	pub compliance_level: u8,
	pub num_items: u8,
}

/// Static device info reported by `ID`/`REPLY_PDID` (spec §3 "Static info").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceInfo {
	pub vendor_oui: [u8; 3],
	pub model: u8,
	pub version: u8,
	pub serial: [u8; 4],
	pub firmware: [u8; 3],
}

/// In-progress file transfer cursor (spec §3, §4.8).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileTransferState {
	pub active: bool,
	pub file_id: u8,
	pub total_size: u32,
	pub offset: u32,
	pub cancelled: bool,
}

impl FileTransferState {
	/// Bytes left to transfer.
	pub fn remaining(&self) -> u32 {
		self.total_size.saturating_sub(self.offset)
	}

	/// True once `offset` has reached `total_size`, or the transfer was
	/// cancelled mid-stream (spec §4.8 "a cancel flag ... aborts
	/// mid-stream").
	pub fn done(&self) -> bool {
		self.cancelled || (self.active && self.offset >= self.total_size)
	}
}

/// Input/output/reader status bitmaps backing `ISTAT`/`OSTAT`/`RSTAT` replies
/// (spec §4.5). Hardware state is owned by the application; it pushes
/// updates here (e.g. on a GPIO-change interrupt) and the PD state machine
/// echoes whatever is current the next time the corresponding command
/// arrives — there is no separate callback for these, matching
/// `original_source/src/osdp_pd.c::pd_decode_command`'s `CMD_LSTAT`/
/// `CMD_RSTAT` cases, which read straight off PD-record flags rather than
/// asking the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoStatus {
	pub input: heapless::Vec<u8, 8>,
	pub output: heapless::Vec<u8, 8>,
	pub reader: heapless::Vec<u8, 8>,
}

impl Default for IoStatus {
	fn default() -> Self {
		let mut input = heapless::Vec::new();
		let mut output = heapless::Vec::new();
		let mut reader = heapless::Vec::new();
		let _ = input.push(0);
		let _ = output.push(0);
		let _ = reader.push(0);
		Self { input, output, reader }
	}
}

/// One attached device, held by both roles (spec §3 "PD record").
///
/// `N_CMD`/`N_EVT` size the bounded command/event queues; callers
/// instantiate with [`crate::config::COMMAND_QUEUE_DEPTH`]/
/// [`crate::config::EVENT_QUEUE_DEPTH`] unless a profile calls for
/// something else.
pub struct PdRecord<Cmd, Evt, const N_CMD: usize, const N_EVT: usize> {
	pub address: u8,
	pub baud_rate: u32,
	pub channel_id: Option<ChannelId>,
	pub name: String<32>,

	pub info: DeviceInfo,
	pub capabilities: [Capability; NUM_CAP_CODES],

	pub sequence: u8,
	pub last_activity_ms: u64,
	pub flags: PdFlags,

	pub scbk: [u8; 16],
	pub session: SessionKeys,

	pub rx_buf: [u8; crate::config::RX_BUF_SIZE],
	pub rx_len: usize,

	pub command_queue: Queue<Cmd, N_CMD>,
	pub event_queue: Queue<Evt, N_EVT>,

	pub file_transfer: FileTransferState,
	pub io_status: IoStatus,
}

impl<Cmd, Evt, const N_CMD: usize, const N_EVT: usize> PdRecord<Cmd, Evt, N_CMD, N_EVT> {
	pub fn new(address: u8, baud_rate: u32) -> Self {
		Self {
			address,
			baud_rate,
			channel_id: None,
			name: String::new(),
			info: DeviceInfo::default(),
			capabilities: [Capability::default(); NUM_CAP_CODES],
			sequence: 0,
			last_activity_ms: 0,
			flags: PdFlags::empty(),
			scbk: [0u8; 16],
			session: SessionKeys::default(),
			rx_buf: [0u8; crate::config::RX_BUF_SIZE],
			rx_len: 0,
			command_queue: Queue::new(),
			event_queue: Queue::new(),
			file_transfer: FileTransferState::default(),
			io_status: IoStatus::default(),
		}
	}

	/// Replaces the cached input-status bitmap the PD echoes on the next
	/// `ISTAT` (spec §4.5). `bits` must be 1..=8 bytes.
	pub fn set_input_status(&mut self, bits: &[u8]) -> Result<(), crate::error::Error> {
		Self::set_bitmap(&mut self.io_status.input, bits)
	}

	/// Replaces the cached output-status bitmap the PD echoes on the next
	/// `OSTAT`.
	pub fn set_output_status(&mut self, bits: &[u8]) -> Result<(), crate::error::Error> {
		Self::set_bitmap(&mut self.io_status.output, bits)
	}

	/// Replaces the cached reader-status bitmap the PD echoes on the next
	/// `RSTAT`.
	pub fn set_reader_status(&mut self, bits: &[u8]) -> Result<(), crate::error::Error> {
		Self::set_bitmap(&mut self.io_status.reader, bits)
	}

	fn set_bitmap(slot: &mut heapless::Vec<u8, 8>, bits: &[u8]) -> Result<(), crate::error::Error> {
		if bits.is_empty() || bits.len() > 8 {
			return Err(crate::error::Error::InvalidArgument);
		}
		slot.clear();
		slot.extend_from_slice(bits).map_err(|_| crate::error::Error::InvalidArgument)
	}

	/// Looks up the compliance level/item count for a capability function
	/// code, if this PD advertises it.
	pub fn capability(&self, function_code: u8) -> Option<&Capability> {
		self.capabilities
			.iter()
			.find(|c| c.function_code == function_code && c.num_items > 0)
	}

	/// Installs or replaces a capability entry in place (no growth: the
	/// table is fixed-size, one slot per defined function code).
	pub fn set_capability(&mut self, cap: Capability) {
		if let Some(slot) = self
			.capabilities
			.iter_mut()
			.find(|c| c.function_code == cap.function_code)
		{
			*slot = cap;
		} else if let Some(empty) = self.capabilities.iter_mut().find(|c| c.num_items == 0) {
			*empty = cap;
		}
	}

	/// Tears down the secure session: zeroes session keys, clears
	/// `SECURE_ACTIVE`, and resets the RX scratch buffer (spec §7 "Fatal
	/// errors always zero session keys").
	pub fn reset_session(&mut self) {
		self.session.zeroize();
		self.flags.remove(PdFlags::SECURE_ACTIVE);
		self.rx_len = 0;
	}

	/// Advances the sequence counter modulo 4, skipping the reset token
	/// (`0`) once a session is underway (spec §3 invariant 2).
	pub fn advance_sequence(&mut self) {
		self.sequence = if self.sequence == 0 { 1 } else { (self.sequence % 3) + 1 };
	}

	/// Installs a newly provisioned SCBK and clears the provisioning flags
	/// (spec §4.4 "SCBK-D"; spec §3 invariant 4).
	pub fn install_scbk(&mut self, scbk: [u8; 16]) {
		self.scbk = scbk;
		self.flags.remove(PdFlags::INSTALL_MODE);
		self.flags.remove(PdFlags::USE_SCBK_D);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	type TestRecord = PdRecord<u8, u8, 4, 4>;

	#[test]
	fn new_record_starts_offline_and_insecure() {
		let pd = TestRecord::new(1, 9600);
		assert!(!pd.flags.contains(PdFlags::ONLINE));
		assert!(!pd.flags.contains(PdFlags::SECURE_ACTIVE));
		assert_eq!(pd.sequence, 0);
	}

	#[test]
	fn sequence_advances_modulo_four_skipping_zero() {
		let mut pd = TestRecord::new(1, 9600);
		pd.advance_sequence();
		assert_eq!(pd.sequence, 1);
		pd.advance_sequence();
		assert_eq!(pd.sequence, 2);
		pd.advance_sequence();
		assert_eq!(pd.sequence, 3);
		pd.advance_sequence();
		assert_eq!(pd.sequence, 1);
	}

	#[test]
	fn install_scbk_clears_provisioning_flags() {
		let mut pd = TestRecord::new(1, 9600);
		pd.flags.insert(PdFlags::INSTALL_MODE);
		pd.flags.insert(PdFlags::USE_SCBK_D);
		pd.install_scbk([0x42; 16]);
		assert_eq!(pd.scbk, [0x42; 16]);
		assert!(!pd.flags.contains(PdFlags::INSTALL_MODE));
		assert!(!pd.flags.contains(PdFlags::USE_SCBK_D));
	}

	#[test]
	fn reset_session_zeroes_keys_and_clears_secure_active() {
		let mut pd = TestRecord::new(1, 9600);
		pd.flags.insert(PdFlags::SECURE_ACTIVE);
		pd.session.s_enc = [0xAA; 16];
		pd.reset_session();
		assert!(!pd.flags.contains(PdFlags::SECURE_ACTIVE));
		assert_eq!(pd.session.s_enc, [0u8; 16]);
	}

	#[test]
	fn capability_lookup_ignores_zero_item_slots() {
		let mut pd = TestRecord::new(1, 9600);
		pd.set_capability(Capability {
			function_code: 5,
			compliance_level: 1,
			num_items: 2,
		});
		assert!(pd.capability(5).is_some());
		assert!(pd.capability(6).is_none());
	}
}
